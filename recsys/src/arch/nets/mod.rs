//! The networks trained by the recommenders, each one owning its parameters.

use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{Mode, ParamStore};
use crate::{MlErr, Result};

mod cfgan;
mod cmulti_vae;
mod latent;
mod multi_dae;
mod svae;
mod vae;

pub use cfgan::{CfganDiscriminator, CfganGenerator};
pub use cmulti_vae::CMultiVaeNet;
pub use latent::{GaussianEncoder, Reparameterize};
pub use multi_dae::MultiDaeNet;
pub use svae::{SvaeNet, SvaeOutput};
pub use vae::{MultiVaeNet, VaeNet};

/// Anything owning a `ParamStore` that can be trained and checkpointed.
pub trait Network: fmt::Display {
    fn params(&self) -> &ParamStore;
    fn params_mut(&mut self) -> &mut ParamStore;
}

/// A network mapping interaction rows to reconstructed score rows.
pub trait AutoEncoderNet: Network {
    /// Width of the score rows produced by `forward`.
    fn n_items(&self) -> usize;

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f32>>;

    /// Accumulates into the parameter gradient the effect of `d`, the delta
    /// w.r.t. the output of the last `forward`.
    fn backward(&mut self, d: Array2<f32>) -> Result<()>;
}

/// The outputs of a variational forward pass.
#[derive(Debug, Clone)]
pub struct VaeOutput {
    pub recon: Array2<f32>,
    pub mu: Array2<f32>,
    pub logvar: Array2<f32>,
}

/// A network encoding rows into a gaussian posterior and decoding a sample of it.
pub trait VariationalNet: Network {
    /// Width of the item part of the input, which is also the output width.
    fn n_items(&self) -> usize;

    /// Returns the posterior `(mu, logvar)` of a batch, without dropout.
    fn encode(&mut self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)>;

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<VaeOutput>;

    /// Accumulates the parameter gradient given the deltas w.r.t. the
    /// reconstruction and, directly, w.r.t. the posterior parameters.
    fn backward(
        &mut self,
        d_recon: Array2<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<()>;
}

/// Resolves the encoder dims of a symmetric autoencoder and checks both ends meet.
fn resolve_enc_dims(dec_dims: &[usize], enc_dims: Option<Vec<usize>>) -> Result<Vec<usize>> {
    let enc_dims = enc_dims.unwrap_or_else(|| dec_dims.iter().rev().copied().collect());

    if dec_dims.len() < 2 || enc_dims.len() < 2 {
        return Err(MlErr::InvalidArchitecture(format!(
            "encoder {enc_dims:?} and decoder {dec_dims:?} need at least two dims each"
        )));
    }

    if enc_dims.first() != dec_dims.last() || enc_dims.last() != dec_dims.first() {
        return Err(MlErr::InvalidArchitecture(format!(
            "encoder {enc_dims:?} does not mirror decoder {dec_dims:?}"
        )));
    }

    Ok(enc_dims)
}

fn check_width(what: &'static str, x: ArrayView2<f32>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        return Err(MlErr::SizeMismatch {
            what,
            got: x.ncols(),
            expected,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_defaults_to_mirror() {
        assert_eq!(resolve_enc_dims(&[1, 2], None).unwrap(), [2, 1]);
        assert!(resolve_enc_dims(&[1, 2], Some(vec![3, 1])).is_err());
        assert!(resolve_enc_dims(&[1], None).is_err());
    }
}
