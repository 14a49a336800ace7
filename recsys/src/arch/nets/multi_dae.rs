use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{AutoEncoderNet, Network, check_width, resolve_enc_dims};
use crate::{
    Result,
    arch::{
        Mode, ParamStore, Sequential,
        activations::ActFn,
        layers::{Dropout, normalize_rows},
    },
};

/// Denoising autoencoder over normalized interaction rows.
///
/// Every encoder layer and every hidden decoder layer uses tanh; the last
/// decoder layer is linear, producing logits.
#[derive(Debug, Clone)]
pub struct MultiDaeNet {
    params: ParamStore,
    dec_dims: Vec<usize>,
    enc_dims: Vec<usize>,
    dropout: Dropout,
    encoder: Sequential,
    decoder: Sequential,
}

impl MultiDaeNet {
    /// Creates a new `MultiDaeNet`.
    ///
    /// # Arguments
    /// * `dec_dims` - Decoder widths, from the latent size to the number of items.
    /// * `enc_dims` - Encoder widths, from the number of items to the latent size.
    ///   Defaults to `dec_dims` reversed.
    /// * `dropout` - Probability of dropping each input entry while training.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        dec_dims: Vec<usize>,
        enc_dims: Option<Vec<usize>>,
        dropout: f32,
        rng: &mut R,
    ) -> Result<Self> {
        let enc_dims = resolve_enc_dims(&dec_dims, enc_dims)?;
        let dropout = Dropout::new(dropout)?;
        let tanh = Some(ActFn::tanh());

        let mut params = ParamStore::new();
        let encoder = Sequential::from_dims(&mut params, &enc_dims, tanh, tanh, rng)?;
        let decoder = Sequential::from_dims(&mut params, &dec_dims, tanh, None, rng)?;

        Ok(Self {
            params,
            dec_dims,
            enc_dims,
            dropout,
            encoder,
            decoder,
        })
    }
}

impl Network for MultiDaeNet {
    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }
}

impl AutoEncoderNet for MultiDaeNet {
    fn n_items(&self) -> usize {
        self.enc_dims[0]
    }

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        check_width("autoencoder input width", x, self.n_items())?;

        let h = normalize_rows(x.to_owned());
        let h = self.dropout.forward(h, mode, rng)?;
        let h = self.encoder.forward(self.params.values(), h.view())?;
        self.decoder.forward(self.params.values(), h.view())
    }

    fn backward(&mut self, d: Array2<f32>) -> Result<()> {
        let (params, grad) = self.params.split_mut();
        let d = self.decoder.backward(params, grad, d)?;
        self.encoder.backward(params, grad, d)?;
        Ok(())
    }
}

impl fmt::Display for MultiDaeNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MultiDaeNet(dec_dims={:?}, enc_dims={:?}, dropout={})",
            self.dec_dims,
            self.enc_dims,
            self.dropout.p()
        )
    }
}
