use std::fmt;

use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use rand::Rng;

use super::{
    Network, VaeOutput, VariationalNet, check_width, resolve_enc_dims, vae::VariationalStack,
};
use crate::{
    MlErr, Result,
    arch::{
        Mode, ParamStore,
        layers::{Dropout, normalize_rows},
    },
};

/// Conditioned multinomial VAE.
///
/// Inputs are `[items | conditions]` rows. The item part is normalized and
/// dropped out, then the conditions are appended both to the encoder input
/// and to the latent sample fed to the decoder. Outputs are item logits.
#[derive(Debug, Clone)]
pub struct CMultiVaeNet {
    cond_dim: usize,
    dec_dims: Vec<usize>,
    enc_dims: Vec<usize>,
    dropout: Dropout,
    stack: VariationalStack,
}

impl CMultiVaeNet {
    /// Creates a new `CMultiVaeNet`.
    ///
    /// # Arguments
    /// * `cond_dim` - The number of conditions.
    /// * `dec_dims` - Decoder widths, from the latent size to the number of items.
    /// * `enc_dims` - Encoder widths, defaulting to `dec_dims` reversed. Neither
    ///   includes the conditions.
    /// * `dropout` - Probability of dropping each item entry while training.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        cond_dim: usize,
        dec_dims: Vec<usize>,
        enc_dims: Option<Vec<usize>>,
        dropout: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if cond_dim == 0 {
            return Err(MlErr::InvalidArchitecture(
                "a conditioned vae needs at least one condition".into(),
            ));
        }

        let enc_dims = resolve_enc_dims(&dec_dims, enc_dims)?;
        let dropout = Dropout::new(dropout)?;

        let mut enc_widths = enc_dims.clone();
        enc_widths[0] += cond_dim;
        let mut dec_widths = dec_dims.clone();
        dec_widths[0] += cond_dim;
        let stack = VariationalStack::new(&enc_widths, &dec_widths, None, rng)?;

        Ok(Self {
            cond_dim,
            dec_dims,
            enc_dims,
            dropout,
            stack,
        })
    }

    pub fn cond_dim(&self) -> usize {
        self.cond_dim
    }

    fn latent(&self) -> usize {
        self.dec_dims[0]
    }

    fn encode_parts(
        &mut self,
        items: Array2<f32>,
        cond: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let h = concatenate(Axis(1), &[items.view(), cond])?;
        self.stack.encode(h.view())
    }
}

impl Network for CMultiVaeNet {
    fn params(&self) -> &ParamStore {
        &self.stack.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.stack.params
    }
}

impl VariationalNet for CMultiVaeNet {
    fn n_items(&self) -> usize {
        self.enc_dims[0]
    }

    fn encode(&mut self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        let n = self.n_items();
        check_width("conditioned input width", x, n + self.cond_dim)?;

        let items = normalize_rows(x.slice(s![.., ..n]).to_owned());
        self.encode_parts(items, x.slice(s![.., n..]))
    }

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<VaeOutput> {
        let n = self.n_items();
        check_width("conditioned input width", x, n + self.cond_dim)?;

        let cond = x.slice(s![.., n..]);
        let items = normalize_rows(x.slice(s![.., ..n]).to_owned());
        let items = self.dropout.forward(items, mode, rng)?;

        let (mu, logvar) = self.encode_parts(items, cond)?;
        let z = self.stack.sample(&mu, &logvar, mode, rng);
        let z = concatenate(Axis(1), &[z.view(), cond])?;
        let recon = self.stack.decode(z.view())?;

        Ok(VaeOutput { recon, mu, logvar })
    }

    fn backward(
        &mut self,
        d_recon: Array2<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<()> {
        let d_zc = self.stack.backward_decoder(d_recon)?;
        let d_z = d_zc.slice(s![.., ..self.latent()]).to_owned();
        self.stack.backward_encoder(&d_z, d_mu, d_logvar)?;
        Ok(())
    }
}

impl fmt::Display for CMultiVaeNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CMultiVaeNet(cond_dim={}, dec_dims={:?}, enc_dims={:?}, dropout={})",
            self.cond_dim,
            self.dec_dims,
            self.enc_dims,
            self.dropout.p()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn net(rng: &mut StdRng) -> CMultiVaeNet {
        CMultiVaeNet::new(2, vec![1, 3], None, 0.1, rng).unwrap()
    }

    #[test]
    fn output_covers_items_only() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = net(&mut rng);
        let x = array![[1., 1., 0., 1., 0.], [1., 0., 0., 0., 1.]];

        let out = net.forward(x.view(), Mode::Train, &mut rng).unwrap();
        assert_eq!(out.recon.dim(), (2, 3));
        assert_eq!(out.mu.dim(), (2, 1));

        let (mu, _) = net.encode(x.view()).unwrap();
        assert_eq!(mu.dim(), (2, 1));
    }

    #[test]
    fn condition_changes_scores() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = net(&mut rng);
        let a = net
            .forward(array![[1., 1., 0., 1., 0.]].view(), Mode::Eval, &mut rng)
            .unwrap();
        let b = net
            .forward(array![[1., 1., 0., 0., 1.]].view(), Mode::Eval, &mut rng)
            .unwrap();

        assert_ne!(a.recon, b.recon);
    }

    #[test]
    fn rejects_missing_conditions() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = net(&mut rng);
        assert!(net.encode(array![[1., 1., 0.]].view()).is_err());
    }
}
