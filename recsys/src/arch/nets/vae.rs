use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    GaussianEncoder, Network, Reparameterize, VaeOutput, VariationalNet, check_width,
    resolve_enc_dims,
};
use crate::{
    Result,
    arch::{
        Mode, ParamStore, Sequential,
        activations::ActFn,
        layers::{Dropout, normalize_rows},
    },
};

/// Encoder, sampler and decoder shared by the variational networks.
#[derive(Debug, Clone)]
pub(super) struct VariationalStack {
    pub(super) params: ParamStore,
    pub(super) encoder: GaussianEncoder,
    pub(super) reparam: Reparameterize,
    pub(super) decoder: Sequential,
}

impl VariationalStack {
    pub(super) fn new<R: Rng + ?Sized>(
        enc_dims: &[usize],
        dec_dims: &[usize],
        output: Option<ActFn>,
        rng: &mut R,
    ) -> Result<Self> {
        let mut params = ParamStore::new();
        let encoder = GaussianEncoder::new(&mut params, enc_dims, rng)?;
        let decoder =
            Sequential::from_dims(&mut params, dec_dims, Some(ActFn::tanh()), output, rng)?;

        Ok(Self {
            params,
            encoder,
            reparam: Reparameterize::default(),
            decoder,
        })
    }

    pub(super) fn encode(&mut self, h: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        self.encoder.forward(self.params.values(), h)
    }

    pub(super) fn sample<R: Rng + ?Sized>(
        &mut self,
        mu: &Array2<f32>,
        logvar: &Array2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Array2<f32> {
        self.reparam.forward(mu, logvar, mode, rng)
    }

    pub(super) fn decode(&mut self, z: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.decoder.forward(self.params.values(), z)
    }

    /// Backpropagates through the decoder only, returning the delta w.r.t. its input.
    pub(super) fn backward_decoder(&mut self, d_recon: Array2<f32>) -> Result<Array2<f32>> {
        let (params, grad) = self.params.split_mut();
        self.decoder.backward(params, grad, d_recon)
    }

    /// Backpropagates the delta w.r.t. `z` through the sampler and the encoder,
    /// adding the direct deltas on `mu` and `logvar`.
    pub(super) fn backward_encoder(
        &mut self,
        d_z: &Array2<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (dz_mu, dz_logvar) = self.reparam.backward(d_z);
        let d_mu = d_mu + &dz_mu;
        let d_logvar = d_logvar + &dz_logvar;

        let (params, grad) = self.params.split_mut();
        self.encoder.backward(params, grad, &d_mu, &d_logvar)
    }
}

/// Variational autoencoder with a sigmoid output, reconstructing probabilities.
#[derive(Debug, Clone)]
pub struct VaeNet {
    dec_dims: Vec<usize>,
    enc_dims: Vec<usize>,
    stack: VariationalStack,
}

impl VaeNet {
    /// Creates a new `VaeNet`.
    ///
    /// # Arguments
    /// * `dec_dims` - Decoder widths, from the latent size to the number of items.
    /// * `enc_dims` - Encoder widths, from the number of items to the latent size.
    ///   Defaults to `dec_dims` reversed.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        dec_dims: Vec<usize>,
        enc_dims: Option<Vec<usize>>,
        rng: &mut R,
    ) -> Result<Self> {
        let enc_dims = resolve_enc_dims(&dec_dims, enc_dims)?;
        let stack = VariationalStack::new(&enc_dims, &dec_dims, Some(ActFn::sigmoid()), rng)?;

        Ok(Self {
            dec_dims,
            enc_dims,
            stack,
        })
    }
}

impl Network for VaeNet {
    fn params(&self) -> &ParamStore {
        &self.stack.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.stack.params
    }
}

impl VariationalNet for VaeNet {
    fn n_items(&self) -> usize {
        self.enc_dims[0]
    }

    fn encode(&mut self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_width("vae input width", x, self.n_items())?;
        self.stack.encode(x)
    }

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<VaeOutput> {
        let (mu, logvar) = self.encode(x)?;
        let z = self.stack.sample(&mu, &logvar, mode, rng);
        let recon = self.stack.decode(z.view())?;
        Ok(VaeOutput { recon, mu, logvar })
    }

    fn backward(
        &mut self,
        d_recon: Array2<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<()> {
        let d_z = self.stack.backward_decoder(d_recon)?;
        self.stack.backward_encoder(&d_z, d_mu, d_logvar)?;
        Ok(())
    }
}

impl fmt::Display for VaeNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaeNet(dec_dims={:?}, enc_dims={:?})", self.dec_dims, self.enc_dims)
    }
}

/// Variational autoencoder over normalized, dropped out rows, decoding logits
/// for a multinomial likelihood.
#[derive(Debug, Clone)]
pub struct MultiVaeNet {
    dec_dims: Vec<usize>,
    enc_dims: Vec<usize>,
    dropout: Dropout,
    stack: VariationalStack,
}

impl MultiVaeNet {
    /// Creates a new `MultiVaeNet`.
    ///
    /// # Arguments
    /// * `dec_dims` - Decoder widths, from the latent size to the number of items.
    /// * `enc_dims` - Encoder widths, defaulting to `dec_dims` reversed.
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
        let stack = VariationalStack::new(&enc_dims, &dec_dims, None, rng)?;

        Ok(Self {
            dec_dims,
            enc_dims,
            dropout,
            stack,
        })
    }
}

impl Network for MultiVaeNet {
    fn params(&self) -> &ParamStore {
        &self.stack.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.stack.params
    }
}

impl VariationalNet for MultiVaeNet {
    fn n_items(&self) -> usize {
        self.enc_dims[0]
    }

    fn encode(&mut self, x: ArrayView2<f32>) -> Result<(Array2<f32>, Array2<f32>)> {
        check_width("vae input width", x, self.n_items())?;
        let h = normalize_rows(x.to_owned());
        self.stack.encode(h.view())
    }

    fn forward<R: Rng + ?Sized>(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<VaeOutput> {
        check_width("vae input width", x, self.n_items())?;
        let h = normalize_rows(x.to_owned());
        let h = self.dropout.forward(h, mode, rng)?;

        let (mu, logvar) = self.stack.encode(h.view())?;
        let z = self.stack.sample(&mu, &logvar, mode, rng);
        let recon = self.stack.decode(z.view())?;
        Ok(VaeOutput { recon, mu, logvar })
    }

    fn backward(
        &mut self,
        d_recon: Array2<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<()> {
        let d_z = self.stack.backward_decoder(d_recon)?;
        self.stack.backward_encoder(&d_z, d_mu, d_logvar)?;
        Ok(())
    }
}

impl fmt::Display for MultiVaeNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MultiVaeNet(dec_dims={:?}, enc_dims={:?}, dropout={})",
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

    #[test]
    fn vae_outputs_probabilities() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = VaeNet::new(vec![1, 2], Some(vec![2, 1]), &mut rng).unwrap();

        let out = net
            .forward(array![[1., 1.], [2., 1.]].view(), Mode::Train, &mut rng)
            .unwrap();
        assert_eq!(out.recon.dim(), (2, 2));
        assert_eq!(out.mu.dim(), (2, 1));
        assert!(out.recon.iter().all(|&p| (0. ..=1.).contains(&p)));
    }

    #[test]
    fn encode_matches_eval_forward() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = MultiVaeNet::new(vec![2, 5], None, 0.3, &mut rng).unwrap();
        let x = array![[1., 0., 0., 1., 1.]];

        let (mu, logvar) = net.encode(x.view()).unwrap();
        let out = net.forward(x.view(), Mode::Eval, &mut rng).unwrap();
        assert_eq!(mu, out.mu);
        assert_eq!(logvar, out.logvar);
    }

    #[test]
    fn backward_fills_every_tensor() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = MultiVaeNet::new(vec![2, 3], None, 0., &mut rng).unwrap();

        let out = net
            .forward(array![[1., 0., 1.]].view(), Mode::Train, &mut rng)
            .unwrap();
        let d_recon = Array2::ones(out.recon.dim());
        let d_mu = Array2::ones(out.mu.dim());
        let d_logvar = Array2::ones(out.logvar.dim());
        net.backward(d_recon, d_mu, d_logvar).unwrap();

        assert!(net.params().grad().iter().filter(|&&g| g != 0.).count() > net.params().len() / 2);
    }
}
