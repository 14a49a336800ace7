use std::fmt;

use ndarray::{Array2, Array3, ArrayView2};
use rand::Rng;

use super::{GaussianEncoder, Network, Reparameterize};
use crate::{
    MlErr, Result,
    arch::{
        Mode, ParamStore, Sequential,
        activations::ActFn,
        layers::{Embedding, Gru},
    },
};

/// The outputs of a sequential variational forward pass, one row per
/// `(user, step)` pair in row-major order.
#[derive(Debug, Clone)]
pub struct SvaeOutput {
    pub logits: Array3<f32>,
    pub mu: Array2<f32>,
    pub logvar: Array2<f32>,
}

/// Sequential VAE: item embeddings run through a GRU, and every hidden state is
/// encoded into a gaussian posterior whose sample is decoded into logits over
/// the next items.
#[derive(Debug, Clone)]
pub struct SvaeNet {
    params: ParamStore,
    n_items: usize,
    dec_dims: Vec<usize>,
    enc_dims: Vec<usize>,
    embedding: Embedding,
    gru: Gru,
    encoder: GaussianEncoder,
    reparam: Reparameterize,
    decoder: Sequential,
}

impl SvaeNet {
    /// Creates a new `SvaeNet`.
    ///
    /// # Arguments
    /// * `n_items` - Size of the item vocabulary.
    /// * `embed_size` - Width of the item embeddings.
    /// * `rnn_size` - Width of the GRU hidden state.
    /// * `dec_dims` - Decoder widths, from the latent size to `n_items`.
    /// * `enc_dims` - Encoder widths after the GRU, ending in the latent size.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        n_items: usize,
        embed_size: usize,
        rnn_size: usize,
        dec_dims: Vec<usize>,
        enc_dims: Vec<usize>,
        rng: &mut R,
    ) -> Result<Self> {
        if enc_dims.last() != dec_dims.first() || dec_dims.last() != Some(&n_items) {
            return Err(MlErr::InvalidArchitecture(format!(
                "encoder {enc_dims:?} and decoder {dec_dims:?} do not fit {n_items} items"
            )));
        }

        let mut params = ParamStore::new();
        let embedding = Embedding::new(&mut params, n_items, embed_size, rng)?;
        let gru = Gru::new(&mut params, embed_size, rnn_size, rng)?;

        let mut enc_widths = vec![rnn_size];
        enc_widths.extend(&enc_dims);
        let encoder = GaussianEncoder::new(&mut params, &enc_widths, rng)?;
        let decoder =
            Sequential::from_dims(&mut params, &dec_dims, Some(ActFn::tanh()), None, rng)?;

        Ok(Self {
            params,
            n_items,
            dec_dims,
            enc_dims,
            embedding,
            gru,
            encoder,
            reparam: Reparameterize::default(),
            decoder,
        })
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Runs a `(batch, steps)` matrix of item indices through the network.
    pub fn forward<R: Rng + ?Sized>(
        &mut self,
        idx: ArrayView2<usize>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<SvaeOutput> {
        let (batch, steps) = idx.dim();
        let params = self.params.values();

        let emb = self.embedding.forward(params, idx)?;
        let h = self.gru.forward(params, &emb)?;
        let h = h.into_shape_clone((batch * steps, self.gru.hidden()))?;

        let (mu, logvar) = self.encoder.forward(params, h.view())?;
        let z = self.reparam.forward(&mu, &logvar, mode, rng);
        let logits = self.decoder.forward(params, z.view())?;
        let logits = logits.into_shape_clone((batch, steps, self.n_items))?;

        Ok(SvaeOutput { logits, mu, logvar })
    }

    /// Accumulates the parameter gradient given the deltas w.r.t. the logits
    /// and, directly, w.r.t. the posterior parameters.
    pub fn backward(
        &mut self,
        d_logits: Array3<f32>,
        d_mu: Array2<f32>,
        d_logvar: Array2<f32>,
    ) -> Result<()> {
        let (batch, steps, items) = d_logits.dim();
        let (params, grad) = self.params.split_mut();

        let d = d_logits.into_shape_clone((batch * steps, items))?;
        let d_z = self.decoder.backward(params, grad, d)?;

        let (dz_mu, dz_logvar) = self.reparam.backward(&d_z);
        let d_mu = d_mu + &dz_mu;
        let d_logvar = d_logvar + &dz_logvar;
        let d_h = self.encoder.backward(params, grad, &d_mu, &d_logvar)?;

        let d_h = d_h.into_shape_clone((batch, steps, self.gru.hidden()))?;
        let d_emb = self.gru.backward(params, grad, &d_h)?;
        self.embedding.backward(grad, &d_emb)
    }
}

impl Network for SvaeNet {
    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }
}

impl fmt::Display for SvaeNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SvaeNet(n_items={}, embed_size={}, rnn_size={}, dec_dims={:?}, enc_dims={:?})",
            self.n_items,
            self.embedding.size(),
            self.gru.hidden(),
            self.dec_dims,
            self.enc_dims
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn net(rng: &mut StdRng) -> SvaeNet {
        SvaeNet::new(7, 2, 2, vec![2, 7], vec![2, 2], rng).unwrap()
    }

    #[test]
    fn per_step_scores() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = net(&mut rng);

        let out = net.forward(array![[1, 2, 5]].view(), Mode::Eval, &mut rng).unwrap();
        assert_eq!(out.logits.dim(), (1, 3, 7));
        assert_eq!(out.mu.dim(), (3, 2));
        assert_eq!(
            net.to_string(),
            "SvaeNet(n_items=7, embed_size=2, rnn_size=2, dec_dims=[2, 7], enc_dims=[2, 2])"
        );
    }

    #[test]
    fn backward_reaches_embeddings() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = net(&mut rng);

        let out = net.forward(array![[1, 2, 5]].view(), Mode::Train, &mut rng).unwrap();
        let d_logits = Array3::ones(out.logits.dim());
        let d_mu = Array2::zeros(out.mu.dim());
        let d_logvar = Array2::zeros(out.logvar.dim());
        net.backward(d_logits, d_mu, d_logvar).unwrap();

        // rows 1, 2 and 5 of the embedding table
        let grad = net.params().grad();
        assert!(grad[2..4].iter().any(|&g| g != 0.));
        assert!(grad[..2].iter().all(|&g| g == 0.));
    }

    #[test]
    fn single_unit_encoder_backward() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut net = SvaeNet::new(7, 2, 2, vec![2, 7], vec![1, 2], &mut rng).unwrap();

        let out = net.forward(array![[1, 2, 5], [0, 3, 6]].view(), Mode::Train, &mut rng).unwrap();
        assert_eq!(out.logits.dim(), (2, 3, 7));

        let d_logits = Array3::ones(out.logits.dim());
        let d_mu = Array2::ones(out.mu.dim());
        let d_logvar = Array2::ones(out.logvar.dim());
        net.backward(d_logits, d_mu, d_logvar).unwrap();
        assert!(net.params().grad().iter().any(|&g| g != 0.));
    }

    #[test]
    fn mismatched_dims() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(SvaeNet::new(7, 2, 2, vec![2, 6], vec![2, 2], &mut rng).is_err());
        assert!(SvaeNet::new(7, 2, 2, vec![3, 7], vec![2, 2], &mut rng).is_err());
    }
}
