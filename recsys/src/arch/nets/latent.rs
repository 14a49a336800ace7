use std::fmt;

use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{Mode, ParamStore, Sequential, activations::ActFn},
};

/// A tanh stack whose last layer emits `[mu | logvar]` for a diagonal gaussian.
#[derive(Debug, Clone)]
pub struct GaussianEncoder {
    stack: Sequential,
    latent: usize,
}

impl GaussianEncoder {
    /// Builds the encoder from the widths `dims`, input first and latent size last.
    pub fn new<R: Rng + ?Sized>(
        store: &mut ParamStore,
        dims: &[usize],
        rng: &mut R,
    ) -> Result<Self> {
        let Some((&latent, hidden)) = dims.split_last() else {
            return Err(MlErr::InvalidArchitecture("empty encoder dims".into()));
        };

        let mut widths = hidden.to_vec();
        widths.push(2 * latent);
        let stack = Sequential::from_dims(store, &widths, Some(ActFn::tanh()), None, rng)?;

        Ok(Self { stack, latent })
    }

    pub fn latent(&self) -> usize {
        self.latent
    }

    pub fn forward(
        &mut self,
        params: &[f32],
        x: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let h = self.stack.forward(params, x)?;
        let mu = h.slice(s![.., ..self.latent]).to_owned();
        let logvar = h.slice(s![.., self.latent..]).to_owned();
        Ok((mu, logvar))
    }

    /// Returns the delta w.r.t. the encoder input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d_mu: &Array2<f32>,
        d_logvar: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let d = concatenate(Axis(1), &[d_mu.view(), d_logvar.view()])?;
        self.stack.backward(params, grad, d)
    }
}

impl fmt::Display for GaussianEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stack)
    }
}

/// `z = mu + eps * exp(logvar / 2)` with `eps ~ N(0, I)` while training, `z = mu` otherwise.
#[derive(Debug, Clone)]
pub struct Reparameterize {
    scaled_eps: Array2<f32>,
}

impl Default for Reparameterize {
    fn default() -> Self {
        Self {
            scaled_eps: Array2::zeros((0, 0)),
        }
    }
}

impl Reparameterize {
    pub fn forward<R: Rng + ?Sized>(
        &mut self,
        mu: &Array2<f32>,
        logvar: &Array2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Array2<f32> {
        match mode {
            Mode::Train => {
                let eps = Array2::<f32>::random_using(mu.raw_dim(), StandardNormal, rng);
                self.scaled_eps = eps * &logvar.mapv(|lv| (0.5 * lv).exp());
                mu + &self.scaled_eps
            }
            Mode::Eval => {
                self.scaled_eps = Array2::zeros(mu.raw_dim());
                mu.clone()
            }
        }
    }

    /// Splits the delta w.r.t. `z` into the deltas w.r.t. `mu` and `logvar`.
    pub fn backward(&self, d_z: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
        let d_logvar = d_z * &self.scaled_eps * 0.5;
        (d_z.clone(), d_logvar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn encoder_splits_head() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut store = ParamStore::new();
        let mut enc = GaussianEncoder::new(&mut store, &[4, 3, 2], &mut rng).unwrap();

        let (mu, logvar) = enc.forward(store.values(), Array2::ones((5, 4)).view()).unwrap();
        assert_eq!(mu.dim(), (5, 2));
        assert_eq!(logvar.dim(), (5, 2));
        assert_eq!(enc.to_string(), "Dense(4, 3, tanh) -> Dense(3, 4)");
    }

    #[test]
    fn eval_mode_is_the_mean() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut reparam = Reparameterize::default();
        let mu = array![[1., -2.]];
        let logvar = array![[0.5, 0.5]];

        assert_eq!(reparam.forward(&mu, &logvar, Mode::Eval, &mut rng), mu);

        let (d_mu, d_logvar) = reparam.backward(&array![[1., 1.]]);
        assert_eq!(d_mu, array![[1., 1.]]);
        assert_eq!(d_logvar, array![[0., 0.]]);
    }

    #[test]
    fn train_mode_samples() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut reparam = Reparameterize::default();
        let mu = Array2::zeros((1, 8));
        let logvar = Array2::zeros((1, 8));

        let z = reparam.forward(&mu, &logvar, Mode::Train, &mut rng);
        assert!(z.iter().any(|&v| v != 0.));
    }
}
