use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    Counters, Trainer,
    core::{Core, check_target, mask_seen},
};
use crate::{
    Result,
    arch::{
        Device, Mode,
        loss::{Bce, Kld, LossFn},
        nets::{Network, VariationalNet},
    },
    checkpoint::Checkpoint,
    optimization::Adam,
};

/// Trains a variational autoencoder on probabilities: binary cross entropy of
/// the reconstruction plus the KL divergence of the posterior from the prior.
pub struct Vae<N, R> {
    core: Core<N, R>,
    bce: Bce,
    kld: Kld,
}

impl<N: VariationalNet, R: Rng> Vae<N, R> {
    /// Creates a new `Vae` with a default `Adam` optimizer on the CPU.
    pub fn new(network: N, rng: R) -> Self {
        Self {
            core: Core::new(network, rng),
            bce: Bce::new(),
            kld: Kld::new(),
        }
    }

    /// Replaces the optimizer with a fresh one using `learning_rate`.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.core.set_learning_rate(learning_rate);
        self
    }

    pub fn network(&self) -> &N {
        &self.core.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.core.network
    }

    pub fn optimizer(&self) -> &Adam {
        &self.core.optimizer
    }

    pub fn device(&self) -> Device {
        self.core.device
    }

    pub fn loss_function(
        &self,
        recon: ArrayView2<f32>,
        x: ArrayView2<f32>,
        mu: ArrayView2<f32>,
        logvar: ArrayView2<f32>,
    ) -> Result<f32> {
        check_target(recon, x)?;
        Ok(self.bce.loss(recon, x) + self.kld.loss(mu, logvar))
    }
}

impl<N: VariationalNet, R: Rng> Trainer for Vae<N, R> {
    type Item = f32;
    type Target = Array2<f32>;
    type Scores = Array2<f32>;

    fn counters(&self) -> Counters {
        self.core.counters
    }

    fn counters_mut(&mut self) -> &mut Counters {
        &mut self.core.counters
    }

    fn train_batch(&mut self, _epoch: usize, x: ArrayView2<f32>, y: &Array2<f32>) -> Result<f32> {
        let Core { network, rng, .. } = &mut self.core;
        network.params_mut().zero_grad();

        let out = network.forward(x, Mode::Train, rng)?;
        let loss = self.loss_function(
            out.recon.view(),
            y.view(),
            out.mu.view(),
            out.logvar.view(),
        )?;

        let d_recon = self.bce.loss_prime(out.recon.view(), y.view());
        let (d_mu, d_logvar) = self.kld.loss_prime(out.mu.view(), out.logvar.view());

        self.core.network.backward(d_recon, d_mu, d_logvar)?;
        self.core.step()?;
        Ok(loss)
    }

    fn predict<'x>(
        &mut self,
        x: ArrayView2<'x, f32>,
        mask: bool,
    ) -> Result<(Array2<f32>, ArrayView2<'x, f32>)> {
        let Core { network, rng, .. } = &mut self.core;
        let mut scores = network.forward(x, Mode::Eval, rng)?.recon;

        if mask {
            mask_seen(&mut scores, x);
        }

        Ok((scores, x))
    }

    fn ranking_scores(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.predict(x, true)?.0)
    }

    fn checkpoint(&self, epoch: usize) -> Checkpoint {
        Checkpoint::Variational(self.core.state(epoch))
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.core
            .restore(checkpoint.network_state(Checkpoint::VARIATIONAL)?)
    }
}

impl<N: Network, R> fmt::Display for Vae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.describe(f, "Vae")?;
        write!(f, ")")
    }
}

impl<N: Network, R> fmt::Debug for Vae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::nets::VaeNet;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn loss_with_encoded_posterior() {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = VaeNet::new(vec![1, 2], Some(vec![2, 1]), &mut rng).unwrap();
        let mut model = Vae::new(net, rng);

        let gt = array![[1., 1.], [2., 1.]];
        let (mu, logvar) = model.network_mut().encode(gt.view()).unwrap();
        let pred = array![[1., 1.], [1., 1.]].mapv(|v: f32| 1. / (1. + (-v).exp()));

        let loss = model
            .loss_function(pred.view(), gt.view(), mu.view(), logvar.view())
            .unwrap();
        assert_ne!(loss, 0.);
        assert_eq!(model.to_string(), format!("{model:?}"));
    }
}
