use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    Counters, Trainer,
    core::{Core, anneal, check_target, mask_seen},
};
use crate::{
    Result,
    arch::{
        Device, Mode,
        loss::{Kld, LossFn, MultinomialNll},
        nets::{CMultiVaeNet, Network, VariationalNet},
    },
    checkpoint::Checkpoint,
    optimization::Adam,
};

/// Trains a variational autoencoder over logits: multinomial likelihood plus
/// the KL divergence weighted by an annealing factor.
///
/// The factor grows linearly with the gradient updates, reaching `beta` after
/// `anneal_steps` updates. With `anneal_steps == 0` it is always `beta`.
pub struct MultiVae<N, R> {
    core: Core<N, R>,
    beta: f32,
    anneal_steps: u64,
    likelihood: MultinomialNll,
    kld: Kld,
}

/// A `MultiVae` over `[items | conditions]` inputs, ranking items only.
pub type CMultiVae<R> = MultiVae<CMultiVaeNet, R>;

impl<N: VariationalNet, R: Rng> MultiVae<N, R> {
    /// Creates a new `MultiVae` with `beta = 1` and no annealing.
    pub fn new(network: N, rng: R) -> Self {
        Self::with_annealing(network, 1., 0, rng)
    }

    /// Creates a new `MultiVae` annealing the KL weight up to `beta` over `anneal_steps` updates.
    pub fn with_annealing(network: N, beta: f32, anneal_steps: u64, rng: R) -> Self {
        Self {
            core: Core::new(network, rng),
            beta,
            anneal_steps,
            likelihood: MultinomialNll::new(),
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

    /// The current weight of the KL term.
    pub fn anneal(&self) -> f32 {
        anneal(self.beta, self.anneal_steps, self.core.counters.gradient_updates)
    }

    pub fn loss_function(
        &self,
        recon: ArrayView2<f32>,
        x: ArrayView2<f32>,
        mu: ArrayView2<f32>,
        logvar: ArrayView2<f32>,
        anneal: f32,
    ) -> Result<f32> {
        check_target(recon, x)?;
        Ok(self.likelihood.loss(recon, x) + anneal * self.kld.loss(mu, logvar))
    }
}

impl<N: VariationalNet, R: Rng> Trainer for MultiVae<N, R> {
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
        let anneal = self.anneal();
        let Core { network, rng, .. } = &mut self.core;
        network.params_mut().zero_grad();

        let out = network.forward(x, Mode::Train, rng)?;
        let loss = self.loss_function(
            out.recon.view(),
            y.view(),
            out.mu.view(),
            out.logvar.view(),
            anneal,
        )?;

        let d_recon = self.likelihood.loss_prime(out.recon.view(), y.view());
        let (d_mu, d_logvar) = self.kld.loss_prime(out.mu.view(), out.logvar.view());

        self.core
            .network
            .backward(d_recon, d_mu * anneal, d_logvar * anneal)?;
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

impl<N: Network, R> fmt::Display for MultiVae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.describe(f, "MultiVae")?;
        write!(f, ", beta={}, anneal_steps={})", self.beta, self.anneal_steps)
    }
}

impl<N: Network, R> fmt::Debug for MultiVae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::nets::MultiVaeNet;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn annealing_follows_updates() {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = MultiVaeNet::new(vec![1, 2], Some(vec![2, 1]), 0.1, &mut rng).unwrap();
        let mut model = MultiVae::with_annealing(net, 1., 4, rng);
        assert_eq!(model.anneal(), 0.);

        let x = array![[1., 0.]];
        model.train_batch(1, x.view(), &x).unwrap();
        model.train_batch(1, x.view(), &x).unwrap();
        assert_eq!(model.anneal(), 0.5);
    }

    #[test]
    fn conditioned_masks_items_only() {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = CMultiVaeNet::new(2, vec![1, 3], None, 0.1, &mut rng).unwrap();
        let mut model: CMultiVae<_> = MultiVae::new(net, rng);

        let x = array![[1., 1., 0., 1., 0.], [1., 0., 0., 0., 1.]];
        let (scores, _) = model.predict(x.view(), true).unwrap();

        assert_eq!(scores.dim(), (2, 3));
        assert_eq!(scores[[0, 1]], f32::NEG_INFINITY);
        assert!(scores[[0, 2]].is_finite());
        assert!(scores[[1, 1]].is_finite());
    }

    #[test]
    fn conditioned_loss_is_not_zero() {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = CMultiVaeNet::new(2, vec![1, 3], None, 0.1, &mut rng).unwrap();
        let mut model: CMultiVae<_> = MultiVae::new(net, rng);

        let x = array![[1., 1., 0., 1., 0.], [1., 0., 0., 0., 1.]];
        let gt = array![[1., 1., 1.], [2., 1., 1.]];
        let (mu, logvar) = model.network_mut().encode(x.view()).unwrap();
        let pred = array![[1., 1., 1.], [1., 1., 1.]].mapv(|v: f32| 1. / (1. + (-v).exp()));

        let loss = model
            .loss_function(pred.view(), gt.view(), mu.view(), logvar.view(), model.anneal())
            .unwrap();
        assert_ne!(loss, 0.);
    }
}
