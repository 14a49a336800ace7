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
        loss::{LossFn, MultinomialNll},
        nets::{AutoEncoderNet, Network},
    },
    checkpoint::Checkpoint,
    optimization::Adam,
};

pub const DEFAULT_LAM: f32 = 0.2;

/// Trains a denoising autoencoder under the multinomial likelihood, with a
/// penalty of `lam` times the sum of the euclidean norms of every parameter tensor.
pub struct MultiDae<N, R> {
    core: Core<N, R>,
    lam: f32,
    loss: MultinomialNll,
}

impl<N: AutoEncoderNet, R: Rng> MultiDae<N, R> {
    /// Creates a new `MultiDae` with the default penalty weight.
    pub fn new(network: N, rng: R) -> Self {
        Self::with_lam(network, DEFAULT_LAM, rng)
    }

    /// Creates a new `MultiDae` penalizing parameter norms with weight `lam`.
    pub fn with_lam(network: N, lam: f32, rng: R) -> Self {
        Self {
            core: Core::new(network, rng),
            lam,
            loss: MultinomialNll::new(),
        }
    }

    /// Replaces the optimizer with a fresh one using `learning_rate`.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.core.set_learning_rate(learning_rate);
        self
    }

    pub fn lam(&self) -> f32 {
        self.lam
    }

    pub fn network(&self) -> &N {
        &self.core.network
    }

    pub fn optimizer(&self) -> &Adam {
        &self.core.optimizer
    }

    pub fn device(&self) -> Device {
        self.core.device
    }

    /// The multinomial negative log likelihood of `gt` under the logits `pred`,
    /// plus the norm penalty of the current parameters.
    pub fn loss_function(&self, pred: ArrayView2<f32>, gt: ArrayView2<f32>) -> Result<f32> {
        check_target(pred, gt)?;
        let penalty = self.lam * self.core.network.params().l2_norm_sum();
        Ok(self.loss.loss(pred, gt) + penalty)
    }
}

impl<N: AutoEncoderNet, R: Rng> Trainer for MultiDae<N, R> {
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

        let pred = network.forward(x, Mode::Train, rng)?;
        let loss = self.loss_function(pred.view(), y.view())?;
        let d = self.loss.loss_prime(pred.view(), y.view());

        self.core.network.backward(d)?;
        self.core.network.params_mut().add_l2_norm_grad(self.lam);
        self.core.step()?;
        Ok(loss)
    }

    fn predict<'x>(
        &mut self,
        x: ArrayView2<'x, f32>,
        mask: bool,
    ) -> Result<(Array2<f32>, ArrayView2<'x, f32>)> {
        let Core { network, rng, .. } = &mut self.core;
        let mut scores = network.forward(x, Mode::Eval, rng)?;

        if mask {
            mask_seen(&mut scores, x);
        }

        Ok((scores, x))
    }

    fn ranking_scores(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.predict(x, true)?.0)
    }

    fn checkpoint(&self, epoch: usize) -> Checkpoint {
        Checkpoint::Autoencoder(self.core.state(epoch))
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.core
            .restore(checkpoint.network_state(Checkpoint::AUTOENCODER)?)
    }
}

impl<N: Network, R> fmt::Display for MultiDae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.describe(f, "MultiDae")?;
        write!(f, ", lam={})", self.lam)
    }
}

impl<N: Network, R> fmt::Debug for MultiDae<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::nets::MultiDaeNet;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn trainer() -> MultiDae<MultiDaeNet, StdRng> {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = MultiDaeNet::new(vec![1, 2], Some(vec![2, 1]), 0.1, &mut rng).unwrap();
        MultiDae::new(net, rng)
    }

    #[test]
    fn default_lam() {
        let model = trainer();
        assert_eq!(model.lam(), 0.2);
        assert!(model.to_string().ends_with("lam=0.2)"));
    }

    #[test]
    fn loss_is_not_zero() {
        let model = trainer();
        let gt = array![[1., 1.], [2., 1.]];
        let pred = array![[1., 1.], [1., 1.]];

        assert_ne!(model.loss_function(pred.view(), gt.view()).unwrap(), 0.);
    }

    #[test]
    fn training_reduces_the_penalty() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = MultiDaeNet::new(vec![1, 2], None, 0., &mut rng).unwrap();
        let mut model = MultiDae::with_lam(net, 10., rng).with_learning_rate(0.05);
        let before = model.network().params().l2_norm_sum();

        let x = array![[1., 0.]];
        for epoch in 0..20 {
            model.train_batch(epoch, x.view(), &x).unwrap();
        }

        assert!(model.network().params().l2_norm_sum() < before);
        assert_eq!(model.gradient_updates(), 20);
    }
}
