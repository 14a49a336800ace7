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
        loss::{LossFn, Mse},
        nets::{AutoEncoderNet, Network},
    },
    checkpoint::Checkpoint,
    optimization::Adam,
};

/// Trains an autoencoder to reconstruct its input under the mean squared error.
pub struct AeTrainer<N, R> {
    core: Core<N, R>,
    loss: Mse,
}

impl<N: AutoEncoderNet, R: Rng> AeTrainer<N, R> {
    /// Creates a new `AeTrainer` with a default `Adam` optimizer on the CPU.
    ///
    /// # Arguments
    /// * `network` - The network to train.
    /// * `rng` - Drives every stochastic layer of the network.
    pub fn new(network: N, rng: R) -> Self {
        Self {
            core: Core::new(network, rng),
            loss: Mse::new(),
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

    pub fn optimizer(&self) -> &Adam {
        &self.core.optimizer
    }

    pub fn device(&self) -> Device {
        self.core.device
    }

    /// The mean squared error between a prediction and its ground truth.
    pub fn loss_function(&self, pred: ArrayView2<f32>, gt: ArrayView2<f32>) -> Result<f32> {
        check_target(pred, gt)?;
        Ok(self.loss.loss(pred, gt))
    }
}

impl<N: AutoEncoderNet, R: Rng> Trainer for AeTrainer<N, R> {
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

impl<N: Network, R> fmt::Display for AeTrainer<N, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.describe(f, "AeTrainer")?;
        write!(f, ")")
    }
}

impl<N: Network, R> fmt::Debug for AeTrainer<N, R> {
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

    fn trainer() -> AeTrainer<MultiDaeNet, StdRng> {
        let mut rng = StdRng::seed_from_u64(12345);
        let net = MultiDaeNet::new(vec![1, 2], Some(vec![2, 1]), 0.1, &mut rng).unwrap();
        AeTrainer::new(net, rng)
    }

    #[test]
    fn defaults() {
        let model = trainer();
        assert_eq!(model.device(), Device::Cpu);
        assert_eq!(model.optimizer().learning_rate(), 1e-3);
        assert_eq!(model.gradient_updates(), 0);
        assert_eq!(model.to_string(), format!("{model:?}"));
    }

    #[test]
    fn mse_loss() {
        let model = trainer();
        let gt = array![[1., 1.], [2., 1.]];
        let pred = array![[1., 1.], [1., 1.]];

        assert_eq!(model.loss_function(pred.view(), gt.view()).unwrap(), 0.25);
    }

    #[test]
    fn masked_prediction_leaves_input_alone() {
        let mut model = trainer();
        let x = array![[1., 0.], [0., 0.]];

        let (scores, input) = model.predict(x.view(), true).unwrap();
        assert_eq!(input, x);
        assert_eq!(scores[[0, 0]], f32::NEG_INFINITY);
        assert!(scores[[0, 1]].is_finite());
        assert!(scores.row(1).iter().all(|s| s.is_finite()));
    }

    #[test]
    fn batch_step_counts_updates() {
        let mut model = trainer();
        let x = array![[1., 1.]];

        model.train_batch(1, x.view(), &x).unwrap();
        assert_eq!(model.gradient_updates(), 1);
    }
}
