use std::fmt;

use ndarray::{Array2, ArrayView2, Zip, s};

use super::Counters;
use crate::{
    MlErr, Result,
    arch::{Device, nets::Network},
    checkpoint::NetworkState,
    optimization::{Adam, DEFAULT_LEARNING_RATE},
};

/// The state shared by every single network trainer.
#[derive(Debug, Clone)]
pub(super) struct Core<N, R> {
    pub(super) network: N,
    pub(super) optimizer: Adam,
    pub(super) device: Device,
    pub(super) counters: Counters,
    pub(super) rng: R,
}

impl<N: Network, R> Core<N, R> {
    pub(super) fn new(network: N, rng: R) -> Self {
        let optimizer = Adam::with_learning_rate(network.params().len(), DEFAULT_LEARNING_RATE);

        Self {
            network,
            optimizer,
            device: Device::Cpu,
            counters: Counters::default(),
            rng,
        }
    }

    pub(super) fn set_learning_rate(&mut self, learning_rate: f32) {
        self.optimizer = Adam::with_learning_rate(self.network.params().len(), learning_rate);
    }

    /// Applies the accumulated gradient and counts the update.
    pub(super) fn step(&mut self) -> Result<()> {
        self.network.params_mut().step(&mut self.optimizer)?;
        self.counters.gradient_updates += 1;
        Ok(())
    }

    pub(super) fn state(&self, epoch: usize) -> NetworkState {
        NetworkState {
            epoch,
            gradient_updates: self.counters.gradient_updates,
            network: self.network.params().values().to_vec(),
            optimizer: self.optimizer.clone(),
        }
    }

    pub(super) fn restore(&mut self, state: &NetworkState) -> Result<()> {
        let len = self.network.params().len();
        if state.optimizer.len() != len {
            return Err(MlErr::SizeMismatch {
                what: "optimizer state",
                got: state.optimizer.len(),
                expected: len,
            });
        }

        self.network.params_mut().load(&state.network)?;
        self.optimizer = state.optimizer.clone();
        self.counters = Counters {
            epoch: state.epoch,
            gradient_updates: state.gradient_updates,
        };

        Ok(())
    }

    /// Writes the shared part of every trainer's text form.
    pub(super) fn describe(&self, f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
        write!(
            f,
            "{name}(network={}, optimizer=Adam(lr={}), device={}",
            self.network,
            self.optimizer.learning_rate(),
            self.device
        )
    }
}

/// Sets to `-inf` every score whose item is already present in `x`.
///
/// Only the first `scores.ncols()` columns of `x` are items.
pub(super) fn mask_seen(scores: &mut Array2<f32>, x: ArrayView2<f32>) {
    let items = x.slice(s![.., ..scores.ncols()]);
    Zip::from(scores).and(items).for_each(|s, &v| {
        if v > 0. {
            *s = f32::NEG_INFINITY;
        }
    });
}

/// Fails unless the batch target has the shape of the prediction.
pub(super) fn check_target(pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<()> {
    if pred.dim() != y.dim() {
        return Err(MlErr::SizeMismatch {
            what: "target items",
            got: y.ncols(),
            expected: pred.ncols(),
        });
    }

    Ok(())
}

/// `min(beta, gradient_updates / anneal_steps)`, or `beta` when annealing is off.
pub(super) fn anneal(beta: f32, anneal_steps: u64, gradient_updates: u64) -> f32 {
    if anneal_steps > 0 {
        beta.min(gradient_updates as f32 / anneal_steps as f32)
    } else {
        beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn masking_only_touches_items() {
        let mut scores = array![[0.5, 0.5], [0.5, 0.5]];
        let x = array![[1., 0., 1.], [0., 2., 1.]];
        mask_seen(&mut scores, x.view());

        assert_eq!(scores, array![[f32::NEG_INFINITY, 0.5], [0.5, f32::NEG_INFINITY]]);
    }

    #[test]
    fn annealing_schedule() {
        assert_eq!(anneal(1., 0, 7), 1.);
        assert_eq!(anneal(1., 4, 2), 0.5);
        assert_eq!(anneal(0.2, 4, 2), 0.2);
    }
}
