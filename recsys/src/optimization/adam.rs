use serde::{Deserialize, Serialize};

use super::Optimizer;
use crate::{MlErr, Result};

pub const DEFAULT_LEARNING_RATE: f32 = 1e-3;

/// Adam with bias correction.
///
/// The first and second moment estimates are indexed exactly like the
/// parameter buffer being optimized. Together with the step count they are
/// saved in every checkpoint, so a restored optimizer resumes where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    betas: (f32, f32),
    epsilon: f32,
    steps: u64,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters to keep moment estimates for.
    /// * `learning_rate` - The step size before bias correction.
    /// * `beta1`, `beta2` - Decay rates of the first and second moments.
    /// * `epsilon` - Added to the root of the second moment.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            betas: (beta1, beta2),
            epsilon,
            steps: 0,
            mean: vec![0.; len],
            variance: vec![0.; len],
        }
    }

    /// Creates a new `Adam` with betas `(0.9, 0.999)` and epsilon `1e-8`.
    pub fn with_learning_rate(len: usize, learning_rate: f32) -> Self {
        Self::new(len, learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Returns how many updates this optimizer has applied.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        for len in [grad.len(), params.len()] {
            if len != self.len() {
                return Err(MlErr::SizeMismatch {
                    what: "optimizer state",
                    got: len,
                    expected: self.len(),
                });
            }
        }

        self.steps += 1;
        let (b1, b2) = self.betas;
        let t = i32::try_from(self.steps).unwrap_or(i32::MAX);
        let alpha = self.learning_rate * (1. - b2.powi(t)).sqrt() / (1. - b1.powi(t));
        let eps = self.epsilon;

        for (i, (p, &g)) in params.iter_mut().zip(grad).enumerate() {
            let m = &mut self.mean[i];
            let v = &mut self.variance[i];

            *m += (1. - b1) * (g - *m);
            *v += (1. - b2) * (g * g - *v);
            *p -= alpha * *m / (v.sqrt() + eps);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut adam = Adam::with_learning_rate(2, 0.1);
        let mut params = [1., -1.];

        adam.update_params(&[0.5, -3.], &mut params).unwrap();

        assert!((params[0] - 0.9).abs() < 1e-5);
        assert!((params[1] + 0.9).abs() < 1e-5);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn rejects_foreign_buffers() {
        let mut adam = Adam::with_learning_rate(2, 0.1);
        let mut params = [0.; 3];
        assert!(adam.update_params(&[0.; 3], &mut params).is_err());
        assert_eq!(adam.steps(), 0);
    }

    #[test]
    fn zero_gradient_keeps_params() {
        let mut adam = Adam::with_learning_rate(2, 0.1);
        let mut params = [0.25, 4.];

        for _ in 0..3 {
            adam.update_params(&[0., 0.], &mut params).unwrap();
        }

        assert_eq!(params, [0.25, 4.]);
    }

    #[test]
    fn state_survives_json() {
        let mut adam = Adam::with_learning_rate(3, 0.01);
        let mut params = [0.; 3];
        adam.update_params(&[0.1, 0.2, 0.3], &mut params).unwrap();

        let json = serde_json::to_string(&adam).unwrap();
        let back: Adam = serde_json::from_str(&json).unwrap();
        assert_eq!(back, adam);
    }
}
