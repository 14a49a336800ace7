use std::ops::Range;

use rand::Rng;

use super::Init;
use crate::{MlErr, Result, optimization::Optimizer};

/// Owns every trainable value of a network as one flat buffer, together
/// with a gradient buffer of the same length.
///
/// Layers never own their parameters: they get a range into this store at
/// construction time and view their slice on each forward and backward pass.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    values: Vec<f32>,
    grad: Vec<f32>,
    tensors: Vec<Range<usize>>,
}

impl ParamStore {
    /// Creates a new empty `ParamStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new tensor of `n` parameters to the store.
    ///
    /// # Arguments
    /// * `n` - The amount of parameters of the tensor.
    /// * `init` - The initialization scheme.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The range the tensor occupies in the store.
    pub fn alloc<R: Rng + ?Sized>(
        &mut self,
        n: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Range<usize>> {
        let start = self.values.len();
        self.values.extend(init.sample(n, rng)?);
        self.grad.resize(self.values.len(), 0.);

        let range = start..self.values.len();
        self.tensors.push(range.clone());
        Ok(range)
    }

    /// Returns the amount of parameters in the store.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Borrows the parameters immutably and the gradient mutably at once, as
    /// needed by every backward pass.
    pub fn split_mut(&mut self) -> (&[f32], &mut [f32]) {
        (&self.values, &mut self.grad)
    }

    /// Sets every gradient entry to zero.
    pub fn zero_grad(&mut self) {
        self.grad.fill(0.);
    }

    /// Applies an optimization step using the accumulated gradient.
    pub fn step<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update_params(&self.grad, &mut self.values)
    }

    /// Overwrites the parameter values, keeping the layout.
    ///
    /// # Errors
    /// `SizeMismatch` if `values` does not have exactly as many entries as the store.
    pub fn load(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(MlErr::SizeMismatch {
                what: "network parameters",
                got: values.len(),
                expected: self.values.len(),
            });
        }

        self.values.copy_from_slice(values);
        self.zero_grad();
        Ok(())
    }

    /// Returns the sum over tensors of each tensor's euclidean norm.
    pub fn l2_norm_sum(&self) -> f32 {
        self.tensors
            .iter()
            .map(|r| norm(&self.values[r.clone()]))
            .sum()
    }

    /// Accumulates `lam` times the gradient of `l2_norm_sum` into the gradient buffer.
    pub fn add_l2_norm_grad(&mut self, lam: f32) {
        for r in &self.tensors {
            let n = norm(&self.values[r.clone()]);
            if n == 0. {
                continue;
            }

            self.grad[r.clone()]
                .iter_mut()
                .zip(&self.values[r.clone()])
                .for_each(|(g, w)| *g += lam * w / n);
        }
    }
}

fn norm(xs: &[f32]) -> f32 {
    xs.iter().map(|x| x * x).sum::<f32>().sqrt()
}
