use std::fmt;

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{ParamStore, activations::ActFn, layers::Dense};
use crate::{MlErr, Result};

/// A stack of `Dense` layers: information flows forward when computing an output and backward
/// when computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Dense>,
}

impl Sequential {
    /// Creates a new `Sequential` with one `Dense` layer per consecutive pair of `dims`.
    ///
    /// # Arguments
    /// * `store` - The store owning the network's parameters.
    /// * `dims` - The widths of every layer boundary, input first.
    /// * `hidden` - The activation of every layer but the last.
    /// * `output` - The activation of the last layer.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// A new `Sequential` instance, or an error if `dims` describes no layer.
    pub fn from_dims<R: Rng + ?Sized>(
        store: &mut ParamStore,
        dims: &[usize],
        hidden: Option<ActFn>,
        output: Option<ActFn>,
        rng: &mut R,
    ) -> Result<Self> {
        if dims.len() < 2 {
            return Err(MlErr::InvalidArchitecture(format!(
                "a sequential stack needs at least two dims, got {dims:?}"
            )));
        }

        let nlayers = dims.len() - 1;
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let act_fn = if i + 1 == nlayers { output } else { hidden };
                Dense::new(store, (w[0], w[1]), act_fn, rng)
            })
            .collect::<Result<_>>()?;

        Ok(Self { layers })
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.dim().0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.dim().1)
    }

    /// Makes a forward pass through the stack.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut layers = self.layers.iter_mut();
        let Some(first) = layers.next() else {
            return Ok(x.to_owned());
        };

        let mut a = first.forward(params, x)?;
        for layer in layers {
            a = layer.forward(params, a.view())?;
        }

        Ok(a)
    }

    /// Backpropagates `d` through every layer, last to first.
    ///
    /// # Returns
    /// The delta w.r.t. the stack input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        self.layers
            .iter_mut()
            .rev()
            .try_fold(d, |d, layer| layer.backward(params, &mut *grad, d))
    }
}

impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }

            let (n_in, n_out) = layer.dim();
            match layer.act_fn() {
                Some(act_fn) => write!(f, "Dense({n_in}, {n_out}, {act_fn})")?,
                None => write!(f, "Dense({n_in}, {n_out})")?,
            }
        }

        Ok(())
    }
}
