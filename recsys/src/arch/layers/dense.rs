use std::ops::Range;

use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{Init, ParamStore, activations::ActFn},
};

/// A fully connected layer, `a = act_fn(x · W + b)`.
///
/// The weights are stored row-major with shape `(in, out)` followed by the
/// `out` biases, both inside the network's `ParamStore`.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    params: Range<usize>,
    act_fn: Option<ActFn>,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer allocating its parameters in `store`.
    ///
    /// Weights start Xavier-normal, biases from `N(0, 0.001)`.
    ///
    /// # Arguments
    /// * `store` - The store owning the network's parameters.
    /// * `dim` - The input and output widths of the layer.
    /// * `act_fn` - The activation applied to the affine output, if any.
    /// * `rng` - A random number generator.
    pub fn new<R: Rng + ?Sized>(
        store: &mut ParamStore,
        dim: (usize, usize),
        act_fn: Option<ActFn>,
        rng: &mut R,
    ) -> Result<Self> {
        if dim.0 == 0 || dim.1 == 0 {
            return Err(MlErr::InvalidArchitecture(format!(
                "dense layer with zero width {dim:?}"
            )));
        }

        let (fan_in, fan_out) = dim;
        let w = store.alloc(fan_in * fan_out, Init::XavierNormal { fan_in, fan_out }, rng)?;
        let b = store.alloc(
            fan_out,
            Init::Normal {
                mean: 0.,
                std_dev: 0.001,
            },
            rng,
        )?;

        Ok(Self {
            dim,
            params: w.start..b.end,
            act_fn,
            x: Array2::zeros((0, fan_in)),
            z: Array2::zeros((0, fan_out)),
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn act_fn(&self) -> Option<ActFn> {
        self.act_fn
    }

    /// Computes the layer output for a batch, caching what `backward` needs.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input width",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = x.dot(&w);
        z += &b;

        let a = match self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        self.x = x.to_owned();
        self.z = z;
        Ok(a)
    }

    /// Backpropagates `d`, the delta w.r.t. this layer's output.
    ///
    /// Parameter gradients are accumulated into `grad`, so the same layer may
    /// take part in several backward passes before an optimizer step.
    ///
    /// # Returns
    /// The delta w.r.t. the layer input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != self.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "dense delta rows",
                got: d.nrows(),
                expected: self.z.nrows(),
            });
        }

        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        let w_size = self.dim.0 * self.dim.1;
        let (dw_raw, db_raw) = grad[self.params.clone()].split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let w_size = self.dim.0 * self.dim.1;
        let (w_raw, b_raw) = params[self.params.clone()].split_at(w_size);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn layer(act_fn: Option<ActFn>) -> (ParamStore, Dense) {
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = ParamStore::new();
        let dense = Dense::new(&mut store, (3, 2), act_fn, &mut rng).unwrap();
        (store, dense)
    }

    #[test]
    fn forward_shape() {
        let (store, mut dense) = layer(Some(ActFn::tanh()));
        let x = Array2::ones((4, 3));

        let a = dense.forward(store.values(), x.view()).unwrap();
        assert_eq!(a.dim(), (4, 2));
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn rejects_wrong_width() {
        let (store, mut dense) = layer(None);
        let x = Array2::ones((1, 2));
        assert!(dense.forward(store.values(), x.view()).is_err());
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (mut store, mut dense) = layer(Some(ActFn::sigmoid()));
        let x = array![[0.5, -1., 2.], [1., 0., -0.5]];

        // loss = sum(a)
        let a = dense.forward(store.values(), x.view()).unwrap();
        let (params, grad) = store.split_mut();
        dense.backward(params, grad, Array2::ones(a.dim())).unwrap();

        let analytic = store.grad().to_vec();
        let base = store.values().to_vec();
        let eps = 1e-2;

        for i in 0..base.len() {
            let mut plus = base.clone();
            plus[i] += eps;
            let mut minus = base.clone();
            minus[i] -= eps;

            let lp = dense.forward(&plus, x.view()).unwrap().sum();
            let lm = dense.forward(&minus, x.view()).unwrap().sum();
            let numeric = (lp - lm) / (2. * eps);

            assert!((numeric - analytic[i]).abs() < 1e-2, "param {i}");
        }
    }

    #[test]
    fn gradients_accumulate() {
        let (mut store, mut dense) = layer(None);
        let x = Array2::ones((1, 3));

        for _ in 0..2 {
            dense.forward(store.values(), x.view()).unwrap();
            let (params, grad) = store.split_mut();
            dense.backward(params, grad, Array2::ones((1, 2))).unwrap();
        }

        assert!(store.grad().iter().all(|&g| g == 2.));
    }
}
