use std::ops::Range;

use ndarray::{
    Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, concatenate, linalg,
    s,
};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{Init, ParamStore, activations::ActFn},
};

/// Per step values kept by the forward pass for backpropagation through time.
#[derive(Debug, Clone)]
struct Step {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    r: Array2<f32>,
    z: Array2<f32>,
    n: Array2<f32>,
    hn: Array2<f32>,
}

/// A single layer gated recurrent unit over `(batch, steps, input)` sequences.
///
/// Gates are laid out as `[reset | update | new]` along the columns of both the
/// input weights `(input, 3 * hidden)` and the recurrent weights `(hidden, 3 * hidden)`.
#[derive(Debug, Clone)]
pub struct Gru {
    input: usize,
    hidden: usize,
    params: Range<usize>,
    steps: Vec<Step>,
}

impl Gru {
    /// Creates a new `Gru`, every parameter drawn from `U(-1/sqrt(hidden), 1/sqrt(hidden))`.
    pub fn new<R: Rng + ?Sized>(
        store: &mut ParamStore,
        input: usize,
        hidden: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input == 0 || hidden == 0 {
            return Err(MlErr::InvalidArchitecture(format!(
                "gru with input {input} and hidden {hidden}"
            )));
        }

        let k = 1. / (hidden as f32).sqrt();
        let init = Init::Uniform { low: -k, high: k };
        let w_i = store.alloc(input * 3 * hidden, init, rng)?;
        store.alloc(3 * hidden, init, rng)?;
        store.alloc(hidden * 3 * hidden, init, rng)?;
        let b_h = store.alloc(3 * hidden, init, rng)?;

        Ok(Self {
            input,
            hidden,
            params: w_i.start..b_h.end,
            steps: Vec::new(),
        })
    }

    pub fn hidden(&self) -> usize {
        self.hidden
    }

    /// Runs the recurrence from a zero state.
    ///
    /// # Returns
    /// Every hidden state, shaped `(batch, steps, hidden)`.
    pub fn forward(&mut self, params: &[f32], x: &Array3<f32>) -> Result<Array3<f32>> {
        let (batch, steps, input) = x.dim();
        if input != self.input {
            return Err(MlErr::SizeMismatch {
                what: "gru input width",
                got: input,
                expected: self.input,
            });
        }

        let hd = self.hidden;
        let (w_i, b_i, w_h, b_h) = self.view_params(params)?;
        let sigmoid = ActFn::sigmoid();

        let mut h = Array2::zeros((batch, hd));
        let mut out = Array3::zeros((batch, steps, hd));
        self.steps.clear();

        for t in 0..steps {
            let x_t = x.index_axis(Axis(1), t).to_owned();
            let gi = x_t.dot(&w_i) + &b_i;
            let gh = h.dot(&w_h) + &b_h;

            let r = (&gi.slice(s![.., ..hd]) + &gh.slice(s![.., ..hd])).mapv(|v| sigmoid.f(v));
            let z = (&gi.slice(s![.., hd..2 * hd]) + &gh.slice(s![.., hd..2 * hd]))
                .mapv(|v| sigmoid.f(v));
            let hn = gh.slice(s![.., 2 * hd..]).to_owned();
            let n = (&gi.slice(s![.., 2 * hd..]) + &(&r * &hn)).mapv(f32::tanh);

            let h_next = (1. - &z) * &n + &z * &h;
            out.index_axis_mut(Axis(1), t).assign(&h_next);

            let h_prev = std::mem::replace(&mut h, h_next);
            self.steps.push(Step {
                x: x_t,
                h_prev,
                r,
                z,
                n,
                hn,
            });
        }

        Ok(out)
    }

    /// Backpropagates through time the deltas w.r.t. every emitted hidden state.
    ///
    /// # Returns
    /// The delta w.r.t. the input sequence.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: &Array3<f32>,
    ) -> Result<Array3<f32>> {
        let (batch, steps, hd) = d.dim();
        if steps != self.steps.len() || hd != self.hidden {
            return Err(MlErr::SizeMismatch {
                what: "gru delta steps",
                got: steps,
                expected: self.steps.len(),
            });
        }

        let (w_i, _, w_h, _) = self.view_params(params)?;
        let (mut dw_i, mut db_i, mut dw_h, mut db_h) = self.view_grad(grad)?;

        let mut dx = Array3::zeros((batch, steps, self.input));
        let mut dh_next = Array2::<f32>::zeros((batch, hd));

        for (t, step) in self.steps.iter().enumerate().rev() {
            let dh = &d.index_axis(Axis(1), t) + &dh_next;

            let dn = &dh * &(1. - &step.z);
            let dz = &dh * &(&step.h_prev - &step.n);
            let da_n = dn * &(1. - &step.n.mapv(|v| v * v));
            let dr = &da_n * &step.hn;
            let dhn = &da_n * &step.r;
            let da_z = dz * &(&step.z * &(1. - &step.z));
            let da_r = dr * &(&step.r * &(1. - &step.r));

            let dgi = concatenate(Axis(1), &[da_r.view(), da_z.view(), da_n.view()])?;
            let dgh = concatenate(Axis(1), &[da_r.view(), da_z.view(), dhn.view()])?;

            linalg::general_mat_mul(1.0, &step.x.t(), &dgi, 1.0, &mut dw_i);
            db_i += &dgi.sum_axis(Axis(0));
            linalg::general_mat_mul(1.0, &step.h_prev.t(), &dgh, 1.0, &mut dw_h);
            db_h += &dgh.sum_axis(Axis(0));

            dx.index_axis_mut(Axis(1), t).assign(&dgi.dot(&w_i.t()));
            dh_next = &dh * &step.z + dgh.dot(&w_h.t());
        }

        Ok(dx)
    }

    fn sizes(&self) -> [usize; 3] {
        let g = 3 * self.hidden;
        [self.input * g, g, self.hidden * g]
    }

    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(
        ArrayView2<'a, f32>,
        ArrayView1<'a, f32>,
        ArrayView2<'a, f32>,
        ArrayView1<'a, f32>,
    )> {
        let g = 3 * self.hidden;
        let [wi_size, bi_size, wh_size] = self.sizes();

        let raw = &params[self.params.clone()];
        let (w_i, raw) = raw.split_at(wi_size);
        let (b_i, raw) = raw.split_at(bi_size);
        let (w_h, b_h) = raw.split_at(wh_size);

        Ok((
            ArrayView2::from_shape((self.input, g), w_i)?,
            ArrayView1::from_shape(g, b_i)?,
            ArrayView2::from_shape((self.hidden, g), w_h)?,
            ArrayView1::from_shape(g, b_h)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(
        ArrayViewMut2<'a, f32>,
        ArrayViewMut1<'a, f32>,
        ArrayViewMut2<'a, f32>,
        ArrayViewMut1<'a, f32>,
    )> {
        let g = 3 * self.hidden;
        let [wi_size, bi_size, wh_size] = self.sizes();

        let raw = &mut grad[self.params.clone()];
        let (w_i, raw) = raw.split_at_mut(wi_size);
        let (b_i, raw) = raw.split_at_mut(bi_size);
        let (w_h, b_h) = raw.split_at_mut(wh_size);

        Ok((
            ArrayViewMut2::from_shape((self.input, g), w_i)?,
            ArrayViewMut1::from_shape(g, b_i)?,
            ArrayViewMut2::from_shape((self.hidden, g), w_h)?,
            ArrayViewMut1::from_shape(g, b_h)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn gru() -> (ParamStore, Gru) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut store = ParamStore::new();
        let gru = Gru::new(&mut store, 2, 3, &mut rng).unwrap();
        (store, gru)
    }

    fn input() -> Array3<f32> {
        let values = vec![0.5, -1., 1., 0.2, -0.3, 0.8, 0., 1., 1., 1., -1., 0.];
        Array3::from_shape_vec((2, 3, 2), values).unwrap()
    }

    #[test]
    fn output_shape() {
        let (store, mut gru) = gru();
        let out = gru.forward(store.values(), &input()).unwrap();

        assert_eq!(out.dim(), (2, 3, 3));
        assert_eq!(store.len(), 2 * 9 + 9 + 3 * 9 + 9);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let (mut store, mut gru) = gru();
        let x = input();

        // loss = sum of every hidden state
        let out = gru.forward(store.values(), &x).unwrap();
        let (params, grad) = store.split_mut();
        gru.backward(params, grad, &Array3::ones(out.dim())).unwrap();

        let analytic = store.grad().to_vec();
        let base = store.values().to_vec();
        let eps = 1e-2;

        for i in (0..base.len()).step_by(5) {
            let mut plus = base.clone();
            plus[i] += eps;
            let mut minus = base.clone();
            minus[i] -= eps;

            let lp = gru.forward(&plus, &x).unwrap().sum();
            let lm = gru.forward(&minus, &x).unwrap().sum();
            let numeric = (lp - lm) / (2. * eps);

            assert!(
                (numeric - analytic[i]).abs() < 2e-2,
                "param {i}: {numeric} vs {}",
                analytic[i]
            );
        }
    }
}
