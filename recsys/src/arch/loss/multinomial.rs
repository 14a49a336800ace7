use ndarray::{Array2, ArrayView2, Axis};

use super::LossFn;

/// Negative multinomial log likelihood of the targets under `softmax(logits)`,
/// summed over items and averaged over rows.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MultinomialNll;

impl MultinomialNll {
    pub fn new() -> Self {
        Self
    }
}

/// Row-wise log softmax, shifted by the row maximum.
pub fn log_softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();

    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row -= max;
        let lse = row.mapv(f32::exp).sum().ln();
        row -= lse;
    }

    out
}

impl LossFn for MultinomialNll {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let rows = y_pred.nrows().max(1) as f32;
        -(log_softmax(y_pred) * &y).sum() / rows
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let rows = y_pred.nrows().max(1) as f32;
        let mass = y.sum_axis(Axis(1)).insert_axis(Axis(1));
        let softmax = log_softmax(y_pred).mapv_into(f32::exp);
        (softmax * &mass - &y) / rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn uniform_logits() {
        let logits = array![[0., 0.]];
        let y = array![[1., 0.]];
        let loss = MultinomialNll.loss(logits.view(), y.view());
        assert!((loss - 2f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn gradient_sums_to_zero_per_row() {
        let logits = array![[0.3, -1., 2.], [0., 0., 0.]];
        let y = array![[1., 0., 1.], [0., 2., 0.]];
        let d = MultinomialNll.loss_prime(logits.view(), y.view());

        for row in d.rows() {
            assert!(row.sum().abs() < 1e-6);
        }
    }

    #[test]
    fn log_softmax_is_stable() {
        let out = log_softmax(array![[1000., 1000.]].view());
        assert!((out[[0, 0]] + 2f32.ln()).abs() < 1e-6);
    }
}
