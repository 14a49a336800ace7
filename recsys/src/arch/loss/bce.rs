use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

const LOG_FLOOR: f32 = -100.;
const DENOM_FLOOR: f32 = 1e-12;

/// Binary cross entropy over probabilities, averaged over every entry.
///
/// Logarithms are clamped at `-100` so saturated predictions yield a finite loss.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Bce;

impl Bce {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Bce {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        if y_pred.is_empty() {
            return 0.;
        }

        let total = Zip::from(&y_pred).and(&y).fold(0., |acc, &p, &y| {
            let log_p = p.ln().max(LOG_FLOOR);
            let log_q = (1. - p).ln().max(LOG_FLOOR);
            acc - (y * log_p + (1. - y) * log_q)
        });

        total / y_pred.len() as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.len() as f32;
        Zip::from(&y_pred)
            .and(&y)
            .map_collect(|&p, &y| (p - y) / (p * (1. - p)).max(DENOM_FLOOR) / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn confident_and_right_is_cheap() {
        let y = array![[1., 0.]];
        let good = Bce.loss(array![[0.99, 0.01]].view(), y.view());
        let bad = Bce.loss(array![[0.01, 0.99]].view(), y.view());
        assert!(good < 0.02);
        assert!(bad > 4.);
    }

    #[test]
    fn saturated_prediction_is_finite() {
        let loss = Bce.loss(array![[0., 1.]].view(), array![[1., 0.]].view());
        assert_eq!(loss, 100.);
    }

    #[test]
    fn half_probability_gradient() {
        let d = Bce.loss_prime(array![[0.5]].view(), array![[1.]].view());
        assert_eq!(d, array![[-2.]]);
    }
}
