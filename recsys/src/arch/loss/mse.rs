use ndarray::{Array2, ArrayView2, Zip};

use super::LossFn;

/// Squared error averaged over every entry of the batch.
///
/// Reconstruction loss of the plain autoencoder, and the zero-reconstruction
/// penalty of CFGAN when `y` is all zeros.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Mse;

impl Mse {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        if y_pred.is_empty() {
            return 0.;
        }

        let total = Zip::from(&y_pred)
            .and(&y)
            .fold(0., |acc, &p, &t| acc + (p - t) * (p - t));

        total / y_pred.len() as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let scale = 2. / y_pred.len().max(1) as f32;
        Zip::from(&y_pred).and(&y).map_collect(|&p, &t| scale * (p - t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn quarter_loss() {
        let pred = array![[1., 1.], [1., 1.]];
        let gt = array![[1., 1.], [2., 1.]];
        assert_eq!(Mse.loss(pred.view(), gt.view()), 0.25);
    }

    #[test]
    fn gradient_points_to_target() {
        let pred = array![[1., 1.], [1., 1.]];
        let gt = array![[1., 1.], [2., 1.]];
        assert_eq!(Mse.loss_prime(pred.view(), gt.view()), array![[0., 0.], [-0.5, 0.]]);
    }

    #[test]
    fn empty_batch_is_free() {
        let empty = Array2::<f32>::zeros((0, 3));
        assert_eq!(Mse.loss(empty.view(), empty.view()), 0.);
        assert_eq!(Mse.loss_prime(empty.view(), empty.view()).dim(), (0, 3));
    }
}
