use ndarray::{Array2, ArrayView2};

/// A loss over a batch of predictions, with its gradient w.r.t. the predictions.
///
/// Both arguments must have the same shape.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;
}
