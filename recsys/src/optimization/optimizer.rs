use crate::Result;

/// A first order optimization algorithm over a flat parameter buffer.
pub trait Optimizer {
    /// Makes one step on `params` following the given gradient.
    ///
    /// # Errors
    /// `SizeMismatch` if `grad`, `params` and the optimizer's own state differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}
