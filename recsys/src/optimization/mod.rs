mod adam;
mod optimizer;

pub use adam::{Adam, DEFAULT_LEARNING_RATE};
pub use optimizer::Optimizer;
