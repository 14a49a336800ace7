mod bce;
mod kld;
mod loss_fn;
mod mse;
mod multinomial;

pub use bce::Bce;
pub use kld::Kld;
pub use loss_fn::LossFn;
pub use mse::Mse;
pub use multinomial::{MultinomialNll, log_softmax};
