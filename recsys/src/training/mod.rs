//! Gradient based recommenders: one trainer per model family, all sharing the
//! `Trainer` loop.

mod ae;
mod cfgan;
mod core;
mod multi_dae;
mod multi_vae;
mod svae;
mod trainer;
mod vae;

pub use ae::AeTrainer;
pub use cfgan::{AdversarialSchedule, Cfgan};
pub use multi_dae::{DEFAULT_LAM, MultiDae};
pub use multi_vae::{CMultiVae, MultiVae};
pub use svae::Svae;
pub use trainer::{Counters, Trainer, Validation};
pub use vae::Vae;
