//! Neural and closed form recommender systems over implicit feedback.
//!
//! Gradient based models live in [`training`], built on the networks of
//! [`arch`] and fed by the batch producers of [`sampling`]. Closed form item
//! models live in [`linear`]. A whole run can be described by a
//! [`specs::RunSpec`] and executed by [`pipeline::run`].

pub mod arch;
pub mod checkpoint;
pub mod data;
pub mod error;
pub mod linear;
pub mod metrics;
pub mod optimization;
pub mod pipeline;
pub mod sampling;
pub mod specs;
pub mod training;

pub use error::{MlErr, Result};
