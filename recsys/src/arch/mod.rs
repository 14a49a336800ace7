use std::fmt;

use serde::{Deserialize, Serialize};

pub mod activations;
mod init;
pub mod layers;
pub mod loss;
pub mod nets;
mod params;
mod sequential;

pub use init::Init;
pub use params::ParamStore;
pub use sequential::Sequential;

/// Whether a forward pass is part of training (dropout and latent sampling on)
/// or of inference (fully deterministic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Where the numeric work of a trainer runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
        }
    }
}
