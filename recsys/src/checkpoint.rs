//! Durable snapshots of gradient based trainers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, optimization::Adam};

/// The state of a single network trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub epoch: usize,
    pub gradient_updates: u64,
    pub network: Vec<f32>,
    pub optimizer: Adam,
}

/// The state of a generator/discriminator pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdversarialState {
    pub epoch: usize,
    /// Generator steps taken.
    #[serde(default)]
    pub gradient_updates: u64,
    pub generator: Vec<f32>,
    pub discriminator: Vec<f32>,
    pub opt_g: Adam,
    pub opt_d: Adam,
}

/// One checkpoint shape per trainer family, stored as JSON tagged by `family`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Checkpoint {
    Autoencoder(NetworkState),
    Variational(NetworkState),
    Sequential(NetworkState),
    Adversarial(AdversarialState),
}

impl Checkpoint {
    pub const AUTOENCODER: &'static str = "autoencoder";
    pub const VARIATIONAL: &'static str = "variational";
    pub const SEQUENTIAL: &'static str = "sequential";
    pub const ADVERSARIAL: &'static str = "adversarial";

    /// Wraps a network state in the variant named by `family`.
    pub fn of_family(family: &'static str, state: NetworkState) -> Result<Self> {
        match family {
            Self::AUTOENCODER => Ok(Self::Autoencoder(state)),
            Self::VARIATIONAL => Ok(Self::Variational(state)),
            Self::SEQUENTIAL => Ok(Self::Sequential(state)),
            other => Err(MlErr::CheckpointMismatch {
                expected: "a single network family",
                got: other,
            }),
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Self::Autoencoder(_) => Self::AUTOENCODER,
            Self::Variational(_) => Self::VARIATIONAL,
            Self::Sequential(_) => Self::SEQUENTIAL,
            Self::Adversarial(_) => Self::ADVERSARIAL,
        }
    }

    /// Returns the epoch given to `save_model`.
    pub fn epoch(&self) -> usize {
        match self {
            Self::Autoencoder(s) | Self::Variational(s) | Self::Sequential(s) => s.epoch,
            Self::Adversarial(s) => s.epoch,
        }
    }

    /// Returns the single network state of a checkpoint of the given family.
    ///
    /// # Errors
    /// `CheckpointMismatch` if the checkpoint belongs to another family.
    pub fn network_state(&self, family: &'static str) -> Result<&NetworkState> {
        match self {
            Self::Autoencoder(s) | Self::Variational(s) | Self::Sequential(s)
                if self.family() == family =>
            {
                Ok(s)
            }
            other => Err(MlErr::CheckpointMismatch {
                expected: family,
                got: other.family(),
            }),
        }
    }

    /// Writes the checkpoint to `path` through a temporary file, so a crash
    /// never leaves a truncated checkpoint behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let payload = serde_json::to_vec(self)?;
        persist(path.as_ref(), &payload)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Atomically replaces the contents of `path` with `payload`.
pub(crate) fn persist(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temporary_path(path);
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("checkpoint");
    path.with_file_name(format!("{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> NetworkState {
        NetworkState {
            epoch: 3,
            gradient_updates: 12,
            network: vec![0.1, -2.5, 1e-7],
            optimizer: Adam::with_learning_rate(3, 1e-3),
        }
    }

    #[test]
    fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let checkpoint = Checkpoint::Variational(state());

        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.epoch(), 3);
        assert!(!path.with_file_name("model.json.tmp").exists());
    }

    #[test]
    fn family_is_tagged() {
        let json = serde_json::to_value(Checkpoint::Autoencoder(state())).unwrap();
        assert_eq!(json["family"], "autoencoder");
        assert_eq!(json["gradient_updates"], 12);
    }

    #[test]
    fn foreign_family_is_rejected() {
        let checkpoint = Checkpoint::Sequential(state());
        assert!(checkpoint.network_state(Checkpoint::SEQUENTIAL).is_ok());
        assert!(checkpoint.network_state(Checkpoint::AUTOENCODER).is_err());
    }

    #[test]
    fn malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"{\"family\": \"autoencoder\"").unwrap();

        assert!(matches!(Checkpoint::load(&path), Err(MlErr::Format(_))));
        assert!(matches!(Checkpoint::load(dir.path().join("missing")), Err(MlErr::Io(_))));
    }
}
