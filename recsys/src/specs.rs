//! Serializable descriptions of a training run, as read by the binary.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{linear::AdmmSlimConfig, sampling::PredType};

/// Everything needed to build, train, evaluate and persist one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub model: ModelSpec,
    pub dataset: DatasetSpec,
    #[serde(default)]
    pub training: TrainingSpec,
    /// Where the trained (or best) model is saved, if anywhere.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// The specification of the model to train.
///
/// Omitted encoder widths default to the decoder widths reversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSpec {
    Ae {
        dec_dims: Vec<usize>,
        #[serde(default)]
        enc_dims: Option<Vec<usize>>,
        #[serde(default = "default_dropout")]
        dropout: f32,
    },
    MultiDae {
        dec_dims: Vec<usize>,
        #[serde(default)]
        enc_dims: Option<Vec<usize>>,
        #[serde(default = "default_dropout")]
        dropout: f32,
        #[serde(default = "default_lam")]
        lam: f32,
    },
    Vae {
        dec_dims: Vec<usize>,
        #[serde(default)]
        enc_dims: Option<Vec<usize>>,
    },
    MultiVae {
        dec_dims: Vec<usize>,
        #[serde(default)]
        enc_dims: Option<Vec<usize>>,
        #[serde(default = "default_dropout")]
        dropout: f32,
        #[serde(default)]
        annealing: Annealing,
    },
    CMultiVae {
        cond_dim: usize,
        dec_dims: Vec<usize>,
        #[serde(default)]
        enc_dims: Option<Vec<usize>>,
        #[serde(default = "default_dropout")]
        dropout: f32,
        #[serde(default)]
        annealing: Annealing,
    },
    Svae {
        embed_size: usize,
        rnn_size: usize,
        dec_dims: Vec<usize>,
        enc_dims: Vec<usize>,
        #[serde(default)]
        annealing: Annealing,
        #[serde(default = "default_pred_type")]
        pred_type: PredType,
        #[serde(default = "default_k")]
        k: usize,
    },
    Cfgan {
        gen_dims: Vec<usize>,
        disc_dims: Vec<usize>,
        #[serde(default = "default_alpha")]
        alpha: f32,
        #[serde(default = "default_s_pm")]
        s_pm: f32,
        #[serde(default = "default_s_zr")]
        s_zr: f32,
    },
    Ease {
        #[serde(default = "default_ease_lam")]
        lam: f64,
    },
    AdmmSlim(AdmmSlimConfig),
}

/// The KL weight schedule of variational models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annealing {
    pub beta: f32,
    pub anneal_steps: u64,
}

impl Default for Annealing {
    fn default() -> Self {
        Self {
            beta: 1.,
            anneal_steps: 0,
        }
    }
}

/// The data a run trains on, keyed by its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSpec {
    Interactions(InteractionData),
    Sequences(SequenceData),
    /// A JSON file holding an inline `interactions` or `sequences` dataset.
    File { path: PathBuf },
}

/// A users x items interaction matrix given as `(user, item, value)` triplets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionData {
    pub n_users: usize,
    pub n_items: usize,
    pub train: Vec<(usize, usize, f32)>,
    /// Held out interactions of the same users, used for validation.
    #[serde(default)]
    pub test: Option<Vec<(usize, usize, f32)>>,
    /// The categories of each item, for conditioned models.
    #[serde(default)]
    pub item_categories: HashMap<usize, Vec<usize>>,
    #[serde(default)]
    pub n_categories: usize,
}

/// Chronological item sequences per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceData {
    pub n_items: usize,
    pub train: BTreeMap<usize, Vec<usize>>,
    #[serde(default)]
    pub test: Option<BTreeMap<usize, Vec<usize>>>,
}

/// How the model is trained and evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSpec {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Progress is logged every `verbose` batches, never if 0.
    pub verbose: usize,
    pub learning_rate: Option<f32>,
    /// A metric such as `ndcg@10`, evaluated on the held out data when present.
    pub metric: String,
    pub seed: Option<u64>,
    pub g_steps: usize,
    pub d_steps: usize,
}

impl Default for TrainingSpec {
    fn default() -> Self {
        Self {
            num_epochs: 10,
            batch_size: 64,
            shuffle: true,
            verbose: 0,
            learning_rate: None,
            metric: "ndcg@10".into(),
            seed: None,
            g_steps: 1,
            d_steps: 1,
        }
    }
}

fn default_dropout() -> f32 {
    0.5
}

fn default_lam() -> f32 {
    crate::training::DEFAULT_LAM
}

fn default_pred_type() -> PredType {
    PredType::Next
}

fn default_k() -> usize {
    1
}

fn default_alpha() -> f32 {
    0.1
}

fn default_s_pm() -> f32 {
    0.7
}

fn default_s_zr() -> f32 {
    0.5
}

fn default_ease_lam() -> f64 {
    100.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let spec: RunSpec = serde_json::from_str(
            r#"{
                "model": { "type": "multi_vae", "dec_dims": [2, 4] },
                "dataset": {
                    "interactions": { "n_users": 1, "n_items": 4, "train": [[0, 1, 1.0]] }
                }
            }"#,
        )
        .unwrap();

        let ModelSpec::MultiVae {
            enc_dims,
            dropout,
            annealing,
            ..
        } = spec.model
        else {
            panic!("expected a multi_vae model");
        };

        assert_eq!(enc_dims, None);
        assert_eq!(dropout, 0.5);
        assert_eq!(annealing, Annealing::default());
        assert_eq!(spec.training.metric, "ndcg@10");
        assert!(spec.output.is_none());
    }

    #[test]
    fn admm_slim_takes_its_config_inline() {
        let json = r#"{ "type": "admm_slim", "nn_constr": false, "max_iter": 3 }"#;
        let model: ModelSpec = serde_json::from_str(json).unwrap();

        let ModelSpec::AdmmSlim(config) = model else {
            panic!("expected an admm_slim model");
        };
        assert!(!config.nn_constr);
        assert_eq!(config.max_iter, 3);
        assert_eq!(config.lambda1, 5.);
    }

    #[test]
    fn sequences_with_numeric_keys() {
        let dataset: DatasetSpec = serde_json::from_str(
            r#"{ "sequences": { "n_items": 3, "train": { "0": [0, 1, 2] } } }"#,
        )
        .unwrap();

        let DatasetSpec::Sequences(data) = dataset else {
            panic!("expected sequences");
        };
        assert_eq!(data.train[&0], [0, 1, 2]);
    }

    #[test]
    fn unknown_model_is_rejected() {
        assert!(serde_json::from_str::<ModelSpec>(r#"{ "type": "lstm" }"#).is_err());
    }
}
