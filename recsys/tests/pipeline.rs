use std::fs;

use recsys::{
    MlErr,
    checkpoint::Checkpoint,
    pipeline::{self, RunReport},
    specs::RunSpec,
};
use serde_json::json;

fn interactions() -> serde_json::Value {
    json!({
        "interactions": {
            "n_users": 4,
            "n_items": 5,
            "train": [
                [0, 0, 1.0], [0, 1, 1.0], [1, 1, 1.0], [1, 2, 1.0],
                [2, 3, 1.0], [3, 0, 1.0], [3, 4, 1.0]
            ],
            "test": [[0, 2, 1.0], [1, 3, 1.0], [2, 4, 1.0]],
            "item_categories": { "0": [0], "1": [0, 1], "2": [1], "3": [1], "4": [0] },
            "n_categories": 2
        }
    })
}

fn run(spec: serde_json::Value) -> RunReport {
    let spec: RunSpec = serde_json::from_value(spec).unwrap();
    pipeline::run(&spec).unwrap()
}

#[test]
fn multi_vae_run_keeps_best_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("multi_vae.json");

    let report = run(json!({
        "model": { "type": "multi_vae", "dec_dims": [2, 5], "dropout": 0.2 },
        "dataset": interactions(),
        "training": { "num_epochs": 3, "batch_size": 2, "seed": 7, "metric": "recall@2" },
        "output": output,
    }));

    assert!(report.metric.is_some());
    assert!(report.losses.is_empty());
    assert!(report.model.starts_with("MultiVae("));

    let checkpoint = Checkpoint::load(&output).unwrap();
    assert_eq!(checkpoint.family(), Checkpoint::VARIATIONAL);
}

#[test]
fn runs_without_held_out_data_record_losses() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("dae.json");

    let mut dataset = interactions();
    dataset["interactions"]["test"] = serde_json::Value::Null;

    let report = run(json!({
        "model": { "type": "multi_dae", "dec_dims": [3, 5] },
        "dataset": dataset,
        "training": { "num_epochs": 4, "batch_size": 3, "seed": 1 },
        "output": output,
    }));

    assert_eq!(report.losses.len(), 4);
    assert_eq!(report.metric, None);
    assert_eq!(Checkpoint::load(&output).unwrap().epoch(), 4);
}

#[test]
fn every_row_model_runs() {
    let models = [
        json!({ "type": "ae", "dec_dims": [2, 5] }),
        json!({ "type": "vae", "dec_dims": [2, 5] }),
        json!({ "type": "c_multi_vae", "cond_dim": 2, "dec_dims": [2, 5] }),
        json!({ "type": "cfgan", "gen_dims": [5, 4, 5], "disc_dims": [10, 4, 1] }),
        json!({ "type": "ease", "lam": 10.0 }),
        json!({ "type": "admm_slim", "max_iter": 5 }),
    ];

    for model in models {
        let report = run(json!({
            "model": model,
            "dataset": interactions(),
            "training": { "num_epochs": 2, "batch_size": 2, "seed": 3, "metric": "hit@3" },
        }));

        let value = report.metric.unwrap();
        assert!((0. ..=1.).contains(&value), "{} gave {value}", report.model);
        assert!(report.output.is_none());
    }
}

#[test]
fn closed_form_models_save_matrices() {
    let dir = tempfile::tempdir().unwrap();

    let report = run(json!({
        "model": { "type": "ease" },
        "dataset": interactions(),
        "output": dir.path().join("ease"),
    }));

    assert_eq!(report.output, Some(dir.path().join("ease.mat")));
    assert!(dir.path().join("ease.mat").exists());
}

#[test]
fn svae_runs_on_sequences_from_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("sequences.json");
    let dataset = json!({
        "sequences": {
            "n_items": 6,
            "train": { "0": [0, 1, 2, 3], "1": [5, 4, 3], "2": [2, 0, 5, 1] },
            "test": { "0": [4], "2": [3] }
        }
    });
    fs::write(&data_path, dataset.to_string()).unwrap();

    let report = run(json!({
        "model": {
            "type": "svae",
            "embed_size": 2,
            "rnn_size": 3,
            "dec_dims": [2, 6],
            "enc_dims": [2],
            "pred_type": "postfix"
        },
        "dataset": { "file": { "path": data_path } },
        "training": { "num_epochs": 2, "seed": 5, "metric": "ndcg@3" },
    }));

    assert!(report.metric.is_some());
    assert!(report.model.starts_with("Svae("));
}

#[test]
fn mismatched_dataset_kind_fails() {
    let spec: RunSpec = serde_json::from_value(json!({
        "model": {
            "type": "svae",
            "embed_size": 2,
            "rnn_size": 2,
            "dec_dims": [2, 5],
            "enc_dims": [2]
        },
        "dataset": interactions(),
    }))
    .unwrap();

    assert!(matches!(pipeline::run(&spec), Err(MlErr::InvalidConfig(_))));
}

#[test]
fn unknown_metric_fails() {
    let spec: RunSpec = serde_json::from_value(json!({
        "model": { "type": "ease" },
        "dataset": interactions(),
        "training": { "metric": "auc@5" },
    }))
    .unwrap();

    assert!(matches!(pipeline::run(&spec), Err(MlErr::InvalidMetric(_))));
}
