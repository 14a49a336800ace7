//! Resolves a `RunSpec` into a concrete model, trains it, evaluates it and
//! persists it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::Array2;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::{
    MlErr, Result,
    arch::nets::{
        CMultiVaeNet, CfganDiscriminator, CfganGenerator, MultiDaeNet, MultiVaeNet, SvaeNet, VaeNet,
    },
    data::{dense_rows, from_triplets},
    linear::{AdmmSlim, Ease},
    metrics::Metric,
    sampling::{
        ConditionedDataSampler, DataSampler, Sampler, SvaeSampler, ValidSampler, generate_rng,
    },
    specs::{DatasetSpec, InteractionData, ModelSpec, RunSpec, SequenceData, TrainingSpec},
    training::{
        AdversarialSchedule, AeTrainer, Cfgan, MultiDae, MultiVae, Svae, Trainer, Validation, Vae,
    },
};

/// The outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// The text form of the trained model.
    pub model: String,
    /// The average loss of every epoch, when there is no validation.
    pub losses: Vec<f32>,
    /// The validation metric of the kept model, when there is held out data.
    pub metric: Option<f32>,
    /// Where the model was saved.
    pub output: Option<PathBuf>,
}

/// Interactions as matrices, ready for the samplers.
struct Interactions {
    train: CsMat<f32>,
    test: Option<CsMat<f32>>,
    data: InteractionData,
}

/// Builds the model described by `spec`, trains it and saves it to `spec.output`.
///
/// Gradient based models keep the epoch with the best validation metric when
/// the dataset has held out data, and the last epoch otherwise.
pub fn run(spec: &RunSpec) -> Result<RunReport> {
    let training = &spec.training;
    let metric: Metric = training.metric.parse()?;
    let output = spec.output.as_deref();
    let mut rng = generate_rng(training.seed);

    info!("building {:?}", spec.model);

    let report = match &spec.model {
        ModelSpec::Ae {
            dec_dims,
            enc_dims,
            dropout,
        } => {
            let data = interactions(&spec.dataset)?;
            let net = MultiDaeNet::new(dec_dims.clone(), enc_dims.clone(), *dropout, &mut rng)?;
            let mut model = AeTrainer::new(net, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }
            fit_rows(&mut model, &data, training, metric, output)?
        }
        ModelSpec::MultiDae {
            dec_dims,
            enc_dims,
            dropout,
            lam,
        } => {
            let data = interactions(&spec.dataset)?;
            let net = MultiDaeNet::new(dec_dims.clone(), enc_dims.clone(), *dropout, &mut rng)?;
            let mut model = MultiDae::with_lam(net, *lam, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }
            fit_rows(&mut model, &data, training, metric, output)?
        }
        ModelSpec::Vae { dec_dims, enc_dims } => {
            let data = interactions(&spec.dataset)?;
            let net = VaeNet::new(dec_dims.clone(), enc_dims.clone(), &mut rng)?;
            let mut model = Vae::new(net, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }
            fit_rows(&mut model, &data, training, metric, output)?
        }
        ModelSpec::MultiVae {
            dec_dims,
            enc_dims,
            dropout,
            annealing,
        } => {
            let data = interactions(&spec.dataset)?;
            let net = MultiVaeNet::new(dec_dims.clone(), enc_dims.clone(), *dropout, &mut rng)?;
            let mut model =
                MultiVae::with_annealing(net, annealing.beta, annealing.anneal_steps, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }
            fit_rows(&mut model, &data, training, metric, output)?
        }
        ModelSpec::CMultiVae {
            cond_dim,
            dec_dims,
            enc_dims,
            dropout,
            annealing,
        } => {
            let data = interactions(&spec.dataset)?;
            if data.data.n_categories != *cond_dim {
                return Err(MlErr::SizeMismatch {
                    what: "conditions",
                    got: data.data.n_categories,
                    expected: *cond_dim,
                });
            }

            let net = CMultiVaeNet::new(
                *cond_dim,
                dec_dims.clone(),
                enc_dims.clone(),
                *dropout,
                &mut rng,
            )?;
            let mut model =
                MultiVae::with_annealing(net, annealing.beta, annealing.anneal_steps, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }

            let conditioned = |test: Option<CsMat<f32>>| {
                let sampler = ConditionedDataSampler::new(
                    &data.data.item_categories,
                    *cond_dim,
                    data.train.clone(),
                    test,
                    training.batch_size,
                    training.shuffle,
                )?;
                Ok::<_, MlErr>(match training.seed {
                    Some(seed) => sampler.seed(seed),
                    None => sampler,
                })
            };

            let mut sampler = conditioned(None)?;
            let mut valid = data.test.clone().map(|test| conditioned(Some(test))).transpose()?;
            fit(&mut model, &mut sampler, valid.as_mut(), training, metric, output)?
        }
        ModelSpec::Svae {
            embed_size,
            rnn_size,
            dec_dims,
            enc_dims,
            annealing,
            pred_type,
            k,
        } => {
            let data = sequences(&spec.dataset)?;
            let net = SvaeNet::new(
                data.n_items,
                *embed_size,
                *rnn_size,
                dec_dims.clone(),
                enc_dims.clone(),
                &mut rng,
            )?;
            let mut model = Svae::with_annealing(net, annealing.beta, annealing.anneal_steps, rng);
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }

            let sampler = SvaeSampler::new(
                data.n_items,
                data.train.clone(),
                data.test.clone(),
                *pred_type,
                *k,
                training.shuffle,
            )?;
            let mut sampler = match training.seed {
                Some(seed) => sampler.seed(seed),
                None => sampler,
            };

            if data.test.is_some() {
                let mut valid = sampler.clone();
                fit(&mut model, &mut sampler, Some(&mut valid), training, metric, output)?
            } else {
                fit::<_, _, SvaeSampler>(&mut model, &mut sampler, None, training, metric, output)?
            }
        }
        ModelSpec::Cfgan {
            gen_dims,
            disc_dims,
            alpha,
            s_pm,
            s_zr,
        } => {
            let data = interactions(&spec.dataset)?;
            let generator = CfganGenerator::new(gen_dims.clone(), &mut rng)?;
            let discriminator = CfganDiscriminator::new(disc_dims.clone(), &mut rng)?;
            let mut model = Cfgan::new(generator, discriminator, *alpha, *s_pm, *s_zr, rng)?;
            if let Some(lr) = training.learning_rate {
                model = model.with_learning_rate(lr);
            }
            fit_cfgan(&mut model, &data, training, metric, output)?
        }
        ModelSpec::Ease { lam } => {
            let data = interactions(&spec.dataset)?;
            let model = Ease::new(*lam).train(&data.train)?;
            let metric = data
                .test
                .as_ref()
                .map(|test| {
                    closed_form_metric(
                        |ids, rows| model.predict(ids, rows, true),
                        &data.train,
                        test,
                        metric,
                    )
                })
                .transpose()?;
            let output = output.map(|path| model.save_model(path)).transpose()?;

            RunReport {
                model: model.to_string(),
                losses: Vec::new(),
                metric,
                output,
            }
        }
        ModelSpec::AdmmSlim(config) => {
            let data = interactions(&spec.dataset)?;
            let model = AdmmSlim::new(*config).train(&data.train)?;
            let metric = data
                .test
                .as_ref()
                .map(|test| {
                    closed_form_metric(
                        |ids, rows| model.predict(ids, rows, true),
                        &data.train,
                        test,
                        metric,
                    )
                })
                .transpose()?;
            let output = output.map(|path| model.save_model(path)).transpose()?;

            RunReport {
                model: model.to_string(),
                losses: Vec::new(),
                metric,
                output,
            }
        }
    };

    info!("run finished: {}", report.model);
    Ok(report)
}

/// Trains a gradient based model, validating after every epoch when `valid` is given.
fn fit<T, S, V>(
    model: &mut T,
    sampler: &mut S,
    valid: Option<&mut V>,
    training: &TrainingSpec,
    metric: Metric,
    output: Option<&Path>,
) -> Result<RunReport>
where
    T: Trainer,
    S: Sampler<Item = T::Item, Target = T::Target>,
    V: ValidSampler<Item = T::Item>,
{
    let (losses, value) = match valid {
        Some(valid) => {
            let validation = Validation {
                sampler: valid,
                metric,
                best_path: output,
            };
            let best = model.train_with_validation(
                sampler,
                validation,
                training.num_epochs,
                training.verbose,
            )?;
            (Vec::new(), Some(best))
        }
        None => {
            let losses = model.train(sampler, training.num_epochs, training.verbose)?;
            if let Some(path) = output {
                model.save_model(path, model.counters().epoch)?;
            }
            (losses, None)
        }
    };

    Ok(RunReport {
        model: model.to_string(),
        losses,
        metric: value,
        output: output.map(Path::to_path_buf),
    })
}

/// `fit` over user rows batched by a `DataSampler`.
fn fit_rows<T>(
    model: &mut T,
    data: &Interactions,
    training: &TrainingSpec,
    metric: Metric,
    output: Option<&Path>,
) -> Result<RunReport>
where
    T: Trainer<Item = f32, Target = Array2<f32>>,
{
    let (mut sampler, mut valid) = row_samplers(data, training)?;
    fit(model, &mut sampler, valid.as_mut(), training, metric, output)
}

fn fit_cfgan(
    model: &mut Cfgan<StdRng>,
    data: &Interactions,
    training: &TrainingSpec,
    metric: Metric,
    output: Option<&Path>,
) -> Result<RunReport> {
    let (mut sampler, valid) = row_samplers(data, training)?;
    let schedule = AdversarialSchedule {
        num_epochs: training.num_epochs,
        g_steps: training.g_steps,
        d_steps: training.d_steps,
    };

    let (losses, value) = match valid {
        Some(mut valid) => {
            let validation = Validation {
                sampler: &mut valid,
                metric,
                best_path: output,
            };
            let best =
                model.train_with_validation(&mut sampler, validation, schedule, training.verbose)?;
            (Vec::new(), Some(best))
        }
        None => {
            let losses = model.train(&mut sampler, schedule, training.verbose)?;
            if let Some(path) = output {
                model.save_model(path, model.counters().epoch)?;
            }
            (losses, None)
        }
    };

    Ok(RunReport {
        model: model.to_string(),
        losses,
        metric: value,
        output: output.map(Path::to_path_buf),
    })
}

/// The training sampler and, with held out data, the validation one.
fn row_samplers(
    data: &Interactions,
    training: &TrainingSpec,
) -> Result<(DataSampler, Option<DataSampler>)> {
    let seeded = |sampler: DataSampler| match training.seed {
        Some(seed) => sampler.seed(seed),
        None => sampler,
    };

    let sampler = DataSampler::new(
        data.train.clone(),
        None,
        training.batch_size,
        training.shuffle,
    )?;
    let valid = data
        .test
        .clone()
        .map(|test| DataSampler::new(data.train.clone(), Some(test), training.batch_size, false))
        .transpose()?;

    Ok((seeded(sampler), valid))
}

/// Evaluates a closed form model on every user with held out interactions.
fn closed_form_metric<F>(
    predict: F,
    train: &CsMat<f32>,
    test: &CsMat<f32>,
    metric: Metric,
) -> Result<f32>
where
    F: Fn(&[usize], &CsMat<f32>) -> Result<Array2<f64>>,
{
    let users: Vec<usize> = (0..test.rows())
        .filter(|&u| test.outer_view(u).is_some_and(|row| row.nnz() > 0))
        .collect();
    if users.is_empty() {
        return Ok(0.);
    }

    let rows = crate::data::select_rows(train, &users)?;
    let scores = predict(&users, &rows)?.mapv(|s| s as f32);
    let ground_truth = dense_rows(test, &users);

    metric.evaluate(scores.view(), ground_truth.view())
}

fn load_dataset(dataset: &DatasetSpec) -> Result<DatasetSpec> {
    match dataset {
        DatasetSpec::File { path } => {
            let bytes = fs::read(path)?;
            let inline: DatasetSpec = serde_json::from_slice(&bytes)?;
            match inline {
                DatasetSpec::File { .. } => Err(MlErr::InvalidConfig(format!(
                    "{} points to another dataset file",
                    path.display()
                ))),
                inline => Ok(inline),
            }
        }
        inline => Ok(inline.clone()),
    }
}

fn interactions(dataset: &DatasetSpec) -> Result<Interactions> {
    let DatasetSpec::Interactions(data) = load_dataset(dataset)? else {
        return Err(MlErr::InvalidConfig("this model trains on interactions".into()));
    };

    let train = from_triplets(data.n_users, data.n_items, &data.train)?;
    let test = data
        .test
        .as_deref()
        .map(|test| from_triplets(data.n_users, data.n_items, test))
        .transpose()?;

    Ok(Interactions { train, test, data })
}

fn sequences(dataset: &DatasetSpec) -> Result<SequenceData> {
    match load_dataset(dataset)? {
        DatasetSpec::Sequences(data) => Ok(data),
        _ => Err(MlErr::InvalidConfig("this model trains on sequences".into())),
    }
}
