use std::{fmt, path::Path};

use log::{debug, info};
use ndarray::{Array2, ArrayView2};

use crate::{
    Result,
    checkpoint::Checkpoint,
    metrics::Metric,
    sampling::{Sampler, ValidSampler},
};

/// The progress counters every gradient based trainer persists.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    /// The last completed epoch.
    pub epoch: usize,
    /// Optimizer steps taken since construction.
    pub gradient_updates: u64,
}

/// Everything needed to pick the best epoch of a run.
pub struct Validation<'a, V> {
    pub sampler: &'a mut V,
    pub metric: Metric,
    /// Where the best checkpoint so far is written, if anywhere.
    pub best_path: Option<&'a Path>,
}

/// A gradient based recommender: a network, its optimizer and the routines to
/// train, evaluate and persist them.
///
/// Implementors provide the per-batch step, prediction and checkpoint
/// conversion. Epoch iteration, validation and persistence come for free.
pub trait Trainer: fmt::Display {
    /// The entries of an input batch.
    type Item;
    /// What a training batch is compared against.
    type Target;
    /// What `predict` returns for a batch.
    type Scores;

    fn counters(&self) -> Counters;
    fn counters_mut(&mut self) -> &mut Counters;

    /// Makes one forward pass, one backward pass and one optimizer step,
    /// incrementing the gradient update counter.
    ///
    /// # Returns
    /// The loss of the batch before the step.
    fn train_batch(
        &mut self,
        epoch: usize,
        x: ArrayView2<Self::Item>,
        y: &Self::Target,
    ) -> Result<f32>;

    /// Scores a batch without touching the parameters.
    ///
    /// # Arguments
    /// * `x` - The input batch.
    /// * `mask` - Whether the items already in `x` get a score of `-inf`, ruling
    ///   them out of any ranking. `x` itself is never modified.
    ///
    /// # Returns
    /// The scores along with the input batch.
    fn predict<'x>(
        &mut self,
        x: ArrayView2<'x, Self::Item>,
        mask: bool,
    ) -> Result<(Self::Scores, ArrayView2<'x, Self::Item>)>;

    /// Returns one masked score row per user of `x`, as ranked by metrics.
    fn ranking_scores(&mut self, x: ArrayView2<Self::Item>) -> Result<Array2<f32>>;

    /// Snapshots the trainer, recording `epoch` as its epoch.
    fn checkpoint(&self, epoch: usize) -> Checkpoint;

    /// Restores network parameters, optimizer state and counters.
    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    fn gradient_updates(&self) -> u64 {
        self.counters().gradient_updates
    }

    /// Trains over one full pass of `sampler`.
    ///
    /// # Arguments
    /// * `epoch` - The epoch being trained.
    /// * `sampler` - The batch producer.
    /// * `verbose` - Progress is logged every `verbose` batches, never if 0.
    ///
    /// # Returns
    /// The average batch loss.
    fn train_epoch<S>(&mut self, epoch: usize, sampler: &mut S, verbose: usize) -> Result<f32>
    where
        S: Sampler<Item = Self::Item, Target = Self::Target>,
    {
        let mut total_loss = 0.;
        let mut num_batches = 0;

        for (x, y) in sampler.batches() {
            total_loss += self.train_batch(epoch, x.view(), &y)?;
            num_batches += 1;

            if verbose > 0 && num_batches % verbose == 0 {
                debug!(
                    epoch = epoch,
                    batch = num_batches,
                    loss = total_loss / num_batches as f32;
                    "training"
                );
            }
        }

        let loss = if num_batches == 0 {
            0.
        } else {
            total_loss / num_batches as f32
        };

        info!(epoch = epoch, loss = loss; "epoch finished");
        Ok(loss)
    }

    /// Runs `num_epochs` epochs, continuing the epoch count of previous calls.
    ///
    /// # Returns
    /// The average loss of every epoch.
    fn train<S>(&mut self, sampler: &mut S, num_epochs: usize, verbose: usize) -> Result<Vec<f32>>
    where
        S: Sampler<Item = Self::Item, Target = Self::Target>,
    {
        let mut losses = Vec::with_capacity(num_epochs);

        for _ in 0..num_epochs {
            let epoch = self.counters().epoch + 1;
            losses.push(self.train_epoch(epoch, sampler, verbose)?);
            self.counters_mut().epoch = epoch;
        }

        Ok(losses)
    }

    /// Like `train`, but evaluates the validation metric after every epoch and
    /// checkpoints to `best_path` whenever it strictly improves.
    ///
    /// # Returns
    /// The best metric value seen.
    fn train_with_validation<S, V>(
        &mut self,
        sampler: &mut S,
        valid: Validation<'_, V>,
        num_epochs: usize,
        verbose: usize,
    ) -> Result<f32>
    where
        S: Sampler<Item = Self::Item, Target = Self::Target>,
        V: ValidSampler<Item = Self::Item>,
    {
        let mut best = f32::NEG_INFINITY;

        for _ in 0..num_epochs {
            let epoch = self.counters().epoch + 1;
            self.train_epoch(epoch, sampler, verbose)?;
            self.counters_mut().epoch = epoch;

            let value = self.validate(&mut *valid.sampler, valid.metric)?;
            info!(epoch = epoch, value = value; "validation {}", valid.metric);

            if value > best {
                best = value;
                if let Some(path) = valid.best_path {
                    self.save_model(path, epoch)?;
                    info!("new best model saved to {}", path.display());
                }
            }
        }

        Ok(best)
    }

    /// Evaluates `metric` over one validation pass, averaging over users.
    fn validate<V>(&mut self, sampler: &mut V, metric: Metric) -> Result<f32>
    where
        V: ValidSampler<Item = Self::Item>,
    {
        let mut values = Vec::new();

        for (x, gt) in sampler.valid_batches() {
            let scores = self.ranking_scores(x.view())?;
            values.extend(metric.per_user(scores.view(), gt.view())?);
        }

        if values.is_empty() {
            return Ok(0.);
        }

        Ok(values.iter().sum::<f32>() / values.len() as f32)
    }

    /// Persists the trainer to `path`, recording `epoch`.
    fn save_model(&self, path: &Path, epoch: usize) -> Result<()> {
        self.checkpoint(epoch).save(path)
    }

    /// Restores the trainer from `path`.
    ///
    /// # Returns
    /// The loaded checkpoint.
    fn load_model(&mut self, path: &Path) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::load(path)?;
        self.restore(&checkpoint)?;
        Ok(checkpoint)
    }
}
