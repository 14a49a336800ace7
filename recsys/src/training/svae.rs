use std::fmt;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use super::{
    Counters, Trainer,
    core::{Core, anneal},
};
use crate::{
    MlErr, Result,
    arch::{
        Device, Mode,
        loss::{Kld, LossFn, MultinomialNll},
        nets::{Network, SvaeNet},
    },
    checkpoint::Checkpoint,
    optimization::Adam,
};

/// Trains a sequential VAE: at every step of a user's sequence, the
/// multinomial likelihood of the upcoming items plus the annealed KL term,
/// both averaged over steps.
pub struct Svae<R> {
    core: Core<SvaeNet, R>,
    beta: f32,
    anneal_steps: u64,
    likelihood: MultinomialNll,
    kld: Kld,
}

impl<R: Rng> Svae<R> {
    /// Creates a new `Svae` with `beta = 1` and no annealing.
    pub fn new(network: SvaeNet, rng: R) -> Self {
        Self::with_annealing(network, 1., 0, rng)
    }

    pub fn with_annealing(network: SvaeNet, beta: f32, anneal_steps: u64, rng: R) -> Self {
        Self {
            core: Core::new(network, rng),
            beta,
            anneal_steps,
            likelihood: MultinomialNll::new(),
            kld: Kld::new(),
        }
    }

    /// Replaces the optimizer with a fresh one using `learning_rate`.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.core.set_learning_rate(learning_rate);
        self
    }

    pub fn network(&self) -> &SvaeNet {
        &self.core.network
    }

    pub fn optimizer(&self) -> &Adam {
        &self.core.optimizer
    }

    pub fn device(&self) -> Device {
        self.core.device
    }

    pub fn anneal(&self) -> f32 {
        anneal(self.beta, self.anneal_steps, self.core.counters.gradient_updates)
    }

    /// The loss of per-step logits against per-step targets, both shaped
    /// `(batch * steps, items)`.
    pub fn loss_function(
        &self,
        logits: ArrayView2<f32>,
        y: ArrayView2<f32>,
        mu: ArrayView2<f32>,
        logvar: ArrayView2<f32>,
        anneal: f32,
    ) -> Result<f32> {
        if logits.dim() != y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "target steps",
                got: y.nrows(),
                expected: logits.nrows(),
            });
        }

        Ok(self.likelihood.loss(logits, y) + anneal * self.kld.loss(mu, logvar))
    }
}

impl<R: Rng> Trainer for Svae<R> {
    type Item = usize;
    type Target = Array3<f32>;
    type Scores = Array3<f32>;

    fn counters(&self) -> Counters {
        self.core.counters
    }

    fn counters_mut(&mut self) -> &mut Counters {
        &mut self.core.counters
    }

    fn train_batch(
        &mut self,
        _epoch: usize,
        x: ArrayView2<usize>,
        y: &Array3<f32>,
    ) -> Result<f32> {
        let anneal = self.anneal();
        let Core { network, rng, .. } = &mut self.core;
        network.params_mut().zero_grad();

        let out = network.forward(x, Mode::Train, rng)?;
        let (batch, steps, items) = out.logits.dim();
        if y.dim() != (batch, steps, items) {
            return Err(MlErr::SizeMismatch {
                what: "target steps",
                got: y.len_of(Axis(1)),
                expected: steps,
            });
        }

        let logits = out.logits.into_shape_clone((batch * steps, items))?;
        let y = y.to_shape((batch * steps, items))?;

        let loss = self.loss_function(
            logits.view(),
            y.view(),
            out.mu.view(),
            out.logvar.view(),
            anneal,
        )?;

        let d_logits = self.likelihood.loss_prime(logits.view(), y.view());
        let d_logits = d_logits.into_shape_clone((batch, steps, items))?;
        let (d_mu, d_logvar) = self.kld.loss_prime(out.mu.view(), out.logvar.view());

        self.core
            .network
            .backward(d_logits, d_mu * anneal, d_logvar * anneal)?;
        self.core.step()?;
        Ok(loss)
    }

    /// Scores every step of every sequence. Masking rules out, at step `t`,
    /// the items seen up to and including `t`.
    fn predict<'x>(
        &mut self,
        x: ArrayView2<'x, usize>,
        mask: bool,
    ) -> Result<(Array3<f32>, ArrayView2<'x, usize>)> {
        let Core { network, rng, .. } = &mut self.core;
        let mut scores = network.forward(x, Mode::Eval, rng)?.logits;

        if mask {
            for (mut user, seq) in scores.outer_iter_mut().zip(x.outer_iter()) {
                for t in 0..seq.len() {
                    for &item in seq.iter().take(t + 1) {
                        user[[t, item]] = f32::NEG_INFINITY;
                    }
                }
            }
        }

        Ok((scores, x))
    }

    fn ranking_scores(&mut self, x: ArrayView2<usize>) -> Result<Array2<f32>> {
        let Some(last) = x.ncols().checked_sub(1) else {
            return Err(MlErr::SizeMismatch {
                what: "sequence steps",
                got: 0,
                expected: 1,
            });
        };

        let (scores, _) = self.predict(x, true)?;
        Ok(scores.index_axis(Axis(1), last).to_owned())
    }

    fn checkpoint(&self, epoch: usize) -> Checkpoint {
        Checkpoint::Sequential(self.core.state(epoch))
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.core
            .restore(checkpoint.network_state(Checkpoint::SEQUENTIAL)?)
    }
}

impl<R> fmt::Display for Svae<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.describe(f, "Svae")?;
        write!(f, ", beta={}, anneal_steps={})", self.beta, self.anneal_steps)
    }
}

impl<R> fmt::Debug for Svae<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
