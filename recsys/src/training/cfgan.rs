use std::fmt;

use log::debug;
use ndarray::{Array2, ArrayView2};
use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};

use super::{Counters, Trainer, Validation, core::mask_seen};
use crate::{
    MlErr, Result,
    arch::{
        Device,
        loss::{Bce, LossFn, Mse},
        nets::{CfganDiscriminator, CfganGenerator, Network},
    },
    checkpoint::{AdversarialState, Checkpoint},
    optimization::{Adam, DEFAULT_LEARNING_RATE},
    sampling::{Sampler, ValidSampler},
};

/// How long an adversarial run lasts and how many steps each side takes per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdversarialSchedule {
    pub num_epochs: usize,
    pub g_steps: usize,
    pub d_steps: usize,
}

impl Default for AdversarialSchedule {
    fn default() -> Self {
        Self {
            num_epochs: 100,
            g_steps: 1,
            d_steps: 1,
        }
    }
}

/// Collaborative filtering GAN.
///
/// The generator maps a user's interactions to a purchase vector, and the
/// discriminator tells real interaction rows from generated ones, both
/// conditioned on the user's row. Part of each user's unobserved items are
/// sampled at every step: the partial masking ones (`s_pm`) are kept in the
/// generated candidate, the zero reconstruction ones (`s_zr`) are pushed
/// towards zero with weight `alpha`.
pub struct Cfgan<R> {
    generator: CfganGenerator,
    discriminator: CfganDiscriminator,
    opt_g: Adam,
    opt_d: Adam,
    loss: Bce,
    regularization_loss: Mse,
    alpha: f32,
    s_pm: f32,
    s_zr: f32,
    n_items: usize,
    g_steps: usize,
    d_steps: usize,
    device: Device,
    counters: Counters,
    rng: R,
}

impl<R: Rng> Cfgan<R> {
    /// Creates a new `Cfgan` with default `Adam` optimizers for both networks.
    ///
    /// # Arguments
    /// * `generator` - The generator network.
    /// * `discriminator` - The discriminator, over twice the generator's items.
    /// * `alpha` - Weight of the zero reconstruction regularization.
    /// * `s_pm` - Fraction of the items sampled for partial masking.
    /// * `s_zr` - Fraction of the items sampled for zero reconstruction.
    /// * `rng` - Drives the mask sampling.
    pub fn new(
        generator: CfganGenerator,
        discriminator: CfganDiscriminator,
        alpha: f32,
        s_pm: f32,
        s_zr: f32,
        rng: R,
    ) -> Result<Self> {
        let n_items = generator.n_items();
        if discriminator.n_items() != n_items {
            return Err(MlErr::InvalidArchitecture(format!(
                "the discriminator judges {} items but the generator yields {n_items}",
                discriminator.n_items()
            )));
        }

        for (name, ratio) in [("s_pm", s_pm), ("s_zr", s_zr)] {
            if !(0. ..=1.).contains(&ratio) {
                return Err(MlErr::InvalidConfig(format!("{name} must be in [0, 1], got {ratio}")));
            }
        }

        let opt_g = Adam::with_learning_rate(generator.params().len(), DEFAULT_LEARNING_RATE);
        let opt_d = Adam::with_learning_rate(discriminator.params().len(), DEFAULT_LEARNING_RATE);

        Ok(Self {
            generator,
            discriminator,
            opt_g,
            opt_d,
            loss: Bce::new(),
            regularization_loss: Mse::new(),
            alpha,
            s_pm,
            s_zr,
            n_items,
            g_steps: 1,
            d_steps: 1,
            device: Device::Cpu,
            counters: Counters::default(),
            rng,
        })
    }

    /// Replaces both optimizers with fresh ones using `learning_rate`.
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.opt_g = Adam::with_learning_rate(self.generator.params().len(), learning_rate);
        self.opt_d = Adam::with_learning_rate(self.discriminator.params().len(), learning_rate);
        self
    }

    pub fn generator(&self) -> &CfganGenerator {
        &self.generator
    }

    pub fn discriminator(&self) -> &CfganDiscriminator {
        &self.discriminator
    }

    pub fn opt_g(&self) -> &Adam {
        &self.opt_g
    }

    pub fn opt_d(&self) -> &Adam {
        &self.opt_d
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn s_pm(&self) -> f32 {
        self.s_pm
    }

    pub fn s_zr(&self) -> f32 {
        self.s_zr
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Trains for `schedule.num_epochs` epochs with the given steps per batch.
    ///
    /// # Returns
    /// The average generator loss of every epoch.
    pub fn train<S>(
        &mut self,
        sampler: &mut S,
        schedule: AdversarialSchedule,
        verbose: usize,
    ) -> Result<Vec<f32>>
    where
        S: Sampler<Item = f32, Target = Array2<f32>>,
    {
        self.set_steps(schedule)?;
        Trainer::train(self, sampler, schedule.num_epochs, verbose)
    }

    /// Like `train`, keeping the checkpoint with the best validation metric.
    pub fn train_with_validation<S, V>(
        &mut self,
        sampler: &mut S,
        valid: Validation<'_, V>,
        schedule: AdversarialSchedule,
        verbose: usize,
    ) -> Result<f32>
    where
        S: Sampler<Item = f32, Target = Array2<f32>>,
        V: ValidSampler<Item = f32>,
    {
        self.set_steps(schedule)?;
        Trainer::train_with_validation(self, sampler, valid, schedule.num_epochs, verbose)
    }

    fn set_steps(&mut self, schedule: AdversarialSchedule) -> Result<()> {
        if schedule.g_steps == 0 || schedule.d_steps == 0 {
            return Err(MlErr::InvalidConfig(
                "both networks need at least one step per batch".into(),
            ));
        }

        self.g_steps = schedule.g_steps;
        self.d_steps = schedule.d_steps;
        Ok(())
    }

    /// One discriminator update on real `[x | x]` rows against generated ones.
    fn discriminator_step(&mut self, x: ArrayView2<f32>) -> Result<f32> {
        let pm = sample_unobserved(x, self.s_pm, &mut self.rng);
        let fake = self.generator.forward(x)?;
        let candidate = fake * &(&x + &pm);

        self.discriminator.params_mut().zero_grad();

        let real = Array2::ones((x.nrows(), 1));
        let p_real = self.discriminator.forward(x, x)?;
        let loss_real = self.loss.loss(p_real.view(), real.view());
        let d_real = self.loss.loss_prime(p_real.view(), real.view());
        self.discriminator.backward(d_real)?;

        let fake_label = Array2::zeros((x.nrows(), 1));
        let p_fake = self.discriminator.forward(candidate.view(), x)?;
        let loss_fake = self.loss.loss(p_fake.view(), fake_label.view());
        let d_fake = self.loss.loss_prime(p_fake.view(), fake_label.view());
        self.discriminator.backward(d_fake)?;

        self.discriminator.params_mut().step(&mut self.opt_d)?;
        self.counters.gradient_updates += 1;

        Ok(loss_real + loss_fake)
    }

    /// One generator update through the discriminator's judgement of its candidates.
    fn generator_step(&mut self, x: ArrayView2<f32>) -> Result<f32> {
        let pm = sample_unobserved(x, self.s_pm, &mut self.rng);
        let zr = sample_unobserved(x, self.s_zr, &mut self.rng);

        self.generator.params_mut().zero_grad();

        let fake = self.generator.forward(x)?;
        let keep = &x + &pm;
        let candidate = &fake * &keep;

        let real = Array2::ones((x.nrows(), 1));
        let p = self.discriminator.forward(candidate.view(), x)?;
        let adversarial = self.loss.loss(p.view(), real.view());
        let d_p = self.loss.loss_prime(p.view(), real.view());
        let d_candidate = self.discriminator.backward(d_p)?;

        let zeroed = &fake * &zr;
        let target = Array2::zeros(zeroed.raw_dim());
        let regularization = self.regularization_loss.loss(zeroed.view(), target.view());
        let d_zeroed = self
            .regularization_loss
            .loss_prime(zeroed.view(), target.view());

        let d_fake = d_candidate * &keep + &(d_zeroed * &zr * self.alpha);
        self.generator.backward(d_fake)?;
        self.generator.params_mut().step(&mut self.opt_g)?;
        self.counters.gradient_updates += 1;

        Ok(adversarial + self.alpha * regularization)
    }
}

impl<R: Rng> Trainer for Cfgan<R> {
    type Item = f32;
    type Target = Array2<f32>;
    type Scores = Array2<f32>;

    fn counters(&self) -> Counters {
        self.counters
    }

    fn counters_mut(&mut self) -> &mut Counters {
        &mut self.counters
    }

    /// Takes `d_steps` discriminator steps and then `g_steps` generator steps.
    ///
    /// # Returns
    /// The generator loss of the last generator step.
    fn train_batch(&mut self, epoch: usize, x: ArrayView2<f32>, _y: &Array2<f32>) -> Result<f32> {
        if x.ncols() != self.n_items {
            return Err(MlErr::SizeMismatch {
                what: "batch items",
                got: x.ncols(),
                expected: self.n_items,
            });
        }

        let mut d_loss = 0.;
        for _ in 0..self.d_steps {
            d_loss = self.discriminator_step(x)?;
        }

        let mut g_loss = 0.;
        for _ in 0..self.g_steps {
            g_loss = self.generator_step(x)?;
        }

        debug!(epoch = epoch, d_loss = d_loss, g_loss = g_loss; "adversarial batch");
        Ok(g_loss)
    }

    fn predict<'x>(
        &mut self,
        x: ArrayView2<'x, f32>,
        mask: bool,
    ) -> Result<(Array2<f32>, ArrayView2<'x, f32>)> {
        let mut scores = self.generator.forward(x)?;

        if mask {
            mask_seen(&mut scores, x);
        }

        Ok((scores, x))
    }

    fn ranking_scores(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.predict(x, true)?.0)
    }

    fn checkpoint(&self, epoch: usize) -> Checkpoint {
        Checkpoint::Adversarial(AdversarialState {
            epoch,
            gradient_updates: self.counters.gradient_updates,
            generator: self.generator.params().values().to_vec(),
            discriminator: self.discriminator.params().values().to_vec(),
            opt_g: self.opt_g.clone(),
            opt_d: self.opt_d.clone(),
        })
    }

    fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let Checkpoint::Adversarial(state) = checkpoint else {
            return Err(MlErr::CheckpointMismatch {
                expected: Checkpoint::ADVERSARIAL,
                got: checkpoint.family(),
            });
        };

        for (what, opt, expected) in [
            ("generator optimizer", &state.opt_g, self.generator.params().len()),
            ("discriminator optimizer", &state.opt_d, self.discriminator.params().len()),
        ] {
            if opt.len() != expected {
                return Err(MlErr::SizeMismatch {
                    what,
                    got: opt.len(),
                    expected,
                });
            }
        }

        self.generator.params_mut().load(&state.generator)?;
        self.discriminator.params_mut().load(&state.discriminator)?;
        self.opt_g = state.opt_g.clone();
        self.opt_d = state.opt_d.clone();
        self.counters = Counters {
            epoch: state.epoch,
            gradient_updates: state.gradient_updates,
        };

        Ok(())
    }
}

/// Marks, in every row, `ratio * n_items` of the row's zero entries picked at
/// random, or all of them if there are fewer.
fn sample_unobserved<R: Rng + ?Sized>(x: ArrayView2<f32>, ratio: f32, rng: &mut R) -> Array2<f32> {
    let amount = (ratio * x.ncols() as f32) as usize;
    let mut mask = Array2::zeros(x.raw_dim());

    for (row, mut marks) in x.outer_iter().zip(mask.outer_iter_mut()) {
        let zeros: Vec<usize> = row
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v == 0.)
            .map(|(i, _)| i)
            .collect();

        for i in index::sample(rng, zeros.len(), amount.min(zeros.len())) {
            marks[zeros[i]] = 1.;
        }
    }

    mask
}

impl<R> fmt::Display for Cfgan<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cfgan(generator={}, discriminator={}, ",
            self.generator, self.discriminator
        )?;
        write!(
            f,
            "opt_g=Adam(lr={}), opt_d=Adam(lr={}), ",
            self.opt_g.learning_rate(),
            self.opt_d.learning_rate()
        )?;
        write!(
            f,
            "alpha={}, s_pm={}, s_zr={}, device={})",
            self.alpha,
            self.s_pm,
            self.s_zr,
            self.device
        )
    }
}

impl<R> fmt::Debug for Cfgan<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    fn cfgan(seed: u64) -> Cfgan<StdRng> {
        let mut rng = StdRng::seed_from_u64(seed);
        let generator = CfganGenerator::new(vec![3, 5, 3], &mut rng).unwrap();
        let discriminator = CfganDiscriminator::new(vec![6, 5, 1], &mut rng).unwrap();
        Cfgan::new(generator, discriminator, 0.03, 0.5, 0.7, rng).unwrap()
    }

    #[test]
    fn construction() {
        let model = cfgan(0);
        assert_eq!(model.n_items(), 3);
        assert_eq!(model.alpha(), 0.03);
        assert_eq!(model.s_pm(), 0.5);
        assert_eq!(model.s_zr(), 0.7);
        assert_eq!(model.to_string(), format!("{model:?}"));

        let mut rng = StdRng::seed_from_u64(0);
        let generator = CfganGenerator::new(vec![3, 5, 3], &mut rng).unwrap();
        let discriminator = CfganDiscriminator::new(vec![8, 5, 1], &mut rng).unwrap();
        assert!(Cfgan::new(generator, discriminator, 0.03, 0.5, 0.7, rng).is_err());
    }

    #[test]
    fn masks_only_pick_unobserved_items() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = array![[1., 0., 0., 0.], [1., 1., 1., 0.], [1., 1., 1., 1.]];
        let mask = sample_unobserved(x.view(), 0.5, &mut rng);

        assert_eq!(mask.row(0).sum(), 2.);
        assert_eq!(mask.row(1), array![0., 0., 0., 1.]);
        assert_eq!(mask.row(2).sum(), 0.);
    }

    #[test]
    fn batch_updates_both_networks() {
        let mut model = cfgan(1);
        let x = array![[1., 1., 0.], [0., 1., 1.]];
        let generator = model.generator().params().values().to_vec();
        let discriminator = model.discriminator().params().values().to_vec();

        let loss = model.train_batch(1, x.view(), &x).unwrap();
        assert!(loss.is_finite());
        assert_eq!(model.gradient_updates(), 2);
        assert_ne!(model.generator().params().values(), generator.as_slice());
        assert_ne!(model.discriminator().params().values(), discriminator.as_slice());
    }

    #[test]
    fn every_optimizer_step_is_counted() {
        let mut model = cfgan(4);
        let schedule = AdversarialSchedule {
            num_epochs: 1,
            g_steps: 1,
            d_steps: 3,
        };
        model.set_steps(schedule).unwrap();

        let x = array![[1., 0., 1.], [0., 1., 0.]];
        model.train_batch(1, x.view(), &x).unwrap();
        assert_eq!(model.gradient_updates(), 4);
        assert_eq!(model.opt_d.steps(), 3);
        assert_eq!(model.opt_g.steps(), 1);
    }

    #[test]
    fn foreign_checkpoint_is_rejected() {
        let mut model = cfgan(2);
        let other = Checkpoint::Autoencoder(crate::checkpoint::NetworkState {
            epoch: 1,
            gradient_updates: 0,
            network: vec![],
            optimizer: Adam::with_learning_rate(0, 1e-3),
        });

        assert!(model.restore(&other).is_err());
        let own = model.checkpoint(4);
        model.restore(&own).unwrap();
        assert_eq!(model.counters().epoch, 4);
    }

    #[test]
    fn zero_steps_are_rejected() {
        let mut model = cfgan(3);
        let schedule = AdversarialSchedule {
            num_epochs: 1,
            g_steps: 0,
            d_steps: 1,
        };
        assert!(model.set_steps(schedule).is_err());
    }
}
