use std::collections::{BTreeSet, HashMap};

use ndarray::{Array2, s};
use rand::rngs::StdRng;
use sprs::CsMat;

use super::{Sampler, ValidSampler, data::chunks, generate_rng, pass_order};
use crate::{
    MlErr, Result,
    data::{check_same_shape, dense_rows, row_items, to_csr},
};

/// Samples user rows paired with a condition, for conditioned VAEs.
///
/// Every user yields one unconditioned example plus one example per category
/// among the items the user interacted with. Inputs are `[row | one-hot(category)]`
/// and targets keep only the items belonging to the example's category, or
/// the whole row for the unconditioned example.
#[derive(Debug, Clone)]
pub struct ConditionedDataSampler {
    item_conds: Vec<Vec<usize>>,
    n_cond: usize,
    train: CsMat<f32>,
    test: Option<CsMat<f32>>,
    examples: Vec<(usize, Option<usize>)>,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl ConditionedDataSampler {
    /// Creates a new `ConditionedDataSampler`.
    ///
    /// # Arguments
    /// * `iid2cids` - The categories of each item. Items not present have none.
    /// * `n_cond` - The total number of categories.
    /// * `train` - The users x items training interactions.
    /// * `test` - Held out interactions with the same shape, if any.
    /// * `batch_size` - The number of examples per batch.
    /// * `shuffle` - Whether examples are visited in a new random order every pass.
    pub fn new(
        iid2cids: &HashMap<usize, Vec<usize>>,
        n_cond: usize,
        train: CsMat<f32>,
        test: Option<CsMat<f32>>,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(MlErr::InvalidConfig("batch size must be positive".into()));
        }

        let train = to_csr(train);
        let test = test.map(to_csr);
        if let Some(test) = &test {
            check_same_shape(&train, test)?;
        }

        let mut item_conds = vec![Vec::new(); train.cols()];
        for (&item, cids) in iid2cids {
            if item >= train.cols() {
                return Err(MlErr::IndexOutOfRange {
                    index: item,
                    len: train.cols(),
                });
            }
            if let Some(&c) = cids.iter().find(|&&c| c >= n_cond) {
                return Err(MlErr::IndexOutOfRange { index: c, len: n_cond });
            }

            item_conds[item] = cids.clone();
        }

        let mut examples = Vec::new();
        for u in 0..train.rows() {
            examples.push((u, None));

            let conds: BTreeSet<_> = row_items(&train, u)
                .into_iter()
                .flat_map(|i| item_conds[i].iter().copied())
                .collect();
            examples.extend(conds.into_iter().map(|c| (u, Some(c))));
        }

        Ok(Self {
            item_conds,
            n_cond,
            train,
            test,
            examples,
            batch_size,
            shuffle,
            rng: generate_rng(None),
        })
    }

    /// Fixes the seed used to shuffle examples.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = generate_rng(Some(seed));
        self
    }

    /// Returns the number of `(user, condition)` examples of a pass.
    #[inline]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    #[inline]
    pub fn n_cond(&self) -> usize {
        self.n_cond
    }

    /// Builds the inputs and the condition-filtered rows of `source` for a batch of examples.
    fn batch(&self, picked: &[usize], source: &CsMat<f32>) -> (Array2<f32>, Array2<f32>) {
        let n_items = self.train.cols();
        let users: Vec<_> = picked.iter().map(|&e| self.examples[e].0).collect();

        let rows = dense_rows(&self.train, &users);
        let mut x = Array2::zeros((picked.len(), n_items + self.n_cond));
        x.slice_mut(s![.., ..n_items]).assign(&rows);

        let mut target = dense_rows(source, &users);
        for (r, &e) in picked.iter().enumerate() {
            let Some(c) = self.examples[e].1 else {
                continue;
            };

            x[[r, n_items + c]] = 1.;
            for (i, v) in target.row_mut(r).iter_mut().enumerate() {
                if !self.item_conds[i].contains(&c) {
                    *v = 0.;
                }
            }
        }

        (x, target)
    }
}

impl Sampler for ConditionedDataSampler {
    type Item = f32;
    type Target = Array2<f32>;

    fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> impl Iterator<Item = (Array2<f32>, Array2<f32>)> + '_ {
        let order = pass_order(self.examples.len(), self.shuffle, &mut self.rng);
        let this = &*self;

        chunks(order, this.batch_size).map(move |picked| this.batch(&picked, &this.train))
    }
}

impl ValidSampler for ConditionedDataSampler {
    type Item = f32;

    fn valid_batches(&mut self) -> impl Iterator<Item = (Array2<f32>, Array2<f32>)> + '_ {
        let order: Vec<_> = (0..self.examples.len()).collect();
        let this = &*self;
        let source = this.test.as_ref().unwrap_or(&this.train);

        chunks(order, this.batch_size).map(move |picked| {
            let (x, gt) = this.batch(&picked, source);
            (x, gt.mapv_into(|v| if v > 0. { 1. } else { 0. }))
        })
    }
}
