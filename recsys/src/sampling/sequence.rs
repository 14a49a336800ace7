use std::{collections::BTreeMap, fmt, str::FromStr};

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::{Sampler, ValidSampler, generate_rng, pass_order};
use crate::{MlErr, Result};

/// Which future items count as positives at every step of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredType {
    /// The item right after the step.
    Next,
    /// The `k` items after the step.
    NextK,
    /// Every item after the step.
    Postfix,
}

impl FromStr for PredType {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "next" => Ok(Self::Next),
            "next_k" => Ok(Self::NextK),
            "postfix" => Ok(Self::Postfix),
            other => Err(MlErr::InvalidConfig(format!("unknown prediction type {other:?}"))),
        }
    }
}

impl fmt::Display for PredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next => write!(f, "next"),
            Self::NextK => write!(f, "next_k"),
            Self::Postfix => write!(f, "postfix"),
        }
    }
}

/// Samples one user's item sequence per batch, for sequential VAEs.
///
/// The input is the sequence without its last item, shaped `(1, steps)`, and
/// the target marks for every step the items selected by the `PredType`,
/// shaped `(1, steps, n_items)`.
#[derive(Debug, Clone)]
pub struct SvaeSampler {
    n_items: usize,
    train: Vec<Vec<usize>>,
    test: Vec<Option<Vec<usize>>>,
    pred_type: PredType,
    k: usize,
    shuffle: bool,
    rng: StdRng,
}

impl SvaeSampler {
    /// Creates a new `SvaeSampler`.
    ///
    /// # Arguments
    /// * `n_items` - The size of the item vocabulary.
    /// * `train` - The training sequence of every user.
    /// * `test` - The held out items of every user, if any.
    /// * `pred_type` - Which future items are positives.
    /// * `k` - How many future items count for `PredType::NextK`.
    /// * `shuffle` - Whether users are visited in a new random order every pass.
    pub fn new(
        n_items: usize,
        train: BTreeMap<usize, Vec<usize>>,
        test: Option<BTreeMap<usize, Vec<usize>>>,
        pred_type: PredType,
        k: usize,
        shuffle: bool,
    ) -> Result<Self> {
        let items = train.values().chain(test.iter().flat_map(|t| t.values()));
        if let Some(&index) = items.flatten().find(|&&i| i >= n_items) {
            return Err(MlErr::IndexOutOfRange { index, len: n_items });
        }

        if pred_type == PredType::NextK && k == 0 {
            return Err(MlErr::InvalidConfig("next_k needs a positive k".into()));
        }

        let mut test = test.unwrap_or_default();
        let (users, train): (Vec<_>, Vec<_>) = train.into_iter().unzip();
        let test = users.iter().map(|u| test.remove(u)).collect();

        Ok(Self {
            n_items,
            train,
            test,
            pred_type,
            k,
            shuffle,
            rng: generate_rng(None),
        })
    }

    /// Fixes the seed used to shuffle users.
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = generate_rng(Some(seed));
        self
    }

    #[inline]
    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Builds the input and per-step targets of one sequence of at least two items.
    fn example(&self, seq: &[usize]) -> (Array2<usize>, Array3<f32>) {
        let steps = seq.len() - 1;
        let x = Array2::from_shape_fn((1, steps), |(_, t)| seq[t]);
        let mut y = Array3::zeros((1, steps, self.n_items));

        for t in 0..steps {
            let future = &seq[t + 1..];
            let positives = match self.pred_type {
                PredType::Next => &future[..1],
                PredType::NextK => &future[..self.k.min(future.len())],
                PredType::Postfix => future,
            };

            for &i in positives {
                y[[0, t, i]] = 1.;
            }
        }

        (x, y)
    }
}

impl Sampler for SvaeSampler {
    type Item = usize;
    type Target = Array3<f32>;

    fn num_batches(&self) -> usize {
        self.train.iter().filter(|seq| seq.len() > 1).count()
    }

    fn batches(&mut self) -> impl Iterator<Item = (Array2<usize>, Array3<f32>)> + '_ {
        let order = pass_order(self.train.len(), self.shuffle, &mut self.rng);
        let this = &*self;

        order
            .into_iter()
            .filter(move |&u| this.train[u].len() > 1)
            .map(move |u| this.example(&this.train[u]))
    }
}

impl ValidSampler for SvaeSampler {
    type Item = usize;

    fn valid_batches(&mut self) -> impl Iterator<Item = (Array2<usize>, Array2<f32>)> + '_ {
        let this = &*self;

        this.train
            .iter()
            .zip(&this.test)
            .filter_map(|(seq, test)| Some((seq, test.as_ref()?)))
            .filter(|(seq, test)| !seq.is_empty() && !test.is_empty())
            .map(move |(seq, test)| {
                let x = Array2::from_shape_fn((1, seq.len()), |(_, t)| seq[t]);
                let mut gt = Array2::zeros((1, this.n_items));
                for &i in test {
                    gt[[0, i]] = 1.;
                }

                (x, gt)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sequences() -> BTreeMap<usize, Vec<usize>> {
        BTreeMap::from([(0, vec![0, 1, 2, 3]), (1, vec![3, 2]), (2, vec![4])])
    }

    #[test]
    fn next_targets() {
        let mut sampler = SvaeSampler::new(5, sequences(), None, PredType::Next, 1, false).unwrap();
        assert_eq!(sampler.num_batches(), 2);

        let batches: Vec<_> = sampler.batches().collect();
        assert_eq!(batches.len(), 2);

        let (x, y) = &batches[0];
        assert_eq!(x, &array![[0, 1, 2]]);
        assert_eq!(y.dim(), (1, 3, 5));
        assert_eq!(y[[0, 0, 1]], 1.);
        assert_eq!(y.sum(), 3.);
    }

    #[test]
    fn next_k_and_postfix() {
        let mut next_k = SvaeSampler::new(5, sequences(), None, PredType::NextK, 2, false).unwrap();
        let (_, y) = next_k.batches().next().unwrap();
        assert_eq!(y.sum(), 2. + 2. + 1.);

        let mut postfix =
            SvaeSampler::new(5, sequences(), None, PredType::Postfix, 0, false).unwrap();
        let (_, y) = postfix.batches().next().unwrap();
        assert_eq!(y.sum(), 3. + 2. + 1.);
    }

    #[test]
    fn validation_uses_held_out_items() {
        let test = BTreeMap::from([(1, vec![0, 4])]);
        let mut sampler =
            SvaeSampler::new(5, sequences(), Some(test), PredType::Next, 1, false).unwrap();

        let batches: Vec<_> = sampler.valid_batches().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, array![[3, 2]]);
        assert_eq!(batches[0].1, array![[1., 0., 0., 0., 1.]]);
    }

    #[test]
    fn rejects_unknown_items() {
        assert!(SvaeSampler::new(4, sequences(), None, PredType::Next, 1, false).is_err());
        assert!("later".parse::<PredType>().is_err());
        assert_eq!("next_k".parse::<PredType>().unwrap(), PredType::NextK);
    }
}
