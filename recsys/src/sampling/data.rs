use ndarray::Array2;
use rand::rngs::StdRng;
use sprs::CsMat;

use super::{Sampler, ValidSampler, generate_rng, pass_order};
use crate::{
    MlErr, Result,
    data::{check_same_shape, dense_rows, to_csr},
};

/// Samples batches of full user rows.
///
/// While training the target is the input itself. While validating the input
/// is the training row and the ground truth is the held out row, or the
/// training row again when there is no held out data.
#[derive(Debug, Clone)]
pub struct DataSampler {
    train: CsMat<f32>,
    test: Option<CsMat<f32>>,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataSampler {
    /// Creates a new `DataSampler`.
    ///
    /// # Arguments
    /// * `train` - The users x items training interactions.
    /// * `test` - Held out interactions with the same shape, if any.
    /// * `batch_size` - The number of users per batch.
    /// * `shuffle` - Whether users are visited in a new random order every pass.
    pub fn new(
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

        Ok(Self {
            train,
            test,
            batch_size,
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
    pub fn n_users(&self) -> usize {
        self.train.rows()
    }

    #[inline]
    pub fn n_items(&self) -> usize {
        self.train.cols()
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Sampler for DataSampler {
    type Item = f32;
    type Target = Array2<f32>;

    fn num_batches(&self) -> usize {
        self.n_users().div_ceil(self.batch_size)
    }

    fn batches(&mut self) -> impl Iterator<Item = (Array2<f32>, Array2<f32>)> + '_ {
        let order = pass_order(self.n_users(), self.shuffle, &mut self.rng);
        let train = &self.train;

        chunks(order, self.batch_size).map(move |users| {
            let x = dense_rows(train, &users);
            (x.clone(), x)
        })
    }
}

impl ValidSampler for DataSampler {
    type Item = f32;

    fn valid_batches(&mut self) -> impl Iterator<Item = (Array2<f32>, Array2<f32>)> + '_ {
        let order = pass_order(self.n_users(), false, &mut self.rng);
        let train = &self.train;
        let test = self.test.as_ref().unwrap_or(train);

        chunks(order, self.batch_size).map(move |users| {
            let x = dense_rows(train, &users);
            let gt = dense_rows(test, &users).mapv_into(|v| if v > 0. { 1. } else { 0. });
            (x, gt)
        })
    }
}

/// Splits `order` into owned consecutive chunks of at most `size` entries.
pub(super) fn chunks(order: Vec<usize>, size: usize) -> impl Iterator<Item = Vec<usize>> {
    let mut rest = order.into_iter().peekable();
    std::iter::from_fn(move || {
        rest.peek()?;
        Some(rest.by_ref().take(size).collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::from_triplets;
    use ndarray::array;

    fn train() -> CsMat<f32> {
        from_triplets(3, 2, &[(0, 0, 1.), (0, 1, 1.), (1, 1, 1.), (2, 0, 2.)]).unwrap()
    }

    #[test]
    fn unshuffled_pass() {
        let mut sampler = DataSampler::new(train(), None, 2, false).unwrap();
        assert_eq!(sampler.num_batches(), 2);

        let batches: Vec<_> = sampler.batches().collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, array![[1., 1.], [0., 1.]]);
        assert_eq!(batches[0].0, batches[0].1);
        assert_eq!(batches[1].0, array![[2., 0.]]);
    }

    #[test]
    fn passes_are_restartable_and_cover_every_user() {
        let mut sampler = DataSampler::new(train(), None, 1, true).unwrap().seed(9);

        for _ in 0..3 {
            let mut rows: Vec<_> = sampler.batches().map(|(x, _)| x.row(0).to_vec()).collect();
            rows.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(rows, [vec![0., 1.], vec![1., 1.], vec![2., 0.]]);
        }
    }

    #[test]
    fn validation_uses_held_out_rows() {
        let test = from_triplets(3, 2, &[(1, 0, 5.)]).unwrap();
        let mut sampler = DataSampler::new(train(), Some(test), 3, false).unwrap();

        let (x, gt) = sampler.valid_batches().next().unwrap();
        assert_eq!(x, array![[1., 1.], [0., 1.], [2., 0.]]);
        assert_eq!(gt, array![[0., 0.], [1., 0.], [0., 0.]]);
    }

    #[test]
    fn rejects_mismatched_test() {
        let test = from_triplets(2, 2, &[]).unwrap();
        assert!(DataSampler::new(train(), Some(test), 1, false).is_err());
        assert!(DataSampler::new(train(), None, 0, false).is_err());
    }
}
