//! Batch producers over interaction data. Every sampler can be iterated any
//! number of times, each call to `batches` being one full pass.

use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

mod conditioned;
mod data;
mod sequence;

pub use conditioned::ConditionedDataSampler;
pub use data::DataSampler;
pub use sequence::{PredType, SvaeSampler};

/// Yields the `(input, target)` training batches of one pass.
pub trait Sampler {
    type Item;
    type Target;

    /// Returns the number of batches a pass yields.
    fn num_batches(&self) -> usize;

    fn batches(&mut self) -> impl Iterator<Item = (Array2<Self::Item>, Self::Target)> + '_;
}

/// Yields the `(input, ground_truth)` validation batches of one pass, the
/// ground truth being a binary relevance matrix over items.
pub trait ValidSampler {
    type Item;

    fn valid_batches(&mut self) -> impl Iterator<Item = (Array2<Self::Item>, Array2<f32>)> + '_;
}

/// Returns the visiting order of a pass over `n` examples.
fn pass_order(n: usize, shuffle: bool, rng: &mut StdRng) -> Vec<usize> {
    let mut order: Vec<_> = (0..n).collect();
    if shuffle {
        order.shuffle(rng);
    }

    order
}

/// Seeds a generator from `seed`, or from the OS when absent.
pub(crate) fn generate_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffled_order_is_a_permutation() {
        let mut rng = generate_rng(Some(3));
        let mut order = pass_order(10, true, &mut rng);
        order.sort_unstable();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }
}
