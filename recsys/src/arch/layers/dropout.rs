use ndarray::{Array2, Axis};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution};

use crate::{MlErr, Result, arch::Mode};

/// Inverted dropout, only active in `Mode::Train`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    p: f32,
}

impl Dropout {
    /// Creates a new `Dropout` zeroing each entry with probability `p`.
    pub fn new(p: f32) -> Result<Self> {
        if !(0. ..1.).contains(&p) {
            return Err(MlErr::InvalidArchitecture(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }

        Ok(Self { p })
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn forward<R: Rng + ?Sized>(
        &self,
        mut x: Array2<f32>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f32>> {
        if mode == Mode::Eval || self.p == 0. {
            return Ok(x);
        }

        let keep = Bernoulli::new(f64::from(1. - self.p))
            .map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;
        let scale = 1. / (1. - self.p);

        x.mapv_inplace(|v| if keep.sample(rng) { v * scale } else { 0. });
        Ok(x)
    }
}

/// Scales every row to unit euclidean norm, leaving all-zero rows untouched.
pub fn normalize_rows(mut x: Array2<f32>) -> Array2<f32> {
    for mut row in x.axis_iter_mut(Axis(0)) {
        let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-12);
        row /= norm;
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn normalizes_rows() {
        let x = normalize_rows(array![[3., 4.], [0., 0.]]);
        assert_eq!(x, array![[0.6, 0.8], [0., 0.]]);
    }

    #[test]
    fn eval_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let dropout = Dropout::new(0.9).unwrap();
        let x = Array2::ones((3, 3));

        assert_eq!(dropout.forward(x.clone(), Mode::Eval, &mut rng).unwrap(), x);
    }

    #[test]
    fn train_scales_survivors() {
        let mut rng = StdRng::seed_from_u64(0);
        let dropout = Dropout::new(0.5).unwrap();
        let y = dropout
            .forward(Array2::ones((10, 10)), Mode::Train, &mut rng)
            .unwrap();

        assert!(y.iter().all(|&v| v == 0. || v == 2.));
        assert!(y.iter().any(|&v| v == 0.));
    }

    #[test]
    fn rejects_certain_drop() {
        assert!(Dropout::new(1.).is_err());
    }
}
