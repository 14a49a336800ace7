//! Closed form item-item recommenders. A model is `Untrained` until `train` or
//! `load_model` turns it into its `Trained` state, the only one able to predict.

use nalgebra::DMatrix;
use ndarray::Array2;
use sprs::CsMat;

use crate::{MlErr, Result};

mod admm_slim;
mod ease;
mod matfile;

pub use admm_slim::{AdmmSlim, AdmmSlimConfig};
pub use ease::Ease;

/// Marker of a model without a learned matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Untrained;

/// The learned item-item matrix of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Trained {
    model: Array2<f64>,
}

impl Trained {
    pub fn model(&self) -> &Array2<f64> {
        &self.model
    }
}

/// Densifies `x` in `f64`, optionally appending a constant column of ones.
fn dense(x: &CsMat<f32>, bias_column: bool) -> Array2<f64> {
    let cols = x.cols() + usize::from(bias_column);
    let mut out = Array2::zeros((x.rows(), cols));

    for (u, row) in x.outer_iterator().enumerate() {
        for (i, &v) in row.iter() {
            out[[u, i]] = f64::from(v);
        }
        if bias_column {
            out[[u, cols - 1]] = 1.;
        }
    }

    out
}

/// Inverts a square matrix.
///
/// # Errors
/// `SingularMatrix` if the matrix has no inverse.
fn invert(m: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = m.dim();
    let inverse = DMatrix::from_fn(rows, cols, |i, j| m[[i, j]])
        .try_inverse()
        .ok_or(MlErr::SingularMatrix { dim: rows })?;

    Ok(Array2::from_shape_fn((rows, cols), |(i, j)| inverse[(i, j)]))
}

/// Fails unless `rows` holds one row per user id over `n_items` items.
fn check_rows(user_ids: &[usize], rows: &CsMat<f32>, n_items: usize) -> Result<()> {
    if rows.rows() != user_ids.len() {
        return Err(MlErr::SizeMismatch {
            what: "user rows",
            got: rows.rows(),
            expected: user_ids.len(),
        });
    }

    if rows.cols() != n_items {
        return Err(MlErr::SizeMismatch {
            what: "items",
            got: rows.cols(),
            expected: n_items,
        });
    }

    Ok(())
}

/// Sets to `-inf` the scores of the items present in `rows`.
fn remove_seen(scores: &mut Array2<f64>, rows: &CsMat<f32>) {
    for (u, row) in rows.outer_iterator().enumerate() {
        for (i, _) in row.iter() {
            scores[[u, i]] = f64::NEG_INFINITY;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::from_triplets;
    use ndarray::array;

    #[test]
    fn dense_with_bias() {
        let x = from_triplets(2, 2, &[(0, 1, 1.), (1, 0, 2.)]).unwrap();
        assert_eq!(dense(&x, false), array![[0., 1.], [2., 0.]]);
        assert_eq!(dense(&x, true), array![[0., 1., 1.], [2., 0., 1.]]);
    }

    #[test]
    fn inverse_of_diagonal() {
        let m = array![[2., 0.], [0., 4.]];
        assert_eq!(invert(&m).unwrap(), array![[0.5, 0.], [0., 0.25]]);
        assert!(matches!(
            invert(&array![[1., 2.], [2., 4.]]),
            Err(MlErr::SingularMatrix { dim: 2 })
        ));
    }
}
