//! Helpers over the sparse user x item interaction matrix.

use ndarray::Array2;
use sprs::{CsMat, TriMat};

use crate::{MlErr, Result};

/// Builds a CSR interaction matrix from `(user, item, value)` triplets.
///
/// Repeated pairs are summed.
pub fn from_triplets(
    n_users: usize,
    n_items: usize,
    triplets: &[(usize, usize, f32)],
) -> Result<CsMat<f32>> {
    let mut tri = TriMat::new((n_users, n_items));

    for &(u, i, v) in triplets {
        if u >= n_users {
            return Err(MlErr::IndexOutOfRange { index: u, len: n_users });
        }
        if i >= n_items {
            return Err(MlErr::IndexOutOfRange { index: i, len: n_items });
        }

        tri.add_triplet(u, i, v);
    }

    Ok(tri.to_csr())
}

/// Returns `m` in CSR storage, converting it if needed.
pub fn to_csr(m: CsMat<f32>) -> CsMat<f32> {
    if m.is_csr() { m } else { m.to_other_storage() }
}

/// Gathers the given rows of a CSR matrix into a dense `(rows.len(), cols)` block.
pub fn dense_rows(m: &CsMat<f32>, rows: &[usize]) -> Array2<f32> {
    let mut out = Array2::zeros((rows.len(), m.cols()));

    for (r, &u) in rows.iter().enumerate() {
        if let Some(row) = m.outer_view(u) {
            for (i, &v) in row.iter() {
                out[[r, i]] = v;
            }
        }
    }

    out
}

/// Copies the given rows of a CSR matrix, in the requested order, into a new one.
pub fn select_rows(m: &CsMat<f32>, rows: &[usize]) -> Result<CsMat<f32>> {
    let mut tri = TriMat::new((rows.len(), m.cols()));

    for (r, &u) in rows.iter().enumerate() {
        let row = m
            .outer_view(u)
            .ok_or(MlErr::IndexOutOfRange { index: u, len: m.rows() })?;
        for (i, &v) in row.iter() {
            tri.add_triplet(r, i, v);
        }
    }

    Ok(tri.to_csr())
}

/// Returns the column indices stored in row `u` of a CSR matrix.
pub fn row_items(m: &CsMat<f32>, u: usize) -> Vec<usize> {
    m.outer_view(u)
        .map(|row| row.indices().to_vec())
        .unwrap_or_default()
}

/// Checks both matrices describe the same users and items.
pub fn check_same_shape(train: &CsMat<f32>, test: &CsMat<f32>) -> Result<()> {
    if train.rows() != test.rows() {
        return Err(MlErr::SizeMismatch {
            what: "held out users",
            got: test.rows(),
            expected: train.rows(),
        });
    }

    if train.cols() != test.cols() {
        return Err(MlErr::SizeMismatch {
            what: "held out items",
            got: test.cols(),
            expected: train.cols(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn dense_rows_in_requested_order() {
        let m = from_triplets(2, 3, &[(0, 0, 1.), (0, 1, 1.), (1, 1, 2.)]).unwrap();
        let rows = dense_rows(&m, &[1, 0]);
        assert_eq!(rows, array![[0., 2., 0.], [1., 1., 0.]]);
    }

    #[test]
    fn csc_is_converted() {
        let m = from_triplets(2, 2, &[(1, 0, 3.)]).unwrap().to_other_storage();
        assert!(!m.is_csr());

        let m = to_csr(m);
        assert!(m.is_csr());
        assert_eq!(row_items(&m, 1), [0]);
    }

    #[test]
    fn selected_rows_keep_values() {
        let m = from_triplets(3, 2, &[(0, 0, 1.), (2, 1, 4.)]).unwrap();
        let picked = select_rows(&m, &[2, 0]).unwrap();

        assert_eq!(picked.shape(), (2, 2));
        assert_eq!(dense_rows(&picked, &[0, 1]), array![[0., 4.], [1., 0.]]);
        assert!(select_rows(&m, &[3]).is_err());
    }

    #[test]
    fn out_of_range_triplet() {
        assert!(from_triplets(2, 2, &[(0, 2, 1.)]).is_err());
    }
}
