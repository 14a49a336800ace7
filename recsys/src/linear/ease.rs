use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array2, Axis};
use sprs::CsMat;

use super::{Trained, Untrained, check_rows, dense, invert, matfile, remove_seen};
use crate::{MlErr, Result};

/// Embarrassingly shallow autoencoder: a closed form item-item model with an
/// L2 penalty and a zero diagonal.
#[derive(Clone)]
pub struct Ease<S = Untrained> {
    lam: f64,
    state: S,
}

impl Ease {
    /// Creates a new untrained `Ease` with regularization `lam`.
    pub fn new(lam: f64) -> Self {
        Self { lam, state: Untrained }
    }
}

impl<S> Ease<S> {
    pub fn lam(&self) -> f64 {
        self.lam
    }

    /// Learns the item-item matrix from a users x items interaction matrix.
    ///
    /// With `G = XᵀX + lam I` and `P = G⁻¹`, the model is
    /// `B_ij = -P_ij / P_jj` off the diagonal and `0` on it.
    ///
    /// # Errors
    /// `SingularMatrix` if `G` can't be inverted.
    pub fn train(self, x: &CsMat<f32>) -> Result<Ease<Trained>> {
        let n_items = x.cols();
        info!(users = x.rows(), items = n_items, lam = self.lam; "training ease");

        let x = dense(x, false);
        let mut gram = x.t().dot(&x);
        gram.diag_mut().mapv_inplace(|g| g + self.lam);

        let p = invert(&gram)?;
        let diag = p.diag().to_owned();
        let mut model = Array2::from_shape_fn((n_items, n_items), |(i, j)| -p[[i, j]] / diag[j]);
        model.diag_mut().fill(0.);

        Ok(Ease {
            lam: self.lam,
            state: Trained { model },
        })
    }

    /// Reads a model previously written by `save_model`.
    ///
    /// # Errors
    /// `MalformedMatrixFile` if the file does not hold a square matrix.
    pub fn load_model(self, path: impl AsRef<Path>) -> Result<Ease<Trained>> {
        let path = path.as_ref();
        let model = matfile::read(path)?;

        if model.nrows() != model.ncols() {
            return Err(MlErr::MalformedMatrixFile(format!(
                "{} holds a {:?} matrix, not an item-item one",
                path.display(),
                model.dim()
            )));
        }

        info!("ease model loaded from {}", path.display());
        Ok(Ease {
            lam: self.lam,
            state: Trained { model },
        })
    }
}

impl Ease<Trained> {
    pub fn model(&self) -> &Array2<f64> {
        self.state.model()
    }

    pub fn n_items(&self) -> usize {
        self.model().len_of(Axis(0))
    }

    /// Scores every item for the given users.
    ///
    /// # Arguments
    /// * `user_ids` - The users being scored, one per row of `rows`.
    /// * `rows` - The users' known interactions.
    /// * `remove_train` - Whether the known interactions score `-inf`.
    ///
    /// # Returns
    /// A `(users, items)` score matrix.
    pub fn predict(
        &self,
        user_ids: &[usize],
        rows: &CsMat<f32>,
        remove_train: bool,
    ) -> Result<Array2<f64>> {
        check_rows(user_ids, rows, self.n_items())?;

        let mut scores = dense(rows, false).dot(self.model());
        if remove_train {
            remove_seen(&mut scores, rows);
        }

        Ok(scores)
    }

    /// Writes the model to `path` with `.mat` appended.
    ///
    /// # Returns
    /// The path actually written.
    pub fn save_model(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = matfile::with_extension(path.as_ref());
        matfile::write(&path, self.model())?;
        info!("ease model saved to {}", path.display());
        Ok(path)
    }
}

impl<S> fmt::Display for Ease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ease(lam={})", self.lam)
    }
}

impl<S> fmt::Debug for Ease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
