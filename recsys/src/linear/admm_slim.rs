use std::{
    fmt,
    path::{Path, PathBuf},
};

use log::{debug, info};
use ndarray::{Array2, s};
use serde::{Deserialize, Serialize};
use sprs::CsMat;

use super::{Trained, Untrained, check_rows, dense, invert, matfile, remove_seen};
use crate::{MlErr, Result};

/// Offset keeping the diagonal correction finite.
const DIAG_EPS: f64 = 1e-7;

/// The hyper-parameters of `AdmmSlim`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmmSlimConfig {
    /// L1 regularization weight.
    pub lambda1: f64,
    /// L2 regularization weight.
    pub lambda2: f64,
    /// Penalty of the augmented lagrangian.
    pub rho: f64,
    /// Whether weights are kept non negative.
    pub nn_constr: bool,
    /// Whether the L1 penalty applies.
    pub l1_penalty: bool,
    /// Whether a constant bias column is learned alongside the items.
    pub item_bias: bool,
    pub max_iter: usize,
    /// Training stops once the primal residual `‖B - C‖` is below this.
    pub tolerance: f64,
}

impl Default for AdmmSlimConfig {
    fn default() -> Self {
        Self {
            lambda1: 5.,
            lambda2: 1e3,
            rho: 1e5,
            nn_constr: true,
            l1_penalty: true,
            item_bias: false,
            max_iter: 50,
            tolerance: 1e-6,
        }
    }
}

/// SLIM solved with ADMM: a sparse item-item model with L1 and L2 penalties,
/// a zero diagonal and optionally non negative weights.
#[derive(Clone)]
pub struct AdmmSlim<S = Untrained> {
    config: AdmmSlimConfig,
    state: S,
}

impl AdmmSlim {
    pub fn new(config: AdmmSlimConfig) -> Self {
        Self {
            config,
            state: Untrained,
        }
    }
}

impl Default for AdmmSlim {
    fn default() -> Self {
        Self::new(AdmmSlimConfig::default())
    }
}

impl<S> AdmmSlim<S> {
    pub fn config(&self) -> &AdmmSlimConfig {
        &self.config
    }

    /// Learns the item-item matrix from a users x items interaction matrix.
    ///
    /// With `item_bias` the learned matrix gets one extra row holding the bias
    /// of every item.
    ///
    /// # Errors
    /// `SingularMatrix` if `XᵀX + (lambda2 + rho) I` can't be inverted.
    pub fn train(self, x: &CsMat<f32>) -> Result<AdmmSlim<Trained>> {
        let AdmmSlimConfig {
            lambda1,
            lambda2,
            rho,
            max_iter,
            tolerance,
            ..
        } = self.config;
        let n_items = x.cols();
        info!(users = x.rows(), items = n_items, rho = rho; "training admm slim");

        let x = dense(x, self.config.item_bias);
        let xtx = x.t().dot(&x);

        let mut regularized = xtx.clone();
        regularized.diag_mut().mapv_inplace(|g| g + lambda2 + rho);
        let p = invert(&regularized)?;
        let p_diag = p.diag().mapv(|d| d + DIAG_EPS);

        let b_aux = p.dot(&xtx);
        let mut gamma = Array2::<f64>::zeros(xtx.raw_dim());
        let mut c = Array2::<f64>::zeros(xtx.raw_dim());
        let threshold = if self.config.l1_penalty { lambda1 / rho } else { 0. };

        for iter in 1..=max_iter {
            let b_tilde = &b_aux + &p.dot(&(&c * rho - &gamma));
            let correction = b_tilde.diag().to_owned() / &p_diag;
            let b = &b_tilde - &(&p * &correction);

            c = &b + &(&gamma / rho);
            c.mapv_inplace(|v| self.shrink(v, threshold));
            gamma = gamma + (&b - &c) * rho;

            let residual = (&b - &c).mapv(|v| v * v).sum().sqrt();
            debug!(iter = iter, residual = residual; "admm slim iteration");

            if residual < tolerance {
                break;
            }
        }

        let model = c.slice(s![.., ..n_items]).to_owned();
        Ok(AdmmSlim {
            config: self.config,
            state: Trained { model },
        })
    }

    /// Soft thresholds `v` by `t`, clamping at zero under the non negative constraint.
    fn shrink(&self, v: f64, t: f64) -> f64 {
        if self.config.nn_constr {
            (v - t).max(0.)
        } else {
            v.signum() * (v.abs() - t).max(0.)
        }
    }

    /// Reads a model previously written by `save_model`.
    ///
    /// # Errors
    /// `MalformedMatrixFile` if the stored shape doesn't fit the `item_bias` setting.
    pub fn load_model(self, path: impl AsRef<Path>) -> Result<AdmmSlim<Trained>> {
        let path = path.as_ref();
        let model = matfile::read(path)?;

        let expected_rows = model.ncols() + usize::from(self.config.item_bias);
        if model.nrows() != expected_rows {
            return Err(MlErr::MalformedMatrixFile(format!(
                "{} holds a {:?} matrix but {expected_rows} rows were expected",
                path.display(),
                model.dim()
            )));
        }

        info!("admm slim model loaded from {}", path.display());
        Ok(AdmmSlim {
            config: self.config,
            state: Trained { model },
        })
    }
}

impl AdmmSlim<Trained> {
    pub fn model(&self) -> &Array2<f64> {
        self.state.model()
    }

    pub fn n_items(&self) -> usize {
        self.model().ncols()
    }

    /// Scores every item for the given users.
    ///
    /// # Arguments
    /// * `user_ids` - The users being scored, one per row of `rows`.
    /// * `rows` - The users' known interactions.
    /// * `remove_train` - Whether the known interactions score `-inf`.
    pub fn predict(
        &self,
        user_ids: &[usize],
        rows: &CsMat<f32>,
        remove_train: bool,
    ) -> Result<Array2<f64>> {
        let n_items = self.n_items();
        check_rows(user_ids, rows, n_items)?;

        let model = self.model();
        let mut scores = dense(rows, false).dot(&model.slice(s![..n_items, ..]));
        if self.config.item_bias {
            scores += &model.row(n_items);
        }

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
        info!("admm slim model saved to {}", path.display());
        Ok(path)
    }
}

impl<S> fmt::Display for AdmmSlim<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.config;
        write!(
            f,
            "AdmmSlim(lambda1={}, lambda2={}, rho={}, nn_constr={}, l1_penalty={}, item_bias={})",
            c.lambda1, c.lambda2, c.rho, c.nn_constr, c.l1_penalty, c.item_bias
        )
    }
}

impl<S> fmt::Debug for AdmmSlim<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::from_triplets;

    fn interactions() -> CsMat<f32> {
        let triplets: Vec<_> = (0..10)
            .flat_map(|u| (0..5).map(move |i| (u, i)))
            .filter(|&(u, i)| (u * 5 + i * 3) % 7 < 4)
            .map(|(u, i)| (u, i, 1.))
            .collect();
        from_triplets(10, 5, &triplets).unwrap()
    }

    #[test]
    fn defaults() {
        let slim = AdmmSlim::default();
        let c = slim.config();
        assert_eq!(c.lambda1, 5.);
        assert_eq!(c.lambda2, 1e3);
        assert_eq!(c.rho, 1e5);
        assert!(c.nn_constr && c.l1_penalty && !c.item_bias);
        assert_eq!(slim.to_string(), format!("{slim:?}"));
    }

    #[test]
    fn every_switch_combination_trains() {
        let x = interactions();

        for nn_constr in [true, false] {
            for l1_penalty in [true, false] {
                let config = AdmmSlimConfig {
                    nn_constr,
                    l1_penalty,
                    ..Default::default()
                };
                let slim = AdmmSlim::new(config).train(&x).unwrap();

                assert_eq!(slim.model().dim(), (5, 5));
                if nn_constr {
                    assert!(slim.model().iter().all(|&w| w >= 0.));
                }
            }
        }
    }

    #[test]
    fn bias_adds_a_row() {
        let x = interactions();
        let config = AdmmSlimConfig {
            item_bias: true,
            ..Default::default()
        };
        let slim = AdmmSlim::new(config).train(&x).unwrap();
        assert_eq!(slim.model().dim(), (6, 5));

        let rows = crate::data::select_rows(&x, &[0, 1]).unwrap();
        let scores = slim.predict(&[0, 1], &rows, false).unwrap();
        assert_eq!(scores.dim(), (2, 5));
    }

    #[test]
    fn mismatched_file_shape_fails() {
        let dir = tempfile::tempdir().unwrap();
        let slim = AdmmSlim::default().train(&interactions()).unwrap();
        let path = slim.save_model(dir.path().join("slim")).unwrap();

        let biased = AdmmSlimConfig {
            item_bias: true,
            ..Default::default()
        };
        assert!(AdmmSlim::new(biased).load_model(&path).is_err());
        assert_eq!(AdmmSlim::default().load_model(&path).unwrap().model(), slim.model());
    }
}
