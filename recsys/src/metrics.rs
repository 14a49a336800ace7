//! Top-k ranking metrics used to pick the best checkpoint while validating.

use std::{cmp::Ordering, fmt, str::FromStr};

use ndarray::{ArrayView1, ArrayView2, Zip};

use crate::{MlErr, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Ndcg,
    Recall,
    Hit,
}

/// A ranking metric cut at the top `k` items, parsed from names like `"ndcg@10"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    kind: MetricKind,
    k: usize,
}

impl Metric {
    pub fn new(kind: MetricKind, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(MlErr::InvalidMetric(format!("{kind:?}@0")));
        }

        Ok(Self { kind, k })
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Scores every user with at least one relevant item.
    ///
    /// # Arguments
    /// * `scores` - Predicted scores, one row per user.
    /// * `ground_truth` - Relevance of each item, positive meaning relevant.
    pub fn per_user(
        &self,
        scores: ArrayView2<f32>,
        ground_truth: ArrayView2<f32>,
    ) -> Result<Vec<f32>> {
        if scores.dim() != ground_truth.dim() {
            return Err(MlErr::SizeMismatch {
                what: "ground truth items",
                got: ground_truth.ncols(),
                expected: scores.ncols(),
            });
        }

        let mut values = Vec::with_capacity(scores.nrows());
        Zip::from(scores.rows()).and(ground_truth.rows()).for_each(|s, gt| {
            let relevant = gt.iter().filter(|&&g| g > 0.).count();
            if relevant > 0 {
                values.push(self.user(s, gt, relevant));
            }
        });

        Ok(values)
    }

    /// Returns the metric averaged over users with at least one relevant item,
    /// or 0 when there is none.
    pub fn evaluate(&self, scores: ArrayView2<f32>, ground_truth: ArrayView2<f32>) -> Result<f32> {
        let values = self.per_user(scores, ground_truth)?;
        if values.is_empty() {
            return Ok(0.);
        }

        Ok(values.iter().sum::<f32>() / values.len() as f32)
    }

    fn user(&self, scores: ArrayView1<f32>, gt: ArrayView1<f32>, relevant: usize) -> f32 {
        let top = top_k(scores, self.k);
        let is_hit = |&i: &usize| gt[i] > 0.;

        match self.kind {
            MetricKind::Ndcg => {
                let dcg: f32 = top
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| is_hit(*i))
                    .map(|(rank, _)| discount(rank))
                    .sum();
                let idcg: f32 = (0..relevant.min(self.k)).map(discount).sum();
                dcg / idcg
            }
            MetricKind::Recall => {
                let hits = top.iter().filter(|i| is_hit(*i)).count();
                hits as f32 / relevant.min(self.k) as f32
            }
            MetricKind::Hit => {
                if top.iter().any(is_hit) {
                    1.
                } else {
                    0.
                }
            }
        }
    }
}

fn discount(rank: usize) -> f32 {
    1. / (rank as f32 + 2.).log2()
}

/// Indices of the `k` highest scores, best first, ties broken by index.
pub fn top_k(scores: ArrayView1<f32>, k: usize) -> Vec<usize> {
    let mut idx: Vec<_> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    idx.truncate(k);
    idx
}

impl FromStr for Metric {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MlErr::InvalidMetric(s.to_string());

        let (name, k) = s.split_once('@').ok_or_else(invalid)?;
        let k = k.parse().map_err(|_| invalid())?;
        let kind = match name.to_ascii_lowercase().as_str() {
            "ndcg" => MetricKind::Ndcg,
            "recall" => MetricKind::Recall,
            "hit" => MetricKind::Hit,
            _ => return Err(invalid()),
        };

        Self::new(kind, k)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            MetricKind::Ndcg => "ndcg",
            MetricKind::Recall => "recall",
            MetricKind::Hit => "hit",
        };

        write!(f, "{name}@{}", self.k)
    }
}
