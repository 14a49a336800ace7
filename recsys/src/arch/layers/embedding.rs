use std::ops::Range;

use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::{Init, ParamStore},
};

/// A lookup table mapping item indices to dense vectors.
#[derive(Debug, Clone)]
pub struct Embedding {
    n: usize,
    size: usize,
    table: Range<usize>,
    idx: Array2<usize>,
}

impl Embedding {
    /// Creates a new `Embedding` of `n` rows of width `size`, drawn from `N(0, 1)`.
    pub fn new<R: Rng + ?Sized>(
        store: &mut ParamStore,
        n: usize,
        size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if n == 0 || size == 0 {
            return Err(MlErr::InvalidArchitecture(format!(
                "embedding of shape ({n}, {size})"
            )));
        }

        let init = Init::Normal {
            mean: 0.,
            std_dev: 1.,
        };
        let table = store.alloc(n * size, init, rng)?;

        Ok(Self {
            n,
            size,
            table,
            idx: Array2::zeros((0, 0)),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Looks up a `(batch, steps)` index matrix, yielding `(batch, steps, size)`.
    pub fn forward(&mut self, params: &[f32], idx: ArrayView2<usize>) -> Result<Array3<f32>> {
        if let Some(&index) = idx.iter().find(|&&i| i >= self.n) {
            return Err(MlErr::IndexOutOfRange { index, len: self.n });
        }

        let table = ArrayView2::from_shape((self.n, self.size), &params[self.table.clone()])?;
        let (batch, steps) = idx.dim();
        let mut out = Array3::zeros((batch, steps, self.size));

        for ((b, t), &i) in idx.indexed_iter() {
            out.index_axis_mut(Axis(0), b)
                .index_axis_mut(Axis(0), t)
                .assign(&table.row(i));
        }

        self.idx = idx.to_owned();
        Ok(out)
    }

    /// Scatters the delta of every looked-up vector back into its table row.
    pub fn backward(&self, grad: &mut [f32], d: &Array3<f32>) -> Result<()> {
        let raw = &mut grad[self.table.clone()];
        let mut dtable = ArrayViewMut2::from_shape((self.n, self.size), raw)?;

        for ((b, t), &i) in self.idx.indexed_iter() {
            let mut row = dtable.row_mut(i);
            row += &d.index_axis(Axis(0), b).index_axis(Axis(0), t);
        }

        Ok(())
    }
}
