use std::fmt;

use ndarray::{Array2, ArrayView2, Axis, concatenate, s};
use rand::Rng;

use super::Network;
use crate::{
    MlErr, Result,
    arch::{ParamStore, Sequential, activations::ActFn},
};

/// CFGAN generator: a sigmoid MLP mapping a user's interaction row to a
/// purchase vector of the same width.
#[derive(Debug, Clone)]
pub struct CfganGenerator {
    params: ParamStore,
    dims: Vec<usize>,
    stack: Sequential,
}

impl CfganGenerator {
    pub fn new<R: Rng + ?Sized>(dims: Vec<usize>, rng: &mut R) -> Result<Self> {
        if dims.len() < 2 || dims.first() != dims.last() {
            return Err(MlErr::InvalidArchitecture(format!(
                "generator dims {dims:?} must start and end with the number of items"
            )));
        }

        let sigmoid = Some(ActFn::sigmoid());
        let mut params = ParamStore::new();
        let stack = Sequential::from_dims(&mut params, &dims, sigmoid, sigmoid, rng)?;

        Ok(Self { params, dims, stack })
    }

    pub fn n_items(&self) -> usize {
        self.dims[0]
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.stack.forward(self.params.values(), x)
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Result<()> {
        let (params, grad) = self.params.split_mut();
        self.stack.backward(params, grad, d)?;
        Ok(())
    }
}

impl Network for CfganGenerator {
    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }
}

impl fmt::Display for CfganGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CfganGenerator(dims={:?})", self.dims)
    }
}

/// CFGAN discriminator: a sigmoid MLP scoring `[candidate | condition]` rows
/// with the probability of the candidate being a real interaction vector.
#[derive(Debug, Clone)]
pub struct CfganDiscriminator {
    params: ParamStore,
    dims: Vec<usize>,
    stack: Sequential,
}

impl CfganDiscriminator {
    pub fn new<R: Rng + ?Sized>(dims: Vec<usize>, rng: &mut R) -> Result<Self> {
        if dims.len() < 2 || dims[0] % 2 != 0 || dims.last() != Some(&1) {
            return Err(MlErr::InvalidArchitecture(format!(
                "discriminator dims {dims:?} must go from twice the number of items to 1"
            )));
        }

        let sigmoid = Some(ActFn::sigmoid());
        let mut params = ParamStore::new();
        let stack = Sequential::from_dims(&mut params, &dims, sigmoid, sigmoid, rng)?;

        Ok(Self { params, dims, stack })
    }

    pub fn n_items(&self) -> usize {
        self.dims[0] / 2
    }

    pub fn forward(
        &mut self,
        candidate: ArrayView2<f32>,
        condition: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        let x = concatenate(Axis(1), &[candidate, condition])?;
        self.stack.forward(self.params.values(), x.view())
    }

    /// Returns the delta w.r.t. the candidate part of the input.
    pub fn backward(&mut self, d: Array2<f32>) -> Result<Array2<f32>> {
        let (params, grad) = self.params.split_mut();
        let dx = self.stack.backward(params, grad, d)?;
        Ok(dx.slice(s![.., ..self.dims[0] / 2]).to_owned())
    }
}

impl Network for CfganDiscriminator {
    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }
}

impl fmt::Display for CfganDiscriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CfganDiscriminator(dims={:?})", self.dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut gen_net = CfganGenerator::new(vec![3, 5, 3], &mut rng).unwrap();
        let mut disc = CfganDiscriminator::new(vec![6, 5, 1], &mut rng).unwrap();
        let x = array![[1., 1., 0.]];

        let fake = gen_net.forward(x.view()).unwrap();
        assert_eq!(fake.dim(), (1, 3));

        let p = disc.forward(fake.view(), x.view()).unwrap();
        assert_eq!(p.dim(), (1, 1));

        let d_fake = disc.backward(Array2::ones((1, 1))).unwrap();
        assert_eq!(d_fake.dim(), (1, 3));
    }

    #[test]
    fn invalid_dims() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(CfganGenerator::new(vec![3, 5, 2], &mut rng).is_err());
        assert!(CfganDiscriminator::new(vec![6, 5, 2], &mut rng).is_err());
        assert!(CfganDiscriminator::new(vec![5, 1], &mut rng).is_err());
    }
}
