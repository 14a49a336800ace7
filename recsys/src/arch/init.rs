use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::{MlErr, Result};

/// How freshly allocated parameters get their starting values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Const(f32),
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform { fan_in: usize, fan_out: usize },
    XavierNormal { fan_in: usize, fan_out: usize },
}

impl Init {
    /// Draws `n` values following this initialization scheme.
    ///
    /// # Arguments
    /// * `n` - The amount of values to generate.
    /// * `rng` - A random number generator.
    ///
    /// # Returns
    /// The sampled values, or an error if the distribution parameters are invalid.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Result<Vec<f32>> {
        match *self {
            Init::Const(value) => Ok(vec![value; n]),
            Init::Uniform { low, high } => {
                let dist = Uniform::new(low, high)
                    .map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;
                Ok(draw(dist, n, rng))
            }
            Init::Normal { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev)
                    .map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;
                Ok(draw(dist, n, rng))
            }
            Init::XavierUniform { fan_in, fan_out } => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                Init::Uniform {
                    low: -range,
                    high: range,
                }
                .sample(n, rng)
            }
            Init::XavierNormal { fan_in, fan_out } => {
                let std_dev = (2. / (fan_in + fan_out) as f32).sqrt();
                Init::Normal { mean: 0., std_dev }.sample(n, rng)
            }
        }
    }
}

fn draw<D, R>(dist: D, n: usize, rng: &mut R) -> Vec<f32>
where
    D: Distribution<f32>,
    R: Rng + ?Sized,
{
    (0..n).map(|_| dist.sample(rng)).collect()
}
