use ndarray::{Array2, ArrayView2, Zip};

/// `KL(N(mu, exp(logvar)) || N(0, I))` summed over latent units and averaged over rows.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Kld;

impl Kld {
    pub fn new() -> Self {
        Self
    }

    pub fn loss(&self, mu: ArrayView2<f32>, logvar: ArrayView2<f32>) -> f32 {
        let rows = mu.nrows().max(1) as f32;
        let total = Zip::from(&mu)
            .and(&logvar)
            .fold(0., |acc, &m, &lv| acc + 1. + lv - m * m - lv.exp());

        -0.5 * total / rows
    }

    /// Returns the gradients w.r.t. `mu` and `logvar`.
    pub fn loss_prime(
        &self,
        mu: ArrayView2<f32>,
        logvar: ArrayView2<f32>) -> (Array2<f32>, Array2<f32>,
    ) {
        let rows = mu.nrows().max(1) as f32;
        let dmu = mu.mapv(|m| m / rows);
        let dlogvar = logvar.mapv(|lv| 0.5 * (lv.exp() - 1.) / rows);
        (dmu, dlogvar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn prior_has_no_divergence() {
        let zeros = Array2::zeros((2, 3));
        assert_eq!(Kld.loss(zeros.view(), zeros.view()), 0.);
    }

    #[test]
    fn shifted_mean() {
        let mu = array![[2.]];
        let logvar = array![[0.]];
        assert_eq!(Kld.loss(mu.view(), logvar.view()), 2.);

        let (dmu, dlogvar) = Kld.loss_prime(mu.view(), logvar.view());
        assert_eq!(dmu, array![[2.]]);
        assert_eq!(dlogvar, array![[0.]]);
    }
}
