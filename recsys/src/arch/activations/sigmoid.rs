/// The logistic function.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sigmoid;

impl Sigmoid {
    pub fn f(&self, z: f32) -> f32 {
        1. / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = self.f(z);
        s * (1. - s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_centered_at_one_half() {
        assert_eq!(Sigmoid.f(0.), 0.5);
        assert_eq!(Sigmoid.df(0.), 0.25);
    }

    #[test]
    fn sigmoid_saturates() {
        assert!(Sigmoid.f(50.) > 0.999);
        assert!(Sigmoid.f(-50.) < 1e-6);
    }
}
