//! Gaussian reference simulators with known ground truth.

use lc2st_error::{Lc2stError, Result};
use lc2st_types::{ConditioningValue, SampleSet, unit_seed};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// `n` draws from `N(mean * 1, I_dim)`.
pub fn isotropic_gaussian(n: usize, dim: usize, mean: f64, seed: u64) -> Result<SampleSet> {
    if n == 0 || dim == 0 {
        return Err(Lc2stError::config(format!(
            "gaussian sample needs n > 0 and dim > 0, got n={n} dim={dim}"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array2::from_shape_simple_fn((n, dim), || {
        let z: f64 = StandardNormal.sample(&mut rng);
        mean + z
    });
    SampleSet::new(data)
}

/// Joint model `x ~ N(0, I_d)`, `theta | x ~ N(x + shift * 1, I_d)`.
///
/// `shift = 0` plays the role of the true posterior; any other value is an
/// estimator with a constant bias.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearGaussian {
    pub dim: usize,
    pub shift: f64,
}

impl LinearGaussian {
    #[must_use]
    pub const fn new(dim: usize, shift: f64) -> Self {
        Self { dim, shift }
    }

    /// `n` conditioning values from the prior.
    pub fn sample_conditioning(&self, n: usize, seed: u64) -> Result<SampleSet> {
        isotropic_gaussian(n, self.dim, 0.0, seed)
    }

    /// One `theta` per row of `x`.
    pub fn sample_given(&self, x: &SampleSet, seed: u64) -> Result<SampleSet> {
        lc2st_error::ensure_dim("conditioning dimension", self.dim, x.dim())?;
        let mut rng = StdRng::seed_from_u64(seed);
        let data = x.as_array().mapv(|v| {
            let z: f64 = StandardNormal.sample(&mut rng);
            v + self.shift + z
        });
        SampleSet::new(data)
    }

    /// `n` draws of `theta | x0`.
    pub fn sample_at(&self, x0: &ConditioningValue, n: usize, seed: u64) -> Result<SampleSet> {
        lc2st_error::ensure_dim("conditioning dimension", self.dim, x0.dim())?;
        let noise = isotropic_gaussian(n, self.dim, self.shift, seed)?;
        SampleSet::new(noise.into_inner() + x0.as_array())
    }

    /// `(theta, x)` pairs from the joint.
    pub fn sample_joint(&self, n: usize, seed: u64) -> Result<(SampleSet, SampleSet)> {
        let x = self.sample_conditioning(n, unit_seed(seed, 0))?;
        let theta = self.sample_given(&x, unit_seed(seed, 1))?;
        Ok((theta, x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn gaussian_moments() {
        let s = isotropic_gaussian(4000, 3, 1.5, 9).unwrap();
        assert_eq!((s.n_samples(), s.dim()), (4000, 3));
        let mean = s.as_array().mean().unwrap();
        assert!((mean - 1.5).abs() < 0.05, "{mean}");
        assert!(isotropic_gaussian(0, 3, 0.0, 1).is_err());
    }

    #[test]
    fn conditional_draws_follow_x() {
        let sim = LinearGaussian::new(2, 0.5);
        let x0 = ConditioningValue::new(vec![3.0, -3.0]).unwrap();
        let theta = sim.sample_at(&x0, 2000, 4).unwrap();
        let means = theta.as_array().mean_axis(ndarray::Axis(0)).unwrap();
        assert!((means[0] - 3.5).abs() < 0.1);
        assert!((means[1] + 2.5).abs() < 0.1);
    }

    #[test]
    fn joint_is_reproducible() {
        let sim = LinearGaussian::new(1, 0.0);
        assert_eq!(sim.sample_joint(50, 3).unwrap(), sim.sample_joint(50, 3).unwrap());
        let bad = ConditioningValue::new(vec![0.0, 0.0]).unwrap();
        assert!(sim.sample_at(&bad, 5, 0).is_err());
    }

    proptest! {
        #[test]
        fn conditional_sample_matches_conditioning_shape(
            n in 1usize..50,
            dim in 1usize..5,
            shift in -3.0f64..3.0,
            seed in any::<u64>(),
        ) {
            let sim = LinearGaussian::new(dim, shift);
            let (theta, x) = sim.sample_joint(n, seed).unwrap();
            prop_assert_eq!(theta.n_samples(), n);
            prop_assert_eq!(theta.dim(), x.dim());
        }
    }
}
