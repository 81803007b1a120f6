//! Core traits for demandcast
//!
//! The sampler, diagnostics and decision layers only see a model through
//! [`LogDensityModel`]: a fixed-length parameter vector in constrained
//! space, its bounds, and a pure log-density/gradient function.

use crate::Result;
use rand::rngs::StdRng;

/// A differentiable log-density over a fixed parameter layout.
///
/// Implementations must be pure: the same parameter vector always yields the
/// same density, and evaluation never mutates `self`. This is what lets
/// independent chains share one model across threads.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names, in layout order.
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds `(min, max)` in constrained space.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Deterministic starting point in constrained space.
    fn parameter_init(&self) -> Vec<f64>;

    /// Unnormalized log-density and its gradient in constrained space.
    fn log_density_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)>;

    /// Unnormalized log-density in constrained space.
    fn log_density(&self, params: &[f64]) -> Result<f64> {
        Ok(self.log_density_and_gradient(params)?.0)
    }

    /// One draw from the prior, used for dispersed chain initialization.
    ///
    /// Models without a sampleable prior fall back to [`Self::parameter_init`].
    fn sample_prior(&self, _rng: &mut StdRng) -> Vec<f64> {
        self.parameter_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            1
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY)]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.5]
        }

        fn log_density_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
            let x = params[0];
            Ok((-0.5 * x * x, vec![-x]))
        }
    }

    #[test]
    fn test_default_log_density_matches_pair() {
        let m = Quadratic;
        let lp = m.log_density(&[2.0]).unwrap();
        assert_eq!(lp, -2.0);
    }

    #[test]
    fn test_default_prior_draw_is_init() {
        use rand::SeedableRng;
        let m = Quadratic;
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(m.sample_prior(&mut rng), vec![0.5]);
    }
}
