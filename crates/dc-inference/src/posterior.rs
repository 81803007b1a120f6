//! Target density for the samplers.
//!
//! Priors are part of the model's log-density; this layer maps positive
//! parameters to the real line and adds the log-Jacobian of that map.

use dc_core::Result;
use dc_core::traits::LogDensityModel;
use dc_prob::transforms::LogScale;

/// A [`LogDensityModel`] seen on the unconstrained scale.
///
/// For `theta = T(z)`: `log p(z) = log p(T(z)) + log |dT/dz|`.
pub struct Posterior<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
    scale: LogScale,
}

impl<'a, M: LogDensityModel + ?Sized> Posterior<'a, M> {
    /// Posterior over `model`; positive-bounded parameters go on the log scale.
    pub fn new(model: &'a M) -> Result<Self> {
        let scale = LogScale::from_bounds(&model.parameter_bounds())?;
        Ok(Self { model, scale })
    }

    /// Parameter count.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Wrapped model.
    pub fn model(&self) -> &M {
        self.model
    }

    /// Which parameters are sampled on the log scale.
    pub fn scale(&self) -> &LogScale {
        &self.scale
    }

    /// Log-density at a constrained point.
    pub fn logpdf(&self, theta: &[f64]) -> Result<f64> {
        self.model.log_density(theta)
    }

    /// Log-density at an unconstrained point, Jacobian included.
    pub fn logpdf_unconstrained(&self, z: &[f64]) -> Result<f64> {
        let lp = self.logpdf(&self.scale.to_constrained(z))?;
        Ok(lp + self.scale.log_jacobian(z))
    }

    /// Log-density and gradient at an unconstrained point.
    pub fn logpdf_and_grad_unconstrained(&self, z: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (lp, mut grad) = self.model.log_density_and_gradient(&self.scale.to_constrained(z))?;
        self.scale.pull_back_gradient(z, &mut grad);
        Ok((lp + self.scale.log_jacobian(z), grad))
    }

    /// `z = T^{-1}(theta)`.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.scale.to_unconstrained(theta)
    }

    /// `theta = T(z)`.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.scale.to_constrained(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HierarchicalDemandModel;
    use crate::test_support::synthetic_data;

    #[test]
    fn test_unconstrained_logpdf_includes_log_jac() {
        let data = synthetic_data(2, 30, 5);
        let model = HierarchicalDemandModel::from_data(&data).unwrap();
        let posterior = Posterior::new(&model).unwrap();

        let theta = model.parameter_init();
        let z = posterior.to_unconstrained(&theta);
        let theta_back = posterior.to_constrained(&z);
        for (i, (&a, &b)) in theta.iter().zip(theta_back.iter()).enumerate() {
            assert!((a - b).abs() < 1e-10 * a.abs().max(1.0), "Roundtrip failed at [{}]: {} vs {}", i, a, b);
        }

        let lp_constrained = posterior.logpdf(&theta).unwrap();
        let lp_unconstrained = posterior.logpdf_unconstrained(&z).unwrap();
        let log_jac = posterior.scale().log_jacobian(&z);
        let diff = (lp_unconstrained - lp_constrained - log_jac).abs();
        assert!(diff < 1e-8, "diff={}", diff);
    }

    #[test]
    fn test_only_scale_parameters_are_log_scaled() {
        let data = synthetic_data(2, 30, 5);
        let model = HierarchicalDemandModel::from_data(&data).unwrap();
        let posterior = Posterior::new(&model).unwrap();
        let names = model.parameter_names();
        let mask = posterior.scale().positive_mask();
        assert_eq!(mask.len(), names.len());
        for (name, &pos) in names.iter().zip(mask) {
            assert_eq!(pos, name.starts_with("tau_") || name == "noise_scale", "{}", name);
        }
    }

    #[test]
    fn test_unconstrained_grad_vs_finite_diff() {
        let data = synthetic_data(2, 30, 6);
        let model = HierarchicalDemandModel::from_data(&data).unwrap();
        let posterior = Posterior::new(&model).unwrap();

        let z = posterior.to_unconstrained(&model.parameter_init());
        let (_, grad) = posterior.logpdf_and_grad_unconstrained(&z).unwrap();

        let eps = 1e-6;
        for i in 0..z.len() {
            let mut z_plus = z.clone();
            z_plus[i] += eps;
            let mut z_minus = z.clone();
            z_minus[i] -= eps;
            let g_fd = (posterior.logpdf_unconstrained(&z_plus).unwrap()
                - posterior.logpdf_unconstrained(&z_minus).unwrap())
                / (2.0 * eps);
            let scale = grad[i].abs().max(1.0);
            assert!(
                (grad[i] - g_fd).abs() / scale < 1e-4,
                "grad_unconstrained[{}]: analytical={}, fd={}",
                i,
                grad[i],
                g_fd
            );
        }
    }
}
