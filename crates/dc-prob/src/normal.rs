//! Normal and half-Normal distribution utilities.

use dc_core::{Error, Result};

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// `ln(2)`, the half-Normal normalization offset relative to the Normal.
const LN_2: f64 = std::f64::consts::LN_2;

fn check_sigma(sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    Ok(())
}

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// `d/dx` of [`logpdf`].
pub fn grad_logpdf_x(x: f64, mu: f64, sigma: f64) -> f64 {
    -(x - mu) / (sigma * sigma)
}

/// Log-PDF of a half-Normal distribution with scale `sigma` at `x`.
///
/// Returns `-inf` for `x < 0`.
pub fn half_logpdf(x: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    if x < 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    let z = x / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI + LN_2)
}

/// `d/dx` of [`half_logpdf`] for `x >= 0`.
pub fn grad_half_logpdf_x(x: f64, sigma: f64) -> f64 {
    -x / (sigma * sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_standard_at_zero() {
        let lp = logpdf(0.0, 0.0, 1.0).unwrap();
        assert_relative_eq!(lp, -LN_SQRT_2PI, epsilon = 1e-12);
    }

    #[test]
    fn test_symmetry() {
        let lp1 = logpdf(1.3, 0.0, 2.0).unwrap();
        let lp2 = logpdf(-1.3, 0.0, 2.0).unwrap();
        assert!((lp1 - lp2).abs() < 1e-12);
    }

    #[test]
    fn test_half_normal_is_twice_normal_on_support() {
        let hn = half_logpdf(0.7, 1.5).unwrap();
        let n = logpdf(0.7, 0.0, 1.5).unwrap();
        assert!((hn - n - LN_2).abs() < 1e-12);
        assert_eq!(half_logpdf(-0.1, 1.5).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_gradients_vs_finite_diff() {
        let eps = 1e-6;
        let fd = (logpdf(0.3 + eps, 1.0, 2.0).unwrap() - logpdf(0.3 - eps, 1.0, 2.0).unwrap())
            / (2.0 * eps);
        assert!((fd - grad_logpdf_x(0.3, 1.0, 2.0)).abs() < 1e-7);

        let fd = (half_logpdf(0.8 + eps, 0.5).unwrap() - half_logpdf(0.8 - eps, 0.5).unwrap())
            / (2.0 * eps);
        assert!((fd - grad_half_logpdf_x(0.8, 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_sigma() {
        assert!(logpdf(0.0, 0.0, 0.0).is_err());
        assert!(logpdf(0.0, 0.0, -1.0).is_err());
        assert!(half_logpdf(0.0, f64::NAN).is_err());
    }
}
