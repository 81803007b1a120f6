//! Negative binomial distribution utilities.
//!
//! Demand counts are modelled with the NB2 parameterization: mean `mu`,
//! dispersion `alpha`, `Var(Y) = mu + alpha * mu^2`. As `alpha -> 0` this
//! approaches Poisson(mu).

use dc_core::{Error, Result};
use rand::Rng;
use rand_distr::{Distribution, Gamma, Poisson};
use statrs::function::gamma::{digamma, ln_gamma};

#[inline]
fn ln_factorial(n: u64) -> f64 {
    ln_gamma(n as f64 + 1.0)
}

fn check_mean_disp(mu: f64, alpha: f64) -> Result<()> {
    if !mu.is_finite() || mu <= 0.0 {
        return Err(Error::Validation(format!("mu must be finite and > 0, got {}", mu)));
    }
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(Error::Validation(format!("alpha must be finite and > 0, got {}", alpha)));
    }
    Ok(())
}

/// Log-PMF of NB2 parameterized by mean `mu` and dispersion `alpha`.
///
/// - `mu > 0`
/// - `alpha > 0`
pub fn logpmf_mean_disp(k: u64, mu: f64, alpha: f64) -> Result<f64> {
    check_mean_disp(mu, alpha)?;
    let r = 1.0 / alpha;
    let p = r / (r + mu); // in (0,1)
    logpmf_r_p(k, r, p)
}

/// Log-PMF of a Negative Binomial distribution parameterized by `r` and `p`.
///
/// PMF (counting failures `k` before `r` successes):
/// `P(K=k) = C(k+r-1, k) * (1-p)^k * p^r`
pub fn logpmf_r_p(k: u64, r: f64, p: f64) -> Result<f64> {
    if !r.is_finite() || r <= 0.0 {
        return Err(Error::Validation(format!("r must be finite and > 0, got {}", r)));
    }
    if !p.is_finite() || p <= 0.0 || p >= 1.0 {
        return Err(Error::Validation(format!("p must be finite and in (0,1), got {}", p)));
    }

    let kf = k as f64;
    let ln_coeff = ln_gamma(kf + r) - ln_gamma(r) - ln_factorial(k);
    Ok(ln_coeff + r * p.ln() + kf * (1.0 - p).ln())
}

/// NB2 log-PMF together with its partial derivatives.
///
/// Returns `(log p, d/dmu, d/dalpha)`.
///
/// With `r = 1/alpha`:
/// - `d/dmu = k/mu - (k + r)/(r + mu)`
/// - `d/dr = psi(k + r) - psi(r) + ln(r/(r + mu)) + 1 - (k + r)/(r + mu)`
/// - `d/dalpha = -r^2 * d/dr`
pub fn logpmf_mean_disp_and_grad(k: u64, mu: f64, alpha: f64) -> Result<(f64, f64, f64)> {
    check_mean_disp(mu, alpha)?;
    let r = 1.0 / alpha;
    let kf = k as f64;
    let rpm = r + mu;

    let lp = ln_gamma(kf + r) - ln_gamma(r) - ln_factorial(k)
        + r * (r / rpm).ln()
        + kf * (mu / rpm).ln();

    let d_mu = kf / mu - (kf + r) / rpm;
    let d_r = digamma(kf + r) - digamma(r) + (r / rpm).ln() + 1.0 - (kf + r) / rpm;
    let d_alpha = -r * r * d_r;

    Ok((lp, d_mu, d_alpha))
}

/// Draw one NB2(mean, alpha) count via the Gamma-Poisson mixture.
///
/// `lambda ~ Gamma(shape = r, scale = mu / r)`, `k ~ Poisson(lambda)`.
pub fn sample_mean_disp<R: Rng + ?Sized>(rng: &mut R, mu: f64, alpha: f64) -> Result<u64> {
    check_mean_disp(mu, alpha)?;
    let r = 1.0 / alpha;
    let gamma = Gamma::new(r, mu / r)
        .map_err(|e| Error::Computation(format!("gamma(r={}, mu={}): {}", r, mu, e)))?;
    let lambda: f64 = gamma.sample(rng);
    if !(lambda > 0.0) {
        return Ok(0);
    }
    let poisson = Poisson::new(lambda)
        .map_err(|e| Error::Computation(format!("poisson(lambda={}): {}", lambda, e)))?;
    let k: f64 = poisson.sample(rng);
    Ok(k as u64)
}
