//! Bootstrap interval estimation: percentile and BCa (bias-corrected and
//! accelerated, Efron 1987) intervals plus the quantile helpers shared by
//! summaries and forecasts.

use dc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

const PROB_EPS: f64 = 1e-12;

/// Interval construction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiMethod {
    /// Quantiles of the bootstrap distribution.
    #[default]
    Percentile,
    /// Bias-corrected and accelerated quantiles.
    Bca,
}

/// A closed interval `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl Interval {
    fn ordered(a: f64, b: f64) -> Self {
        Self { lower: a.min(b), upper: a.max(b) }
    }

    /// `upper - lower`.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Midpoint.
    pub fn mid(&self) -> f64 {
        0.5 * (self.lower + self.upper)
    }

    /// Whether `x` lies inside (inclusive).
    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }
}

/// BCa constants, reported alongside the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BcaDiagnostics {
    /// Bias-correction constant.
    pub z0: f64,
    /// Acceleration constant.
    pub acceleration: f64,
    /// Adjusted lower quantile level.
    pub alpha_low_adj: f64,
    /// Adjusted upper quantile level.
    pub alpha_high_adj: f64,
}

#[inline]
fn std_normal() -> Normal {
    // mean 0, sd 1 is always a valid parameterization.
    Normal::new(0.0, 1.0).expect("standard normal")
}

#[inline]
fn clip_prob(p: f64) -> f64 {
    p.clamp(PROB_EPS, 1.0 - PROB_EPS)
}

/// Standard normal quantile function (clipped away from 0 and 1).
#[inline]
pub fn inv_norm_cdf(p: f64) -> f64 {
    std_normal().inverse_cdf(clip_prob(p))
}

#[inline]
fn norm_cdf(z: f64) -> f64 {
    std_normal().cdf(z)
}

/// Quantile of sorted data via linear interpolation (R type 7).
///
/// Empty input returns `NaN`.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => return f64::NAN,
        1 => return sorted[0],
        _ => {}
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    let t = pos - i as f64;
    if i == j { sorted[i] } else { (1.0 - t) * sorted[i] + t * sorted[j] }
}

fn check_conf_level(conf_level: f64) -> Result<()> {
    if !(conf_level.is_finite() && conf_level > 0.0 && conf_level < 1.0) {
        return Err(Error::Validation(format!("conf_level must be in (0,1), got {}", conf_level)));
    }
    Ok(())
}

/// Percentile bootstrap interval.
pub fn percentile_interval(samples: &[f64], conf_level: f64) -> Result<Interval> {
    check_conf_level(conf_level)?;
    if samples.len() < 2 {
        return Err(Error::Validation("percentile interval needs at least 2 samples".into()));
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let alpha = 0.5 * (1.0 - conf_level);
    Ok(Interval::ordered(
        quantile_linear_sorted(&sorted, alpha),
        quantile_linear_sorted(&sorted, 1.0 - alpha),
    ))
}

/// BCa bias correction `z0 = Φ^-1(P*(θ* < θ̂))`, counting ties as half.
pub fn bias_correction_z0(theta_hat: f64, samples: &[f64]) -> Result<f64> {
    if samples.is_empty() || !theta_hat.is_finite() {
        return Err(Error::Validation("z0 needs a finite estimate and non-empty samples".into()));
    }
    if samples.iter().any(|x| !x.is_finite()) {
        return Err(Error::Validation("bootstrap samples must be finite".into()));
    }
    let below = samples.iter().filter(|&&x| x < theta_hat).count() as f64;
    let ties = samples.iter().filter(|&&x| x == theta_hat).count() as f64;
    Ok(inv_norm_cdf((below + 0.5 * ties) / samples.len() as f64))
}

/// Jackknife acceleration `a = Σ d³ / (6 (Σ d²)^{3/2})`, `d = mean - θ_(i)`.
///
/// Returns 0 when the leave-one-out estimates do not vary.
pub fn jackknife_acceleration(jackknife: &[f64]) -> Result<f64> {
    if jackknife.len() < 3 {
        return Err(Error::Validation("acceleration needs at least 3 jackknife estimates".into()));
    }
    if jackknife.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("jackknife estimates must be finite".into()));
    }
    let mean = jackknife.iter().sum::<f64>() / jackknife.len() as f64;
    let (sum2, sum3) = jackknife.iter().fold((0.0, 0.0), |(s2, s3), &v| {
        let d = mean - v;
        (s2 + d * d, s3 + d * d * d)
    });
    if !(sum2 > 0.0) {
        return Ok(0.0);
    }
    let a = sum3 / (6.0 * sum2.powf(1.5));
    if !a.is_finite() {
        return Err(Error::Computation("acceleration estimate is not finite".into()));
    }
    Ok(a)
}

/// BCa-adjusted quantile level for nominal level `alpha`.
pub fn bca_adjusted_alpha(alpha: f64, z0: f64, acceleration: f64) -> f64 {
    let z_alpha = inv_norm_cdf(alpha);
    let denom = 1.0 - acceleration * (z0 + z_alpha);
    if !denom.is_finite() || denom.abs() < 1e-12 {
        return if denom.is_sign_negative() { PROB_EPS } else { 1.0 - PROB_EPS };
    }
    clip_prob(norm_cdf(z0 + (z0 + z_alpha) / denom))
}

/// BCa interval from bootstrap replicates and leave-one-out estimates.
pub fn bca_interval(
    theta_hat: f64,
    samples: &[f64],
    jackknife: &[f64],
    conf_level: f64,
) -> Result<(Interval, BcaDiagnostics)> {
    check_conf_level(conf_level)?;
    if samples.len() < 2 {
        return Err(Error::Validation("BCa interval needs at least 2 samples".into()));
    }
    let z0 = bias_correction_z0(theta_hat, samples)?;
    let acceleration = jackknife_acceleration(jackknife)?;

    let alpha = 0.5 * (1.0 - conf_level);
    let alpha_low_adj = bca_adjusted_alpha(alpha, z0, acceleration);
    let alpha_high_adj = bca_adjusted_alpha(1.0 - alpha, z0, acceleration);

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let interval = Interval::ordered(
        quantile_linear_sorted(&sorted, alpha_low_adj),
        quantile_linear_sorted(&sorted, alpha_high_adj),
    );
    Ok((interval, BcaDiagnostics { z0, acceleration, alpha_low_adj, alpha_high_adj }))
}
