//! Priors and hyperpriors for the hierarchical demand model.

use dc_core::{Error, ObservationSet, Result};
use dc_prob::normal;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::layout::{Component, N_COMPONENTS};

/// Prior distribution for a single scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prior {
    /// Normal prior `N(mean, sd)`.
    Normal {
        /// Location.
        mean: f64,
        /// Standard deviation.
        sd: f64,
    },
    /// Half-Normal prior on `(0, inf)` with the given scale.
    HalfNormal {
        /// Scale.
        scale: f64,
    },
}

impl Prior {
    /// Reject non-finite or non-positive scale arguments.
    pub fn validate(&self) -> Result<()> {
        let (name, v) = match *self {
            Prior::Normal { mean, sd } => {
                if !mean.is_finite() {
                    return Err(Error::Validation(format!("normal prior mean must be finite, got {}", mean)));
                }
                ("normal prior sd", sd)
            }
            Prior::HalfNormal { scale } => ("half-normal prior scale", scale),
        };
        if !v.is_finite() || v <= 0.0 {
            return Err(Error::Validation(format!("{} must be finite and > 0, got {}", name, v)));
        }
        Ok(())
    }

    /// Log-density at `x` (constrained space).
    pub fn logpdf(&self, x: f64) -> Result<f64> {
        match *self {
            Prior::Normal { mean, sd } => normal::logpdf(x, mean, sd),
            Prior::HalfNormal { scale } => normal::half_logpdf(x, scale),
        }
    }

    /// `d/dx` of [`Prior::logpdf`].
    pub fn grad(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mean, sd } => normal::grad_logpdf_x(x, mean, sd),
            Prior::HalfNormal { scale } => normal::grad_half_logpdf_x(x, scale),
        }
    }

    /// Fused log-density and gradient.
    #[inline]
    pub fn logpdf_and_grad(&self, x: f64) -> Result<(f64, f64)> {
        Ok((self.logpdf(x)?, self.grad(x)))
    }

    /// Draw one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let z: f64 = StandardNormal.sample(rng);
        match *self {
            Prior::Normal { mean, sd } => mean + sd * z,
            Prior::HalfNormal { scale } => (scale * z).abs(),
        }
    }

    /// A representative value (mean, or half the scale) used for fixed starts.
    pub fn center(&self) -> f64 {
        match *self {
            Prior::Normal { mean, .. } => mean,
            Prior::HalfNormal { scale } => 0.5 * scale,
        }
    }
}

/// Hyperpriors for every global parameter of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperPriors {
    /// Priors on the global component means `mu_j` (component order).
    pub mu: [Prior; N_COMPONENTS],
    /// Priors on the between-category spreads `tau_j` (component order).
    pub tau: [Prior; N_COMPONENTS],
    /// Prior on the noise scale `s` (NB2 dispersion is `s^2`).
    pub noise_scale: Prior,
}

impl HyperPriors {
    /// Weakly-informative defaults scaled to the observed demand.
    ///
    /// With `ybar`, `sd` the pooled demand mean/sd and `T` the window length:
    /// - `mu_level ~ N(ybar, 2 * max(sd, 0.1 * ybar, 1))`
    /// - `mu_trend ~ N(0, 2 * sd / T)`, `mu_weekly, mu_monthly ~ N(0, sd)`
    /// - `tau_level ~ HN(sd)`, `tau_trend ~ HN(sd / T)`, seasonal `tau ~ HN(sd / 2)`
    /// - `noise_scale ~ HN(0.5)`
    pub fn from_data(data: &ObservationSet) -> Self {
        let ybar = data.demand_mean();
        let sd = data.demand_sd().max(0.1 * ybar).max(1.0);
        let t = data.n_days().max(2) as f64;
        Self {
            mu: [
                Prior::Normal { mean: ybar, sd: 2.0 * sd },
                Prior::Normal { mean: 0.0, sd: 2.0 * sd / t },
                Prior::Normal { mean: 0.0, sd },
                Prior::Normal { mean: 0.0, sd },
            ],
            tau: [
                Prior::HalfNormal { scale: sd },
                Prior::HalfNormal { scale: sd / t },
                Prior::HalfNormal { scale: 0.5 * sd },
                Prior::HalfNormal { scale: 0.5 * sd },
            ],
            noise_scale: Prior::HalfNormal { scale: 0.5 },
        }
    }

    /// Validate every prior and check that scale parameters use half-Normal priors.
    pub fn validate(&self) -> Result<()> {
        for p in self.mu.iter().chain(self.tau.iter()).chain(std::iter::once(&self.noise_scale)) {
            p.validate()?;
        }
        for (c, p) in Component::ALL.iter().zip(self.tau.iter()) {
            if !matches!(p, Prior::HalfNormal { .. }) {
                return Err(Error::Validation(format!(
                    "tau_{} needs a half_normal prior (positive support)",
                    c.name()
                )));
            }
        }
        if !matches!(self.noise_scale, Prior::HalfNormal { .. }) {
            return Err(Error::Validation("noise_scale needs a half_normal prior".into()));
        }
        Ok(())
    }

    /// Prior on `mu_<component>`.
    #[inline]
    pub fn mu(&self, c: Component) -> &Prior {
        &self.mu[c.index()]
    }

    /// Prior on `tau_<component>`.
    #[inline]
    pub fn tau(&self, c: Component) -> &Prior {
        &self.tau[c.index()]
    }
}
