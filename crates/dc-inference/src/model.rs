//! Hierarchical demand model (non-centered, NB2 likelihood).
//!
//! For category `c` on day `t`:
//!
//! ```text
//! value[c, j] = mu_j + tau_j * z[c, j]          j in {level, trend, weekly, monthly}
//! eta(c, t)   = level[c] + trend[c] * (t - t_ref)
//!             + weekly[c] * sin(2πt / P_w) + monthly[c] * sin(2πt / P_m)
//! demand      ~ NB2(mean = softplus(eta), alpha = noise_scale^2)
//! ```
//!
//! `t_ref` is the midpoint of the historical window. See [`crate::layout`] for
//! the parameter ordering.

use std::f64::consts::TAU;

use dc_core::traits::LogDensityModel;
use dc_core::{Error, ObservationSet, Result};
use dc_prob::math::{inverse_softplus, softplus_and_sigmoid};
use dc_prob::{neg_binomial, normal};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::layout::{Component, N_COMPONENTS, ParameterLayout};
use crate::priors::HyperPriors;

/// Smallest expected demand fed to the likelihood.
const MU_FLOOR: f64 = 1e-9;

/// Seasonal periods (in days) of the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Seasonality {
    /// Period of the weekly term.
    pub weekly_period: f64,
    /// Period of the monthly term.
    pub monthly_period: f64,
}

impl Default for Seasonality {
    fn default() -> Self {
        Self { weekly_period: 7.0, monthly_period: 30.0 }
    }
}

impl Seasonality {
    /// Periods must be finite and positive.
    pub fn validate(&self) -> Result<()> {
        for (name, p) in [("weekly_period", self.weekly_period), ("monthly_period", self.monthly_period)]
        {
            if !p.is_finite() || p <= 0.0 {
                return Err(Error::Validation(format!("{} must be finite and > 0, got {}", name, p)));
            }
        }
        Ok(())
    }

    /// Predictor features `[1, t - t_ref, sin(2πt/P_w), sin(2πt/P_m)]`.
    #[inline]
    pub fn features(&self, day: f64, t_ref: f64) -> [f64; N_COMPONENTS] {
        [
            1.0,
            day - t_ref,
            (TAU * day / self.weekly_period).sin(),
            (TAU * day / self.monthly_period).sin(),
        ]
    }
}

/// Expected demand `softplus(eta)` for one set of component values.
#[inline]
pub fn expected_demand(values: &[f64; N_COMPONENTS], features: &[f64; N_COMPONENTS]) -> f64 {
    let eta: f64 = values.iter().zip(features).map(|(v, f)| v * f).sum();
    softplus_and_sigmoid(eta).0.max(MU_FLOOR)
}

/// Hierarchical multi-category demand model.
#[derive(Debug, Clone)]
pub struct HierarchicalDemandModel {
    layout: ParameterLayout,
    priors: HyperPriors,
    seasonality: Seasonality,
    first_day: u32,
    t_ref: f64,
    /// Predictor features per window day.
    features: Vec<[f64; N_COMPONENTS]>,
    /// Observed counts, category-major: `counts[c * n_days + d]`.
    counts: Vec<u64>,
    init: Vec<f64>,
}

impl HierarchicalDemandModel {
    /// Build with data-scaled default priors and default seasonality.
    pub fn from_data(data: &ObservationSet) -> Result<Self> {
        Self::new(data, HyperPriors::from_data(data), Seasonality::default())
    }

    /// Build a model over a validated observation set.
    pub fn new(data: &ObservationSet, priors: HyperPriors, seasonality: Seasonality) -> Result<Self> {
        priors.validate()?;
        seasonality.validate()?;

        let names = data.categories().iter().map(|c| c.name.clone()).collect();
        let layout = ParameterLayout::new(names)?;
        let first_day = data.first_day();
        let t_ref = 0.5 * (data.first_day() as f64 + data.last_day() as f64);
        let n_days = data.n_days();

        let features =
            (0..n_days).map(|d| seasonality.features((first_day as usize + d) as f64, t_ref)).collect();
        // ObservationSet keeps records sorted by (category, day) with no gaps.
        let counts: Vec<u64> = data.observations().iter().map(|o| o.demand).collect();
        debug_assert_eq!(counts.len(), n_days * layout.n_categories());

        let init = Self::data_init(&layout, &priors, data);
        Ok(Self { layout, priors, seasonality, first_day, t_ref, features, counts, init })
    }

    fn data_init(layout: &ParameterLayout, priors: &HyperPriors, data: &ObservationSet) -> Vec<f64> {
        let mut init = vec![0.0; layout.dim()];
        for c in Component::ALL {
            init[ParameterLayout::mu(c)] = priors.mu(c).center();
            init[ParameterLayout::tau(c)] = priors.tau(c).center();
        }
        let ybar = data.demand_mean().max(0.5);
        init[ParameterLayout::mu(Component::Level)] = inverse_softplus(ybar);

        // Method-of-moments NB2 dispersion, averaged over categories.
        let mut alpha_sum = 0.0;
        for cat in 0..layout.n_categories() {
            let series = data.series(cat);
            let n = series.len() as f64;
            let mean = series.iter().sum::<u64>() as f64 / n;
            let var = if series.len() > 1 {
                series.iter().map(|&k| (k as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0)
            } else {
                mean
            };
            let mean = mean.max(0.5);
            alpha_sum += ((var - mean) / (mean * mean)).clamp(0.0025, 4.0);
        }
        init[ParameterLayout::NOISE_SCALE] = (alpha_sum / layout.n_categories() as f64).sqrt();
        init
    }

    /// Parameter layout.
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Hyperpriors in use.
    pub fn priors(&self) -> &HyperPriors {
        &self.priors
    }

    /// Seasonal periods in use.
    pub fn seasonality(&self) -> &Seasonality {
        &self.seasonality
    }

    /// Reference day for the trend term (window midpoint).
    pub fn t_ref(&self) -> f64 {
        self.t_ref
    }

    /// Last day of the historical window.
    pub fn last_day(&self) -> u32 {
        self.first_day + self.n_days() as u32 - 1
    }

    /// Number of days in the historical window.
    pub fn n_days(&self) -> usize {
        self.features.len()
    }

    /// Predictor features for an arbitrary (possibly future) day.
    #[inline]
    pub fn features(&self, day: u32) -> [f64; N_COMPONENTS] {
        self.seasonality.features(day as f64, self.t_ref)
    }

    /// Expected demand for `category` on `day` under constrained `params`.
    pub fn expected_demand(&self, params: &[f64], category: usize, day: u32) -> f64 {
        let values = self.layout.category_values(params, category).to_array();
        expected_demand(&values, &self.features(day))
    }

    /// Simulate one demand value from the likelihood.
    pub fn sample_demand<R: Rng + ?Sized>(
        &self,
        params: &[f64],
        category: usize,
        day: u32,
        rng: &mut R,
    ) -> Result<u64> {
        let mu = self.expected_demand(params, category, day);
        let s = params[ParameterLayout::NOISE_SCALE];
        neg_binomial::sample_mean_disp(rng, mu, s * s)
    }

    fn check_params(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.layout.dim() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.layout.dim(),
                params.len()
            )));
        }
        if let Some(i) = params.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidParameter(format!(
                "{} is not finite ({})",
                self.layout.names()[i],
                params[i]
            )));
        }
        for c in Component::ALL {
            let tau = params[ParameterLayout::tau(c)];
            if tau <= 0.0 {
                return Err(Error::InvalidParameter(format!("tau_{} must be > 0, got {}", c.name(), tau)));
            }
        }
        let s = params[ParameterLayout::NOISE_SCALE];
        if s <= 0.0 {
            return Err(Error::InvalidParameter(format!("noise_scale must be > 0, got {}", s)));
        }
        Ok(())
    }

    /// Log-likelihood of each observation, in `(category, day)` order.
    pub fn pointwise_log_likelihood(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check_params(params)?;
        let s = params[ParameterLayout::NOISE_SCALE];
        let alpha = s * s;
        let n_days = self.n_days();
        let mut out = Vec::with_capacity(self.counts.len());
        for cat in 0..self.layout.n_categories() {
            let values = self.layout.category_values(params, cat).to_array();
            for (d, f) in self.features.iter().enumerate() {
                let mu = expected_demand(&values, f);
                out.push(neg_binomial::logpmf_mean_disp(self.counts[cat * n_days + d], mu, alpha)?);
            }
        }
        Ok(out)
    }
}

impl LogDensityModel for HierarchicalDemandModel {
    fn dim(&self) -> usize {
        self.layout.dim()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.layout.names()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.layout.bounds()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.init.clone()
    }

    fn log_density_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        self.check_params(params)?;
        let layout = &self.layout;
        let mut lp = 0.0;
        let mut grad = vec![0.0; layout.dim()];

        // Hyperpriors
        for c in Component::ALL {
            let (i_mu, i_tau) = (ParameterLayout::mu(c), ParameterLayout::tau(c));
            let (l, g) = self.priors.mu(c).logpdf_and_grad(params[i_mu])?;
            lp += l;
            grad[i_mu] += g;
            let (l, g) = self.priors.tau(c).logpdf_and_grad(params[i_tau])?;
            lp += l;
            grad[i_tau] += g;
        }
        let i_s = ParameterLayout::NOISE_SCALE;
        let s = params[i_s];
        let (l, g) = self.priors.noise_scale.logpdf_and_grad(s)?;
        lp += l;
        grad[i_s] += g;

        // Likelihood, accumulated per category on the derived values.
        let alpha = s * s;
        let n_days = self.n_days();
        let mut d_alpha = 0.0;
        for cat in 0..layout.n_categories() {
            let values = layout.category_values(params, cat).to_array();
            let mut d_values = [0.0; N_COMPONENTS];
            for (d, f) in self.features.iter().enumerate() {
                let eta: f64 = values.iter().zip(f).map(|(v, x)| v * x).sum();
                let (sp, slope) = softplus_and_sigmoid(eta);
                let (mu, slope) = if sp > MU_FLOOR { (sp, slope) } else { (MU_FLOOR, 0.0) };
                let (l, d_mu, d_a) =
                    neg_binomial::logpmf_mean_disp_and_grad(self.counts[cat * n_days + d], mu, alpha)?;
                lp += l;
                d_alpha += d_a;
                let d_eta = d_mu * slope;
                for j in 0..N_COMPONENTS {
                    d_values[j] += d_eta * f[j];
                }
            }

            // Non-centered chain rule + standard-normal prior on z.
            for c in Component::ALL {
                let j = c.index();
                let i_z = layout.z(cat, c);
                let z = params[i_z];
                let tau = params[ParameterLayout::tau(c)];
                lp += normal::logpdf(z, 0.0, 1.0)?;
                grad[i_z] += normal::grad_logpdf_x(z, 0.0, 1.0) + d_values[j] * tau;
                grad[ParameterLayout::mu(c)] += d_values[j];
                grad[ParameterLayout::tau(c)] += d_values[j] * z;
            }
        }
        grad[i_s] += d_alpha * 2.0 * s;

        Ok((lp, grad))
    }

    fn sample_prior(&self, rng: &mut StdRng) -> Vec<f64> {
        let mut p = vec![0.0; self.layout.dim()];
        for c in Component::ALL {
            p[ParameterLayout::mu(c)] = self.priors.mu(c).sample(rng);
            p[ParameterLayout::tau(c)] = self.priors.tau(c).sample(rng).max(1e-6);
        }
        p[ParameterLayout::NOISE_SCALE] = self.priors.noise_scale.sample(rng).max(1e-6);
        for cat in 0..self.layout.n_categories() {
            for c in Component::ALL {
                p[self.layout.z(cat, c)] = StandardNormal.sample(rng);
            }
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::Observation;

    fn small_data() -> ObservationSet {
        let demand = [[12u64, 9, 15, 11, 14, 10, 13, 16], [30, 28, 35, 33, 29, 31, 36, 34]];
        let mut obs = Vec::new();
        for (c, row) in demand.iter().enumerate() {
            for (d, &k) in row.iter().enumerate() {
                obs.push(Observation { day: d as u32, category: c, demand: k });
            }
        }
        ObservationSet::from_names(vec!["bread".into(), "milk".into()], obs).unwrap()
    }

    fn test_point(model: &HierarchicalDemandModel) -> Vec<f64> {
        let mut p = model.parameter_init();
        for (i, v) in p.iter_mut().enumerate() {
            if !(4..=8).contains(&i) {
                *v += 0.1 * ((i as f64) * 0.7).sin();
            }
        }
        p
    }

    #[test]
    fn test_gradient_vs_finite_diff() {
        let model = HierarchicalDemandModel::from_data(&small_data()).unwrap();
        let p = test_point(&model);
        let (_, grad) = model.log_density_and_gradient(&p).unwrap();

        let eps = 1e-6;
        for i in 0..p.len() {
            let mut plus = p.clone();
            plus[i] += eps;
            let mut minus = p.clone();
            minus[i] -= eps;
            let fd = (model.log_density(&plus).unwrap() - model.log_density(&minus).unwrap())
                / (2.0 * eps);
            let scale = grad[i].abs().max(1.0);
            assert!(
                (grad[i] - fd).abs() / scale < 1e-4,
                "grad[{}] ({}): analytical={}, fd={}",
                i,
                model.parameter_names()[i],
                grad[i],
                fd
            );
        }
    }

    #[test]
    fn test_pointwise_sums_to_likelihood_part() {
        let model = HierarchicalDemandModel::from_data(&small_data()).unwrap();
        let p = test_point(&model);
        let pw = model.pointwise_log_likelihood(&p).unwrap();
        assert_eq!(pw.len(), 16);
        assert!(pw.iter().all(|v| v.is_finite() && *v <= 0.0));

        let mut prior_lp = 0.0;
        for c in Component::ALL {
            prior_lp += model.priors().mu(c).logpdf(p[ParameterLayout::mu(c)]).unwrap();
            prior_lp += model.priors().tau(c).logpdf(p[ParameterLayout::tau(c)]).unwrap();
            for cat in 0..2 {
                prior_lp += normal::logpdf(p[model.layout().z(cat, c)], 0.0, 1.0).unwrap();
            }
        }
        prior_lp += model.priors().noise_scale.logpdf(p[ParameterLayout::NOISE_SCALE]).unwrap();

        let total = model.log_density(&p).unwrap();
        let sum: f64 = pw.iter().sum();
        assert!((total - prior_lp - sum).abs() < 1e-8, "total={} prior={} sum={}", total, prior_lp, sum);
    }

    #[test]
    fn test_rejects_non_positive_scales() {
        let model = HierarchicalDemandModel::from_data(&small_data()).unwrap();
        let mut p = model.parameter_init();
        p[ParameterLayout::tau(Component::Trend)] = 0.0;
        assert!(matches!(model.log_density_and_gradient(&p), Err(Error::InvalidParameter(_))));

        let mut p = model.parameter_init();
        p[ParameterLayout::NOISE_SCALE] = -0.1;
        assert!(matches!(model.log_density_and_gradient(&p), Err(Error::InvalidParameter(_))));

        assert!(matches!(model.log_density_and_gradient(&[0.0; 3]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_init_is_finite_and_near_data() {
        let data = small_data();
        let model = HierarchicalDemandModel::from_data(&data).unwrap();
        let init = model.parameter_init();
        assert!(model.log_density(&init).unwrap().is_finite());
        let mu = model.expected_demand(&init, 0, 3);
        assert!((mu - data.demand_mean()).abs() < 1e-6, "mu={}", mu);
        assert_eq!(model.t_ref(), 3.5);
        assert_eq!(model.last_day(), 7);
    }

    #[test]
    fn test_prior_draws_are_valid() {
        use rand::SeedableRng;
        let model = HierarchicalDemandModel::from_data(&small_data()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let p = model.sample_prior(&mut rng);
            assert!(model.log_density(&p).unwrap().is_finite());
        }
    }

    #[test]
    fn test_seasonality_validation() {
        let data = small_data();
        let bad = Seasonality { weekly_period: 0.0, ..Default::default() };
        assert!(HierarchicalDemandModel::new(&data, HyperPriors::from_data(&data), bad).is_err());
    }
}
