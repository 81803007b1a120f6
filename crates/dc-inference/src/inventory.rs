//! Newsvendor inventory decisions from a demand sample.
//!
//! Expected cost of ordering `Q` units against demand `D`:
//!
//! ```text
//! C(Q) = h * E[max(Q - D, 0)] + p * E[max(D - Q, 0)]
//! ```
//!
//! For this piecewise-linear cost the minimizer is the empirical quantile of
//! `D` at the critical fractile `p / (h + p)`. [`minimize_expected_loss`]
//! handles other per-unit loss shapes by grid search plus bisection.

use std::ops::RangeInclusive;

use dc_core::{CostScenario, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap_ci::{BcaDiagnostics, CiMethod, Interval, bca_interval, percentile_interval};
use crate::forecast::ForecastDistribution;

/// Fewest bootstrap resamples accepted.
pub const MIN_RESAMPLES: usize = 1000;

/// Sorted demand values with prefix sums for O(log n) cost evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandSample {
    sorted: Vec<f64>,
    prefix: Vec<f64>,
}

impl DemandSample {
    /// Build from raw demand values (must be non-empty and finite).
    pub fn new(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::Validation("demand sample is empty".into()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("demand sample contains non-finite values".into()));
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mut prefix = Vec::with_capacity(sorted.len() + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for &v in &sorted {
            acc += v;
            prefix.push(acc);
        }
        Ok(Self { sorted, prefix })
    }

    /// Sample size.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Always false; construction rejects empty samples.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Values in ascending order.
    pub fn sorted(&self) -> &[f64] {
        &self.sorted
    }

    /// Sample mean.
    pub fn mean(&self) -> f64 {
        self.prefix[self.len()] / self.len() as f64
    }

    /// Order statistic `x_(ceil(n q))`, the smallest value whose empirical CDF reaches `q`.
    pub fn order_statistic(&self, q: f64) -> f64 {
        let n = self.len();
        let k = (q.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        self.sorted[k.clamp(1, n) - 1]
    }

    /// Expected newsvendor cost of ordering `q` units.
    pub fn expected_cost(&self, q: f64, cost: &CostScenario) -> f64 {
        let n = self.len();
        let k = self.sorted.partition_point(|&d| d <= q);
        let below = self.prefix[k];
        let above = self.prefix[n] - below;
        let overage = q * k as f64 - below;
        let underage = above - q * (n - k) as f64;
        (cost.holding_cost * overage + cost.stockout_penalty * underage) / n as f64
    }

    /// Mean of `loss(q, d)` over the sample.
    pub fn expected_loss<F: Fn(f64, f64) -> f64>(&self, q: f64, loss: &F) -> f64 {
        self.sorted.iter().map(|&d| loss(q, d)).sum::<f64>() / self.len() as f64
    }
}

/// Cost-minimizing order quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalOrderQuantity {
    /// Category the demand belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Cost parameters.
    pub cost: CostScenario,
    /// Critical fractile `p / (h + p)`.
    pub critical_fractile: f64,
    /// Order quantity `Q*`.
    pub quantity: f64,
    /// `C(Q*)`.
    pub expected_cost: f64,
}

fn decide(sample: &DemandSample, cost: &CostScenario) -> OptimalOrderQuantity {
    let fractile = cost.critical_fractile();
    let quantity = sample.order_statistic(fractile);
    OptimalOrderQuantity {
        category: None,
        cost: *cost,
        critical_fractile: fractile,
        quantity,
        expected_cost: sample.expected_cost(quantity, cost),
    }
}

/// Critical-fractile order quantity for a demand sample.
///
/// Fails with `InvalidCostParameter` for non-positive costs.
pub fn optimal_quantity(demand: &[f64], cost: &CostScenario) -> Result<OptimalOrderQuantity> {
    cost.validate()?;
    Ok(decide(&DemandSample::new(demand)?, cost))
}

/// Order quantity for `category` covering the demand of forecast `steps`.
pub fn optimal_quantity_for(
    forecast: &ForecastDistribution,
    category: &str,
    steps: RangeInclusive<u32>,
    cost: &CostScenario,
) -> Result<OptimalOrderQuantity> {
    cost.validate()?;
    let c = forecast.category_index(category)?;
    let demand = forecast.aggregate(c, steps)?;
    let mut out = decide(&DemandSample::new(&demand)?, cost);
    out.category = Some(category.to_string());
    Ok(out)
}

/// Settings for [`minimize_expected_loss`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Grid points across `[min D, max D]`.
    pub grid_points: usize,
    /// Absolute tolerance on `Q`.
    pub tolerance: f64,
    /// Bisection iteration cap.
    pub max_iter: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { grid_points: 201, tolerance: 1e-6, max_iter: 100 }
    }
}

/// Minimize `E[loss(Q, D)]` over `Q` for a loss convex in `Q`.
///
/// A coarse grid brackets the minimum; bisection on the sign of a central
/// difference then narrows the bracket to `tolerance`. Returns `(Q*, E[loss])`.
pub fn minimize_expected_loss<F>(sample: &DemandSample, loss: F, options: &SearchOptions) -> Result<(f64, f64)>
where
    F: Fn(f64, f64) -> f64 + Sync,
{
    if options.grid_points < 3 {
        return Err(Error::Validation("grid_points must be >= 3".into()));
    }
    if !(options.tolerance.is_finite() && options.tolerance > 0.0) {
        return Err(Error::Validation("tolerance must be finite and > 0".into()));
    }
    let lo = sample.sorted[0];
    let hi = sample.sorted[sample.len() - 1];
    if hi - lo <= options.tolerance {
        return Ok((lo, sample.expected_loss(lo, &loss)));
    }

    let step = (hi - lo) / (options.grid_points - 1) as f64;
    let values: Vec<f64> = (0..options.grid_points)
        .into_par_iter()
        .map(|i| sample.expected_loss(lo + step * i as f64, &loss))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("expected loss is not finite on the search grid".into()));
    }
    let best = values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut a = lo + step * best.saturating_sub(1) as f64;
    let mut b = (lo + step * (best + 1) as f64).min(hi);
    let h = 0.25 * options.tolerance;
    for _ in 0..options.max_iter {
        if b - a <= options.tolerance {
            break;
        }
        let mid = 0.5 * (a + b);
        let slope = sample.expected_loss(mid + h, &loss) - sample.expected_loss(mid - h, &loss);
        if slope > 0.0 {
            b = mid;
        } else {
            a = mid;
        }
    }
    let q = 0.5 * (a + b);
    let mut result = (q, sample.expected_loss(q, &loss));
    if values[best] < result.1 {
        result = (lo + step * best as f64, values[best]);
    }
    Ok(result)
}

/// `Q*` and `C(Q*)` over a grid of holding costs and stockout penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySurface {
    /// Holding-cost axis (rows).
    pub holding_costs: Vec<f64>,
    /// Stockout-penalty axis (columns).
    pub stockout_penalties: Vec<f64>,
    /// `quantity[i][j]` for `holding_costs[i]`, `stockout_penalties[j]`.
    pub quantity: Vec<Vec<f64>>,
    /// Expected cost at the optimum, same indexing.
    pub expected_cost: Vec<Vec<f64>>,
}

/// Evaluate the optimal decision on every `(h, p)` grid cell in parallel.
pub fn sensitivity_surface(
    demand: &[f64],
    holding_costs: &[f64],
    stockout_penalties: &[f64],
) -> Result<SensitivitySurface> {
    if holding_costs.is_empty() || stockout_penalties.is_empty() {
        return Err(Error::Validation("sensitivity grid axes must be non-empty".into()));
    }
    let sample = DemandSample::new(demand)?;
    let cells = holding_costs
        .iter()
        .flat_map(|&h| stockout_penalties.iter().map(move |&p| (h, p)))
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(h, p)| -> Result<OptimalOrderQuantity> {
            let cost = CostScenario::new(h, p)?;
            Ok(decide(&sample, &cost))
        })
        .collect::<Result<Vec<_>>>()?;

    let n_p = stockout_penalties.len();
    let grid = |f: fn(&OptimalOrderQuantity) -> f64| -> Vec<Vec<f64>> {
        cells.chunks(n_p).map(|row| row.iter().map(f).collect()).collect()
    };
    Ok(SensitivitySurface {
        holding_costs: holding_costs.to_vec(),
        stockout_penalties: stockout_penalties.to_vec(),
        quantity: grid(|d| d.quantity),
        expected_cost: grid(|d| d.expected_cost),
    })
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n).map(|i| start + (end - start) * i as f64 / (n - 1) as f64).collect(),
    }
}

/// Settings for [`bootstrap_inventory`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    /// Number of resamples (at least [`MIN_RESAMPLES`]).
    pub n_resamples: usize,
    /// Interval coverage.
    pub conf_level: f64,
    /// Interval method.
    pub method: CiMethod,
    /// Base seed; resample `b` uses `seed + b`.
    pub seed: u64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self { n_resamples: MIN_RESAMPLES, conf_level: 0.95, method: CiMethod::Percentile, seed: 42 }
    }
}

/// Point estimate plus bootstrap interval for one statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapEstimate {
    /// Estimate on the original data.
    pub estimate: f64,
    /// Standard deviation of the bootstrap replicates.
    pub std_error: f64,
    /// Confidence interval.
    pub interval: Interval,
    /// BCa constants when the BCa method was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bca: Option<BcaDiagnostics>,
}

/// Bootstrap intervals for mean demand and the empirical `Q*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Historical observations used.
    pub n_observations: usize,
    /// Resamples drawn.
    pub n_resamples: usize,
    /// Interval coverage.
    pub conf_level: f64,
    /// Interval method.
    pub method: CiMethod,
    /// Cost parameters used for `Q*`.
    pub cost: CostScenario,
    /// Mean demand.
    pub mean_demand: BootstrapEstimate,
    /// Empirical optimal order quantity.
    pub optimal_quantity: BootstrapEstimate,
}

fn replicate_sd(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0)).sqrt()
}

fn estimate(
    theta_hat: f64,
    replicates: &[f64],
    jackknife: impl FnOnce() -> Vec<f64>,
    options: &BootstrapOptions,
) -> Result<BootstrapEstimate> {
    let (interval, bca) = match options.method {
        CiMethod::Percentile => (percentile_interval(replicates, options.conf_level)?, None),
        CiMethod::Bca => {
            let (interval, diag) = bca_interval(theta_hat, replicates, &jackknife(), options.conf_level)?;
            (interval, Some(diag))
        }
    };
    Ok(BootstrapEstimate { estimate: theta_hat, std_error: replicate_sd(replicates), interval, bca })
}

/// Resample historical demand with replacement and report intervals for the
/// mean and the critical-fractile `Q*`.
///
/// Resamples run in parallel; resample `b` draws from its own RNG seeded with
/// `seed + b`, so results are reproducible.
pub fn bootstrap_inventory(
    history: &[f64],
    cost: &CostScenario,
    options: &BootstrapOptions,
) -> Result<BootstrapReport> {
    cost.validate()?;
    if options.n_resamples < MIN_RESAMPLES {
        return Err(Error::Validation(format!(
            "n_resamples must be >= {}, got {}",
            MIN_RESAMPLES, options.n_resamples
        )));
    }
    let sample = DemandSample::new(history)?;
    let n = history.len();
    if n < 3 {
        return Err(Error::Validation("bootstrap needs at least 3 observations".into()));
    }
    let fractile = cost.critical_fractile();

    log::info!("bootstrapping {} observations with {} resamples", n, options.n_resamples);

    let replicates: Vec<(f64, f64)> = (0..options.n_resamples)
        .into_par_iter()
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(b as u64));
            let mut resample: Vec<f64> = (0..n).map(|_| history[rng.random_range(0..n)]).collect();
            let mean = resample.iter().sum::<f64>() / n as f64;
            resample.sort_by(f64::total_cmp);
            let k = ((fractile * n as f64).ceil() as usize).clamp(1, n);
            (mean, resample[k - 1])
        })
        .collect();
    let means: Vec<f64> = replicates.iter().map(|r| r.0).collect();
    let quantities: Vec<f64> = replicates.iter().map(|r| r.1).collect();

    let total: f64 = history.iter().sum();
    let mean_demand = estimate(
        sample.mean(),
        &means,
        || history.iter().map(|x| (total - x) / (n - 1) as f64).collect(),
        options,
    )?;
    let optimal = estimate(
        sample.order_statistic(fractile),
        &quantities,
        || {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let mut rest: Vec<f64> =
                        history.iter().enumerate().filter(|&(j, _)| j != i).map(|(_, &v)| v).collect();
                    let k = ((fractile * rest.len() as f64).ceil() as usize).clamp(1, rest.len());
                    *rest.select_nth_unstable_by(k - 1, f64::total_cmp).1
                })
                .collect()
        },
        options,
    )?;

    Ok(BootstrapReport {
        n_observations: n,
        n_resamples: options.n_resamples,
        conf_level: options.conf_level,
        method: options.method,
        cost: *cost,
        mean_demand,
        optimal_quantity: optimal,
    })
}
