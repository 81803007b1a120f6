//! Pairwise category comparisons from posterior draws.

use dc_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::bootstrap_ci::{Interval, quantile_linear_sorted};
use crate::chain::Trace;
use crate::layout::{ParameterLayout, ParameterRef};

/// Default credible level for difference intervals.
pub const DEFAULT_CREDIBLE_LEVEL: f64 = 0.95;

/// Posterior comparison of one parameter between two categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Parameter compared (`level`, `trend`, `z_weekly`, ...).
    pub parameter: String,
    /// First category.
    pub category_a: String,
    /// Second category.
    pub category_b: String,
    /// Fraction of draws with `a > b`.
    pub prob_a_greater: f64,
    /// Posterior mean of `a - b`.
    pub mean_difference: f64,
    /// Posterior sd of `a - b`.
    pub sd_difference: f64,
    /// Equal-tailed credible interval of `a - b`.
    pub difference_ci: Interval,
    /// Credible level of `difference_ci`.
    pub credible_level: f64,
    /// Paired draws used.
    pub n_draws: usize,
}

fn resolve_pair(
    layout: &ParameterLayout,
    a: &str,
    b: &str,
    parameter: &str,
) -> Result<(ParameterRef, ParameterRef)> {
    if a == b {
        return Err(Error::Validation(format!("cannot compare category '{}' with itself", a)));
    }
    Ok((layout.category_parameter(a, parameter)?, layout.category_parameter(b, parameter)?))
}

/// Compare `parameter` between categories `a` and `b` at the 95% level.
pub fn compare(trace: &Trace, layout: &ParameterLayout, a: &str, b: &str, parameter: &str) -> Result<Comparison> {
    compare_at(trace, layout, a, b, parameter, DEFAULT_CREDIBLE_LEVEL)
}

/// Compare `parameter` between categories `a` and `b` at `credible_level`.
pub fn compare_at(
    trace: &Trace,
    layout: &ParameterLayout,
    a: &str,
    b: &str,
    parameter: &str,
    credible_level: f64,
) -> Result<Comparison> {
    if !(credible_level > 0.0 && credible_level < 1.0) {
        return Err(Error::Validation(format!("credible_level must be in (0,1), got {}", credible_level)));
    }
    trace.validate()?;
    trace.check_layout(&layout.names())?;
    let (ra, rb) = resolve_pair(layout, a, b, parameter)?;

    let mut diffs: Vec<f64> = trace.draws().map(|d| layout.extract(d, ra) - layout.extract(d, rb)).collect();
    let n = diffs.len();
    let prob_a_greater = diffs.iter().filter(|&&d| d > 0.0).count() as f64 / n as f64;
    let mean = diffs.iter().sum::<f64>() / n as f64;
    let sd = if n > 1 {
        (diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    diffs.sort_by(f64::total_cmp);
    let tail = 0.5 * (1.0 - credible_level);

    Ok(Comparison {
        parameter: parameter.to_string(),
        category_a: a.to_string(),
        category_b: b.to_string(),
        prob_a_greater,
        mean_difference: mean,
        sd_difference: sd,
        difference_ci: Interval {
            lower: quantile_linear_sorted(&diffs, tail),
            upper: quantile_linear_sorted(&diffs, 1.0 - tail),
        },
        credible_level,
        n_draws: n,
    })
}

/// Every unordered category pair `(i, j)`, `i < j`, in layout order, at `credible_level`.
pub fn compare_all(
    trace: &Trace,
    layout: &ParameterLayout,
    parameter: &str,
    credible_level: f64,
) -> Result<Vec<Comparison>> {
    let cats = layout.categories();
    let mut out = Vec::with_capacity(cats.len() * cats.len().saturating_sub(1) / 2);
    for i in 0..cats.len() {
        for j in (i + 1)..cats.len() {
            out.push(compare_at(trace, layout, &cats[i], &cats[j], parameter, credible_level)?);
        }
    }
    Ok(out)
}
