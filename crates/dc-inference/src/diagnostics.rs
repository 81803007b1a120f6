//! Convergence diagnostics over a [`Trace`].
//!
//! - Split R-hat (Gelman et al.) and its rank-normalized, folded variant
//!   (Vehtari et al. 2021)
//! - Bulk and tail ESS from the Geyer initial monotone sequence
//! - Divergences, tree-depth saturation and E-BFMI per chain
//!
//! Threshold violations become [`ConvergenceWarning`]s in the report; nothing
//! here returns an error for a poorly mixed run.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap_ci::{inv_norm_cdf, quantile_linear_sorted};
use crate::chain::Trace;

/// Per-parameter convergence statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDiagnostics {
    /// Parameter name.
    pub name: String,
    /// Classic split R-hat, floored at 1.
    pub rhat: f64,
    /// Rank-normalized folded split R-hat.
    pub rhat_rank: f64,
    /// ESS of the raw draws.
    pub ess: f64,
    /// ESS of the rank-normalized draws.
    pub ess_bulk: f64,
    /// ESS of the 5% / 95% tail indicators.
    pub ess_tail: f64,
}

/// Which ESS estimate a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssKind {
    /// Rank-normalized bulk ESS.
    Bulk,
    /// Tail-indicator ESS.
    Tail,
}

/// Structured non-convergence annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConvergenceWarning {
    /// Split R-hat at or above the threshold.
    RhatHigh {
        /// Offending parameter.
        parameter: String,
        /// Observed R-hat.
        rhat: f64,
        /// Threshold.
        threshold: f64,
    },
    /// ESS below the required minimum.
    EssLow {
        /// Offending parameter.
        parameter: String,
        /// Bulk or tail.
        estimator: EssKind,
        /// Observed ESS.
        ess: f64,
        /// Required ESS.
        threshold: f64,
    },
    /// A chain recorded divergent transitions.
    DivergentChain {
        /// Chain index.
        chain: usize,
        /// Number of divergent post-warmup transitions.
        n_divergent: usize,
    },
    /// Too many transitions hit the maximum tree depth.
    TreeDepthSaturated {
        /// Fraction of saturated transitions.
        rate: f64,
    },
    /// Energy fraction of missing information below threshold.
    LowEbfmi {
        /// Chain index.
        chain: usize,
        /// Observed E-BFMI.
        ebfmi: f64,
        /// Threshold.
        threshold: f64,
    },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RhatHigh { parameter, rhat, threshold } => {
                write!(f, "{}: R-hat {:.4} >= {}", parameter, rhat, threshold)
            }
            Self::EssLow { parameter, estimator, ess, threshold } => {
                write!(f, "{}: {:?} ESS {:.1} < {:.0}", parameter, estimator, ess, threshold)
            }
            Self::DivergentChain { chain, n_divergent } => {
                write!(f, "chain {}: {} divergent transitions", chain, n_divergent)
            }
            Self::TreeDepthSaturated { rate } => {
                write!(f, "{:.1}% of transitions hit max tree depth", rate * 100.0)
            }
            Self::LowEbfmi { chain, ebfmi, threshold } => {
                write!(f, "chain {}: E-BFMI {:.3} < {}", chain, ebfmi, threshold)
            }
        }
    }
}

/// Diagnostics for a multi-chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Per-parameter statistics, layout order.
    pub parameters: Vec<ParameterDiagnostics>,
    /// Number of chains.
    pub n_chains: usize,
    /// Post-warmup draws per chain.
    pub draws_per_chain: usize,
    /// Divergent transitions per chain.
    pub divergences: Vec<usize>,
    /// Fraction of divergent transitions overall.
    pub divergence_rate: f64,
    /// Fraction of transitions that hit the configured maximum tree depth.
    pub max_treedepth_rate: f64,
    /// E-BFMI per chain.
    pub ebfmi: Vec<f64>,
    /// Mean acceptance statistic per chain.
    pub mean_accept_prob: Vec<f64>,
    /// Final step size per chain.
    pub step_sizes: Vec<f64>,
    /// Threshold violations.
    pub warnings: Vec<ConvergenceWarning>,
}

impl DiagnosticsReport {
    /// Largest split R-hat across parameters (NaN entries skipped).
    pub fn max_rhat(&self) -> f64 {
        self.parameters.iter().map(|p| p.rhat).filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest bulk ESS across parameters.
    pub fn min_ess_bulk(&self) -> f64 {
        self.parameters.iter().map(|p| p.ess_bulk).filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min)
    }

    /// Smallest tail ESS across parameters.
    pub fn min_ess_tail(&self) -> f64 {
        self.parameters.iter().map(|p| p.ess_tail).filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min)
    }

    /// Total divergent transitions.
    pub fn n_divergent(&self) -> usize {
        self.divergences.iter().sum()
    }

    /// Whether every parameter passed the R-hat and ESS checks.
    pub fn converged(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::RhatHigh { .. } | ConvergenceWarning::EssLow { .. }))
    }
}

/// Aggregated run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    /// All gates passed.
    Ok,
    /// Some gates emitted warnings.
    Warn,
    /// One or more gates failed.
    Fail,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityStatus::Ok => write!(f, "ok"),
            QualityStatus::Warn => write!(f, "warn"),
            QualityStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Thresholds for convergence warnings and quality gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGates {
    /// Below this many draws per chain, R-hat/ESS/E-BFMI gates only warn that they were skipped.
    pub min_draws_per_chain: usize,
    /// R-hat at or above this is a warning.
    pub max_rhat: f64,
    /// R-hat at or above this is a failure.
    pub max_rhat_fail: f64,
    /// ESS goal for the whole run.
    pub ess_target: f64,
    /// ESS soft floor per chain; the run needs `n_chains * floor` as well.
    pub ess_floor_per_chain: f64,
    /// ESS below this fraction of total draws is a failure.
    pub min_ess_frac_fail: f64,
    /// Divergence rate above this is a warning.
    pub max_divergence_rate_warn: f64,
    /// Divergence rate above this is a failure.
    pub max_divergence_rate_fail: f64,
    /// Max-treedepth rate above this is a warning.
    pub max_treedepth_rate_warn: f64,
    /// Max-treedepth rate above this is a failure.
    pub max_treedepth_rate_fail: f64,
    /// E-BFMI below this is a warning.
    pub min_ebfmi_warn: f64,
    /// E-BFMI below this is a failure.
    pub min_ebfmi_fail: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_draws_per_chain: 50,
            max_rhat: 1.01,
            max_rhat_fail: 1.10,
            ess_target: 1000.0,
            ess_floor_per_chain: 400.0,
            min_ess_frac_fail: 0.01,
            max_divergence_rate_warn: 0.0,
            max_divergence_rate_fail: 0.05,
            max_treedepth_rate_warn: 0.05,
            max_treedepth_rate_fail: 0.20,
            min_ebfmi_warn: 0.30,
            min_ebfmi_fail: 0.20,
        }
    }
}

impl QualityGates {
    /// ESS a parameter needs for a run with `n_chains` chains.
    pub fn ess_required(&self, n_chains: usize) -> f64 {
        self.ess_target.max(self.ess_floor_per_chain * n_chains as f64)
    }
}

/// Gate outcome with machine-readable codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Aggregated status.
    pub status: QualityStatus,
    /// Warning codes.
    pub warnings: Vec<String>,
    /// Failure codes.
    pub failures: Vec<String>,
    /// Whether R-hat/ESS/E-BFMI gates were enabled for this run.
    pub enabled: bool,
    /// Total post-warmup draws.
    pub total_draws: usize,
    /// Max split R-hat.
    pub max_rhat: f64,
    /// Min bulk ESS.
    pub min_ess_bulk: f64,
    /// Min tail ESS.
    pub min_ess_tail: f64,
    /// Min E-BFMI across chains.
    pub min_ebfmi: f64,
}

fn push_code(out: &mut Vec<String>, code: &str) {
    if !out.iter().any(|c| c == code) {
        out.push(code.to_string());
    }
}

/// Evaluate a report against quality gates.
pub fn quality_summary(report: &DiagnosticsReport, gates: &QualityGates) -> QualitySummary {
    let total_draws = report.n_chains.saturating_mul(report.draws_per_chain);
    let enabled = report.draws_per_chain >= gates.min_draws_per_chain;

    let max_rhat = report.max_rhat();
    let min_ess_bulk = report.min_ess_bulk();
    let min_ess_tail = report.min_ess_tail();
    let min_ebfmi = report.ebfmi.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);

    let mut warnings = Vec::new();
    let mut failures = Vec::new();

    if !report.divergence_rate.is_finite() {
        push_code(&mut failures, "divergence_rate_not_finite");
    } else if report.divergence_rate > gates.max_divergence_rate_fail {
        push_code(&mut failures, "divergence_rate_high");
    } else if report.divergence_rate > gates.max_divergence_rate_warn {
        push_code(&mut warnings, "divergence_rate_high");
    }

    if report.max_treedepth_rate > gates.max_treedepth_rate_fail {
        push_code(&mut failures, "max_treedepth_rate_high");
    } else if report.max_treedepth_rate > gates.max_treedepth_rate_warn {
        push_code(&mut warnings, "max_treedepth_rate_high");
    }

    if !enabled {
        push_code(&mut warnings, "gates_disabled_short_run");
    } else {
        if !max_rhat.is_finite() {
            push_code(&mut failures, "rhat_missing");
        } else if max_rhat >= gates.max_rhat_fail {
            push_code(&mut failures, "rhat_high");
        } else if max_rhat >= gates.max_rhat {
            push_code(&mut warnings, "rhat_high");
        }

        let required = gates.ess_required(report.n_chains);
        let fail_thr = gates.min_ess_frac_fail * total_draws as f64;
        for (code, v) in [("ess_bulk_low", min_ess_bulk), ("ess_tail_low", min_ess_tail)] {
            if !v.is_finite() || v < fail_thr {
                push_code(&mut failures, code);
            } else if v < required {
                push_code(&mut warnings, code);
            }
        }

        if min_ebfmi.is_finite() {
            if min_ebfmi < gates.min_ebfmi_fail {
                push_code(&mut failures, "ebfmi_low");
            } else if min_ebfmi < gates.min_ebfmi_warn {
                push_code(&mut warnings, "ebfmi_low");
            }
        } else {
            push_code(&mut warnings, "ebfmi_not_finite");
        }
    }

    let status = if !failures.is_empty() {
        QualityStatus::Fail
    } else if !warnings.is_empty() {
        QualityStatus::Warn
    } else {
        QualityStatus::Ok
    };

    QualitySummary { status, warnings, failures, enabled, total_draws, max_rhat, min_ess_bulk, min_ess_tail, min_ebfmi }
}

/// Split each chain into halves truncated to a common length of at least `min_len`.
fn split_halves<'a>(chains: &[&'a [f64]], min_len: usize) -> Option<Vec<&'a [f64]>> {
    if chains.is_empty() {
        return None;
    }
    let mut halves = Vec::with_capacity(2 * chains.len());
    for c in chains {
        let mid = c.len() / 2;
        halves.push(&c[..mid]);
        halves.push(&c[mid..]);
    }
    let n = halves.iter().map(|h| h.len()).min().unwrap_or(0);
    if n < min_len {
        return None;
    }
    Some(halves.into_iter().map(|h| &h[..n]).collect())
}

fn mean_var(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, var)
}

/// Within-chain variance `W` and pooled estimate `var+` for equal-length chains.
fn variance_components(chains: &[&[f64]]) -> (f64, f64) {
    let m = chains.len() as f64;
    let n = chains[0].len() as f64;
    let stats: Vec<(f64, f64)> = chains.iter().map(|c| mean_var(c)).collect();
    let grand = stats.iter().map(|s| s.0).sum::<f64>() / m;
    let b = if chains.len() > 1 {
        n * stats.iter().map(|s| (s.0 - grand).powi(2)).sum::<f64>() / (m - 1.0)
    } else {
        0.0
    };
    let w = stats.iter().map(|s| s.1).sum::<f64>() / m;
    (w, (n - 1.0) / n * w + b / n)
}

/// Split R-hat for one parameter.
///
/// Each chain is halved, and `sqrt(var+ / W)` is reported with a floor of 1:
/// chains whose halves agree exactly yield 1.0. Returns NaN for fewer than 4
/// draws per chain, zero within-chain variance, or non-finite draws.
pub fn split_rhat(chains: &[&[f64]]) -> f64 {
    if chains.iter().any(|c| c.iter().any(|x| !x.is_finite())) {
        return f64::NAN;
    }
    let Some(halves) = split_halves(chains, 2) else {
        return f64::NAN;
    };
    let (w, var_plus) = variance_components(&halves);
    if !(w > 1e-30) {
        return f64::NAN;
    }
    (var_plus / w).sqrt().max(1.0)
}

/// Replace draws by normal scores of their pooled ranks (ties averaged).
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut idx: Vec<(usize, usize)> =
        chains.iter().enumerate().flat_map(|(c, xs)| (0..xs.len()).map(move |t| (c, t))).collect();
    idx.sort_by(|a, b| chains[a.0][a.1].total_cmp(&chains[b.0][b.1]));

    let s = idx.len() as f64;
    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let mut i = 0;
    while i < idx.len() {
        let x = chains[idx[i].0][idx[i].1];
        let mut j = i + 1;
        while j < idx.len() && chains[idx[j].0][idx[j].1] == x {
            j += 1;
        }
        // Average 1-based rank over the tie block, Blom offset.
        let rank = 0.5 * ((i + 1) as f64 + j as f64);
        let z = inv_norm_cdf((rank - 0.375) / (s + 0.25));
        for &(c, t) in &idx[i..j] {
            out[c][t] = z;
        }
        i = j;
    }
    out
}

fn as_slices(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    chains.iter().map(|c| c.as_slice()).collect()
}

fn pooled_median(chains: &[Vec<f64>]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flatten().copied().collect();
    all.sort_by(f64::total_cmp);
    quantile_linear_sorted(&all, 0.5)
}

/// Rank-normalized folded split R-hat: the larger of the R-hat of the
/// rank-normalized draws and of the rank-normalized distances from the median.
pub fn rank_normalized_rhat(chains: &[Vec<f64>]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4 || c.iter().any(|x| !x.is_finite())) {
        return f64::NAN;
    }
    let bulk = rank_normalize(chains);
    let med = pooled_median(chains);
    let folded: Vec<Vec<f64>> = chains.iter().map(|c| c.iter().map(|x| (x - med).abs()).collect()).collect();
    let tail = rank_normalize(&folded);
    split_rhat(&as_slices(&bulk)).max(split_rhat(&as_slices(&tail)))
}

/// Effective sample size from split chains.
///
/// Autocorrelations come from the pooled variogram,
/// `rho_t = 1 - V_t / (2 var+)`, and are truncated with Geyer's initial
/// monotone sequence on paired sums `rho_{2k} + rho_{2k+1}`. The result is
/// `total / tau` clamped to `[1, total]`; 0 when chains are too short.
pub fn ess(chains: &[&[f64]]) -> f64 {
    let Some(halves) = split_halves(chains, 4) else {
        return 0.0;
    };
    let n = halves[0].len();
    let total = (halves.len() * n) as f64;
    let (_, var_plus) = variance_components(&halves);
    if !(var_plus.is_finite() && var_plus > 1e-30) {
        return total;
    }

    let rho = |lag: usize| -> f64 {
        if lag == 0 {
            return 1.0;
        }
        let mut sum = 0.0;
        for h in &halves {
            sum += h.windows(lag + 1).map(|w| (w[0] - w[lag]).powi(2)).sum::<f64>();
        }
        let v = sum / (halves.len() * (n - lag)) as f64;
        (1.0 - v / (2.0 * var_plus)).clamp(-1.0, 1.0)
    };

    let mut sum_pairs = 0.0;
    let mut prev = f64::INFINITY;
    let mut k = 0;
    while 2 * k + 1 < n {
        let pair = rho(2 * k) + rho(2 * k + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev);
        sum_pairs += pair;
        prev = pair;
        k += 1;
    }
    let tau = -1.0 + 2.0 * sum_pairs;
    if !(tau.is_finite() && tau > 0.0) {
        return total;
    }
    (total / tau).clamp(1.0, total)
}

/// Bulk ESS: [`ess`] of the rank-normalized draws.
pub fn ess_bulk(chains: &[Vec<f64>]) -> f64 {
    ess(&as_slices(&rank_normalize(chains)))
}

/// Tail ESS: the smaller ESS of the indicators `x <= q05` and `x >= q95`.
pub fn ess_tail(chains: &[Vec<f64>]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flatten().copied().collect();
    if all.is_empty() {
        return 0.0;
    }
    all.sort_by(f64::total_cmp);
    let q05 = quantile_linear_sorted(&all, 0.05);
    let q95 = quantile_linear_sorted(&all, 0.95);
    let indicator = |keep: &dyn Fn(f64) -> bool| -> Vec<Vec<f64>> {
        chains.iter().map(|c| c.iter().map(|&x| if keep(x) { 1.0 } else { 0.0 }).collect()).collect()
    };
    let lower = indicator(&|x| x <= q05);
    let upper = indicator(&|x| x >= q95);
    ess(&as_slices(&lower)).min(ess(&as_slices(&upper)))
}

/// E-BFMI for one chain: `mean((E_t - E_{t-1})^2) / var(E)`.
pub fn ebfmi(energies: &[f64]) -> f64 {
    if energies.len() < 4 {
        return f64::NAN;
    }
    let (_, var) = mean_var(energies);
    if var < 1e-30 {
        return f64::NAN;
    }
    let msd = energies.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>() / (energies.len() - 1) as f64;
    msd / var
}

/// Diagnose a trace against the default [`QualityGates`].
pub fn diagnose(trace: &Trace) -> DiagnosticsReport {
    diagnose_with(trace, &QualityGates::default())
}

/// Diagnose a trace, emitting warnings for violations of `gates`.
pub fn diagnose_with(trace: &Trace, gates: &QualityGates) -> DiagnosticsReport {
    let parameters: Vec<ParameterDiagnostics> = (0..trace.param_names.len())
        .into_par_iter()
        .map(|p| {
            let draws = trace.param_draws(p);
            ParameterDiagnostics {
                name: trace.param_names[p].clone(),
                rhat: split_rhat(&as_slices(&draws)),
                rhat_rank: rank_normalized_rhat(&draws),
                ess: ess(&as_slices(&draws)),
                ess_bulk: ess_bulk(&draws),
                ess_tail: ess_tail(&draws),
            }
        })
        .collect();

    let total = trace.total_draws();
    let divergences: Vec<usize> = trace.chains.iter().map(|c| c.n_divergent()).collect();
    let n_saturated = trace
        .chains
        .iter()
        .map(|c| c.tree_depths.iter().filter(|&&d| d >= c.max_treedepth).count())
        .sum::<usize>();
    let rate = |k: usize| if total > 0 { k as f64 / total as f64 } else { 0.0 };

    let mut report = DiagnosticsReport {
        parameters,
        n_chains: trace.n_chains(),
        draws_per_chain: trace.n_samples,
        divergence_rate: rate(divergences.iter().sum()),
        divergences,
        max_treedepth_rate: rate(n_saturated),
        ebfmi: trace.chains.iter().map(|c| ebfmi(&c.energies)).collect(),
        mean_accept_prob: trace
            .chains
            .iter()
            .map(|c| c.accept_probs.iter().sum::<f64>() / c.accept_probs.len().max(1) as f64)
            .collect(),
        step_sizes: trace.chains.iter().map(|c| c.step_size).collect(),
        warnings: Vec::new(),
    };
    report.warnings = convergence_warnings(&report, gates);
    for w in &report.warnings {
        log::warn!("{}", w);
    }
    report
}

fn convergence_warnings(report: &DiagnosticsReport, gates: &QualityGates) -> Vec<ConvergenceWarning> {
    let mut out = Vec::new();
    let required = gates.ess_required(report.n_chains);
    for p in &report.parameters {
        if !p.rhat.is_finite() || p.rhat >= gates.max_rhat {
            out.push(ConvergenceWarning::RhatHigh {
                parameter: p.name.clone(),
                rhat: p.rhat,
                threshold: gates.max_rhat,
            });
        }
        for (estimator, v) in [(EssKind::Bulk, p.ess_bulk), (EssKind::Tail, p.ess_tail)] {
            if v < required {
                out.push(ConvergenceWarning::EssLow {
                    parameter: p.name.clone(),
                    estimator,
                    ess: v,
                    threshold: required,
                });
            }
        }
    }
    for (chain, &n_divergent) in report.divergences.iter().enumerate() {
        if n_divergent > 0 {
            out.push(ConvergenceWarning::DivergentChain { chain, n_divergent });
        }
    }
    if report.max_treedepth_rate > gates.max_treedepth_rate_warn {
        out.push(ConvergenceWarning::TreeDepthSaturated { rate: report.max_treedepth_rate });
    }
    for (chain, &e) in report.ebfmi.iter().enumerate() {
        if e.is_finite() && e < gates.min_ebfmi_warn {
            out.push(ConvergenceWarning::LowEbfmi { chain, ebfmi: e, threshold: gates.min_ebfmi_warn });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn iid(seed: u64, n: usize, mean: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(mean, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    fn random_walk(seed: u64, n: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 0.01).unwrap();
        let mut x = 0.0;
        (0..n)
            .map(|_| {
                x += normal.sample(&mut rng);
                x
            })
            .collect()
    }

    fn chain_from(values: Vec<f64>, depths: Vec<usize>, max_treedepth: usize) -> Chain {
        let n = values.len();
        Chain {
            draws_unconstrained: values.iter().map(|&v| vec![v]).collect(),
            draws_constrained: values.iter().map(|&v| vec![v]).collect(),
            divergences: (0..n).map(|i| i == 0).collect(),
            tree_depths: depths,
            accept_probs: vec![0.9; n],
            energies: iid(99, n, 0.0),
            n_leapfrog: vec![3; n],
            max_treedepth,
            step_size: 0.5,
            mass_diag: vec![1.0],
        }
    }

    #[test]
    fn test_split_rhat_identical_chains_is_exactly_one() {
        let c: Vec<f64> = (0..200).map(|i| (i % 4) as f64).collect();
        assert_eq!(split_rhat(&[&c, &c]), 1.0);
    }

    #[test]
    fn test_split_rhat_mean_shift_detected() {
        let a = iid(1, 500, 0.0);
        let b = iid(2, 500, 1.0);
        assert!(split_rhat(&[&a, &b]) > 1.01);
        let far: Vec<f64> = b.iter().map(|x| x + 100.0).collect();
        assert!(split_rhat(&[&a, &far]) > 1.5);
    }

    #[test]
    fn test_split_rhat_well_mixed() {
        let a = iid(1, 1000, 0.0);
        let b = iid(2, 1000, 0.0);
        let r = split_rhat(&[&a, &b]);
        assert!((1.0..1.01).contains(&r), "rhat {}", r);
    }

    #[test]
    fn test_split_rhat_degenerate_is_nan() {
        assert!(split_rhat(&[&[1.0, 2.0, 3.0]]).is_nan());
        assert!(split_rhat(&[&[1.0; 10]]).is_nan());
        assert!(split_rhat(&[&[1.0, f64::NAN, 3.0, 4.0]]).is_nan());
    }

    #[test]
    fn test_rank_rhat_flags_shifted_chains() {
        assert!(rank_normalized_rhat(&[iid(1, 500, 0.0), iid(2, 500, 0.0)]) < 1.05);
        let a: Vec<f64> = (0..200).map(|i| i as f64 * 0.01).collect();
        let b: Vec<f64> = (0..200).map(|i| 10.0 + i as f64 * 0.01).collect();
        assert!(rank_normalized_rhat(&[a, b]) > 1.5);
    }

    #[test]
    fn test_ess_iid_close_to_n() {
        let c = iid(42, 1000, 0.0);
        let e = ess(&[&c]);
        assert!(e > 700.0, "ess {}", e);
        assert!(ess_bulk(&[c.clone()]) > 700.0);
        assert!(ess_tail(&[c]) > 500.0);
    }

    #[test]
    fn test_ess_random_walk_is_small() {
        let c = random_walk(42, 1000);
        assert!(ess(&[&c]) < 100.0);
        assert!(ess_tail(&[c]) < 500.0);
    }

    #[test]
    fn test_ess_short_and_constant() {
        assert_eq!(ess(&[&[1.0, 2.0, 3.0]]), 0.0);
        assert_eq!(ess(&[&[1.0; 100]]), 100.0);
    }

    #[test]
    fn test_ebfmi_iid_energy_is_large() {
        let v = ebfmi(&iid(123, 1000, 0.0));
        assert!(v > 1.5 && v < 2.5, "ebfmi {}", v);
        assert!(ebfmi(&[1.0, 2.0]).is_nan());
    }

    #[test]
    fn test_diagnose_counts_run_level_annotations() {
        let trace = Trace {
            param_names: vec!["x".into()],
            n_warmup: 10,
            n_samples: 5,
            target_accept: 0.9,
            seed: 0,
            chains: vec![chain_from(vec![0.1, -0.4, 0.3, 0.9, -1.2], vec![0, 1, 2, 3, 3], 3)],
        };
        let report = diagnose(&trace);
        assert_eq!(report.divergences, vec![1]);
        assert!((report.divergence_rate - 0.2).abs() < 1e-12);
        assert!((report.max_treedepth_rate - 0.4).abs() < 1e-12);
        assert!(report.warnings.contains(&ConvergenceWarning::DivergentChain { chain: 0, n_divergent: 1 }));
        assert!(report.warnings.iter().any(|w| matches!(w, ConvergenceWarning::TreeDepthSaturated { .. })));

        let q = quality_summary(&report, &QualityGates::default());
        assert_eq!(q.status, QualityStatus::Fail);
        assert!(q.failures.contains(&"divergence_rate_high".to_string()));
        assert!(q.warnings.contains(&"gates_disabled_short_run".to_string()));
    }

    #[test]
    fn test_warnings_name_offending_parameter() {
        let good = iid(5, 2000, 0.0);
        let bad = random_walk(6, 2000);
        let mk = |vals: &[f64], other: &[f64]| -> Vec<Vec<f64>> {
            vals.iter().zip(other).map(|(&a, &b)| vec![a, b]).collect()
        };
        let mut c0 = chain_from(good.clone(), vec![2; 2000], 10);
        c0.draws_constrained = mk(&good, &bad);
        c0.draws_unconstrained = c0.draws_constrained.clone();
        c0.divergences = vec![false; 2000];
        c0.mass_diag = vec![1.0, 1.0];
        let good2 = iid(7, 2000, 0.0);
        let bad2: Vec<f64> = random_walk(8, 2000).iter().map(|x| x + 5.0).collect();
        let mut c1 = c0.clone();
        c1.draws_constrained = mk(&good2, &bad2);
        c1.draws_unconstrained = c1.draws_constrained.clone();

        let trace = Trace {
            param_names: vec!["good".into(), "bad".into()],
            n_warmup: 100,
            n_samples: 2000,
            target_accept: 0.9,
            seed: 0,
            chains: vec![c0, c1],
        };
        let report = diagnose(&trace);
        let offending: Vec<&str> = report
            .warnings
            .iter()
            .filter_map(|w| match w {
                ConvergenceWarning::RhatHigh { parameter, .. } => Some(parameter.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(offending, vec!["bad"]);
        assert!(!report.converged());
        assert_eq!(quality_summary(&report, &QualityGates::default()).status, QualityStatus::Fail);
    }

    #[test]
    fn test_quality_ok_for_clean_report() {
        let params = vec![ParameterDiagnostics {
            name: "x".into(),
            rhat: 1.001,
            rhat_rank: 1.002,
            ess: 3000.0,
            ess_bulk: 3000.0,
            ess_tail: 2500.0,
        }];
        let report = DiagnosticsReport {
            parameters: params,
            n_chains: 2,
            draws_per_chain: 2000,
            divergences: vec![0, 0],
            divergence_rate: 0.0,
            max_treedepth_rate: 0.0,
            ebfmi: vec![0.9, 1.1],
            mean_accept_prob: vec![0.9, 0.9],
            step_sizes: vec![0.3, 0.3],
            warnings: vec![],
        };
        let q = quality_summary(&report, &QualityGates::default());
        assert_eq!(q.status, QualityStatus::Ok, "{:?}", q);
        assert_eq!(q.total_draws, 4000);
    }
}
