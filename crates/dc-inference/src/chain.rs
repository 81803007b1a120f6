//! Chain storage, run metadata and the multi-chain runner.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dc_core::traits::LogDensityModel;
use dc_core::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bootstrap_ci::quantile_linear_sorted;
use crate::nuts::{NutsConfig, initial_point, sample_nuts_from};
use crate::posterior::Posterior;

/// Shared cancellation flag plus an optional wall-clock deadline.
///
/// Cloning shares the flag. Samplers check it between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is never cancelled unless [`Self::cancel`] is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { flag: Arc::default(), deadline: Some(Instant::now() + timeout) }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested or the deadline passed.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.flag.load(Ordering::Relaxed) {
            return Err(Error::Cancelled("cancel flag set".into()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Cancelled("deadline exceeded".into()));
        }
        Ok(())
    }
}

/// Raw MCMC chain from one NUTS run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// Draws in unconstrained space.
    pub draws_unconstrained: Vec<Vec<f64>>,
    /// Draws in constrained (model) space.
    pub draws_constrained: Vec<Vec<f64>>,
    /// Divergence flag per draw.
    pub divergences: Vec<bool>,
    /// Tree depth per draw.
    pub tree_depths: Vec<usize>,
    /// Acceptance statistic per draw.
    pub accept_probs: Vec<f64>,
    /// Hamiltonian at the start of each transition (after momentum refresh).
    pub energies: Vec<f64>,
    /// Leapfrog steps per draw.
    pub n_leapfrog: Vec<usize>,
    /// Configured maximum tree depth for this chain.
    pub max_treedepth: usize,
    /// Final adapted step size.
    pub step_size: f64,
    /// Final adapted mass matrix diagonal.
    pub mass_diag: Vec<f64>,
}

impl Chain {
    pub(crate) fn with_capacity(n: usize, max_treedepth: usize, step_size: f64, mass_diag: Vec<f64>) -> Self {
        Self {
            draws_unconstrained: Vec::with_capacity(n),
            draws_constrained: Vec::with_capacity(n),
            divergences: Vec::with_capacity(n),
            tree_depths: Vec::with_capacity(n),
            accept_probs: Vec::with_capacity(n),
            energies: Vec::with_capacity(n),
            n_leapfrog: Vec::with_capacity(n),
            max_treedepth,
            step_size,
            mass_diag,
        }
    }

    /// Number of post-warmup draws.
    pub fn len(&self) -> usize {
        self.draws_constrained.len()
    }

    /// Whether the chain holds no draws.
    pub fn is_empty(&self) -> bool {
        self.draws_constrained.is_empty()
    }

    /// Number of divergent transitions.
    pub fn n_divergent(&self) -> usize {
        self.divergences.iter().filter(|&&d| d).count()
    }
}

/// Posterior summary of one parameter across all chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Parameter name.
    pub name: String,
    /// Posterior mean.
    pub mean: f64,
    /// Posterior standard deviation.
    pub sd: f64,
    /// 2.5th percentile.
    pub q2_5: f64,
    /// Median.
    pub q50: f64,
    /// 97.5th percentile.
    pub q97_5: f64,
}

/// All chains of one run plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Parameter names (layout order).
    pub param_names: Vec<String>,
    /// Warm-up iterations per chain.
    pub n_warmup: usize,
    /// Post-warmup draws per chain.
    pub n_samples: usize,
    /// Target acceptance used for adaptation.
    pub target_accept: f64,
    /// Base seed; chain `i` used `seed + i`.
    pub seed: u64,
    /// Individual chains.
    pub chains: Vec<Chain>,
}

impl Trace {
    /// Check the structural invariants: at least one chain, equal non-empty
    /// lengths, and every draw matching the parameter layout.
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            return Err(Error::Validation("trace has no chains".into()));
        }
        if self.n_samples == 0 {
            return Err(Error::Validation("trace has no post-warmup draws".into()));
        }
        let dim = self.param_names.len();
        for (i, c) in self.chains.iter().enumerate() {
            let n = self.n_samples;
            let lens = [
                c.draws_constrained.len(),
                c.draws_unconstrained.len(),
                c.divergences.len(),
                c.tree_depths.len(),
                c.accept_probs.len(),
                c.energies.len(),
                c.n_leapfrog.len(),
            ];
            if lens.iter().any(|&l| l != n) {
                return Err(Error::Validation(format!(
                    "chain {} has inconsistent lengths {:?}, expected {}",
                    i, lens, n
                )));
            }
            let bad = c
                .draws_constrained
                .iter()
                .chain(c.draws_unconstrained.iter())
                .any(|d| d.len() != dim);
            if bad || c.mass_diag.len() != dim {
                return Err(Error::Validation(format!(
                    "chain {} has draws that do not match the {}-parameter layout",
                    i, dim
                )));
            }
        }
        Ok(())
    }

    /// Fail unless the trace was produced for a model with these parameter names.
    pub fn check_layout(&self, names: &[String]) -> Result<()> {
        if self.param_names != names {
            return Err(Error::Validation(format!(
                "trace layout ({} parameters) does not match the model ({} parameters)",
                self.param_names.len(),
                names.len()
            )));
        }
        Ok(())
    }

    /// Write as JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read a JSON trace and validate its structure.
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let trace: Trace = serde_json::from_reader(reader)?;
        trace.validate()?;
        Ok(trace)
    }

    /// Number of chains.
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Total number of post-warmup draws across all chains.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.len()).sum()
    }

    /// Index of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    /// All constrained draws, chain-major.
    pub fn draws(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.chains.iter().flat_map(|c| c.draws_constrained.iter().map(|d| d.as_slice()))
    }

    /// Draws for a single parameter, grouped by chain.
    pub fn param_draws(&self, param_idx: usize) -> Vec<Vec<f64>> {
        self.chains.iter().map(|c| c.draws_constrained.iter().map(|d| d[param_idx]).collect()).collect()
    }

    /// Mean of a parameter across all draws and chains.
    pub fn param_mean(&self, param_idx: usize) -> f64 {
        let n = self.total_draws().max(1) as f64;
        self.draws().map(|d| d[param_idx]).sum::<f64>() / n
    }

    /// Per-parameter mean, sd and 2.5/50/97.5 percentiles.
    pub fn summary(&self) -> Vec<ParameterSummary> {
        (0..self.param_names.len())
            .map(|i| {
                let mut xs: Vec<f64> = self.draws().map(|d| d[i]).collect();
                xs.sort_by(|a, b| a.total_cmp(b));
                let n = xs.len() as f64;
                let mean = xs.iter().sum::<f64>() / n;
                let var = if xs.len() > 1 {
                    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
                } else {
                    0.0
                };
                ParameterSummary {
                    name: self.param_names[i].clone(),
                    mean,
                    sd: var.sqrt(),
                    q2_5: quantile_linear_sorted(&xs, 0.025),
                    q50: quantile_linear_sorted(&xs, 0.5),
                    q97_5: quantile_linear_sorted(&xs, 0.975),
                }
            })
            .collect()
    }
}

/// Run NUTS on multiple chains in parallel via Rayon.
///
/// Each chain gets seed `seed + chain_id`. Every chain's starting point is
/// prepared (and its log-density checked) before any chain starts sampling.
/// If any chain fails or `cancel` fires, all chains are discarded.
pub fn sample_nuts_multichain<M: LogDensityModel + ?Sized>(
    model: &M,
    n_chains: usize,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: &NutsConfig,
    cancel: &CancelToken,
) -> Result<Trace> {
    if n_chains == 0 || n_warmup == 0 || n_samples == 0 {
        return Err(Error::Validation(format!(
            "chains, warmup and draws must be > 0 (got {}, {}, {})",
            n_chains, n_warmup, n_samples
        )));
    }
    config.validate()?;

    let posterior = Posterior::new(model)?;
    let starts = (0..n_chains)
        .map(|chain_id| initial_point(&posterior, seed.wrapping_add(chain_id as u64), config))
        .collect::<Result<Vec<_>>>()?;

    log::info!(
        "sampling {} chains ({} warm-up, {} draws, {} parameters)",
        n_chains,
        n_warmup,
        n_samples,
        posterior.dim()
    );

    let chains = starts
        .into_par_iter()
        .map(|(z_init, rng)| {
            sample_nuts_from(&posterior, z_init, rng, n_warmup, n_samples, config, cancel)
        })
        .collect::<Vec<Result<Chain>>>()
        .into_iter()
        .collect::<Result<Vec<Chain>>>()?;

    for (i, c) in chains.iter().enumerate() {
        let n_div = c.n_divergent();
        if n_div > 0 {
            log::warn!("chain {}: {} of {} post-warmup transitions diverged", i, n_div, c.len());
        }
        log::debug!("chain {}: step size {:.4}", i, c.step_size);
    }

    let trace = Trace {
        param_names: model.parameter_names(),
        n_warmup,
        n_samples,
        target_accept: config.target_accept,
        seed,
        chains,
    };
    trace.validate()?;
    Ok(trace)
}

/// Sample with default NUTS settings.
pub fn run<M: LogDensityModel + ?Sized>(
    model: &M,
    num_chains: usize,
    num_warmup: usize,
    num_draws: usize,
    seed: u64,
) -> Result<Trace> {
    sample_nuts_multichain(
        model,
        num_chains,
        num_warmup,
        num_draws,
        seed,
        &NutsConfig::default(),
        &CancelToken::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nuts::InitStrategy;
    use crate::test_support::StdNormalModel;

    fn config() -> NutsConfig {
        NutsConfig { max_treedepth: 8, target_accept: 0.8, init_jitter: 0.5, init: InitStrategy::Fixed }
    }

    #[test]
    fn test_multichain_deterministic() {
        let model = StdNormalModel { dim: 3 };
        let r1 = sample_nuts_multichain(&model, 3, 100, 50, 42, &config(), &CancelToken::new()).unwrap();
        let r2 = sample_nuts_multichain(&model, 3, 100, 50, 42, &config(), &CancelToken::new()).unwrap();
        assert_eq!(r1, r2, "Multi-chain runs should be bit-identical");
        assert_ne!(r1.chains[0].draws_constrained, r1.chains[1].draws_constrained);
    }

    #[test]
    fn test_multichain_basic_and_summary() {
        let model = StdNormalModel { dim: 2 };
        let trace = sample_nuts_multichain(&model, 2, 200, 400, 7, &config(), &CancelToken::new()).unwrap();
        assert_eq!(trace.n_chains(), 2);
        assert_eq!(trace.total_draws(), 800);
        assert_eq!(trace.param_index("x1"), Some(1));

        let summary = trace.summary();
        assert_eq!(summary.len(), 2);
        for s in &summary {
            assert!(s.mean.abs() < 0.25, "{:?}", s);
            assert!((s.sd - 1.0).abs() < 0.2, "{:?}", s);
            assert!(s.q2_5 < s.q50 && s.q50 < s.q97_5);
        }
    }

    #[test]
    fn test_zero_counts_rejected() {
        let model = StdNormalModel { dim: 1 };
        let c = CancelToken::new();
        assert!(matches!(sample_nuts_multichain(&model, 0, 10, 10, 0, &config(), &c), Err(Error::Validation(_))));
        assert!(sample_nuts_multichain(&model, 1, 0, 10, 0, &config(), &c).is_err());
        assert!(sample_nuts_multichain(&model, 1, 10, 0, 0, &config(), &c).is_err());
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let model = StdNormalModel { dim: 1 };
        let c = CancelToken::with_timeout(Duration::ZERO);
        assert!(c.is_cancelled());
        let err = sample_nuts_multichain(&model, 2, 10, 10, 0, &config(), &c).unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[test]
    fn test_trace_json_roundtrip_preserves_order() {
        let model = StdNormalModel { dim: 2 };
        let trace = sample_nuts_multichain(&model, 2, 20, 15, 3, &config(), &CancelToken::new()).unwrap();
        let dir = std::env::temp_dir().join(format!("dc_trace_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.json");
        trace.write_json(&path).unwrap();
        let back = Trace::read_json(&path).unwrap();
        assert_eq!(back, trace);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_rejects_ragged_trace() {
        let model = StdNormalModel { dim: 2 };
        let mut trace = sample_nuts_multichain(&model, 2, 20, 5, 3, &config(), &CancelToken::new()).unwrap();
        trace.chains[1].draws_constrained.pop();
        assert!(trace.validate().is_err());
        assert!(trace.check_layout(&["x0".to_string(), "x1".to_string()]).is_ok());
        assert!(trace.check_layout(&["x0".to_string()]).is_err());
    }
}
