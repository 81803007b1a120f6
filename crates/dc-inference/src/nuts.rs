//! No-U-Turn Sampler (NUTS).
//!
//! Slice-based NUTS with recursive tree doubling (Hoffman & Gelman 2014,
//! Algorithm 3): proposals are selected uniformly among states inside the
//! slice, with biased progressive sampling at the top level.

use dc_core::traits::LogDensityModel;
use dc_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::adapt::{WindowedAdaptation, find_reasonable_step_size};
use crate::chain::{CancelToken, Chain};
use crate::hmc::{HmcState, LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;

/// How each chain picks its starting point before jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// The model's deterministic data-informed start.
    #[default]
    Fixed,
    /// A fresh draw from the prior.
    Prior,
}

/// NUTS sampler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutsConfig {
    /// Maximum tree depth (default 10).
    pub max_treedepth: usize,
    /// Target acceptance probability (default 0.9).
    pub target_accept: f64,
    /// Stddev of the Gaussian jitter added to the unconstrained start.
    pub init_jitter: f64,
    /// Starting-point strategy.
    pub init: InitStrategy,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self { max_treedepth: 10, target_accept: 0.9, init_jitter: 0.5, init: InitStrategy::Fixed }
    }
}

impl NutsConfig {
    /// Reject out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Validation(format!(
                "target_accept must be in (0,1), got {}",
                self.target_accept
            )));
        }
        if self.max_treedepth == 0 || self.max_treedepth > 30 {
            return Err(Error::Validation(format!(
                "max_treedepth must be in 1..=30, got {}",
                self.max_treedepth
            )));
        }
        if !self.init_jitter.is_finite() || self.init_jitter < 0.0 {
            return Err(Error::Validation(format!(
                "init_jitter must be finite and >= 0, got {}",
                self.init_jitter
            )));
        }
        Ok(())
    }
}

/// Result of one NUTS transition.
#[derive(Debug, Clone)]
pub(crate) struct NutsTransition {
    pub q: Vec<f64>,
    pub potential: f64,
    pub grad_potential: Vec<f64>,
    pub depth: usize,
    pub divergent: bool,
    pub accept_prob: f64,
    pub energy: f64,
    pub n_leapfrog: usize,
}

/// Internal tree node for NUTS tree-building.
struct NutsTree {
    left: HmcState,
    right: HmcState,
    proposal: HmcState,
    log_sum_weight: f64,
    n_leapfrog: usize,
    divergent: bool,
    turning: bool,
    sum_accept_prob: f64,
}

impl NutsTree {
    fn edge(&self, direction: i32) -> &HmcState {
        if direction > 0 { &self.right } else { &self.left }
    }
}

/// Energy error above which a trajectory is declared divergent.
pub const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// No-U-turn criterion on the span `left..right`.
fn is_turning(left: &HmcState, right: &HmcState, inv_mass: &[f64]) -> bool {
    let mut dot_left = 0.0;
    let mut dot_right = 0.0;
    for i in 0..inv_mass.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * left.p[i] * inv_mass[i];
        dot_right += dq * right.p[i] * inv_mass[i];
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY { f64::NEG_INFINITY } else { max + ((a - max).exp() + (b - max).exp()).ln() }
}

/// One leapfrog step. A failed or non-finite step becomes a divergent leaf.
fn build_leaf<M: LogDensityModel + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    state: &HmcState,
    direction: i32,
    log_u: f64,
    h0: f64,
) -> NutsTree {
    let mut next = state.clone();
    let stepped = integrator.step_dir(&mut next, direction).is_ok();

    let h = next.hamiltonian(integrator.metric());
    let energy_error = h - h0;
    let divergent = !stepped || !(energy_error <= DIVERGENCE_THRESHOLD);
    if divergent {
        return NutsTree {
            left: state.clone(),
            right: state.clone(),
            proposal: state.clone(),
            log_sum_weight: f64::NEG_INFINITY,
            n_leapfrog: 1,
            divergent: true,
            turning: false,
            sum_accept_prob: 0.0,
        };
    }

    let log_weight = if log_u <= -h { 0.0 } else { f64::NEG_INFINITY };
    NutsTree {
        left: next.clone(),
        right: next.clone(),
        proposal: next,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        divergent: false,
        turning: false,
        sum_accept_prob: (-energy_error).exp().min(1.0),
    }
}

/// Recursively build a balanced binary tree of `2^depth` leaves.
fn build_tree<M: LogDensityModel + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    state: &HmcState,
    depth: usize,
    direction: i32,
    log_u: f64,
    h0: f64,
    rng: &mut R,
) -> NutsTree {
    if depth == 0 {
        return build_leaf(integrator, state, direction, log_u, h0);
    }

    let mut inner = build_tree(integrator, state, depth - 1, direction, log_u, h0, rng);
    if inner.divergent || inner.turning {
        return inner;
    }

    let outer = build_tree(integrator, inner.edge(direction), depth - 1, direction, log_u, h0, rng);

    let merged = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    if merged > f64::NEG_INFINITY {
        let u: f64 = rng.random();
        if u < (outer.log_sum_weight - merged).exp() {
            inner.proposal = outer.proposal;
        }
    }
    inner.log_sum_weight = merged;
    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept_prob += outer.sum_accept_prob;
    inner.divergent |= outer.divergent;
    inner.turning |= outer.turning;
    if direction > 0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    if !inner.divergent {
        inner.turning |= is_turning(&inner.left, &inner.right, integrator.metric().inv_mass());
    }
    inner
}

/// Run one NUTS transition from the given state.
pub(crate) fn nuts_transition<M: LogDensityModel + ?Sized, R: Rng + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    current: &HmcState,
    max_treedepth: usize,
    rng: &mut R,
) -> NutsTransition {
    let metric = integrator.metric();
    let mut start = current.clone();
    start.p = metric.sample_momentum(rng);
    let h0 = start.hamiltonian(metric);
    // Slice variable: log u, u ~ Uniform(0, exp(-H0)).
    let u: f64 = rng.random();
    let log_u = u.ln() - h0;

    let mut tree = NutsTree {
        left: start.clone(),
        right: start.clone(),
        proposal: start,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        divergent: false,
        turning: false,
        sum_accept_prob: 0.0,
    };

    let mut depth = 0;
    while depth < max_treedepth {
        let direction: i32 = if rng.random::<bool>() { 1 } else { -1 };
        let subtree = build_tree(integrator, tree.edge(direction), depth, direction, log_u, h0, rng);
        depth += 1;

        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        if subtree.divergent {
            tree.divergent = true;
            break;
        }
        if subtree.turning {
            tree.turning = true;
            break;
        }

        // Biased progressive sampling: favour the newer half.
        let accept = (subtree.log_sum_weight - tree.log_sum_weight).exp().min(1.0);
        let u: f64 = rng.random();
        if u < accept {
            tree.proposal = subtree.proposal;
        }
        tree.log_sum_weight = log_sum_exp(tree.log_sum_weight, subtree.log_sum_weight);
        if direction > 0 {
            tree.right = subtree.right;
        } else {
            tree.left = subtree.left;
        }
        if is_turning(&tree.left, &tree.right, metric.inv_mass()) {
            tree.turning = true;
            break;
        }
    }

    let accept_prob = tree.sum_accept_prob / tree.n_leapfrog.max(1) as f64;
    // E-BFMI reads the Hamiltonian of the draw that was kept.
    let energy = tree.proposal.hamiltonian(metric);
    NutsTransition {
        q: tree.proposal.q,
        potential: tree.proposal.potential,
        grad_potential: tree.proposal.grad_potential,
        depth,
        divergent: tree.divergent,
        accept_prob,
        energy,
        n_leapfrog: tree.n_leapfrog,
    }
}

/// Maximum attempts at finding a finite jittered/prior starting point.
const MAX_INIT_ATTEMPTS: usize = 100;

/// Choose a chain's unconstrained starting point and return it with the
/// chain RNG positioned after initialization.
///
/// Fails with `NumericalInstability` if the log-density is not finite at the
/// base starting point (fixed strategy) or at every prior draw tried.
pub(crate) fn initial_point<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    seed: u64,
    config: &NutsConfig,
) -> Result<(Vec<f64>, StdRng)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let model = posterior.model();
    let finite_at = |z: &[f64]| {
        matches!(posterior.logpdf_and_grad_unconstrained(z),
            Ok((lp, g)) if lp.is_finite() && g.iter().all(|x| x.is_finite()))
    };

    let base = match config.init {
        InitStrategy::Fixed => {
            let z = posterior.to_unconstrained(&model.parameter_init());
            if !finite_at(&z) {
                return Err(Error::NumericalInstability(
                    "log-density is not finite at the initial point".into(),
                ));
            }
            z
        }
        InitStrategy::Prior => {
            let mut found = None;
            for _ in 0..MAX_INIT_ATTEMPTS {
                let z = posterior.to_unconstrained(&model.sample_prior(&mut rng));
                if finite_at(&z) {
                    found = Some(z);
                    break;
                }
            }
            found.ok_or_else(|| {
                Error::NumericalInstability(format!(
                    "log-density not finite at any of {} prior draws",
                    MAX_INIT_ATTEMPTS
                ))
            })?
        }
    };

    if config.init_jitter > 0.0 {
        for _ in 0..MAX_INIT_ATTEMPTS {
            let z: Vec<f64> = base
                .iter()
                .map(|&zi| {
                    let e: f64 = StandardNormal.sample(&mut rng);
                    zi + config.init_jitter * e
                })
                .collect();
            if finite_at(&z) {
                return Ok((z, rng));
            }
        }
        log::debug!("no finite jittered start found; using the unjittered point");
    }
    Ok((base, rng))
}

/// Run NUTS sampling for one chain.
///
/// `seed` drives both initialization and transitions. Checks `cancel`
/// before every iteration.
pub fn sample_nuts<M: LogDensityModel + ?Sized>(
    model: &M,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: &NutsConfig,
    cancel: &CancelToken,
) -> Result<Chain> {
    let posterior = Posterior::new(model)?;
    let (z_init, rng) = initial_point(&posterior, seed, config)?;
    sample_nuts_from(&posterior, z_init, rng, n_warmup, n_samples, config, cancel)
}

/// Run one chain from a prepared starting point.
pub(crate) fn sample_nuts_from<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    z_init: Vec<f64>,
    mut rng: StdRng,
    n_warmup: usize,
    n_samples: usize,
    config: &NutsConfig,
    cancel: &CancelToken,
) -> Result<Chain> {
    let dim = posterior.dim();
    let metric = Metric::identity(dim);
    let init_eps = find_reasonable_step_size(posterior, &z_init, &metric);
    let mut adaptation = WindowedAdaptation::new(dim, n_warmup, config.target_accept, init_eps);

    let integrator = LeapfrogIntegrator::new(posterior, init_eps, metric);
    let mut state = integrator.init_state(z_init)?;

    for i in 0..n_warmup {
        cancel.check()?;
        let warmup =
            LeapfrogIntegrator::new(posterior, adaptation.step_size(), adaptation.metric().clone());
        let t = nuts_transition(&warmup, &state, config.max_treedepth, &mut rng);
        state.q = t.q;
        state.potential = t.potential;
        state.grad_potential = t.grad_potential;

        if adaptation.update(i, &state.q, t.accept_prob) {
            let eps = find_reasonable_step_size(posterior, &state.q, adaptation.metric());
            adaptation.restart_step_size(eps);
        }
    }

    let step_size = adaptation.adapted_step_size();
    let metric = adaptation.metric().clone();
    let sampler = LeapfrogIntegrator::new(posterior, step_size, metric.clone());

    let mut chain = Chain::with_capacity(n_samples, config.max_treedepth, step_size, metric.mass_diag());
    for _ in 0..n_samples {
        cancel.check()?;
        let t = nuts_transition(&sampler, &state, config.max_treedepth, &mut rng);
        state.q = t.q;
        state.potential = t.potential;
        state.grad_potential = t.grad_potential;

        chain.draws_constrained.push(posterior.to_constrained(&state.q));
        chain.draws_unconstrained.push(state.q.clone());
        chain.divergences.push(t.divergent);
        chain.tree_depths.push(t.depth);
        chain.accept_probs.push(t.accept_prob);
        chain.energies.push(t.energy);
        chain.n_leapfrog.push(t.n_leapfrog);
    }

    Ok(chain)
}
