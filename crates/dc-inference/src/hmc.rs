//! Leapfrog integration over the unconstrained posterior, plus a
//! fixed-length HMC kernel used to check the integrator.
//!
//! [`crate::nuts`] drives the same integrator with a dynamic trajectory.

use crate::posterior::Posterior;
use dc_core::traits::LogDensityModel;
use dc_core::{Error, Result};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Diagonal Euclidean metric, held as the inverse mass diagonal `M^{-1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    inv_mass: Vec<f64>,
}

impl Metric {
    /// Unit metric.
    pub fn identity(dim: usize) -> Self {
        Self { inv_mass: vec![1.0; dim] }
    }

    /// Metric whose inverse mass is a vector of posterior variance estimates.
    pub fn from_inv_mass(inv_mass: Vec<f64>) -> Self {
        Self { inv_mass }
    }

    /// `diag(M^{-1})`.
    pub fn inv_mass(&self) -> &[f64] {
        &self.inv_mass
    }

    /// `diag(M)`, reported with each chain. Non-positive entries map to 1.
    pub fn mass_diag(&self) -> Vec<f64> {
        self.inv_mass.iter().map(|&w| if w > 0.0 { w.recip() } else { 1.0 }).collect()
    }

    /// `K(p) = p' M^{-1} p / 2`.
    pub fn kinetic_energy(&self, p: &[f64]) -> f64 {
        let twice: f64 = p.iter().zip(&self.inv_mass).map(|(&pi, &w)| w * pi * pi).sum();
        0.5 * twice
    }

    /// Fresh momentum `p ~ N(0, M)`.
    pub fn sample_momentum<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let mut p = Vec::with_capacity(self.inv_mass.len());
        for &w in &self.inv_mass {
            let scale = if w > 0.0 { w.recip().sqrt() } else { 1.0 };
            let z: f64 = StandardNormal.sample(rng);
            p.push(scale * z);
        }
        p
    }
}

/// `log_accept = H(current) - H(proposal)`; accepts when `ln u < log_accept`.
#[inline]
pub(crate) fn metropolis_accept(log_accept: f64, u: f64) -> bool {
    debug_assert!(u > 0.0 && u < 1.0);
    u.ln() < log_accept
}

/// A point in phase space with the potential and its gradient cached.
#[derive(Debug, Clone)]
pub struct HmcState {
    /// Unconstrained position.
    pub q: Vec<f64>,
    /// Momentum.
    pub p: Vec<f64>,
    /// `U(q) = -log p(q)` on the unconstrained scale.
    pub potential: f64,
    /// `dU/dq`.
    pub grad_potential: Vec<f64>,
}

impl HmcState {
    /// `H(q, p) = U(q) + K(p)`.
    pub fn hamiltonian(&self, metric: &Metric) -> f64 {
        self.potential + metric.kinetic_energy(&self.p)
    }

    fn kick(&mut self, half_eps: f64) {
        for (p, g) in self.p.iter_mut().zip(&self.grad_potential) {
            *p -= half_eps * g;
        }
    }

    fn drift(&mut self, eps: f64, inv_mass: &[f64]) {
        for ((q, p), w) in self.q.iter_mut().zip(&self.p).zip(inv_mass) {
            *q += eps * w * p;
        }
    }
}

/// Velocity-Verlet integrator bound to one posterior, step size and metric.
pub struct LeapfrogIntegrator<'a, 'b, M: LogDensityModel + ?Sized> {
    posterior: &'a Posterior<'b, M>,
    step_size: f64,
    metric: Metric,
}

impl<'a, 'b, M: LogDensityModel + ?Sized> LeapfrogIntegrator<'a, 'b, M> {
    /// Integrator with step size `step_size` under `metric`.
    pub fn new(posterior: &'a Posterior<'b, M>, step_size: f64, metric: Metric) -> Self {
        Self { posterior, step_size, metric }
    }

    /// Metric in use.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// State at `q` with zero momentum.
    ///
    /// Fails with `NumericalInstability` when the log-density or any gradient
    /// entry at `q` is not finite.
    pub fn init_state(&self, q: Vec<f64>) -> Result<HmcState> {
        let (lp, grad) = self.posterior.logpdf_and_grad_unconstrained(&q)?;
        if !lp.is_finite() || !grad.iter().all(|g| g.is_finite()) {
            return Err(Error::NumericalInstability(format!(
                "non-finite log-density or gradient at the starting point (lp = {})",
                lp
            )));
        }
        let dim = grad.len();
        Ok(HmcState { q, p: vec![0.0; dim], potential: -lp, grad_potential: grad.into_iter().map(|g| -g).collect() })
    }

    /// One leapfrog step of size `eps` (negative `eps` integrates backward).
    ///
    /// On error `state` is left part-way through the step and must be discarded.
    pub fn step_with_eps(&self, state: &mut HmcState, eps: f64) -> Result<()> {
        state.kick(0.5 * eps);
        state.drift(eps, &self.metric.inv_mass);
        let (lp, grad) = self.posterior.logpdf_and_grad_unconstrained(&state.q)?;
        state.potential = -lp;
        for (g_u, g) in state.grad_potential.iter_mut().zip(grad) {
            *g_u = -g;
        }
        state.kick(0.5 * eps);
        Ok(())
    }

    /// One step forward (`direction = 1`) or backward (`direction = -1`).
    pub fn step_dir(&self, state: &mut HmcState, direction: i32) -> Result<()> {
        debug_assert!(direction == 1 || direction == -1);
        self.step_with_eps(state, f64::from(direction) * self.step_size)
    }

    /// `n_steps` forward steps.
    pub fn integrate(&self, mut state: HmcState, n_steps: usize) -> Result<HmcState> {
        for _ in 0..n_steps {
            self.step_with_eps(&mut state, self.step_size)?;
        }
        Ok(state)
    }
}

/// HMC with a fixed number of leapfrog steps per transition.
pub struct StaticHmcSampler<'a, 'b, M: LogDensityModel + ?Sized> {
    integrator: LeapfrogIntegrator<'a, 'b, M>,
    n_steps: usize,
}

impl<'a, 'b, M: LogDensityModel + ?Sized> StaticHmcSampler<'a, 'b, M> {
    /// Kernel taking `n_steps` steps of size `step_size` per transition.
    pub fn new(posterior: &'a Posterior<'b, M>, step_size: f64, n_steps: usize, metric: Metric) -> Self {
        Self { integrator: LeapfrogIntegrator::new(posterior, step_size, metric), n_steps }
    }

    /// Integrator used by the kernel.
    pub fn integrator(&self) -> &LeapfrogIntegrator<'a, 'b, M> {
        &self.integrator
    }

    /// One Metropolis-corrected transition from `current`.
    ///
    /// Returns the next state and whether the proposal was accepted. A
    /// trajectory that leaves the support counts as a rejection.
    pub fn step<R: Rng + ?Sized>(&self, current: &HmcState, rng: &mut R) -> Result<(HmcState, bool)> {
        let metric = self.integrator.metric();
        let mut start = current.clone();
        start.p = metric.sample_momentum(rng);
        let h_start = start.hamiltonian(metric);

        let Ok(end) = self.integrator.integrate(start, self.n_steps) else {
            return Ok((current.clone(), false));
        };
        let log_accept = h_start - end.hamiltonian(metric);
        let u: f64 = rng.random();
        if log_accept.is_finite() && metropolis_accept(log_accept, u) {
            Ok((end, true))
        } else {
            Ok((current.clone(), false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HierarchicalDemandModel;
    use crate::test_support::{StdNormalModel, synthetic_data};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_leapfrog_energy_conservation() {
        let data = synthetic_data(2, 40, 1);
        let model = HierarchicalDemandModel::from_data(&data).unwrap();
        let posterior = Posterior::new(&model).unwrap();

        let n = model.dim();
        let metric = Metric::identity(n);
        let eps = 1e-4;
        let integrator = LeapfrogIntegrator::new(&posterior, eps, metric.clone());

        let z_init = posterior.to_unconstrained(&model.parameter_init());
        let mut state = integrator.init_state(z_init).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        state.p = metric.sample_momentum(&mut rng);

        let h_initial = state.hamiltonian(&metric);
        let state = integrator.integrate(state, 100).unwrap();
        let h_final = state.hamiltonian(&metric);

        let dh = (h_final - h_initial).abs();
        assert!(dh < 0.1, "Energy not conserved: H_init={}, H_final={}, dH={}", h_initial, h_final, dh);
    }

    #[test]
    fn test_leapfrog_is_reversible() {
        let model = StdNormalModel { dim: 3 };
        let posterior = Posterior::new(&model).unwrap();
        let integrator = LeapfrogIntegrator::new(&posterior, 0.2, Metric::identity(3));
        let mut state = integrator.init_state(vec![0.5, -1.0, 2.0]).unwrap();
        state.p = vec![0.3, 0.1, -0.7];
        let start = state.clone();

        for _ in 0..10 {
            integrator.step_dir(&mut state, 1).unwrap();
        }
        for p in state.p.iter_mut() {
            *p = -*p;
        }
        for _ in 0..10 {
            integrator.step_dir(&mut state, 1).unwrap();
        }
        for (a, b) in state.q.iter().zip(start.q.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_static_hmc_deterministic() {
        let model = StdNormalModel { dim: 4 };
        let posterior = Posterior::new(&model).unwrap();
        let sampler = StaticHmcSampler::new(&posterior, 0.1, 10, Metric::identity(4));
        let state = sampler.integrator().init_state(vec![0.1; 4]).unwrap();

        let mut rng1 = StdRng::seed_from_u64(123);
        let (s1, a1) = sampler.step(&state, &mut rng1).unwrap();
        let mut rng2 = StdRng::seed_from_u64(123);
        let (s2, a2) = sampler.step(&state, &mut rng2).unwrap();

        assert_eq!(a1, a2, "Acceptance should be deterministic");
        assert_eq!(s1.q, s2.q, "Samples should be deterministic");
    }

    #[test]
    fn test_static_hmc_recovers_standard_normal() {
        let model = StdNormalModel { dim: 2 };
        let posterior = Posterior::new(&model).unwrap();
        let sampler = StaticHmcSampler::new(&posterior, 0.3, 8, Metric::identity(2));
        let mut state = sampler.integrator().init_state(vec![2.0, -2.0]).unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut accepted = 0;
        let mut xs = Vec::new();
        for i in 0..3000 {
            let (next, acc) = sampler.step(&state, &mut rng).unwrap();
            state = next;
            accepted += acc as usize;
            if i >= 200 {
                xs.push(state.q[0]);
            }
        }
        let rate = accepted as f64 / 3000.0;
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!(rate > 0.8, "Acceptance rate too low: {}", rate);
        assert!(mean.abs() < 0.15, "mean={}", mean);
        assert!((var - 1.0).abs() < 0.2, "var={}", var);
    }

    #[test]
    fn test_init_state_rejects_non_finite() {
        let model = StdNormalModel { dim: 1 };
        let posterior = Posterior::new(&model).unwrap();
        let integrator = LeapfrogIntegrator::new(&posterior, 0.1, Metric::identity(1));
        assert!(matches!(
            integrator.init_state(vec![f64::NAN]),
            Err(Error::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_metric_mass_diag() {
        let m = Metric::from_inv_mass(vec![4.0, 0.25]);
        assert_eq!(m.mass_diag(), vec![0.25, 4.0]);
        assert_eq!(m.kinetic_energy(&[1.0, 2.0]), 0.5 * (4.0 + 1.0));
    }

    #[test]
    fn test_metropolis_accept_contract() {
        assert!(metropolis_accept(0.0, 0.5));
        assert!(metropolis_accept(1.0, 0.999999));
        assert!(metropolis_accept(-1.0, 0.1));
        assert!(!metropolis_accept(-1.0, 0.5));
    }
}
