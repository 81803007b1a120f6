//! Warm-up adaptation for NUTS: step size (dual averaging) and diagonal mass
//! matrix (Welford variance over doubling slow windows).

use dc_core::traits::LogDensityModel;

use crate::hmc::{LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;

const DA_GAMMA: f64 = 0.05;
const DA_T0: f64 = 10.0;
const DA_KAPPA: f64 = 0.75;

/// Step-size tuning by dual averaging (Hoffman & Gelman 2014, section 3.2).
///
/// Each update moves `log eps` so the running mean of
/// `target_accept - accept_prob` goes to zero.
#[derive(Debug, Clone)]
pub struct DualAveraging {
    target_accept: f64,
    /// `log(10 * eps0)`: iterates shrink toward it.
    shrink_target: f64,
    err_avg: f64,
    log_step: f64,
    log_step_avg: f64,
    iter: usize,
}

impl DualAveraging {
    /// Start from step size `init_eps`.
    pub fn new(target_accept: f64, init_eps: f64) -> Self {
        let log0 = init_eps.ln();
        Self {
            target_accept,
            shrink_target: (10.0 * init_eps).ln(),
            err_avg: 0.0,
            log_step: log0,
            log_step_avg: log0,
            iter: 0,
        }
    }

    /// Feed the acceptance statistic of one warm-up transition.
    pub fn update(&mut self, accept_prob: f64) {
        self.iter += 1;
        let t = self.iter as f64;
        let eta = 1.0 / (t + DA_T0);
        self.err_avg += eta * (self.target_accept - accept_prob - self.err_avg);
        self.log_step = self.shrink_target - t.sqrt() / DA_GAMMA * self.err_avg;
        let weight = t.powf(-DA_KAPPA);
        self.log_step_avg += weight * (self.log_step - self.log_step_avg);
    }

    /// Step size for the next warm-up transition.
    pub fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    /// Averaged step size, frozen in for sampling.
    pub fn adapted_step_size(&self) -> f64 {
        self.log_step_avg.exp()
    }

    /// Start over around `init_eps`.
    pub fn reset(&mut self, init_eps: f64) {
        *self = Self::new(self.target_accept, init_eps);
    }
}

/// Streaming per-coordinate mean and variance (Welford's update).
#[derive(Debug, Clone)]
pub struct WelfordVariance {
    n: usize,
    means: Vec<f64>,
    sq_dev: Vec<f64>,
}

impl WelfordVariance {
    /// Empty accumulator over `dim` coordinates.
    pub fn new(dim: usize) -> Self {
        Self { n: 0, means: vec![0.0; dim], sq_dev: vec![0.0; dim] }
    }

    /// Points accumulated since the last reset.
    pub fn count(&self) -> usize {
        self.n
    }

    /// Add one point.
    pub fn update(&mut self, x: &[f64]) {
        self.n += 1;
        let inv_n = 1.0 / self.n as f64;
        for ((m, s), &xi) in self.means.iter_mut().zip(self.sq_dev.iter_mut()).zip(x) {
            let before = xi - *m;
            *m += before * inv_n;
            *s += before * (xi - *m);
        }
    }

    /// Unbiased variances, floored at `1e-10`; all ones with fewer than two points.
    pub fn variance(&self) -> Vec<f64> {
        match self.n {
            0 | 1 => vec![1.0; self.means.len()],
            n => {
                let denom = (n - 1) as f64;
                self.sq_dev.iter().map(|&s| (s / denom).max(1e-10)).collect()
            }
        }
    }

    /// Variances shrunk toward `1e-3` with weight `5 / (n + 5)`.
    pub fn regularized_variance(&self) -> Vec<f64> {
        let n = self.n as f64;
        let w = n / (n + 5.0);
        self.variance().into_iter().map(|v| w * v + (1.0 - w) * 1e-3).collect()
    }

    /// Forget all points.
    pub fn reset(&mut self) {
        *self = Self::new(self.means.len());
    }
}

/// Warm-up schedule tuning the step size throughout and the mass matrix in
/// the slow windows.
///
/// ```text
/// n_warmup = 1000:
///   0..75      initial buffer: step size only
///   75..100    first slow window; metric re-estimated at its end
///   100..150   slow windows double in length
///   150..250
///   250..450
///   450..950   last slow window absorbs the remainder
///   950..1000  terminal buffer: step size only, metric fixed
/// ```
#[derive(Debug, Clone)]
pub struct WindowedAdaptation {
    step: DualAveraging,
    variance: WelfordVariance,
    windows: Vec<(usize, usize)>,
    window: usize,
    metric: Metric,
}

impl WindowedAdaptation {
    /// Schedule for `n_warmup` iterations over `dim` coordinates.
    pub fn new(dim: usize, n_warmup: usize, target_accept: f64, init_eps: f64) -> Self {
        Self {
            step: DualAveraging::new(target_accept, init_eps),
            variance: WelfordVariance::new(dim),
            windows: compute_windows(n_warmup),
            window: 0,
            metric: Metric::identity(dim),
        }
    }

    /// Record warm-up iteration `iter` (position `q`, acceptance `accept_prob`).
    ///
    /// Returns `true` when a slow window just closed and the metric changed;
    /// the caller then picks a new step size and passes it to
    /// [`Self::restart_step_size`].
    pub fn update(&mut self, iter: usize, q: &[f64], accept_prob: f64) -> bool {
        self.step.update(accept_prob);

        let Some(&(_, end)) = self.windows.get(self.window) else {
            return false;
        };
        let slow = self.window > 0 && self.window + 1 < self.windows.len();
        if slow {
            self.variance.update(q);
        }
        if iter + 1 < end {
            return false;
        }

        self.window += 1;
        if !slow {
            let eps = self.step.adapted_step_size();
            self.step.reset(eps);
            return false;
        }
        log::debug!(
            "metric re-estimated after warm-up iteration {} from {} draws",
            iter + 1,
            self.variance.count()
        );
        self.metric = Metric::from_inv_mass(self.variance.regularized_variance());
        self.variance.reset();
        true
    }

    /// Restart step-size tuning around `eps`.
    pub fn restart_step_size(&mut self, eps: f64) {
        self.step.reset(eps);
    }

    /// Step size for the next warm-up transition.
    pub fn step_size(&self) -> f64 {
        self.step.current_step_size()
    }

    /// Step size to sample with once warm-up ends.
    pub fn adapted_step_size(&self) -> f64 {
        self.step.adapted_step_size()
    }

    /// Metric estimated so far.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }
}

/// Stan-style adaptation windows over `0..n_warmup`.
///
/// Initial fast buffer 75, terminal buffer 50, slow windows starting at 25
/// and doubling; a slow window that would leave less than twice its size
/// before the terminal buffer absorbs the remainder. Warm-ups shorter than
/// 50 iterations adapt step size only.
pub fn compute_windows(n_warmup: usize) -> Vec<(usize, usize)> {
    if n_warmup < 50 {
        return vec![(0, n_warmup)];
    }

    let (init_buffer, term_buffer, base) = if n_warmup < 75 + 50 + 25 {
        // Stan's fallback proportions: 15% / 75% / 10%.
        let init = (0.15 * n_warmup as f64) as usize;
        let term = (0.1 * n_warmup as f64) as usize;
        (init, term, n_warmup - init - term)
    } else {
        (75, 50, 25)
    };
    let slow_end = n_warmup - term_buffer;

    let mut windows = vec![(0, init_buffer)];
    let mut start = init_buffer;
    let mut size = base;
    while start < slow_end {
        let mut end = (start + size).min(slow_end);
        if slow_end - end < 2 * size {
            end = slow_end;
        }
        windows.push((start, end));
        start = end;
        size *= 2;
    }
    windows.push((slow_end, n_warmup));
    windows
}

/// Find a reasonable initial step size (Hoffman & Gelman 2014, Algorithm 4).
///
/// Doubles or halves `eps` until the one-step acceptance crosses 0.5. The
/// momentum is `sqrt(diag M)`, i.e. a unit vector in whitened coordinates.
pub fn find_reasonable_step_size<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    q: &[f64],
    metric: &Metric,
) -> f64 {
    let integrator = LeapfrogIntegrator::new(posterior, 1.0, metric.clone());
    let mut state = match integrator.init_state(q.to_vec()) {
        Ok(s) => s,
        Err(_) => return 0.01,
    };
    state.p = metric.mass_diag().iter().map(|m| m.sqrt()).collect();
    let h0 = state.hamiltonian(metric);

    let test_accept = |eps: f64| -> Option<f64> {
        let mut s = state.clone();
        integrator.step_with_eps(&mut s, eps).ok()?;
        let a = (h0 - s.hamiltonian(metric)).exp();
        if a.is_finite() { Some(a.min(1.0)) } else { None }
    };

    let mut eps = 0.1;
    let accept0 = match test_accept(eps) {
        Some(a) => a,
        None => {
            eps = 1e-3;
            match test_accept(eps) {
                Some(a) => a,
                None => return 1e-3,
            }
        }
    };

    let grow = accept0 > 0.5;
    for _ in 0..50 {
        let next = if grow { eps * 2.0 } else { eps * 0.5 };
        if !(1e-10..=1e3).contains(&next) {
            break;
        }
        match test_accept(next) {
            Some(a) if grow && a < 0.5 => break,
            Some(a) if !grow && a > 0.5 => {
                eps = next;
                break;
            }
            Some(_) => eps = next,
            None => break,
        }
    }

    eps.clamp(1e-8, 1e3)
}
