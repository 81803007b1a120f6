//! Log scale for positive parameters.
//!
//! Scale parameters (`tau_*`, `noise_scale`) live on `(0, inf)` and are
//! sampled as `z = ln(theta)`; all other parameters are sampled as-is.

use dc_core::{Error, Result};

/// Smallest positive value mapped back to the real line.
const MIN_POSITIVE: f64 = 1e-300;

/// Which parameters are sampled on the log scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogScale {
    positive: Vec<bool>,
}

impl LogScale {
    /// Build from `(lo, hi)` bounds: `(0, inf)` is log-scaled, `(-inf, inf)`
    /// is left alone, anything else is rejected.
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Result<Self> {
        let mut positive = Vec::with_capacity(bounds.len());
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if hi != f64::INFINITY || !(lo == f64::NEG_INFINITY || lo == 0.0) {
                return Err(Error::Validation(format!(
                    "parameter {} has bounds ({}, {}); only (-inf, inf) and (0, inf) are supported",
                    i, lo, hi
                )));
            }
            positive.push(lo == 0.0);
        }
        Ok(Self { positive })
    }

    pub fn dim(&self) -> usize {
        self.positive.len()
    }

    /// `true` where the parameter is log-scaled.
    pub fn positive_mask(&self) -> &[bool] {
        &self.positive
    }

    /// `theta = exp(z)` on positive slots, `z` elsewhere.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.positive).map(|(&v, &pos)| if pos { v.exp() } else { v }).collect()
    }

    /// `z = ln(theta)` on positive slots; zero maps to a large negative `z`.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        theta
            .iter()
            .zip(&self.positive)
            .map(|(&v, &pos)| if pos { v.max(MIN_POSITIVE).ln() } else { v })
            .collect()
    }

    /// `ln |d theta / d z|`, which is the sum of `z` over positive slots.
    pub fn log_jacobian(&self, z: &[f64]) -> f64 {
        z.iter().zip(&self.positive).filter(|(_, pos)| **pos).map(|(v, _)| v).sum()
    }

    /// Turn a constrained-space gradient into the unconstrained one, Jacobian
    /// term included: on positive slots `g_z = theta * g_theta + 1`.
    pub fn pull_back_gradient(&self, z: &[f64], grad: &mut [f64]) {
        for ((g, &v), &pos) in grad.iter_mut().zip(z).zip(&self.positive) {
            if pos {
                *g = *g * v.exp() + 1.0;
            }
        }
    }
}
