//! Shared fixtures for unit tests.

use dc_core::traits::LogDensityModel;
use dc_core::{ObservationSet, Result};

use crate::layout::ComponentValues;
use crate::model::Seasonality;
use crate::simulate::{SimulationTruth, simulate_observations};

/// Independent standard normals.
pub(crate) struct StdNormalModel {
    pub dim: usize,
}

impl LogDensityModel for StdNormalModel {
    fn dim(&self) -> usize {
        self.dim
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.dim).map(|i| format!("x{}", i)).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); self.dim]
    }

    fn parameter_init(&self) -> Vec<f64> {
        vec![0.5; self.dim]
    }

    fn log_density_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let lp = -0.5 * params.iter().map(|x| x * x).sum::<f64>();
        Ok((lp, params.iter().map(|x| -x).collect()))
    }
}

/// Truth used by [`synthetic_data`]: levels 60, 90, 120, ... with mild seasonality.
pub(crate) fn synthetic_truth(n_categories: usize) -> SimulationTruth {
    SimulationTruth {
        noise_scale: 0.1,
        categories: (0..n_categories)
            .map(|c| ComponentValues {
                level: 60.0 + 30.0 * c as f64,
                trend: 0.05,
                weekly: 6.0,
                monthly: 3.0,
            })
            .collect(),
        seasonality: Seasonality::default(),
    }
}

/// Simulated observation set with `n_categories` categories named `cat0`, `cat1`, ...
pub(crate) fn synthetic_data(n_categories: usize, days: u32, seed: u64) -> ObservationSet {
    let names: Vec<String> = (0..n_categories).map(|c| format!("cat{}", c)).collect();
    simulate_observations(&synthetic_truth(n_categories), &names, days, seed)
        .expect("synthetic data")
}
