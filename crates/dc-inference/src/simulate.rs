//! Synthetic demand generation from the model's own generative process.

use dc_core::{Error, Observation, ObservationSet, Result};
use dc_prob::neg_binomial;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::layout::ComponentValues;
use crate::model::{Seasonality, expected_demand};

/// Known generating parameters for synthetic data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTruth {
    /// Global noise scale (`alpha = noise_scale^2`).
    pub noise_scale: f64,
    /// Component values per category, in category order.
    pub categories: Vec<ComponentValues>,
    /// Seasonal periods.
    #[serde(default)]
    pub seasonality: Seasonality,
}

/// Generate `days` days (`0..days`) of demand for each category.
///
/// The trend is centred on the window midpoint, matching
/// [`crate::model::HierarchicalDemandModel`] fitted to the same window.
pub fn simulate_observations(
    truth: &SimulationTruth,
    categories: &[String],
    days: u32,
    seed: u64,
) -> Result<ObservationSet> {
    if days == 0 {
        return Err(Error::Validation("days must be > 0".into()));
    }
    if categories.len() != truth.categories.len() {
        return Err(Error::Validation(format!(
            "{} category names for {} truth entries",
            categories.len(),
            truth.categories.len()
        )));
    }
    if !truth.noise_scale.is_finite() || truth.noise_scale <= 0.0 {
        return Err(Error::Validation(format!(
            "noise_scale must be finite and > 0, got {}",
            truth.noise_scale
        )));
    }
    truth.seasonality.validate()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let alpha = truth.noise_scale * truth.noise_scale;
    let t_ref = 0.5 * (days - 1) as f64;

    let mut observations = Vec::with_capacity(days as usize * categories.len());
    for (c, values) in truth.categories.iter().enumerate() {
        let values = values.to_array();
        for day in 0..days {
            let mu = expected_demand(&values, &truth.seasonality.features(day as f64, t_ref));
            let demand = neg_binomial::sample_mean_disp(&mut rng, mu, alpha)?;
            observations.push(Observation { day, category: c, demand });
        }
    }
    ObservationSet::from_names(categories.to_vec(), observations)
}
