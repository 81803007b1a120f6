//! Run configuration shared by the library and the CLI.

use std::path::Path;

use dc_core::{Error, ObservationSet, Result};
use serde::{Deserialize, Serialize};

use crate::model::{HierarchicalDemandModel, Seasonality};
use crate::nuts::{InitStrategy, NutsConfig};
use crate::priors::HyperPriors;

/// End-to-end run settings. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of chains.
    pub chains: usize,
    /// Post-warmup draws per chain.
    pub draws: usize,
    /// Warm-up iterations per chain.
    pub warmup: usize,
    /// Dual-averaging target acceptance.
    pub target_accept: f64,
    /// Base seed (chain `i` uses `seed + i`).
    pub seed: u64,
    /// Forecast horizon in days.
    pub horizon: u32,
    /// Maximum NUTS tree depth.
    pub max_treedepth: usize,
    /// Jitter applied to the unconstrained starting point.
    pub init_jitter: f64,
    /// Starting-point strategy.
    pub init: InitStrategy,
    /// Seasonal periods.
    pub seasonality: Seasonality,
    /// Hyperprior overrides; data-scaled defaults when absent.
    pub priors: Option<HyperPriors>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chains: 2,
            draws: 2000,
            warmup: 1000,
            target_accept: 0.9,
            seed: 42,
            horizon: 60,
            max_treedepth: 10,
            init_jitter: 0.5,
            init: InitStrategy::Fixed,
            seasonality: Seasonality::default(),
            priors: None,
        }
    }
}

impl RunConfig {
    /// Read a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("chains", self.chains), ("draws", self.draws), ("warmup", self.warmup)] {
            if v == 0 {
                return Err(Error::Validation(format!("{} must be > 0", name)));
            }
        }
        if self.horizon == 0 {
            return Err(Error::Validation("horizon must be > 0".into()));
        }
        self.nuts_config().validate()?;
        self.seasonality.validate()?;
        if let Some(p) = &self.priors {
            p.validate()?;
        }
        Ok(())
    }

    /// Sampler settings.
    pub fn nuts_config(&self) -> NutsConfig {
        NutsConfig {
            max_treedepth: self.max_treedepth,
            target_accept: self.target_accept,
            init_jitter: self.init_jitter,
            init: self.init,
        }
    }

    /// Model over `data` with this config's priors and seasonality.
    pub fn build_model(&self, data: &ObservationSet) -> Result<HierarchicalDemandModel> {
        let priors = match &self.priors {
            Some(p) => p.clone(),
            None => HyperPriors::from_data(data),
        };
        HierarchicalDemandModel::new(data, priors, self.seasonality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priors::Prior;
    use crate::test_support::synthetic_data;

    #[test]
    fn test_defaults() {
        let c: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, RunConfig::default());
        assert_eq!((c.chains, c.draws, c.warmup, c.horizon, c.seed), (2, 2000, 1000, 60, 42));
        assert_eq!(c.target_accept, 0.9);
        assert!(c.validate().is_ok());
        assert_eq!(c.nuts_config(), NutsConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let bad = |c: RunConfig| matches!(c.validate(), Err(Error::Validation(_)));
        assert!(bad(RunConfig { chains: 0, ..Default::default() }));
        assert!(bad(RunConfig { draws: 0, ..Default::default() }));
        assert!(bad(RunConfig { warmup: 0, ..Default::default() }));
        assert!(bad(RunConfig { horizon: 0, ..Default::default() }));
        assert!(bad(RunConfig { target_accept: 1.0, ..Default::default() }));
        assert!(bad(RunConfig { target_accept: 0.0, ..Default::default() }));
        assert!(serde_json::from_str::<RunConfig>(r#"{"chanis": 3}"#).is_err());
    }

    #[test]
    fn test_build_model_with_prior_override() {
        let data = synthetic_data(2, 30, 1);
        let mut priors = HyperPriors::from_data(&data);
        priors.noise_scale = Prior::HalfNormal { scale: 0.2 };
        let config = RunConfig { priors: Some(priors.clone()), ..Default::default() };
        let model = config.build_model(&data).unwrap();
        assert_eq!(model.priors(), &priors);

        let partial: RunConfig = serde_json::from_str(r#"{"chains": 4, "seasonality": {"weekly_period": 14}}"#).unwrap();
        assert_eq!(partial.chains, 4);
        assert_eq!(partial.seasonality.weekly_period, 14.0);
        assert_eq!(partial.seasonality.monthly_period, 30.0);
    }
}
