//! # dc-inference
//!
//! Bayesian demand forecasting and inventory decisions for demandcast.
//!
//! This crate provides:
//! - a hierarchical multi-category demand model (NB2 likelihood, non-centered partial pooling)
//! - NUTS sampling with windowed adaptation, run in parallel across chains
//! - convergence diagnostics and quality gates
//! - posterior-predictive forecasts
//! - newsvendor order quantities, sensitivity surfaces and bootstrap intervals
//! - pairwise category comparisons
//!
//! ## Pipeline
//!
//! ```text
//! ObservationSet -> HierarchicalDemandModel -> Trace -> { DiagnosticsReport,
//!                                                          ForecastDistribution -> OptimalOrderQuantity,
//!                                                          Comparison }
//! ```
//!
//! Nothing downstream mutates an upstream artifact.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Adaptation: step-size dual averaging and diagonal mass matrix (Welford variance).
pub mod adapt;
/// Percentile and BCa bootstrap intervals, quantile helpers.
pub mod bootstrap_ci;
/// Chain storage, traces and the multi-chain parallel runner.
pub mod chain;
/// Run configuration.
pub mod config;
/// Split R-hat, ESS, E-BFMI and quality gates.
pub mod diagnostics;
/// Posterior-predictive forecasting.
pub mod forecast;
/// HMC leapfrog integrator and static HMC kernel.
pub mod hmc;
/// Posterior comparisons between categories.
pub mod hypothesis;
/// Newsvendor optimizer, sensitivity analysis, bootstrap.
pub mod inventory;
/// Flat parameter vector layout.
pub mod layout;
/// Hierarchical demand model.
pub mod model;
/// NUTS tree-building and sampling.
pub mod nuts;
/// Posterior API: log-pdf, gradient, transforms.
pub mod posterior;
/// Prior distributions and data-scaled hyperpriors.
pub mod priors;
/// Synthetic data generation.
pub mod simulate;

#[cfg(test)]
mod test_support;

pub use bootstrap_ci::{CiMethod, Interval};
pub use chain::{CancelToken, Chain, Trace, run, sample_nuts_multichain};
pub use config::RunConfig;
pub use diagnostics::{
    ConvergenceWarning, DiagnosticsReport, QualityGates, QualityStatus, QualitySummary, diagnose,
    quality_summary,
};
pub use forecast::{ForecastDistribution, ForecastSummary, PosteriorPredictiveEngine};
pub use hypothesis::{Comparison, compare};
pub use inventory::{
    BootstrapOptions, BootstrapReport, OptimalOrderQuantity, SensitivitySurface, bootstrap_inventory,
    optimal_quantity, sensitivity_surface,
};
pub use layout::{Component, ComponentValues, ParameterLayout};
pub use model::{HierarchicalDemandModel, Seasonality};
pub use nuts::{InitStrategy, NutsConfig, sample_nuts};
pub use posterior::Posterior;
pub use priors::{HyperPriors, Prior};
pub use simulate::{SimulationTruth, simulate_observations};
