//! # dc-core
//!
//! Core types, traits and error handling for demandcast.
//!
//! Everything downstream (probability helpers, the demand model, the
//! sampler and the decision layer) speaks in terms of the types defined
//! here, so this crate stays free of numerical dependencies.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{Category, CostScenario, Observation, ObservationSet};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
