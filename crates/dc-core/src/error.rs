//! Error types for demandcast

use thiserror::Error;

/// demandcast error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration or input validation error (rejected at the call boundary)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A scale or dispersion parameter was non-positive or non-finite
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Log-density was non-finite where a finite value is required
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Holding cost or stockout penalty was not strictly positive
    #[error("Invalid cost parameter: {0}")]
    InvalidCostParameter(String),

    /// Sampling stopped early; partial chains were discarded
    #[error("Sampling cancelled: {0}")]
    Cancelled(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
