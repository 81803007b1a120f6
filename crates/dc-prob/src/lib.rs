//! Probability building blocks for demandcast.
//!
//! This crate hosts the probability math the demand model is built from:
//! - scalar densities (Normal, half-Normal, Negative Binomial) with gradients
//! - the log scale positive parameters are sampled on
//! - small numeric helpers (stable softplus/sigmoid primitives)

pub mod math;
pub mod neg_binomial;
pub mod normal;
pub mod transforms;
