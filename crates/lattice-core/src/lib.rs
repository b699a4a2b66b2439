//! Lattice CI Core
//!
//! Core domain types, traits, and error handling for Lattice CI.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod error;
pub mod ids;
pub mod interpolation;
pub mod job;
pub mod pipeline;
pub mod ports;
pub mod run;
pub mod trigger;

pub use error::{ConfigError, Error, Result};
pub use ids::*;
