//! Error types for Lattice CI.

use thiserror::Error;

/// Problems with a pipeline definition.
///
/// Every variant is fatal: the scheduler surfaces it before any job instance
/// executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Pipeline defines no jobs")]
    EmptyPipeline,

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job `{job}` depends on unknown job `{dependency}`")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job dependencies: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Job `{job}`: axis `{axis}` has no values")]
    EmptyAxis { job: String, axis: String },

    #[error("Job `{job}`: matrix entry references undeclared axis `{axis}`")]
    UndeclaredAxis { job: String, axis: String },

    #[error("Job `{job}`: include entry #{index} is in add mode but does not set axes {missing:?}")]
    IncompleteInclude {
        job: String,
        index: usize,
        missing: Vec<String>,
    },

    #[error("Job `{job}`, step `{step}`: {reason}")]
    InvalidStep {
        job: String,
        step: String,
        reason: String,
    },

    #[error("Job `{job}`: {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Step runner error: {0}")]
    Runner(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
