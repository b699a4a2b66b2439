//! Matrix compilation and job scheduling for Lattice CI.
//!
//! A pipeline run goes through three phases: trigger evaluation, validation
//! (dependency graph plus every job's matrix) and execution of the compiled
//! instances through a [`StepRunner`](lattice_core::ports::StepRunner).

pub mod dag;
pub mod executor;
pub mod matrix;
pub mod scheduler;
pub mod triggers;
pub mod validation;

pub use dag::{DagBuilder, PipelineDag};
pub use executor::InstanceExecutor;
pub use matrix::{MatrixExpander, MatrixExpansion};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use triggers::TriggerMatcher;
pub use validation::{ExecutionPlan, Validator};
