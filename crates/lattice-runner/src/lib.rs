//! Step runners for Lattice CI.
//!
//! Adapters implementing [`lattice_core::ports::StepRunner`].

pub mod dry_run;
pub mod runner;
pub mod shell;

pub use dry_run::DryRunRunner;
pub use runner::{ActionPolicy, OutputLine, OutputStream, RunnerConfig};
pub use shell::ShellRunner;
