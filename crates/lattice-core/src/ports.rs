//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! adapters that actually execute work.

use crate::Result;
use crate::ids::InstanceId;
use crate::pipeline::StepReference;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything a step runner gets to know about the instance it works for.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub job_name: String,
    pub instance: Option<InstanceId>,
    pub workspace: PathBuf,
    /// Resolved axis bindings of the instance, stringified.
    pub matrix: BTreeMap<String, String>,
    /// Pipeline and job variables, already merged.
    pub env: BTreeMap<String, String>,
    /// Opaque values the engine never inspects.
    pub secrets: BTreeMap<String, String>,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Captured output, with secrets already masked.
    pub output: String,
}

impl StepOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            duration_ms: 0,
            output: output.into(),
        }
    }

    pub fn failure(exit_code: Option<i32>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            duration_ms: 0,
            output: output.into(),
        }
    }
}

/// Executes one opaque step.
///
/// An `Err` means the step could not be run at all; the scheduler treats it as
/// a step failure of the owning instance. Retries, if any, are the runner's
/// business.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &StepReference, ctx: &StepContext) -> Result<StepOutcome>;
}
