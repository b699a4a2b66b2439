//! Run and execution result types.

use crate::ids::{InstanceId, RunId};
use crate::job::{Binding, JobInstance};
use crate::trigger::TriggerEvent;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Passed,
    Failed,
    Skipped,
}

/// Why an instance never ran (or stopped early).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was itself skipped because of its dependencies.
    Dependency { job: String },
    /// The job's condition did not match the triggering event.
    Condition,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Dependency { job } => write!(f, "dependency `{}` did not succeed", job),
            SkipReason::Condition => write!(f, "condition not met"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    StepFailed {
        step: String,
        exit_code: Option<i32>,
    },
    RunnerError {
        step: String,
        message: String,
    },
    TimedOut {
        minutes: u32,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepFailed {
                step,
                exit_code: Some(code),
            } => write!(f, "step `{}` exited with {}", step, code),
            FailureReason::StepFailed {
                step,
                exit_code: None,
            } => write!(f, "step `{}` failed", step),
            FailureReason::RunnerError { step, message } => {
                write!(f, "step `{}` could not run: {}", step, message)
            }
            FailureReason::TimedOut { minutes } => write!(f, "timed out after {} min", minutes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub output: String,
}

/// How an instance counts towards the pipeline verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Passed,
    Failed,
    NonBlocking,
    Skipped,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Passed => "passed",
            Classification::Failed => "failed",
            Classification::NonBlocking => "failed (allowed)",
            Classification::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Outcome of a single job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub instance: InstanceId,
    pub job_name: String,
    pub index: usize,
    pub display_name: String,
    pub bindings: Vec<Binding>,
    pub status: InstanceStatus,
    pub fault_tolerant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    fn for_instance(instance: &JobInstance, status: InstanceStatus) -> Self {
        Self {
            instance: instance.id.clone(),
            job_name: instance.job_name.clone(),
            index: instance.index,
            display_name: instance.display_name.clone(),
            bindings: instance.bindings.clone(),
            status,
            fault_tolerant: instance.fault_tolerant,
            skip_reason: None,
            failure: None,
            steps: Vec::new(),
            started_at: None,
            duration_ms: 0,
        }
    }

    pub fn passed(instance: &JobInstance, steps: Vec<StepRecord>) -> Self {
        Self {
            steps,
            ..Self::for_instance(instance, InstanceStatus::Passed)
        }
    }

    pub fn failed(instance: &JobInstance, reason: FailureReason, steps: Vec<StepRecord>) -> Self {
        Self {
            failure: Some(reason),
            steps,
            ..Self::for_instance(instance, InstanceStatus::Failed)
        }
    }

    pub fn skipped(instance: &JobInstance, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::for_instance(instance, InstanceStatus::Skipped)
        }
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        self.started_at = Some(started_at);
        self.duration_ms = duration_ms;
        self
    }

    /// A failure that fails the pipeline.
    pub fn is_blocking_failure(&self) -> bool {
        self.status == InstanceStatus::Failed && !self.fault_tolerant
    }

    pub fn is_non_blocking_failure(&self) -> bool {
        self.status == InstanceStatus::Failed && self.fault_tolerant
    }

    pub fn classification(&self) -> Classification {
        match self.status {
            InstanceStatus::Passed => Classification::Passed,
            InstanceStatus::Skipped => Classification::Skipped,
            InstanceStatus::Failed if self.fault_tolerant => Classification::NonBlocking,
            InstanceStatus::Failed => Classification::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Passed,
    Failed,
    /// No trigger rule matched the event.
    Skipped,
}

impl PipelineStatus {
    /// Failed iff any non-fault-tolerant instance failed.
    pub fn aggregate<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionResult>,
    {
        if results.into_iter().any(ExecutionResult::is_blocking_failure) {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Passed
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineStatus::Passed => 0,
            PipelineStatus::Failed => 1,
            PipelineStatus::Skipped => 3,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Passed => write!(f, "passed"),
            PipelineStatus::Failed => write!(f, "failed"),
            PipelineStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: RunId,
    pub pipeline_name: String,
    pub event: TriggerEvent,
    pub status: PipelineStatus,
    /// Ordered by job (dependency order), then instance index.
    pub results: Vec<ExecutionResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Result for a pipeline whose triggers did not match.
    pub fn not_triggered(run_id: RunId, pipeline_name: &str, event: TriggerEvent) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline_name.to_string(),
            event,
            status: PipelineStatus::Skipped,
            results: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Passed
    }

    pub fn result(&self, instance: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.instance.as_str() == instance)
    }

    pub fn job_results<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a ExecutionResult> {
        self.results.iter().filter(move |r| r.job_name == job)
    }

    fn count(&self, class: Classification) -> usize {
        self.results
            .iter()
            .filter(|r| r.classification() == class)
            .count()
    }

    pub fn passed_count(&self) -> usize {
        self.count(Classification::Passed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(Classification::Failed)
    }

    pub fn non_blocking_count(&self) -> usize {
        self.count(Classification::NonBlocking)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(Classification::Skipped)
    }
}

/// Append-only store of instance results.
///
/// Each instance may be recorded exactly once; a second write for the same
/// identity is rejected.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Vec<ExecutionResult>,
    recorded: HashSet<InstanceId>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ExecutionResult) -> Result<()> {
        if !self.recorded.insert(result.instance.clone()) {
            return Err(Error::Internal(format!(
                "result for instance {} recorded twice",
                result.instance
            )));
        }
        self.results.push(result);
        Ok(())
    }

    pub fn contains(&self, instance: &InstanceId) -> bool {
        self.recorded.contains(instance)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn job_results<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a ExecutionResult> {
        self.results.iter().filter(move |r| r.job_name == job)
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }
}
