//! Execution of a single job instance.

use chrono::Utc;
use lattice_core::job::JobInstance;
use lattice_core::pipeline::{JobDefinition, StepReference};
use lattice_core::ports::{StepContext, StepRunner};
use lattice_core::run::{ExecutionResult, FailureReason, SkipReason, StepRecord};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the step sequence of an instance ended.
enum StepsOutcome {
    Completed,
    Failed(FailureReason),
    Cancelled,
}

/// Runs the steps of one instance through a [`StepRunner`].
#[derive(Clone)]
pub struct InstanceExecutor {
    runner: Arc<dyn StepRunner>,
    workspace: PathBuf,
    secrets: Arc<BTreeMap<String, String>>,
}

impl InstanceExecutor {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        workspace: PathBuf,
        secrets: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            runner,
            workspace,
            secrets,
        }
    }

    /// Execute every step of `instance` in order.
    ///
    /// `env` is the pipeline environment already merged with the job's own.
    /// The instance fails on the first failing step, on a runner error or
    /// when its timeout elapses. Cancellation is observed between steps.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        instance: &JobInstance,
        env: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(instance = %instance.id, "Instance started");

        let ctx = StepContext {
            job_name: job.name.clone(),
            instance: Some(instance.id.clone()),
            workspace: self.workspace.clone(),
            matrix: instance.matrix(),
            env: env.clone(),
            secrets: self.secrets.as_ref().clone(),
        };

        let mut records = Vec::with_capacity(job.steps.len());
        let steps = self.run_steps(&job.steps, &ctx, cancel, &mut records);
        let outcome = match (instance.timeout(), instance.timeout_minutes) {
            (Some(limit), Some(minutes)) => tokio::time::timeout(limit, steps)
                .await
                .unwrap_or(StepsOutcome::Failed(FailureReason::TimedOut { minutes })),
            _ => steps.await,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let result = match outcome {
            StepsOutcome::Completed => {
                info!(instance = %instance.id, duration_ms, "Instance passed");
                ExecutionResult::passed(instance, records)
            }
            StepsOutcome::Failed(reason) => {
                if instance.fault_tolerant {
                    warn!(instance = %instance.id, %reason, "Instance failed (allowed to fail)");
                } else {
                    warn!(instance = %instance.id, %reason, "Instance failed");
                }
                ExecutionResult::failed(instance, reason, records)
            }
            StepsOutcome::Cancelled => {
                info!(instance = %instance.id, steps_run = records.len(), "Instance cancelled");
                ExecutionResult {
                    steps: records,
                    ..ExecutionResult::skipped(instance, SkipReason::Cancelled)
                }
            }
        };

        result.with_timing(started_at, duration_ms)
    }

    async fn run_steps(
        &self,
        steps: &[StepReference],
        ctx: &StepContext,
        cancel: &CancellationToken,
        records: &mut Vec<StepRecord>,
    ) -> StepsOutcome {
        for step in steps {
            if cancel.is_cancelled() {
                return StepsOutcome::Cancelled;
            }

            let name = step.display_name();
            debug!(step = %name, "Running step");
            let start = Instant::now();

            match self.runner.run(step, ctx).await {
                Ok(outcome) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    if !outcome.output.is_empty() {
                        debug!(step = %name, output = %outcome.output, "Step output");
                    }
                    records.push(StepRecord {
                        name: name.clone(),
                        success: outcome.success,
                        exit_code: outcome.exit_code,
                        duration_ms,
                        output: outcome.output,
                    });
                    if !outcome.success {
                        return StepsOutcome::Failed(FailureReason::StepFailed {
                            step: name,
                            exit_code: outcome.exit_code,
                        });
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    records.push(StepRecord {
                        name: name.clone(),
                        success: false,
                        exit_code: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                        output: message.clone(),
                    });
                    return StepsOutcome::Failed(FailureReason::RunnerError {
                        step: name,
                        message,
                    });
                }
            }
        }
        StepsOutcome::Completed
    }
}
