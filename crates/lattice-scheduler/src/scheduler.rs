//! Main scheduler orchestration.

use crate::executor::InstanceExecutor;
use crate::triggers::TriggerMatcher;
use crate::validation::{ExecutionPlan, Validator};

use chrono::Utc;
use lattice_core::ids::RunId;
use lattice_core::job::JobInstance;
use lattice_core::pipeline::{JobDefinition, PipelineDefinition};
use lattice_core::ports::StepRunner;
use lattice_core::run::{ExecutionResult, PipelineResult, PipelineStatus, ResultStore, SkipReason};
use lattice_core::trigger::TriggerEvent;
use lattice_core::{ConfigError, Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pipeline-wide limit on in-flight instances. Takes precedence over the
    /// definition's own `max_parallel`; `None` on both means unbounded.
    pub max_parallel: Option<usize>,
    /// Directory steps run in.
    pub workspace: PathBuf,
    /// Opaque values handed to every step.
    pub secrets: BTreeMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            secrets: BTreeMap::new(),
        }
    }
}

/// Verdict of a finished job as seen by its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobVerdict {
    /// Dependents may run.
    Clear,
    /// A blocking failure, or the job was itself skipped for a dependency.
    Blocked,
}

/// Per-run bookkeeping of the ready-set loop.
#[derive(Default)]
struct RunState {
    submitted: HashSet<String>,
    verdicts: HashMap<String, JobVerdict>,
    remaining: HashMap<String, usize>,
    store: ResultStore,
}

impl RunState {
    fn skip_job(&mut self, instances: &[JobInstance], reason: SkipReason) -> Result<()> {
        for instance in instances {
            self.store
                .record(ExecutionResult::skipped(instance, reason.clone()))?;
        }
        Ok(())
    }

    /// Record one instance result; settles the job verdict once its last
    /// instance is in.
    fn complete(&mut self, result: ExecutionResult) -> Result<()> {
        let job = result.job_name.clone();
        self.store.record(result)?;

        let remaining = self
            .remaining
            .get_mut(&job)
            .ok_or_else(|| Error::Internal(format!("unexpected result for job {}", job)))?;
        *remaining -= 1;
        if *remaining == 0 {
            let blocked = self
                .store
                .job_results(&job)
                .any(ExecutionResult::is_blocking_failure);
            let verdict = if blocked {
                JobVerdict::Blocked
            } else {
                JobVerdict::Clear
            };
            info!(job = %job, ?verdict, "Job finished");
            self.verdicts.insert(job, verdict);
        }
        Ok(())
    }
}

/// Compiles pipelines into instances and drives them through a step runner.
pub struct Scheduler {
    runner: Arc<dyn StepRunner>,
    config: SchedulerConfig,
    trigger_matcher: TriggerMatcher,
    validator: Validator,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self::with_config(runner, SchedulerConfig::default())
    }

    pub fn with_config(runner: Arc<dyn StepRunner>, config: SchedulerConfig) -> Self {
        Self {
            runner,
            config,
            trigger_matcher: TriggerMatcher::new(),
            validator: Validator::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run a pipeline for one triggering event.
    pub async fn run(
        &self,
        pipeline: &PipelineDefinition,
        event: TriggerEvent,
    ) -> Result<PipelineResult> {
        self.run_with_cancel(pipeline, event, CancellationToken::new())
            .await
    }

    /// Run a pipeline, stopping early once `cancel` fires.
    ///
    /// Configuration errors are returned before any instance executes. Step
    /// failures never surface as `Err`; they are part of the returned result.
    pub async fn run_with_cancel(
        &self,
        pipeline: &PipelineDefinition,
        event: TriggerEvent,
        cancel: CancellationToken,
    ) -> Result<PipelineResult> {
        let run_id = RunId::new();

        if !self.trigger_matcher.matches(pipeline, &event) {
            info!(pipeline = %pipeline.name, %event, "No trigger matched, pipeline skipped");
            return Ok(PipelineResult::not_triggered(run_id, &pipeline.name, event));
        }

        let plan = self.validator.plan(pipeline)?;
        let limit = self.config.max_parallel.or(pipeline.max_parallel);
        if limit == Some(0) {
            return Err(ConfigError::InvalidDefinition(
                "max_parallel must be at least 1".to_string(),
            )
            .into());
        }

        let span = info_span!("pipeline", run = %run_id, pipeline = %pipeline.name);
        async move {
            let started_at = Utc::now();
            let start = Instant::now();
            info!(
                %event,
                jobs = plan.dag.len(),
                instances = plan.instance_count(),
                "Pipeline started"
            );

            let mut results = self
                .execute_plan(pipeline, &plan, limit, &event, &cancel)
                .await?;
            results.sort_by_key(|r| (plan.dag.position(&r.job_name), r.index));

            let status = PipelineStatus::aggregate(&results);
            let duration_ms = start.elapsed().as_millis() as u64;
            info!(%status, duration_ms, "Pipeline finished");

            Ok(PipelineResult {
                run_id,
                pipeline_name: pipeline.name.clone(),
                event,
                status,
                results,
                started_at,
                duration_ms,
            })
        }
        .instrument(span)
        .await
    }

    async fn execute_plan(
        &self,
        pipeline: &PipelineDefinition,
        plan: &ExecutionPlan,
        limit: Option<usize>,
        event: &TriggerEvent,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExecutionResult>> {
        let slots = Arc::new(Semaphore::new(
            limit.unwrap_or(Semaphore::MAX_PERMITS).min(Semaphore::MAX_PERMITS),
        ));
        debug!(max_parallel = ?limit, "Execution slots ready");

        let executor = InstanceExecutor::new(
            self.runner.clone(),
            self.config.workspace.clone(),
            Arc::new(self.config.secrets.clone()),
        );

        let mut state = RunState::default();
        let mut join_set: JoinSet<ExecutionResult> = JoinSet::new();

        loop {
            for job_name in plan.dag.order() {
                if state.submitted.contains(job_name)
                    || !plan
                        .dag
                        .is_ready(job_name, |dep| state.verdicts.contains_key(dep))
                {
                    continue;
                }
                state.submitted.insert(job_name.clone());

                let job = pipeline
                    .job(job_name)
                    .ok_or_else(|| Error::Internal(format!("job {} missing", job_name)))?;
                let expansion = plan
                    .expansion(job_name)
                    .ok_or_else(|| Error::Internal(format!("job {} not compiled", job_name)))?;

                if cancel.is_cancelled() {
                    state.skip_job(&expansion.instances, SkipReason::Cancelled)?;
                    state.verdicts.insert(job_name.clone(), JobVerdict::Blocked);
                    continue;
                }

                let blocked_by = plan
                    .dag
                    .dependencies(job_name)
                    .into_iter()
                    .find(|dep| state.verdicts.get(*dep) == Some(&JobVerdict::Blocked));
                if let Some(dep) = blocked_by {
                    info!(job = %job_name, dependency = %dep, "Job skipped: dependency did not succeed");
                    let reason = SkipReason::Dependency {
                        job: dep.to_string(),
                    };
                    state.skip_job(&expansion.instances, reason)?;
                    state.verdicts.insert(job_name.clone(), JobVerdict::Blocked);
                    continue;
                }

                if !self
                    .trigger_matcher
                    .condition_matches(job.condition.as_ref(), event)
                {
                    info!(job = %job_name, "Job skipped: condition not met");
                    state.skip_job(&expansion.instances, SkipReason::Condition)?;
                    state.verdicts.insert(job_name.clone(), JobVerdict::Clear);
                    continue;
                }

                if expansion.is_empty() {
                    warn!(job = %job_name, "Matrix excludes every combination, nothing to run");
                    state.verdicts.insert(job_name.clone(), JobVerdict::Clear);
                    continue;
                }

                info!(job = %job_name, instances = expansion.len(), "Job submitted");
                state.remaining.insert(job_name.clone(), expansion.len());
                self.submit_job(
                    &mut join_set,
                    &executor,
                    pipeline,
                    job,
                    &expansion.instances,
                    expansion.max_parallel,
                    &slots,
                    cancel,
                );
            }

            // Nothing running and nothing became ready
            if join_set.is_empty() {
                break;
            }

            if let Some(joined) = join_set.join_next().await {
                let result = joined
                    .map_err(|e| Error::Internal(format!("instance task failed: {}", e)))?;
                state.complete(result)?;
            }
        }

        Ok(state.store.into_results())
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_job(
        &self,
        join_set: &mut JoinSet<ExecutionResult>,
        executor: &InstanceExecutor,
        pipeline: &PipelineDefinition,
        job: &JobDefinition,
        instances: &[JobInstance],
        job_limit: Option<usize>,
        slots: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) {
        let mut env = pipeline.env.clone();
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let job = Arc::new(job.clone());
        let env = Arc::new(env);
        let job_slots = job_limit.map(|n| Arc::new(Semaphore::new(n)));

        for instance in instances.iter().cloned() {
            let executor = executor.clone();
            let job = job.clone();
            let env = env.clone();
            let slots = slots.clone();
            let job_slots = job_slots.clone();
            let cancel = cancel.clone();
            let span = info_span!("instance", id = %instance.id);

            join_set.spawn(
                async move {
                    let Some(_permits) = acquire_slots(slots, job_slots, &cancel).await else {
                        debug!("Cancelled while waiting for a slot");
                        return ExecutionResult::skipped(&instance, SkipReason::Cancelled);
                    };
                    executor.execute(&job, &instance, &env, &cancel).await
                }
                .instrument(span),
            );
        }
    }
}

/// Wait for a job slot (if the job is bounded) and then a pipeline slot.
async fn acquire_slots(
    slots: Arc<Semaphore>,
    job_slots: Option<Arc<Semaphore>>,
    cancel: &CancellationToken,
) -> Option<(Option<OwnedSemaphorePermit>, OwnedSemaphorePermit)> {
    let acquire = async {
        let job_permit = match job_slots {
            Some(sem) => Some(sem.acquire_owned().await.ok()?),
            None => None,
        };
        let permit = slots.acquire_owned().await.ok()?;
        Some((job_permit, permit))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permits = acquire => permits,
    }
}
