//! Whole-definition validation.
//!
//! Everything that can be rejected is rejected here, before any instance
//! reaches a runner: names, step option sets, dependencies, cycles and the
//! matrix of every job.

use crate::dag::{DagBuilder, PipelineDag};
use crate::matrix::{MatrixExpander, MatrixExpansion};
use lattice_core::ConfigError;
use lattice_core::pipeline::{JobDefinition, PipelineDefinition};
use std::collections::HashMap;
use tracing::debug;

/// Characters that delimit bindings in an instance id.
const RESERVED_NAME_CHARS: [char; 4] = ['[', ']', '=', ','];

/// A validated pipeline: its dependency graph and every compiled matrix.
#[derive(Debug)]
pub struct ExecutionPlan {
    pub dag: PipelineDag,
    pub expansions: HashMap<String, MatrixExpansion>,
}

impl ExecutionPlan {
    pub fn expansion(&self, job: &str) -> Option<&MatrixExpansion> {
        self.expansions.get(job)
    }

    /// Total number of instances across all jobs.
    pub fn instance_count(&self) -> usize {
        self.expansions.values().map(MatrixExpansion::len).sum()
    }
}

pub struct Validator {
    dag_builder: DagBuilder,
    matrix_expander: MatrixExpander,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            dag_builder: DagBuilder::new(),
            matrix_expander: MatrixExpander::new(),
        }
    }

    /// Check the definition without keeping the compiled plan.
    pub fn validate(&self, pipeline: &PipelineDefinition) -> Result<(), ConfigError> {
        self.plan(pipeline).map(|_| ())
    }

    /// Validate the definition and compile it into an [`ExecutionPlan`].
    pub fn plan(&self, pipeline: &PipelineDefinition) -> Result<ExecutionPlan, ConfigError> {
        if pipeline.jobs.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }
        if let Some(0) = pipeline.max_parallel {
            return Err(ConfigError::InvalidDefinition(
                "max_parallel must be at least 1".to_string(),
            ));
        }

        for job in &pipeline.jobs {
            self.check_job(job)?;
        }

        let dag = self.dag_builder.build(pipeline)?;

        let mut expansions = HashMap::with_capacity(pipeline.jobs.len());
        for job in &pipeline.jobs {
            let expansion = self.matrix_expander.expand(job)?;
            debug!(job = %job.name, instances = expansion.len(), "Compiled job matrix");
            expansions.insert(job.name.clone(), expansion);
        }

        Ok(ExecutionPlan { dag, expansions })
    }

    fn check_job(&self, job: &JobDefinition) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidJob {
            job: job.name.clone(),
            reason: reason.to_string(),
        };

        if job.name.trim().is_empty() {
            return Err(ConfigError::InvalidDefinition(
                "job name must not be empty".to_string(),
            ));
        }
        if job.name.contains(&RESERVED_NAME_CHARS[..]) {
            return Err(invalid(
                "job name must not contain any of `[`, `]`, `=` or `,`",
            ));
        }
        if job.steps.is_empty() {
            return Err(invalid("job has no steps"));
        }
        if job.timeout_minutes == Some(0) {
            return Err(invalid("timeout_minutes must be at least 1"));
        }
        if let Some(matrix) = &job.matrix {
            if matrix.max_parallel == Some(0) {
                return Err(invalid("matrix max_parallel must be at least 1"));
            }
            if matrix.include.iter().any(|inc| inc.timeout_minutes == Some(0)) {
                return Err(invalid("include timeout_minutes must be at least 1"));
            }
        }

        for step in &job.steps {
            step.kind().map_err(|reason| ConfigError::InvalidStep {
                job: job.name.clone(),
                step: step.display_name(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
