//! A runner that executes nothing.

use async_trait::async_trait;
use lattice_core::interpolation::InterpolationContext;
use lattice_core::pipeline::{StepKind, StepReference};
use lattice_core::ports::{StepContext, StepOutcome, StepRunner};
use lattice_core::{Error, Result};
use std::sync::Mutex;
use tracing::info;

/// Reports every step as passed and remembers what it would have run.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    planned: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps seen so far, as `instance: step`.
    pub fn planned(&self) -> Vec<String> {
        self.planned
            .lock()
            .map(|planned| planned.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepRunner for DryRunRunner {
    async fn run(&self, step: &StepReference, ctx: &StepContext) -> Result<StepOutcome> {
        let interp = InterpolationContext::for_step(ctx, &step.env);
        let description = match step.kind().map_err(Error::Runner)? {
            StepKind::Run(command) => format!("would run: {}", interp.interpolate(command)),
            StepKind::Uses(action) => format!("would use: {}", action),
        };
        let description = interp.mask_secrets(&description);

        let owner = ctx
            .instance
            .as_ref()
            .map_or_else(|| ctx.job_name.clone(), ToString::to_string);
        info!(instance = %owner, step = %step.display_name(), "Dry run");

        if let Ok(mut planned) = self.planned.lock() {
            planned.push(format!("{}: {}", owner, step.display_name()));
        }
        Ok(StepOutcome::success(description))
    }
}
