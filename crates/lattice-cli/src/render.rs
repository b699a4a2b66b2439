//! Terminal rendering of run results and compiled plans.

use console::style;
use lattice_core::job::JobInstance;
use lattice_core::run::{Classification, ExecutionResult, PipelineResult, PipelineStatus};
use std::fmt::Write;

/// Lines of failing step output shown under a failed instance.
const OUTPUT_TAIL: usize = 10;

fn seconds(ms: u64) -> String {
    format!("{:.2}s", ms as f64 / 1000.0)
}

fn detail(result: &ExecutionResult) -> String {
    if let Some(failure) = &result.failure {
        return failure.to_string();
    }
    if let Some(reason) = &result.skip_reason {
        return reason.to_string();
    }
    String::new()
}

fn styled_status(class: Classification, width: usize) -> String {
    let text = format!("{:<width$}", class.to_string(), width = width);
    match class {
        Classification::Passed => style(text).green().to_string(),
        Classification::Failed => style(text).red().bold().to_string(),
        Classification::NonBlocking => style(text).yellow().to_string(),
        Classification::Skipped => style(text).dim().to_string(),
    }
}

/// Per-instance status table followed by a summary line.
pub fn result_table(result: &PipelineResult) -> String {
    let mut out = String::new();

    if result.status == PipelineStatus::Skipped {
        let _ = writeln!(
            out,
            "{} Pipeline {} not triggered by {}",
            style("⏭").dim(),
            style(&result.pipeline_name).bold(),
            result.event
        );
        return out;
    }

    let name_width = result
        .results
        .iter()
        .map(|r| r.display_name.chars().count())
        .max()
        .unwrap_or(0)
        .max("INSTANCE".len());
    let status_width = "failed (allowed)".len();

    let _ = writeln!(
        out,
        "{}",
        style(format!(
            "{:<name_width$}  {:<status_width$}  {:>9}  DETAIL",
            "INSTANCE", "STATUS", "DURATION"
        ))
        .bold()
    );

    for r in &result.results {
        let _ = writeln!(
            out,
            "{:<name_width$}  {}  {:>9}  {}",
            r.display_name,
            styled_status(r.classification(), status_width),
            seconds(r.duration_ms),
            detail(r)
        );

        if r.classification() == Classification::Failed
            && let Some(step) = r.steps.iter().rev().find(|s| !s.success)
        {
            let lines: Vec<&str> = step.output.lines().collect();
            for line in &lines[lines.len().saturating_sub(OUTPUT_TAIL)..] {
                let _ = writeln!(out, "    {}", style(line).dim());
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} passed, {} failed, {} failed (allowed), {} skipped",
        result.passed_count(),
        result.failed_count(),
        result.non_blocking_count(),
        result.skipped_count()
    );

    let verdict = match result.status {
        PipelineStatus::Passed => style(format!("✓ Pipeline {} passed", result.pipeline_name))
            .green()
            .bold(),
        _ => style(format!("✗ Pipeline {} failed", result.pipeline_name))
            .red()
            .bold(),
    };
    let _ = writeln!(
        out,
        "{} in {} ({})",
        verdict,
        seconds(result.duration_ms),
        result.run_id
    );
    out
}

/// One line per compiled instance, grouped by job.
pub fn instance_table(jobs: &[(&str, &[JobInstance])]) -> String {
    let mut out = String::new();
    for (job, instances) in jobs {
        let _ = writeln!(
            out,
            "{} ({} instance{})",
            style(job).bold(),
            instances.len(),
            if instances.len() == 1 { "" } else { "s" }
        );
        for instance in *instances {
            let mut flags = Vec::new();
            if instance.fault_tolerant {
                flags.push("continue-on-error".to_string());
            }
            if let Some(minutes) = instance.timeout_minutes {
                flags.push(format!("timeout {}m", minutes));
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            let _ = writeln!(
                out,
                "  {:>3}  {}{}  {}",
                instance.index,
                instance.display_name,
                style(flags).yellow(),
                style(instance.id.fingerprint()).dim()
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::ids::{InstanceId, RunId};
    use lattice_core::job::Binding;
    use lattice_core::run::{FailureReason, SkipReason, StepRecord};
    use lattice_core::trigger::TriggerEvent;
    use serde_json::json;

    fn instance(job: &str, toolchain: &str, fault_tolerant: bool) -> JobInstance {
        let value = json!(toolchain);
        JobInstance {
            id: InstanceId::new(job, [("toolchain", &value)]),
            job_name: job.to_string(),
            index: 0,
            bindings: vec![Binding {
                axis: "toolchain".into(),
                value,
            }],
            fault_tolerant,
            timeout_minutes: None,
            display_name: format!("{} (toolchain={})", job, toolchain),
        }
    }

    fn failing_step() -> StepRecord {
        StepRecord {
            name: "cargo test".into(),
            success: false,
            exit_code: Some(101),
            duration_ms: 10,
            output: "running 3 tests\ntest result: FAILED".into(),
        }
    }

    #[test]
    fn test_result_table_lists_every_instance() {
        let failure = FailureReason::StepFailed {
            step: "cargo test".into(),
            exit_code: Some(101),
        };
        let results = vec![
            ExecutionResult::passed(&instance("test", "stable", false), vec![]),
            ExecutionResult::failed(
                &instance("test", "beta", false),
                failure.clone(),
                vec![failing_step()],
            ),
            ExecutionResult::failed(&instance("test", "nightly", true), failure, vec![]),
            ExecutionResult::skipped(
                &instance("publish", "stable", false),
                SkipReason::Dependency { job: "test".into() },
            ),
        ];
        let result = PipelineResult {
            run_id: RunId::new(),
            pipeline_name: "ci".into(),
            event: TriggerEvent::push("master"),
            status: PipelineStatus::aggregate(&results),
            results,
            started_at: chrono::Utc::now(),
            duration_ms: 1500,
        };

        let table = console::strip_ansi_codes(&result_table(&result)).to_string();
        assert!(table.contains("test (toolchain=stable)"));
        assert!(table.contains("failed (allowed)"));
        assert!(table.contains("step `cargo test` exited with 101"));
        assert!(table.contains("dependency `test` did not succeed"));
        assert!(table.contains("    test result: FAILED"));
        assert!(table.contains("1 passed, 1 failed, 1 failed (allowed), 1 skipped"));
        assert!(table.contains("Pipeline ci failed in 1.50s"));
    }

    #[test]
    fn test_untriggered_pipeline() {
        let result = PipelineResult::not_triggered(RunId::new(), "ci", TriggerEvent::push("dev"));
        let table = console::strip_ansi_codes(&result_table(&result)).to_string();
        assert!(table.contains("Pipeline ci not triggered by push to dev"));
    }

    #[test]
    fn test_instance_table_marks_fault_tolerant() {
        let instances = vec![
            instance("test", "stable", false),
            instance("test", "nightly", true),
        ];
        let table = console::strip_ansi_codes(&instance_table(&[("test", &instances)])).to_string();
        assert!(table.contains("test (2 instances)"));
        assert!(table.contains("test (toolchain=nightly) [continue-on-error]"));
        assert!(table.contains(&instances[1].id.fingerprint()));
    }
}
