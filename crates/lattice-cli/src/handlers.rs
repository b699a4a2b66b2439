//! Command handlers.
//!
//! Every handler returns the process exit code on success. Errors are
//! configuration or input problems and are reported by `main`.

use crate::commands::EventKind;
use crate::config::{CliConfig, OutputFormat};
use crate::render;
use anyhow::{Context, Result, bail};
use console::style;
use lattice_core::job::JobInstance;
use lattice_core::pipeline::PipelineDefinition;
use lattice_core::ports::StepRunner;
use lattice_core::run::PipelineResult;
use lattice_core::trigger::TriggerEvent;
use lattice_runner::{DryRunRunner, ShellRunner};
use lattice_scheduler::{Scheduler, SchedulerConfig, Validator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options of the `run` command.
pub struct RunOptions {
    pub path: PathBuf,
    pub event: EventKind,
    pub branch: String,
    pub base: String,
    pub max_parallel: Option<usize>,
    pub dry_run: bool,
    pub workspace: Option<PathBuf>,
    pub secrets_file: Option<PathBuf>,
    pub format: Option<OutputFormat>,
}

/// Read and parse a pipeline definition.
pub fn load_definition(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid pipeline definition in {}", path.display()))
}

/// Build the triggering event from command-line flags.
pub fn build_event(kind: EventKind, branch: &str, base: &str) -> TriggerEvent {
    match kind {
        EventKind::Push => TriggerEvent::push(branch),
        EventKind::PullRequest => TriggerEvent::pull_request(branch, base),
    }
}

/// Read `KEY=value` pairs from a dotenv-style file.
pub fn load_secrets(path: &Path) -> Result<BTreeMap<String, String>> {
    let entries = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open secrets file {}", path.display()))?;
    let mut secrets = BTreeMap::new();
    for entry in entries {
        let (key, value) =
            entry.with_context(|| format!("Invalid entry in secrets file {}", path.display()))?;
        secrets.insert(key, value);
    }
    Ok(secrets)
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Table => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

/// Run a pipeline locally.
pub async fn run_pipeline(config: &CliConfig, opts: RunOptions) -> Result<u8> {
    let definition = load_definition(&opts.path)?;
    let event = build_event(opts.event, &opts.branch, &opts.base);
    let format = opts.format.unwrap_or(config.output_format);

    let secrets = match &opts.secrets_file {
        Some(path) => load_secrets(path)?,
        None => BTreeMap::new(),
    };
    let workspace = match opts.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let runner: Arc<dyn StepRunner> = if opts.dry_run {
        Arc::new(DryRunRunner::new())
    } else {
        Arc::new(ShellRunner::new(config.runner_config()))
    };
    let scheduler = Scheduler::with_config(
        runner,
        SchedulerConfig {
            max_parallel: opts.max_parallel.or(config.max_parallel),
            workspace,
            secrets,
        },
    );

    if format == OutputFormat::Table {
        println!(
            "\n{} Running pipeline: {} ({})\n",
            style("▶").cyan().bold(),
            style(&definition.name).bold(),
            event
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping at the next step boundary");
            on_interrupt.cancel();
        }
    });

    let result = scheduler
        .run_with_cancel(&definition, event, cancel)
        .await
        .context("Pipeline could not be scheduled")?;

    report(&result, format)?;
    Ok(result.status.exit_code())
}

fn report(result: &PipelineResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print!("{}", render::result_table(result)),
        structured => print_structured(result, structured)?,
    }
    Ok(())
}

/// Validate a pipeline configuration.
pub fn validate(path: &Path) -> Result<u8> {
    let definition = load_definition(path)?;
    let plan = Validator::new()
        .plan(&definition)
        .with_context(|| format!("Pipeline {} is invalid", path.display()))?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!(
        "  Jobs: {}, instances: {}",
        plan.dag.len(),
        plan.instance_count()
    );

    for job in plan.dag.order() {
        let instances = plan.expansion(job).map_or(0, |e| e.len());
        let deps = plan.dag.dependencies(job);
        if deps.is_empty() {
            println!("    - {} ({} instances)", job, instances);
        } else {
            println!(
                "    - {} ({} instances, after {})",
                job,
                instances,
                deps.join(", ")
            );
        }
    }

    if definition.triggers.is_empty() {
        println!(
            "{} No triggers defined; this pipeline never runs",
            style("!").yellow()
        );
    }

    Ok(0)
}

/// Print compiled job instances.
pub fn expand(
    config: &CliConfig,
    path: &Path,
    job: Option<&str>,
    format: Option<OutputFormat>,
) -> Result<u8> {
    let definition = load_definition(path)?;
    let plan = Validator::new()
        .plan(&definition)
        .with_context(|| format!("Pipeline {} is invalid", path.display()))?;

    if let Some(name) = job
        && definition.job(name).is_none()
    {
        bail!("Pipeline {} has no job named {}", definition.name, name);
    }

    let jobs: Vec<(&str, &[JobInstance])> = plan
        .dag
        .order()
        .iter()
        .filter(|name| job.is_none_or(|wanted| wanted == name.as_str()))
        .filter_map(|name| {
            plan.expansion(name)
                .map(|e| (name.as_str(), e.instances.as_slice()))
        })
        .collect();
    info!(jobs = jobs.len(), "Expanded pipeline");

    match format.unwrap_or(config.output_format) {
        OutputFormat::Table => print!("{}", render::instance_table(&jobs)),
        structured => {
            let instances: Vec<&JobInstance> =
                jobs.iter().flat_map(|(_, instances)| instances.iter()).collect();
            print_structured(&instances, structured)?;
        }
    }
    Ok(0)
}

/// Print the JSON Schema of the pipeline format.
pub fn schema() -> Result<u8> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(0)
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<u8> {
    let unset = || "(not set)".to_string();
    println!("Current configuration:");
    println!(
        "  max_parallel: {}",
        config.max_parallel.map_or_else(unset, |n| n.to_string())
    );
    println!("  output_format: {}", config.output_format);
    println!("  action_policy: {}", config.action_policy);
    println!(
        "  shell: {}",
        config.shell.clone().unwrap_or_else(unset)
    );
    println!(
        "  step_timeout_seconds: {}",
        config
            .step_timeout_seconds
            .map_or_else(unset, |n| n.to_string())
    );
    println!("  retry_count: {}", config.retry_count);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(0)
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<u8> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::ConfigError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_event() {
        assert_eq!(
            build_event(EventKind::Push, "main", "ignored"),
            TriggerEvent::push("main")
        );
        assert_eq!(
            build_event(EventKind::PullRequest, "feature/x", "master"),
            TriggerEvent::pull_request("feature/x", "master")
        );
    }

    #[test]
    fn test_load_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        std::fs::write(&path, "# comment\nTOKEN=abc123\nQUOTED=\"with space\"\n").unwrap();

        let secrets = load_secrets(&path).unwrap();
        assert_eq!(secrets.get("TOKEN").map(String::as_str), Some("abc123"));
        assert_eq!(secrets.get("QUOTED").map(String::as_str), Some("with space"));
        assert!(load_secrets(&dir.path().join("missing.env")).is_err());
    }

    #[test]
    fn test_load_definition_reports_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.yaml");
        std::fs::write(&path, "name: ci\njobs:\n  - name: a\n    stages: []\n").unwrap();

        let err = load_definition(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid pipeline definition"));
    }

    #[test]
    fn test_validate_surfaces_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.yaml");
        std::fs::write(
            &path,
            "name: ci\njobs:\n  - name: a\n    depends_on: [ghost]\n    steps:\n      - run: \"true\"\n",
        )
        .unwrap();

        let err = validate(&path).unwrap_err();
        let config_error = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_error, ConfigError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.yaml");
        std::fs::write(
            &path,
            r#"
name: ci
triggers:
  - event: push
    branches: [main]
jobs:
  - name: build
    steps:
      - run: exit 1
"#,
        )
        .unwrap();

        let opts = |branch: &str| RunOptions {
            path: path.clone(),
            event: EventKind::Push,
            branch: branch.to_string(),
            base: "main".to_string(),
            max_parallel: None,
            dry_run: true,
            workspace: Some(dir.path().to_path_buf()),
            secrets_file: None,
            format: Some(OutputFormat::Json),
        };

        let config = CliConfig::default();
        assert_eq!(run_pipeline(&config, opts("main")).await.unwrap(), 0);
        assert_eq!(run_pipeline(&config, opts("develop")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shell_failure_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lattice.yaml");
        std::fs::write(
            &path,
            r#"
name: ci
triggers:
  - event: push
jobs:
  - name: build
    steps:
      - run: exit 1
"#,
        )
        .unwrap();

        let opts = RunOptions {
            path,
            event: EventKind::Push,
            branch: "main".to_string(),
            base: "main".to_string(),
            max_parallel: Some(1),
            dry_run: false,
            workspace: Some(dir.path().to_path_buf()),
            secrets_file: None,
            format: Some(OutputFormat::Yaml),
        };
        assert_eq!(
            run_pipeline(&CliConfig::default(), opts).await.unwrap(),
            1
        );
    }
}
