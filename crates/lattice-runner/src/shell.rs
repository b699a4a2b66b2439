//! Shell-based step execution on the host.

use crate::runner::{ActionPolicy, OutputLine, OutputStream, RunnerConfig};
use async_trait::async_trait;
use lattice_core::interpolation::InterpolationContext;
use lattice_core::job::value_to_string;
use lattice_core::pipeline::{StepKind, StepReference};
use lattice_core::ports::{StepContext, StepOutcome, StepRunner};
use lattice_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

/// Shell runner for executing commands on the host.
pub struct ShellRunner {
    config: RunnerConfig,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn execute_command(
        &self,
        script: &str,
        shell: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        interp: &InterpolationContext,
    ) -> Result<StepOutcome> {
        let start = std::time::Instant::now();
        let (program, args) = shell_invocation(shell);

        info!(shell = %program, workspace = %cwd.display(), "Executing shell command");

        let mut child = Command::new(program)
            .args(&args)
            .arg(script)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Runner(format!("Failed to spawn `{}`: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Runner("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Runner("stderr was not captured".to_string()))?;

        let (output_tx, mut output_rx) = mpsc::channel::<OutputLine>(256);
        let stdout_handle = tokio::spawn(stream_lines(
            stdout,
            OutputStream::Stdout,
            output_tx.clone(),
        ));
        let stderr_handle = tokio::spawn(stream_lines(stderr, OutputStream::Stderr, output_tx));

        // Collect until both streams close
        let masker = interp.clone();
        let collector = tokio::spawn(async move {
            let mut captured = Vec::new();
            while let Some(line) = output_rx.recv().await {
                let content = masker.mask_secrets(&line.content);
                debug!(stream = ?line.stream, line = line.line_number, "{}", content);
                captured.push(content);
            }
            captured
        });

        // Wait for process with optional timeout
        let wait_result = if let Some(timeout_secs) = self.config.timeout_seconds {
            match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs, "Command timed out, killing process");
                    let _ = child.kill().await;
                    return Err(Error::Runner(format!(
                        "Command timed out after {}s",
                        timeout_secs
                    )));
                }
            }
        } else {
            child.wait().await
        };

        // Wait for output streaming to complete
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;
        let output = collector.await.unwrap_or_default().join("\n");

        let status =
            wait_result.map_err(|e| Error::Runner(format!("Failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(exit_code, duration_ms, "Command completed");

        Ok(StepOutcome {
            success: exit_code == 0,
            exit_code: Some(exit_code),
            duration_ms,
            output,
        })
    }

    async fn run_command(
        &self,
        step: &StepReference,
        command: &str,
        ctx: &StepContext,
        interp: &InterpolationContext,
    ) -> Result<StepOutcome> {
        let script = interp.interpolate(command);
        let shell = step.shell.as_deref().unwrap_or(&self.config.default_shell);
        let cwd = match &step.working_directory {
            Some(dir) => ctx.workspace.join(interp.interpolate(dir)),
            None => ctx.workspace.clone(),
        };
        let env = process_env(ctx, interp, &cwd);

        // Handle retries
        let mut last_error = None;
        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                info!(attempt, "Retrying command");
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            match self.execute_command(&script, shell, &cwd, &env, interp).await {
                Ok(result) if result.success => return Ok(result),
                Ok(result) if attempt == self.config.retry_count => return Ok(result),
                Ok(_) => {
                    warn!(attempt, "Command failed, will retry");
                }
                Err(e) if attempt == self.config.retry_count => {
                    error!(error = %e, "Command failed after all retries");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Command error, will retry");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("Unknown error".to_string())))
    }

    fn run_action(
        &self,
        action: &str,
        step: &StepReference,
        interp: &InterpolationContext,
    ) -> StepOutcome {
        let inputs: Vec<String> = step
            .with
            .iter()
            .map(|(key, value)| {
                format!("{}={}", key, interp.interpolate(&value_to_string(value)))
            })
            .collect();
        let described = interp.mask_secrets(&if inputs.is_empty() {
            format!("action `{}`", action)
        } else {
            format!("action `{}` ({})", action, inputs.join(", "))
        });

        match self.config.action_policy {
            ActionPolicy::Noop => {
                info!(action, "Action step not executed, reporting success");
                StepOutcome::success(format!("{} not executed", described))
            }
            ActionPolicy::Fail => {
                warn!(action, "Action steps are not supported by the shell runner");
                StepOutcome::failure(None, format!("{} is not supported", described))
            }
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, step: &StepReference, ctx: &StepContext) -> Result<StepOutcome> {
        let interp = InterpolationContext::for_step(ctx, &step.env);
        match step.kind().map_err(Error::Runner)? {
            StepKind::Run(command) => self.run_command(step, command, ctx, &interp).await,
            StepKind::Uses(action) => Ok(self.run_action(action, step, &interp)),
        }
    }
}

/// Program and leading arguments for a shell name; the script comes last.
fn shell_invocation(shell: &str) -> (&str, Vec<&str>) {
    match shell {
        "bash" => ("bash", vec!["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
        "sh" => ("sh", vec!["-e", "-c"]),
        "pwsh" | "powershell" => (shell, vec!["-NoProfile", "-Command"]),
        other => (other, vec!["-c"]),
    }
}

/// Variables, matrix values and secrets, plus the run metadata every step sees.
fn process_env(
    ctx: &StepContext,
    interp: &InterpolationContext,
    cwd: &Path,
) -> BTreeMap<String, String> {
    let mut env = interp.environment();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("LATTICE_JOB".to_string(), ctx.job_name.clone());
    if let Some(instance) = &ctx.instance {
        env.insert("LATTICE_INSTANCE".to_string(), instance.to_string());
    }
    env.insert("LATTICE_WORKSPACE".to_string(), cwd.display().to_string());
    env
}

async fn stream_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0u32;

    while let Ok(Some(line)) = lines.next_line().await {
        line_number += 1;
        let output = OutputLine {
            stream,
            content: line,
            line_number,
            timestamp: chrono::Utc::now(),
        };
        if tx.send(output).await.is_err() {
            break;
        }
    }
}
