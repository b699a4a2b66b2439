//! CLI configuration management.

use anyhow::{Context, Result, anyhow, bail};
use clap::ValueEnum;
use lattice_runner::{ActionPolicy, RunnerConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CliConfig {
    /// Default limit on concurrently running instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// What the shell runner does with `uses` steps.
    #[serde(default)]
    pub action_policy: ActionPolicy,
    /// Shell for `run` steps that do not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Per-step limit enforced by the shell runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_seconds: Option<u64>,
    /// Extra attempts for a failing `run` step.
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl CliConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "lattice-ci", "lattice")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value. `none` clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let cleared = value == "none";
        match key {
            "max_parallel" => {
                self.max_parallel = if cleared {
                    None
                } else {
                    let n: usize = value
                        .parse()
                        .with_context(|| format!("Invalid max_parallel: {}", value))?;
                    if n == 0 {
                        bail!("max_parallel must be at least 1");
                    }
                    Some(n)
                };
            }
            "output_format" => {
                self.output_format = OutputFormat::from_str(value, true)
                    .map_err(|_| anyhow!("Invalid output format: {}", value))?;
            }
            "action_policy" => {
                self.action_policy = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "shell" => {
                self.shell = (!cleared).then(|| value.to_string());
            }
            "step_timeout_seconds" => {
                self.step_timeout_seconds = if cleared {
                    None
                } else {
                    Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid step_timeout_seconds: {}", value))?,
                    )
                };
            }
            "retry_count" => {
                self.retry_count = value
                    .parse()
                    .with_context(|| format!("Invalid retry_count: {}", value))?;
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Shell runner settings derived from this configuration.
    pub fn runner_config(&self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            timeout_seconds: self.step_timeout_seconds,
            retry_count: self.retry_count,
            default_shell: self.shell.clone().unwrap_or(defaults.default_shell),
            action_policy: self.action_policy,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_and_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = CliConfig::load_from(&path).unwrap();
        assert_eq!(config, CliConfig::default());

        config.set("max_parallel", "4").unwrap();
        config.set("output_format", "json").unwrap();
        config.set("action_policy", "fail").unwrap();
        config.set("shell", "bash").unwrap();
        config.save_to(&path).unwrap();

        let loaded = CliConfig::load_from(&path).unwrap();
        assert_eq!(loaded.max_parallel, Some(4));
        assert_eq!(loaded.output_format, OutputFormat::Json);
        assert_eq!(loaded.action_policy, ActionPolicy::Fail);
        assert_eq!(loaded.runner_config().default_shell, "bash");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = CliConfig::default();
        assert!(config.set("max_parallel", "0").is_err());
        assert!(config.set("max_parallel", "many").is_err());
        assert!(config.set("output_format", "xml").is_err());
        assert!(config.set("colour", "always").is_err());
    }

    #[test]
    fn test_none_clears_optional_keys() {
        let mut config = CliConfig::default();
        config.set("step_timeout_seconds", "30").unwrap();
        assert_eq!(config.runner_config().timeout_seconds, Some(30));
        config.set("step_timeout_seconds", "none").unwrap();
        assert_eq!(config.step_timeout_seconds, None);
    }
}
