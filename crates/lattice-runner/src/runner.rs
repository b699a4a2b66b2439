//! Runner configuration and output types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output line from step execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// What a runner does with `uses` steps it cannot execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPolicy {
    /// Report the step as passed without running anything.
    #[default]
    Noop,
    /// Report the step as failed.
    Fail,
}

impl fmt::Display for ActionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPolicy::Noop => write!(f, "noop"),
            ActionPolicy::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for ActionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noop" => Ok(ActionPolicy::Noop),
            "fail" => Ok(ActionPolicy::Fail),
            other => Err(format!("unknown action policy `{}` (expected noop or fail)", other)),
        }
    }
}

/// Configuration for step execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Per-step limit; `None` lets a step run until the instance timeout.
    pub timeout_seconds: Option<u64>,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Shell used when a step does not name one.
    pub default_shell: String,
    pub action_policy: ActionPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            retry_count: 0,
            retry_delay_ms: 1000,
            default_shell: "sh".to_string(),
            action_policy: ActionPolicy::Noop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_policy_parse() {
        assert_eq!("noop".parse::<ActionPolicy>().unwrap(), ActionPolicy::Noop);
        assert_eq!("fail".parse::<ActionPolicy>().unwrap(), ActionPolicy::Fail);
        assert!("docker".parse::<ActionPolicy>().is_err());
        assert_eq!(ActionPolicy::Fail.to_string(), "fail");
    }
}
