//! Events that can activate a pipeline.

use crate::pipeline::TriggerType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event that can trigger a pipeline.
///
/// The event is always passed explicitly into the scheduler so a run can be
/// replayed deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push {
        branch: String,
    },
    PullRequest {
        source_branch: String,
        target_branch: String,
    },
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        TriggerEvent::Push {
            branch: branch.into(),
        }
    }

    pub fn pull_request(source: impl Into<String>, target: impl Into<String>) -> Self {
        TriggerEvent::PullRequest {
            source_branch: source.into(),
            target_branch: target.into(),
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerEvent::Push { .. } => TriggerType::Push,
            TriggerEvent::PullRequest { .. } => TriggerType::PullRequest,
        }
    }

    /// Branch matched against branch filters: the pushed branch, or the
    /// target branch of a pull request.
    pub fn filter_branch(&self) -> &str {
        match self {
            TriggerEvent::Push { branch } => branch,
            TriggerEvent::PullRequest { target_branch, .. } => target_branch,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push to {}", branch),
            TriggerEvent::PullRequest {
                source_branch,
                target_branch,
            } => write!(f, "pull request {} -> {}", source_branch, target_branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_filters_on_target() {
        let event = TriggerEvent::pull_request("feature/x", "master");
        assert_eq!(event.filter_branch(), "master");
        assert_eq!(event.trigger_type(), TriggerType::PullRequest);
    }

    #[test]
    fn test_event_json_shape() {
        let event: TriggerEvent =
            serde_json::from_str(r#"{"event":"push","branch":"main"}"#).unwrap();
        assert_eq!(event, TriggerEvent::push("main"));
    }
}
