//! Trigger matching and evaluation.

use lattice_core::pipeline::{JobCondition, PipelineDefinition, TriggerConfig};
use lattice_core::trigger::TriggerEvent;

/// Matcher for determining if a pipeline or job should be triggered.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a pipeline should be triggered by an event.
    ///
    /// A pipeline without trigger rules is never activated.
    pub fn matches(&self, pipeline: &PipelineDefinition, event: &TriggerEvent) -> bool {
        pipeline
            .triggers
            .iter()
            .any(|trigger| self.trigger_matches(trigger, event))
    }

    /// Check a job's own condition. A job without a condition always runs.
    pub fn condition_matches(&self, condition: Option<&JobCondition>, event: &TriggerEvent) -> bool {
        let Some(condition) = condition else {
            return true;
        };
        let event_ok =
            condition.events.is_empty() || condition.events.contains(&event.trigger_type());
        event_ok && self.branch_matches(&condition.branches, event.filter_branch())
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        trigger.event == event.trigger_type()
            && self.branch_matches(&trigger.branches, event.filter_branch())
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    /// `*` matches within one path segment, `**` across segments.
    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        wildcard(pattern.as_bytes(), text.as_bytes())
    }
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    match pattern {
        [] => text.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=text.len()).any(|i| wildcard(rest, &text[i..])),
        [b'*', rest @ ..] => {
            let segment_end = text.iter().position(|&c| c == b'/').unwrap_or(text.len());
            (0..=segment_end).any(|i| wildcard(rest, &text[i..]))
        }
        [c, rest @ ..] => text.first() == Some(c) && wildcard(rest, &text[1..]),
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::pipeline::TriggerType;

    fn pipeline(triggers: Vec<TriggerConfig>) -> PipelineDefinition {
        PipelineDefinition {
            name: "ci".into(),
            triggers,
            ..Default::default()
        }
    }

    fn trigger(event: TriggerType, branches: &[&str]) -> TriggerConfig {
        TriggerConfig {
            event,
            branches: branches.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_branch_match_exact() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&["main".to_string()], "main"));
        assert!(!matcher.branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_branch_match_glob() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(!matcher.branch_matches(&["feature/*".to_string()], "feature/foo/bar"));
        assert!(matcher.branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
        assert!(matcher.branch_matches(&["v*.x".to_string()], "v1.x"));
        assert!(!matcher.branch_matches(&["v*.x".to_string()], "v1.y"));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&[], "any-branch"));
    }

    #[test]
    fn test_push_and_pull_request_rules() {
        let matcher = TriggerMatcher::new();
        let def = pipeline(vec![
            trigger(TriggerType::Push, &["master"]),
            trigger(TriggerType::PullRequest, &[]),
        ]);

        assert!(matcher.matches(&def, &TriggerEvent::push("master")));
        assert!(!matcher.matches(&def, &TriggerEvent::push("feature/x")));
        assert!(matcher.matches(&def, &TriggerEvent::pull_request("feature/x", "anything")));
    }

    #[test]
    fn test_pull_request_matches_target_branch() {
        let matcher = TriggerMatcher::new();
        let def = pipeline(vec![trigger(TriggerType::PullRequest, &["master"])]);
        assert!(matcher.matches(&def, &TriggerEvent::pull_request("feature/x", "master")));
        assert!(!matcher.matches(&def, &TriggerEvent::pull_request("master", "release")));
    }

    #[test]
    fn test_no_triggers_never_activates() {
        let matcher = TriggerMatcher::new();
        assert!(!matcher.matches(&pipeline(vec![]), &TriggerEvent::push("main")));
    }

    #[test]
    fn test_job_condition() {
        let matcher = TriggerMatcher::new();
        let push_to_master = JobCondition {
            events: vec![TriggerType::Push],
            branches: vec!["master".into()],
        };

        assert!(matcher.condition_matches(None, &TriggerEvent::push("dev")));
        assert!(matcher.condition_matches(Some(&push_to_master), &TriggerEvent::push("master")));
        assert!(!matcher.condition_matches(Some(&push_to_master), &TriggerEvent::push("dev")));
        assert!(!matcher.condition_matches(
            Some(&push_to_master),
            &TriggerEvent::pull_request("x", "master")
        ));
    }
}
