//! Concrete job instances produced by matrix expansion.

use crate::ids::InstanceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One `(axis, value)` binding of a job instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub axis: String,
    pub value: serde_json::Value,
}

impl Binding {
    /// The value as it appears in interpolation and environment variables.
    pub fn value_str(&self) -> String {
        value_to_string(&self.value)
    }
}

pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One concrete, fully-bound execution unit.
///
/// Instances are immutable once compiled and are consumed exactly once by the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: InstanceId,
    pub job_name: String,
    pub index: usize,
    /// One binding per declared axis, in declaration order.
    pub bindings: Vec<Binding>,
    pub fault_tolerant: bool,
    pub timeout_minutes: Option<u32>,
    pub display_name: String,
}

impl JobInstance {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60))
    }

    /// Bindings keyed by axis name, stringified.
    pub fn matrix(&self) -> BTreeMap<String, String> {
        self.bindings
            .iter()
            .map(|b| (b.axis.clone(), b.value_str()))
            .collect()
    }

    pub fn value(&self, axis: &str) -> Option<&serde_json::Value> {
        self.bindings
            .iter()
            .find(|b| b.axis == axis)
            .map(|b| &b.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("stable")), "stable");
        assert_eq!(value_to_string(&json!(1.75)), "1.75");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!(null)), "");
    }

    #[test]
    fn test_timeout_minutes_to_duration() {
        let instance = JobInstance {
            id: InstanceId::new("t", std::iter::empty()),
            job_name: "t".into(),
            index: 0,
            bindings: vec![],
            fault_tolerant: false,
            timeout_minutes: Some(2),
            display_name: "t".into(),
        };
        assert_eq!(instance.timeout(), Some(Duration::from_secs(120)));
    }
}
