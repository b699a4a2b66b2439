//! Strongly-typed identifiers for domain entities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }
    };
}

define_id!(RunId, "run");

/// Identity of a job instance: the job name plus its `(axis, value)` tuple.
///
/// The textual form is `job[axis=value,...]`, or just `job` for instances
/// without matrix bindings. Job names may not contain `[`, `]`, `=` or `,`,
/// so ids of different jobs never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new<'a, I>(job: &str, bindings: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a serde_json::Value)>,
    {
        let parts: Vec<String> = bindings
            .into_iter()
            .map(|(axis, value)| format!("{}={}", axis, value))
            .collect();

        if parts.is_empty() {
            Self(job.to_string())
        } else {
            Self(format!("{}[{}]", job, parts.join(",")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short stable digest of the identity, suitable for directory or log keys.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_id_display() {
        let id = RunId::new();
        let s = id.to_string();
        assert!(s.starts_with("run_"));
    }

    #[test]
    fn test_run_id_parse() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_instance_id_includes_job_and_bindings() {
        let toolchain = json!("stable");
        let features = json!("");
        let id = InstanceId::new(
            "test",
            [("toolchain", &toolchain), ("features", &features)],
        );
        assert_eq!(id.as_str(), r#"test[toolchain="stable",features=""]"#);
    }

    #[test]
    fn test_instance_id_without_bindings_is_job_name() {
        let id = InstanceId::new("style", std::iter::empty());
        assert_eq!(id.as_str(), "style");
    }

    #[test]
    fn test_same_tuple_in_different_jobs_differs() {
        let v = json!("stable");
        let a = InstanceId::new("compile", [("toolchain", &v)]);
        let b = InstanceId::new("test", [("toolchain", &v)]);
        assert_ne!(a, b);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let v = json!("beta");
        let a = InstanceId::new("test", [("toolchain", &v)]);
        let b = InstanceId::new("test", [("toolchain", &v)]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
    }
}
