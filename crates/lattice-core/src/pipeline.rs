//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    /// Process-wide variables handed to every step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Execution slots shared by every job instance of a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    pub event: TriggerType,
    /// Branch glob patterns. Empty matches every branch.
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Push,
    PullRequest,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::Push => write!(f, "push"),
            TriggerType::PullRequest => write!(f, "pull_request"),
        }
    }
}

/// Per-job predicate evaluated against the triggering event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobCondition {
    #[serde(default)]
    pub events: Vec<TriggerType>,
    #[serde(default)]
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Fault tolerance applied to every instance unless a matrix entry overrides it.
    #[serde(default, alias = "continue_on_error")]
    pub continue_on_error_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<JobCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixConfig>,
    pub steps: Vec<StepReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    #[serde(default)]
    pub axes: AxisSet,
    /// Mode for include entries that do not state their own.
    #[serde(default)]
    pub include_mode: IncludeMode,
    #[serde(default)]
    pub include: Vec<IncludeEntry>,
    #[serde(default)]
    pub exclude: Vec<ExcludeEntry>,
    /// Upper bound on concurrently running instances of this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

/// How an include entry relates to the generated combinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncludeMode {
    /// A fully specified combination, appended when not already generated.
    #[default]
    Add,
    /// Attributes merged onto every generated combination it matches.
    Override,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IncludeEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<IncludeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    /// Axis values selected by this entry.
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl IncludeEntry {
    pub fn effective_mode(&self, default: IncludeMode) -> IncludeMode {
        self.mode.unwrap_or(default)
    }
}

/// Keys of an [`IncludeEntry`] that cannot double as axis names.
pub const RESERVED_AXIS_NAMES: [&str; 3] = ["mode", "continue_on_error", "timeout_minutes"];

/// Full or partial tuple removed from the expansion.
pub type ExcludeEntry = BTreeMap<String, serde_json::Value>;

/// A named matrix dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<serde_json::Value>,
}

/// Axes in declaration order.
///
/// Serialized as a YAML/JSON mapping; the order of keys in the source is the
/// order used for the cartesian product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisSet(Vec<Axis>);

impl AxisSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis. Returns `false` if the name is already declared.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.0.push(Axis { name, values });
        true
    }

    pub fn with_axis(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.insert(name, values);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|a| a.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Axis> {
        self.0.iter().find(|a| a.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|a| a.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Axis> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a AxisSet {
    type Item = &'a Axis;
    type IntoIter = std::slice::Iter<'a, Axis>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for AxisSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for axis in &self.0 {
            map.serialize_entry(&axis.name, &axis.values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AxisSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AxisSetVisitor;

        impl<'de> Visitor<'de> for AxisSetVisitor {
            type Value = AxisSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of axis names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AxisSet, A::Error> {
                let mut axes = AxisSet::new();
                while let Some((name, values)) =
                    map.next_entry::<String, Vec<serde_json::Value>>()?
                {
                    if axes.contains(&name) {
                        return Err(de::Error::custom(format!("duplicate axis `{}`", name)));
                    }
                    if RESERVED_AXIS_NAMES.contains(&name.as_str()) {
                        return Err(de::Error::custom(format!(
                            "axis name `{}` is reserved for include entry attributes",
                            name
                        )));
                    }
                    axes.insert(name, values);
                }
                Ok(axes)
            }
        }

        deserializer.deserialize_map(AxisSetVisitor)
    }
}

impl JsonSchema for AxisSet {
    fn schema_name() -> String {
        "AxisSet".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <HashMap<String, Vec<serde_json::Value>>>::json_schema(generator)
    }
}

/// An opaque unit of work handed to the step runner.
///
/// The recognized options form a closed set per kind: `run` steps accept
/// `shell`, `working_directory` and `env`; `uses` steps accept `with`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StepReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, serde_json::Value>,
}

/// The resolved kind of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind<'a> {
    Run(&'a str),
    Uses(&'a str),
}

impl StepReference {
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            run: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn uses(action: impl Into<String>) -> Self {
        Self {
            uses: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check the option set and return the step kind.
    pub fn kind(&self) -> Result<StepKind<'_>, String> {
        match (&self.run, &self.uses) {
            (Some(_), Some(_)) => Err("`run` and `uses` are mutually exclusive".to_string()),
            (None, None) => Err("one of `run` or `uses` is required".to_string()),
            (Some(command), None) => {
                if !self.with.is_empty() {
                    return Err("`with` is only valid on `uses` steps".to_string());
                }
                if command.trim().is_empty() {
                    return Err("`run` command is empty".to_string());
                }
                Ok(StepKind::Run(command))
            }
            (None, Some(action)) => {
                let misplaced: Vec<&str> = [
                    ("shell", self.shell.is_some()),
                    ("working_directory", self.working_directory.is_some()),
                    ("env", !self.env.is_empty()),
                ]
                .into_iter()
                .filter_map(|(opt, set)| set.then_some(opt))
                .collect();
                if !misplaced.is_empty() {
                    return Err(format!(
                        "options {:?} are only valid on `run` steps",
                        misplaced
                    ));
                }
                if action.trim().is_empty() {
                    return Err("`uses` action is empty".to_string());
                }
                Ok(StepKind::Uses(action))
            }
        }
    }

    /// Name shown in logs and reports.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(action) = &self.uses {
            return action.clone();
        }
        self.run
            .as_deref()
            .and_then(|cmd| cmd.lines().find(|l| !l.trim().is_empty()))
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| "step".to_string())
    }
}
