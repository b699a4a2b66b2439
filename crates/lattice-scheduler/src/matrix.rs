//! Matrix expansion for parallel job generation.

use lattice_core::ConfigError;
use lattice_core::ids::InstanceId;
use lattice_core::job::{Binding, JobInstance};
use lattice_core::pipeline::{AxisSet, IncludeEntry, IncludeMode, JobDefinition};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub job_name: String,
    pub instances: Vec<JobInstance>,
    pub max_parallel: Option<usize>,
}

impl MatrixExpansion {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// A combination under construction: values plus mergeable attributes.
#[derive(Debug, Clone)]
struct Combination {
    values: Vec<Binding>,
    fault_tolerant: bool,
    timeout_minutes: Option<u32>,
}

impl Combination {
    fn merge(&mut self, entry: &IncludeEntry) {
        if let Some(continue_on_error) = entry.continue_on_error {
            self.fault_tolerant = continue_on_error;
        }
        if let Some(minutes) = entry.timeout_minutes {
            self.timeout_minutes = Some(minutes);
        }
    }

    fn same_tuple(&self, other: &[Binding]) -> bool {
        self.values == other
    }

    fn matches(&self, selector: &BTreeMap<String, serde_json::Value>) -> bool {
        selector.iter().all(|(axis, value)| {
            self.values
                .iter()
                .any(|b| &b.axis == axis && &b.value == value)
        })
    }

    fn key(&self) -> String {
        self.values
            .iter()
            .map(|b| format!("{}={}", b.axis, b.value))
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a job's matrix configuration into individual instances.
    ///
    /// Jobs without a matrix expand to a single instance with no bindings.
    /// The output order is the cartesian product in axis declaration order,
    /// followed by added include entries in declaration order.
    pub fn expand(&self, job: &JobDefinition) -> Result<MatrixExpansion, ConfigError> {
        let base = Combination {
            values: Vec::new(),
            fault_tolerant: job.continue_on_error_default,
            timeout_minutes: job.timeout_minutes,
        };

        let Some(matrix) = job.matrix.as_ref() else {
            return Ok(MatrixExpansion {
                job_name: job.name.clone(),
                instances: self.into_instances(&job.name, vec![base]),
                max_parallel: None,
            });
        };

        for axis in &matrix.axes {
            if axis.values.is_empty() {
                return Err(ConfigError::EmptyAxis {
                    job: job.name.clone(),
                    axis: axis.name.clone(),
                });
            }
        }

        let mut combinations = self.generate_combinations(&matrix.axes, &base);

        // Apply includes
        for (index, include) in matrix.include.iter().enumerate() {
            self.check_declared(&job.name, &matrix.axes, include.values.keys())?;

            match include.effective_mode(matrix.include_mode) {
                IncludeMode::Add => {
                    let missing: Vec<String> = matrix
                        .axes
                        .names()
                        .filter(|name| !include.values.contains_key(*name))
                        .map(str::to_string)
                        .collect();
                    if !missing.is_empty() {
                        return Err(ConfigError::IncompleteInclude {
                            job: job.name.clone(),
                            index,
                            missing,
                        });
                    }

                    let values: Vec<Binding> = matrix
                        .axes
                        .iter()
                        .map(|axis| Binding {
                            axis: axis.name.clone(),
                            value: include.values[&axis.name].clone(),
                        })
                        .collect();

                    match combinations.iter().position(|c| c.same_tuple(&values)) {
                        Some(pos) => {
                            debug!(job = %job.name, index, "Include entry merged onto existing combination");
                            combinations[pos].merge(include);
                        }
                        None => {
                            let mut added = Combination {
                                values,
                                ..base.clone()
                            };
                            added.merge(include);
                            combinations.push(added);
                        }
                    }
                }
                IncludeMode::Override => {
                    let mut matched = 0usize;
                    for combo in combinations.iter_mut().filter(|c| c.matches(&include.values)) {
                        combo.merge(include);
                        matched += 1;
                    }
                    if matched == 0 {
                        warn!(job = %job.name, index, "Override include entry matched no combination");
                    }
                }
            }
        }

        // Apply excludes
        for (index, exclude) in matrix.exclude.iter().enumerate() {
            self.check_declared(&job.name, &matrix.axes, exclude.keys())?;
            if exclude.is_empty() {
                return Err(ConfigError::InvalidJob {
                    job: job.name.clone(),
                    reason: format!("exclude entry #{} selects no axis", index),
                });
            }
        }
        combinations.retain(|combo| !matrix.exclude.iter().any(|ex| combo.matches(ex)));

        // Keep the first occurrence of every tuple
        let mut seen = HashSet::new();
        combinations.retain(|combo| seen.insert(combo.key()));

        Ok(MatrixExpansion {
            job_name: job.name.clone(),
            instances: self.into_instances(&job.name, combinations),
            max_parallel: matrix.max_parallel,
        })
    }

    fn generate_combinations(&self, axes: &AxisSet, base: &Combination) -> Vec<Combination> {
        let mut result = vec![base.clone()];

        for axis in axes {
            let mut new_result = Vec::with_capacity(result.len() * axis.values.len());

            for combo in &result {
                for value in &axis.values {
                    let mut new_combo = combo.clone();
                    new_combo.values.push(Binding {
                        axis: axis.name.clone(),
                        value: value.clone(),
                    });
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn check_declared<'a>(
        &self,
        job: &str,
        axes: &AxisSet,
        keys: impl Iterator<Item = &'a String>,
    ) -> Result<(), ConfigError> {
        for key in keys {
            if !axes.contains(key) {
                return Err(ConfigError::UndeclaredAxis {
                    job: job.to_string(),
                    axis: key.clone(),
                });
            }
        }
        Ok(())
    }

    fn into_instances(&self, job_name: &str, combinations: Vec<Combination>) -> Vec<JobInstance> {
        combinations
            .into_iter()
            .enumerate()
            .map(|(index, combo)| JobInstance {
                id: InstanceId::new(
                    job_name,
                    combo.values.iter().map(|b| (b.axis.as_str(), &b.value)),
                ),
                job_name: job_name.to_string(),
                index,
                display_name: self.format_display_name(job_name, &combo.values),
                bindings: combo.values,
                fault_tolerant: combo.fault_tolerant,
                timeout_minutes: combo.timeout_minutes,
            })
            .collect()
    }

    fn format_display_name(&self, job_name: &str, values: &[Binding]) -> String {
        if values.is_empty() {
            return job_name.to_string();
        }

        let parts: Vec<String> = values
            .iter()
            .map(|b| format!("{}={}", b.axis, b.value_str()))
            .collect();

        format!("{} ({})", job_name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::pipeline::{ExcludeEntry, MatrixConfig, StepReference};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn job_with(matrix: MatrixConfig) -> JobDefinition {
        JobDefinition {
            name: "test".to_string(),
            steps: vec![StepReference::run("cargo test")],
            matrix: Some(matrix),
            ..Default::default()
        }
    }

    fn toolchain_axes() -> AxisSet {
        AxisSet::new()
            .with_axis("toolchain", vec![json!("stable"), json!("beta")])
            .with_axis("features", vec![json!("")])
    }

    fn include(pairs: &[(&str, serde_json::Value)]) -> IncludeEntry {
        IncludeEntry {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    fn tuples(expansion: &MatrixExpansion) -> Vec<Vec<String>> {
        expansion
            .instances
            .iter()
            .map(|i| i.bindings.iter().map(|b| b.value_str()).collect())
            .collect()
    }

    #[test]
    fn test_matrix_expansion() {
        let axes = AxisSet::new()
            .with_axis("os", vec![json!("linux"), json!("macos")])
            .with_axis("version", vec![json!("18"), json!("20"), json!("22")]);

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes,
                max_parallel: Some(4),
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(expansion.len(), 6); // 2 OS × 3 versions
        assert_eq!(expansion.max_parallel, Some(4));
        assert_eq!(
            tuples(&expansion),
            vec![
                vec!["linux", "18"],
                vec!["linux", "20"],
                vec!["linux", "22"],
                vec!["macos", "18"],
                vec!["macos", "20"],
                vec!["macos", "22"],
            ]
        );

        let ids: HashSet<_> = expansion.instances.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_nightly_include_is_appended_fault_tolerant() {
        let mut nightly = include(&[("toolchain", json!("nightly")), ("features", json!("nightly"))]);
        nightly.continue_on_error = Some(true);

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include: vec![nightly],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(
            tuples(&expansion),
            vec![
                vec!["stable", ""],
                vec!["beta", ""],
                vec!["nightly", "nightly"],
            ]
        );
        let flags: Vec<bool> = expansion.instances.iter().map(|i| i.fault_tolerant).collect();
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(expansion.instances[2].index, 2);
        assert_eq!(
            expansion.instances[2].display_name,
            "test (toolchain=nightly, features=nightly)"
        );
    }

    #[test]
    fn test_add_existing_tuple_merges_attributes() {
        let mut beta = include(&[("toolchain", json!("beta")), ("features", json!(""))]);
        beta.continue_on_error = Some(true);

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include: vec![beta.clone(), beta],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(expansion.len(), 2);
        assert!(!expansion.instances[0].fault_tolerant);
        assert!(expansion.instances[1].fault_tolerant);
    }

    #[test]
    fn test_partial_override_touches_only_matches() {
        let axes = AxisSet::new()
            .with_axis("toolchain", vec![json!("stable"), json!("nightly")])
            .with_axis("features", vec![json!(""), json!("serde"), json!("std")]);
        let mut entry = include(&[("toolchain", json!("nightly"))]);
        entry.mode = Some(IncludeMode::Override);
        entry.continue_on_error = Some(true);
        entry.timeout_minutes = Some(15);

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes,
                include: vec![entry],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(expansion.len(), 6);
        let tolerant: Vec<&JobInstance> = expansion
            .instances
            .iter()
            .filter(|i| i.fault_tolerant)
            .collect();
        assert_eq!(tolerant.len(), 3);
        assert!(tolerant.iter().all(|i| i.value("toolchain") == Some(&json!("nightly"))));
        assert!(tolerant.iter().all(|i| i.timeout_minutes == Some(15)));
    }

    #[test]
    fn test_matrix_level_override_mode() {
        let entry = IncludeEntry {
            continue_on_error: Some(true),
            ..include(&[("toolchain", json!("beta"))])
        };

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include_mode: IncludeMode::Override,
                include: vec![entry],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(expansion.len(), 2);
        assert!(expansion.instances[1].fault_tolerant);
    }

    #[test]
    fn test_partial_add_is_rejected() {
        let err = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include: vec![include(&[("toolchain", json!("nightly"))])],
                ..Default::default()
            }))
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::IncompleteInclude {
                job: "test".into(),
                index: 0,
                missing: vec!["features".into()],
            }
        );
    }

    #[test]
    fn test_matrix_with_exclude() {
        let axes = AxisSet::new()
            .with_axis("os", vec![json!("linux"), json!("macos")])
            .with_axis("arch", vec![json!("amd64"), json!("arm64")]);

        let mut exclude = ExcludeEntry::new();
        exclude.insert("os".to_string(), json!("macos"));
        exclude.insert("arch".to_string(), json!("amd64"));

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes,
                exclude: vec![exclude],
                ..Default::default()
            }))
            .unwrap();

        // 2x2 = 4, minus 1 excluded = 3
        assert_eq!(expansion.len(), 3);
        assert_eq!(
            expansion.instances.iter().map(|i| i.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_partial_exclude_removes_added_entries_too() {
        let nightly = include(&[("toolchain", json!("nightly")), ("features", json!(""))]);
        let mut exclude = ExcludeEntry::new();
        exclude.insert("toolchain".to_string(), json!("nightly"));

        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include: vec![nightly],
                exclude: vec![exclude],
                ..Default::default()
            }))
            .unwrap();

        assert_eq!(tuples(&expansion), vec![vec!["stable", ""], vec!["beta", ""]]);
    }

    #[test]
    fn test_duplicate_axis_values_deduplicated() {
        let axes = AxisSet::new().with_axis("toolchain", vec![json!("stable"), json!("stable")]);
        let expansion = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes,
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(expansion.len(), 1);
    }

    #[test]
    fn test_empty_axis_is_rejected() {
        let axes = AxisSet::new()
            .with_axis("toolchain", vec![json!("stable")])
            .with_axis("features", vec![]);
        let err = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes,
                ..Default::default()
            }))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyAxis {
                job: "test".into(),
                axis: "features".into()
            }
        );
    }

    #[test]
    fn test_undeclared_axis_is_rejected() {
        let err = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                include: vec![include(&[
                    ("toolchain", json!("nightly")),
                    ("features", json!("")),
                    ("os", json!("windows")),
                ])],
                ..Default::default()
            }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UndeclaredAxis { ref axis, .. } if axis == "os"));

        let mut exclude = ExcludeEntry::new();
        exclude.insert("os".into(), json!("windows"));
        let err = MatrixExpander::new()
            .expand(&job_with(MatrixConfig {
                axes: toolchain_axes(),
                exclude: vec![exclude],
                ..Default::default()
            }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UndeclaredAxis { .. }));
    }

    #[test]
    fn test_job_without_matrix_has_single_instance() {
        let job = JobDefinition {
            name: "style".to_string(),
            continue_on_error_default: true,
            timeout_minutes: Some(10),
            steps: vec![StepReference::run("cargo fmt --check")],
            ..Default::default()
        };
        let expansion = MatrixExpander::new().expand(&job).unwrap();
        assert_eq!(expansion.len(), 1);
        let instance = &expansion.instances[0];
        assert!(instance.bindings.is_empty());
        assert!(instance.fault_tolerant);
        assert_eq!(instance.timeout_minutes, Some(10));
        assert_eq!(instance.display_name, "style");
        assert_eq!(instance.id.as_str(), "style");
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let mut nightly = include(&[("toolchain", json!("nightly")), ("features", json!("nightly"))]);
        nightly.continue_on_error = Some(true);
        let job = job_with(MatrixConfig {
            axes: toolchain_axes(),
            include: vec![nightly],
            ..Default::default()
        });

        let expander = MatrixExpander::new();
        let first = expander.expand(&job).unwrap();
        let second = expander.expand(&job).unwrap();
        assert_eq!(first.instances, second.instances);
    }

    #[test]
    fn test_product_size_matches_axis_sizes() {
        for (a, b, c) in [(1usize, 1usize, 1usize), (2, 3, 1), (3, 2, 4)] {
            let values = |n: usize, prefix: &str| -> Vec<serde_json::Value> {
                (0..n).map(|i| json!(format!("{}{}", prefix, i))).collect()
            };
            let axes = AxisSet::new()
                .with_axis("a", values(a, "a"))
                .with_axis("b", values(b, "b"))
                .with_axis("c", values(c, "c"));
            let expansion = MatrixExpander::new()
                .expand(&job_with(MatrixConfig {
                    axes,
                    ..Default::default()
                }))
                .unwrap();
            assert_eq!(expansion.len(), a * b * c);
        }
    }
}
