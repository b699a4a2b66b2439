use crate::ports::StepContext;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn expression_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid interpolation regex"))
}

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Pipeline, job and step variables
    pub variables: BTreeMap<String, String>,
    /// Matrix values for current instance
    pub matrix: BTreeMap<String, String>,
    /// Secrets, resolvable and masked in output
    pub secrets: BTreeMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context a step sees.
    pub fn for_step(ctx: &StepContext, step_env: &BTreeMap<String, String>) -> Self {
        let mut variables = ctx.env.clone();
        variables.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            variables,
            matrix: ctx.matrix.clone(),
            secrets: ctx.secrets.clone(),
        }
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` - direct variable lookup
    /// - `${{ env.VAR }}` - environment variable
    /// - `${{ matrix.key }}` - matrix value
    /// - `${{ secrets.NAME }}` - secret value
    pub fn interpolate(&self, input: &str) -> String {
        expression_regex()
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        if let Some(key) = expr.strip_prefix("secrets.") {
            return self.secrets.get(key).cloned().unwrap_or_default();
        }

        self.variables.get(expr).cloned().unwrap_or_default()
    }

    /// Environment variables for a process: variables, secrets and one
    /// `MATRIX_<AXIS>` entry per binding.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = self.variables.clone();
        for (axis, value) in &self.matrix {
            env.insert(matrix_env_name(axis), value.clone());
        }
        env.extend(self.secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Mask secrets in the input string.
    pub fn mask_secrets(&self, input: &str) -> String {
        let mut output = input.to_string();
        for value in self.secrets.values() {
            if !value.is_empty() {
                output = output.replace(value, "***");
            }
        }
        output
    }
}

/// `toolchain` -> `MATRIX_TOOLCHAIN`, `rust-version` -> `MATRIX_RUST_VERSION`.
pub fn matrix_env_name(axis: &str) -> String {
    let normalized: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("MATRIX_{}", normalized)
}
