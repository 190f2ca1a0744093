//! Stack validation.
//!
//! Collects every problem in one pass so the user sees all of them at once.
//! Errors block a run; warnings are only reported.

use crate::error::{ConfigError, QuickstackError, Result};
use crate::model::{Segment, parse_interpolated};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{ExecutorConfig, ProjectConfig, ProviderSettings, ResourceConfig, StackConfig};

/// Concurrency above which a warning is emitted.
const HIGH_MAX_IN_FLIGHT: usize = 64;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Resource types that have a handler.
    known_types: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a validator that does not check resource types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator that accepts only the given resource types.
    #[must_use]
    pub fn with_known_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates a stack, failing on the first error found.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Stack validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(QuickstackError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates a stack and returns every error and warning.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_executor(config.executor, &mut result);
        if let Some(provider) = &config.provider {
            Self::validate_provider(provider, &mut result);
        }
        self.validate_resources(config, &mut result);
        Self::validate_exports(config, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            );
        }

        if project.environment.is_empty() {
            result.error("project.environment", "Environment cannot be empty");
        }
    }

    fn validate_executor(executor: ExecutorConfig, result: &mut ValidationResult) {
        if executor.max_in_flight == 0 {
            result.error("executor.max_in_flight", "max_in_flight must be at least 1");
        } else if executor.max_in_flight > HIGH_MAX_IN_FLIGHT {
            result.warnings.push(format!(
                "executor.max_in_flight: {} concurrent actions is unusually high",
                executor.max_in_flight
            ));
        }
    }

    fn validate_provider(provider: &ProviderSettings, result: &mut ValidationResult) {
        if !provider.endpoint.starts_with("http://") && !provider.endpoint.starts_with("https://") {
            result.error(
                "provider.endpoint",
                format!("Provider endpoint '{}' must be an http(s) URL", provider.endpoint),
            );
        }

        if provider.types.is_empty() {
            result
                .warnings
                .push(String::from("provider: no resource types are routed to the provider"));
        }

        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Provider timeout must be at least 1 second");
        }
    }

    fn validate_resources(&self, config: &StackConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result.warnings.push(String::from("No resources declared in stack"));
            return;
        }

        let declared: HashSet<&str> = config.resource_names().into_iter().collect();
        let mut seen_names = HashSet::new();

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !seen_names.insert(resource.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate resource name: {}", resource.name),
                );
            }

            if !is_valid_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name
                    ),
                );
            }

            self.validate_type(resource, &prefix, result);

            for dep in &resource.depends_on {
                if !declared.contains(dep.as_str()) {
                    result.error(
                        format!("{prefix}.depends_on"),
                        format!("'{}' depends on undeclared resource '{dep}'", resource.name),
                    );
                }
            }

            for (key, value) in &resource.inputs {
                check_interpolations(
                    value,
                    &format!("{prefix}.inputs.{key}"),
                    config,
                    &declared,
                    result,
                );
            }

            if resource.protect && resource.best_effort {
                result.warnings.push(format!(
                    "{prefix}: '{}' is both protected and best-effort",
                    resource.name
                ));
            }
        }
    }

    fn validate_type(&self, resource: &ResourceConfig, prefix: &str, result: &mut ValidationResult) {
        if resource.resource_type.is_empty() {
            result.error(format!("{prefix}.type"), "Resource type cannot be empty");
        } else if !self.known_types.is_empty() && !self.known_types.contains(&resource.resource_type) {
            result.error(
                format!("{prefix}.type"),
                format!(
                    "No handler registered for resource type '{}'",
                    resource.resource_type
                ),
            );
        }
    }

    fn validate_exports(config: &StackConfig, result: &mut ValidationResult) {
        let declared: HashSet<&str> = config.resource_names().into_iter().collect();
        for (name, value) in &config.exports {
            check_interpolations(value, &format!("exports.{name}"), config, &declared, result);
        }
    }
}

/// Checks the syntax and targets of every interpolation inside a value.
fn check_interpolations(
    value: &Value,
    field: &str,
    config: &StackConfig,
    declared: &HashSet<&str>,
    result: &mut ValidationResult,
) {
    match value {
        Value::String(text) => match parse_interpolated(text) {
            Ok(segments) => {
                for segment in segments {
                    match segment {
                        Segment::Ref(reference) if !declared.contains(reference.node.as_str()) => {
                            result.error(
                                field,
                                format!("Reference {reference} names an undeclared resource"),
                            );
                        }
                        Segment::Config(key) if !config.config.contains_key(&key) => {
                            result.error(field, format!("Missing required configuration value: {key}"));
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => result.error(field, e.to_string()),
        },
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_interpolations(item, &format!("{field}[{i}]"), config, declared, result);
            }
        }
        Value::Object(entries) => {
            for (key, item) in entries {
                check_interpolations(item, &format!("{field}.{key}"), config, declared, result);
            }
        }
        _ => {}
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Records an error.
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
