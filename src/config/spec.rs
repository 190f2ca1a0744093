//! Stack file types.
//!
//! These structs map one-to-one onto `quickstack.yaml`. Resource inputs are
//! kept as raw JSON values here; interpolations such as `${rg.name}` and
//! `${config:dockerhub:username}` are only interpreted when the stack is
//! turned into a node registry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Executor tuning.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Remote provider used by the `http` handler.
    #[serde(default)]
    pub provider: Option<ProviderSettings>,
    /// Stack configuration values, referenced as `${config:key}`.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigEntry>,
    /// Declared resources, in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Stack exports by name.
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding the state file, relative to the stack file.
    #[serde(default)]
    pub path: Option<String>,
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of handler calls in flight at once.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

/// Settings for the remote provider API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Base URL of the provider API.
    pub endpoint: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Resource types routed to the provider.
    #[serde(default)]
    pub types: Vec<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// A stack configuration value.
///
/// Either a bare scalar or a detailed entry that can read the value from the
/// environment and mark it secret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigEntry {
    /// Detailed form: `{ value | env, secret }`.
    Detailed(DetailedConfigEntry),
    /// Bare value.
    Plain(Value),
}

/// Detailed configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetailedConfigEntry {
    /// Inline value.
    #[serde(default)]
    pub value: Option<Value>,
    /// Environment variable to read the value from.
    #[serde(default)]
    pub env: Option<String>,
    /// Whether the value is a secret.
    #[serde(default)]
    pub secret: bool,
}

/// A declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Unique resource name.
    pub name: String,
    /// Resource type, selecting the handler.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Desired input properties.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Refuse deletion of this resource.
    #[serde(default)]
    pub protect: bool,
    /// Failure of this resource does not fail the run.
    #[serde(default)]
    pub best_effort: bool,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

const fn default_max_in_flight() -> usize {
    4
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_token_env() -> String {
    String::from("QUICKSTACK_PROVIDER_TOKEN")
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl ConfigEntry {
    /// Returns true if the entry is marked secret.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Detailed(DetailedConfigEntry { secret: true, .. }))
    }
}

impl StackConfig {
    /// Returns the fully qualified stack name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns resource names in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Returns the distinct resource types in use, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.resources.iter().map(|r| r.resource_type.as_str()).collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_entry_forms() {
        let yaml = r"
plain: 42
from_env:
  env: DOCKER_PASSWORD
  secret: true
inline:
  value: hello
";
        let entries: BTreeMap<String, ConfigEntry> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entries["plain"], ConfigEntry::Plain(json!(42)));
        assert!(entries["from_env"].is_secret());
        assert!(!entries["inline"].is_secret());
    }

    #[test]
    fn test_mapping_with_other_keys_is_plain() {
        let entries: BTreeMap<String, ConfigEntry> =
            serde_yaml::from_str("tags:\n  owner: web\n").unwrap();
        assert_eq!(entries["tags"], ConfigEntry::Plain(json!({ "owner": "web" })));
    }

    #[test]
    fn test_resource_types_are_distinct() {
        let yaml = r"
project:
  name: quickstart
resources:
  - name: a
    type: echo
  - name: b
    type: file
  - name: c
    type: echo
";
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.resource_types(), vec!["echo", "file"]);
        assert_eq!(config.executor.max_in_flight, 4);
        assert_eq!(config.qualified_name(), "quickstart-dev");
    }
}
