//! State types for tracking applied resources.
//!
//! The recorded state is the "last known" side of every diff: the sanitized
//! inputs each resource was last applied with, the outputs its handler
//! returned, and the dependencies it had at that time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{Outputs, generate_secret_salt};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete stack state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied stack configuration.
    pub config_hash: String,
    /// Applied resources by name.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Resolved stack exports (secrets sanitized).
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
    /// Salt for the secret digests recorded in this state.
    #[serde(default)]
    pub secret_salt: String,
}

/// State of a single applied resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Sanitized inputs the resource was last applied with.
    pub inputs: Outputs,
    /// Outputs returned by the handler.
    pub outputs: Outputs,
    /// Names of the resources this one depended on when applied.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether deletion is refused.
    #[serde(default)]
    pub protect: bool,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: RunOperation,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Resources touched by the run.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Create/update/delete towards the declarations.
    Up,
    /// Delete everything.
    Destroy,
}

impl StackState {
    /// Creates a new empty stack state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
            secret_salt: generate_secret_salt(),
        }
    }

    /// Gets a resource by name.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Adds or replaces a resource record.
    pub fn set_resource(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a resource by name.
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all resource names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceRecord {
    /// Creates a new record for a freshly created resource.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, inputs: Outputs, outputs: Outputs) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            inputs,
            outputs,
            dependencies: Vec::new(),
            protect: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a successful update.
    pub fn updated(&mut self, inputs: Outputs, outputs: Outputs) {
        self.inputs = inputs;
        self.outputs = outputs;
        self.updated_at = Utc::now();
    }
}

impl RunHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Up => "up",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut state = StackState::new("quickstart", "dev");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(RunHistoryEntry::new(RunOperation::Up, &i.to_string(), vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }

    #[test]
    fn test_set_and_remove_resource() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("rg", "echo", Outputs::new(), Outputs::new()));
        assert!(state.get_resource("rg").is_some());
        assert!(state.remove_resource("rg").is_some());
        assert!(state.is_empty());
    }
}
