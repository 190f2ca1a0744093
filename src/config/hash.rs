//! Stack hashing for change detection.
//!
//! The hash is recorded with every run so `state show` can tell whether the
//! stack file changed since the last apply. It covers the raw declarations
//! only; configuration values are hashed by key, never by value, so secrets
//! do not leak through it.

use sha2::{Digest, Sha256};

use super::spec::{ResourceConfig, StackConfig};

/// Hasher for computing stack hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole stack.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        for key in config.config.keys() {
            hasher.update(key.as_bytes());
        }

        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, value) in &config.exports {
            hasher.update(name.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.name.as_bytes());
        hasher.update(resource.resource_type.as_bytes());

        // BTreeMap iteration is sorted, object keys inside values are too.
        for (key, value) in &resource.inputs {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }

        hasher.update([u8::from(resource.protect), u8::from(resource.best_effort)]);
        for dep in &resource.depends_on {
            hasher.update(dep.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn create_test_resource(name: &str) -> ResourceConfig {
        ResourceConfig {
            name: name.to_string(),
            resource_type: String::from("echo"),
            inputs: BTreeMap::from([(String::from("location"), json!("westeurope"))]),
            protect: false,
            best_effort: false,
            depends_on: vec![],
        }
    }

    #[test]
    fn test_resource_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let resource = create_test_resource("rg");
        assert_eq!(hasher.hash_resource(&resource), hasher.hash_resource(&resource));
    }

    #[test]
    fn test_input_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let before = create_test_resource("rg");
        let mut after = before.clone();
        after.inputs.insert(String::from("location"), json!("northeurope"));

        assert_ne!(hasher.hash_resource(&before), hasher.hash_resource(&after));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
