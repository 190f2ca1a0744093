//! Resolved stack configuration values.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, Result};

use super::spec::{ConfigEntry, DetailedConfigEntry, StackConfig};

/// A single resolved configuration value.
#[derive(Clone, PartialEq)]
pub struct ConfigValue {
    /// The value.
    pub value: Value,
    /// Whether the value must be kept out of logs and state.
    pub secret: bool,
}

/// The resolved `config:` section of a stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigValues {
    values: BTreeMap<String, ConfigValue>,
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "ConfigValue([secret])")
        } else {
            write!(f, "ConfigValue({})", self.value)
        }
    }
}

impl ConfigValues {
    /// Resolves configuration values from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry reads an unset environment variable or
    /// has no value at all.
    pub fn resolve(config: &StackConfig) -> Result<Self> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    /// Resolves configuration values, reading environment variables via `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry reads an unset environment variable or
    /// has no value at all.
    pub fn resolve_with<F>(config: &StackConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = BTreeMap::new();

        for (key, entry) in &config.config {
            let value = match entry {
                ConfigEntry::Plain(value) => value.clone(),
                ConfigEntry::Detailed(DetailedConfigEntry {
                    env: Some(name),
                    value: fallback,
                    ..
                }) => match (env(name), fallback) {
                    (Some(raw), _) => Value::String(raw),
                    (None, Some(fallback)) => fallback.clone(),
                    (None, None) => {
                        return Err(ConfigError::MissingEnvVar { name: name.clone() }.into());
                    }
                },
                ConfigEntry::Detailed(DetailedConfigEntry {
                    value: Some(value),
                    ..
                }) => value.clone(),
                ConfigEntry::Detailed(_) => {
                    return Err(ConfigError::validation(
                        format!("Config entry '{key}' has neither 'value' nor 'env'"),
                        format!("config.{key}"),
                    )
                    .into());
                }
            };

            values.insert(
                key.clone(),
                ConfigValue {
                    value,
                    secret: entry.is_secret(),
                },
            );
        }

        Ok(Self { values })
    }

    /// Inserts a value directly.
    pub fn insert(&mut self, key: impl Into<String>, value: Value, secret: bool) {
        self.values.insert(key.into(), ConfigValue { value, secret });
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Looks up a value, failing like a required lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConfig`] if the key is absent.
    pub fn require(&self, key: &str) -> std::result::Result<&ConfigValue, ConfigError> {
        self.values.get(key).ok_or_else(|| ConfigError::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Returns all values in plain form, for handing to handlers.
    #[must_use]
    pub fn plain(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
