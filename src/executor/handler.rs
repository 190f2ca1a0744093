//! Handler boundary.
//!
//! Every resource type is backed by a [`ResourceHandler`]. Handlers receive
//! fully resolved inputs and the explicit [`ProviderConfig`] the executor was
//! built with; they never see the graph or other nodes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ActionError, ConfigError};
use crate::model::{NodeRegistry, Outputs};

/// Explicit provider configuration handed to every handler call.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Stack configuration values, secrets included.
    pub config: BTreeMap<String, Value>,
    /// Directory that relative paths are resolved against.
    pub work_dir: PathBuf,
}

impl ProviderConfig {
    /// Creates a provider configuration for a project environment.
    #[must_use]
    pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            config: BTreeMap::new(),
            work_dir: PathBuf::from("."),
        }
    }

    /// Sets the configuration values.
    #[must_use]
    pub fn with_config(mut self, config: BTreeMap<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }
}

/// Everything a handler needs to perform one action.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Resource name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Resolved inputs, secrets in plaintext.
    pub inputs: Outputs,
    /// Resolved inputs with secrets replaced by their digest.
    pub sanitized_inputs: Outputs,
    /// Inputs recorded by the previous apply, if any.
    pub previous_inputs: Option<Outputs>,
    /// Outputs recorded by the previous apply, if any.
    pub previous_outputs: Option<Outputs>,
    /// Provider configuration.
    pub provider: Arc<ProviderConfig>,
}

impl ActionRequest {
    /// Returns a string input.
    #[must_use]
    pub fn str_input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).and_then(Value::as_str)
    }

    /// Returns a string input, failing if it is absent.
    ///
    /// # Errors
    ///
    /// Returns a handler error naming the missing input.
    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        self.str_input(key).ok_or_else(|| {
            ActionError::handler(format!("{}: input '{key}' must be a string", self.name))
        })
    }

    /// Returns a previously recorded output.
    #[must_use]
    pub fn previous_output(&self, key: &str) -> Option<&Value> {
        self.previous_outputs.as_ref().and_then(|o| o.get(key))
    }
}

/// Performs create, update and delete for one resource type.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Creates the resource and returns its outputs.
    async fn create(&self, request: &ActionRequest) -> Result<Outputs, ActionError>;

    /// Updates the resource in place and returns its new outputs.
    async fn update(&self, request: &ActionRequest) -> Result<Outputs, ActionError>;

    /// Deletes the resource.
    async fn delete(&self, request: &ActionRequest) -> Result<(), ActionError>;
}

/// Handlers by resource type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous handler for the type.
    pub fn register(&mut self, resource_type: impl Into<String>, handler: Arc<dyn ResourceHandler>) {
        self.handlers.insert(resource_type.into(), handler);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, resource_type: impl Into<String>, handler: Arc<dyn ResourceHandler>) -> Self {
        self.register(resource_type, handler);
        self
    }

    /// Gets the handler for a type.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(resource_type).cloned()
    }

    /// Returns true if a handler exists for the type.
    #[must_use]
    pub fn contains(&self, resource_type: &str) -> bool {
        self.handlers.contains_key(resource_type)
    }

    /// Returns the registered types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Checks that every declared node has a handler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownResourceType`] for the first node whose
    /// type has no handler.
    pub fn check_types(&self, registry: &NodeRegistry) -> Result<(), ConfigError> {
        for node in registry.nodes() {
            if !self.contains(node.resource_type()) {
                return Err(ConfigError::UnknownResourceType {
                    resource_type: node.resource_type().to_string(),
                    name: node.name().to_string(),
                });
            }
        }
        Ok(())
    }
}
