//! Error types for the quickstack provisioning engine.
//!
//! Errors fall in two groups. Declaration, configuration, graph and planning
//! errors abort a run before any handler is invoked. [`ActionError`] is
//! reported per node during apply and never aborts the run as a whole.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for quickstack.
#[derive(Debug, Error)]
pub enum QuickstackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Declaration and dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A `${config:key}` lookup names a key that is not configured.
    #[error("Missing required configuration value: {key}")]
    MissingConfig {
        /// The configuration key.
        key: String,
    },

    /// No handler is registered for a declared resource type.
    #[error("No handler registered for resource type '{resource_type}' (resource '{name}')")]
    UnknownResourceType {
        /// Resource type without a handler.
        resource_type: String,
        /// Resource that declared it.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Declaration and dependency graph errors.
///
/// All of these are detected before execution starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node with the same name was already declared.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A lookup or reference names a node that was never declared.
    #[error("Unknown resource: {name}")]
    UnknownNode {
        /// The missing name.
        name: String,
    },

    /// The declarations contain a reference cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Every node on the cycle, starting and ending with the same node.
        cycle: Vec<String>,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference '{expression}': {message}")]
    InvalidReference {
        /// The offending expression.
        expression: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A protected resource would be deleted.
    #[error("Resource '{name}' is protected and cannot be deleted")]
    ProtectedResource {
        /// Name of the protected resource.
        name: String,
    },

    /// A resource changed type between runs.
    #[error("Resource '{name}' changed type from '{old_type}' to '{new_type}'; rename it instead")]
    TypeChanged {
        /// Name of the resource.
        name: String,
        /// Type recorded in state.
        old_type: String,
        /// Type in the declaration.
        new_type: String,
    },
}

/// Per-node action errors raised while applying a plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The handler reported a failure.
    #[error("{message}")]
    Handler {
        /// Failure reported by the handler.
        message: String,
    },

    /// No handler is registered for the node's type.
    #[error("No handler registered for resource type '{resource_type}'")]
    MissingHandler {
        /// The resource type.
        resource_type: String,
    },

    /// An input references an output that the producer did not return.
    #[error("Output '{field}' of resource '{node}' is not available")]
    UnresolvedReference {
        /// Producing node.
        node: String,
        /// Requested output field.
        field: String,
    },

    /// The handler task panicked.
    #[error("Handler panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}

/// Result type alias for quickstack operations.
pub type Result<T> = std::result::Result<T, QuickstackError>;

impl QuickstackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error was detected before any side effect.
    #[must_use]
    pub const fn is_pre_execution(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Graph(_) | Self::Plan(_))
    }

    /// Returns true if retrying the same command later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::LockFailed { .. } | StateError::LockedByOther { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl GraphError {
    /// Creates an unknown node error.
    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownNode { name: name.into() }
    }
}

impl ActionError {
    /// Creates a handler error.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}
