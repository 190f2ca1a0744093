//! Resource node types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::value::{InputValue, Reference};

/// Stable identity of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Unique name within the stack.
    pub name: String,
    /// Resource type, used to pick the handler.
    pub resource_type: String,
}

/// Per-node declaration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOptions {
    /// Refuse to delete this resource.
    #[serde(default)]
    pub protect: bool,
    /// A failure of this resource does not fail the run.
    #[serde(default)]
    pub best_effort: bool,
    /// Explicit dependencies in addition to those inferred from references.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Identity.
    pub id: NodeId,
    /// Desired input properties.
    pub inputs: BTreeMap<String, InputValue>,
    /// Declaration options.
    pub options: NodeOptions,
}

/// Handle returned by a successful declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    name: String,
}

/// Lifecycle of a node during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Declared, not yet planned.
    Pending,
    /// Has a plan entry and waits for its prerequisites.
    Planned,
    /// Create in progress.
    Creating,
    /// Update in progress.
    Updating,
    /// Delete in progress.
    Deleting,
    /// Action finished successfully.
    Ready,
    /// Action failed.
    Failed,
    /// A prerequisite failed or was itself blocked.
    Blocked,
}

impl NodeId {
    /// Creates a new node identity.
    #[must_use]
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.resource_type, self.name)
    }
}

impl ResourceNode {
    /// Returns the node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// Returns the node type.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.id.resource_type
    }

    /// Returns every reference in the inputs.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.inputs.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Returns the names this node depends on, first occurrence first.
    ///
    /// Explicit `depends_on` entries come before inferred ones.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let inferred = self.references().into_iter().map(|r| r.node.as_str());
        for name in self.options.depends_on.iter().map(String::as_str).chain(inferred) {
            if !deps.iter().any(|d| d == name) {
                deps.push(name.to_string());
            }
        }
        deps
    }
}

impl NodeHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a reference to one of this node's outputs.
    #[must_use]
    pub fn output(&self, field: impl Into<String>) -> Reference {
        Reference::new(self.name.clone(), field)
    }
}

impl LifecycleState {
    /// Returns true if no further transition is possible in this run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Blocked)
    }

    /// Returns true if a node is currently executing an action.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Planned | Self::Blocked)
            | (Self::Planned, Self::Creating | Self::Updating | Self::Deleting | Self::Ready | Self::Blocked) => true,
            (Self::Creating | Self::Updating | Self::Deleting, Self::Ready | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planned => "planned",
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}
