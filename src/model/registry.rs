//! Insertion-ordered registry of declared resources.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::GraphError;

use super::node::{NodeHandle, NodeId, NodeOptions, ResourceNode};
use super::value::{InputValue, Reference};

/// Registry of declared resources and stack exports.
///
/// Declaration order is preserved and is the tie-break for every ordering
/// decision made downstream.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    /// Nodes in declaration order.
    nodes: Vec<ResourceNode>,
    /// Name to position in `nodes`.
    index: HashMap<String, usize>,
    /// Stack exports in declaration order.
    exports: Vec<(String, InputValue)>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource with default options.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        inputs: BTreeMap<String, InputValue>,
    ) -> Result<NodeHandle, GraphError> {
        self.declare_with(name, resource_type, inputs, NodeOptions::default())
    }

    /// Declares a resource.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn declare_with(
        &mut self,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        inputs: BTreeMap<String, InputValue>,
        options: NodeOptions,
    ) -> Result<NodeHandle, GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }

        let node = ResourceNode {
            id: NodeId::new(name.clone(), resource_type),
            inputs,
            options,
        };
        debug!("Declared {}", node.id);

        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(NodeHandle::new(name))
    }

    /// Returns a reference to an output of a declared node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if no node has that name.
    pub fn get_output(&self, name: &str, field: impl Into<String>) -> Result<Reference, GraphError> {
        if self.index.contains_key(name) {
            Ok(Reference::new(name, field))
        } else {
            Err(GraphError::unknown(name))
        }
    }

    /// Registers a stack export, replacing any previous export of that name.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.exports.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.exports.push((name, value));
        }
    }

    /// Gets a node by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns the declaration position of a node.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns true if a node is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns all exports in declaration order.
    #[must_use]
    pub fn exports(&self) -> &[(String, InputValue)] {
        &self.exports
    }

    /// Returns the number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
