//! Dependency graph construction, cycle detection and ordering.
//!
//! Edges run from a producing node to each node that consumes one of its
//! outputs (or names it in `depends_on`). Ties between independent nodes are
//! always broken by declaration order, so every ordering derived from the
//! graph is reproducible across runs.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::GraphError;
use crate::model::NodeRegistry;

/// Directed acyclic graph of declared resources.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node names in declaration order.
    names: Vec<String>,
    /// Name to index.
    index: HashMap<String, usize>,
    /// Prerequisites of each node, ascending by declaration index.
    dependencies: Vec<Vec<usize>>,
    /// Dependents of each node, ascending by declaration index.
    dependents: Vec<Vec<usize>>,
    /// Topological order.
    order: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Builds the graph from a registry.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if a reference, an explicit
    /// dependency or an export names an undeclared node, and
    /// [`GraphError::CycleDetected`] if the references form a cycle.
    pub fn build(registry: &NodeRegistry) -> Result<Self, GraphError> {
        let names: Vec<String> = registry.nodes().iter().map(|n| n.name().to_string()).collect();

        let mut dependencies = Vec::with_capacity(names.len());
        for node in registry.nodes() {
            let mut deps = Vec::new();
            for dep in node.dependencies() {
                let idx = registry
                    .position(&dep)
                    .ok_or_else(|| GraphError::unknown(dep.clone()))?;
                deps.push(idx);
            }
            dependencies.push(deps);
        }

        for (export, value) in registry.exports() {
            let mut refs = Vec::new();
            value.collect_references(&mut refs);
            if let Some(missing) = refs.iter().find(|r| !registry.contains(&r.node)) {
                debug!("Export {export} references unknown resource {}", missing.node);
                return Err(GraphError::unknown(missing.node.clone()));
            }
        }

        Self::from_dependencies(names, dependencies)
    }

    /// Builds a graph from names and per-node prerequisite indices.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if the edges form a cycle.
    pub fn from_dependencies(
        names: Vec<String>,
        dependencies: Vec<Vec<usize>>,
    ) -> Result<Self, GraphError> {
        let count = names.len();
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(count);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (node, prerequisites) in dependencies.into_iter().enumerate() {
            let unique: BTreeSet<usize> = prerequisites.into_iter().filter(|&p| p < count).collect();
            for &prerequisite in &unique {
                dependents[prerequisite].push(node);
            }
            deps.push(unique.into_iter().collect());
        }
        deps.resize(count, Vec::new());

        if let Some(cycle) = find_cycle(&names, &dependents) {
            return Err(GraphError::CycleDetected { cycle });
        }

        let order = topological_order(&deps, &dependents);
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();

        debug!("Built dependency graph with {count} nodes");
        Ok(Self {
            names,
            index,
            dependencies: deps,
            dependents,
            order,
        })
    }

    /// Returns node names in topological order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Groups nodes into levels; every node's prerequisites sit in earlier levels.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut depth = vec![0usize; self.names.len()];
        for &node in &self.order {
            depth[node] = self.dependencies[node]
                .iter()
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut levels: Vec<Vec<&str>> = Vec::new();
        for &node in &self.order {
            let level = depth[node];
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(self.names[node].as_str());
        }
        levels
    }

    /// Returns the direct prerequisites of a node.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.dependencies[i].iter().map(|&d| self.names[d].as_str()).collect()
        })
    }

    /// Returns the direct dependents of a node.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.dependents[i].iter().map(|&d| self.names[d].as_str()).collect()
        })
    }

    /// Returns true if the node is part of the graph.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Three-color depth-first search over `edges` using an explicit stack.
///
/// Returns the cycle path, first node repeated at the end.
fn find_cycle(names: &[String], edges: &[Vec<usize>]) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; names.len()];

    for root in 0..names.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }

        // (node, index of the next edge to follow)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let Some(&next) = edges[node].get(frame.1) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match marks[next] {
                Mark::Unvisited => {
                    marks[next] = Mark::InProgress;
                    stack.push((next, 0));
                }
                Mark::InProgress => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|&(n, _)| names[n].clone()).collect();
                    cycle.push(names[next].clone());
                    return Some(cycle);
                }
                Mark::Done => {}
            }
        }
    }

    None
}

/// Kahn's algorithm; the ready set is ordered by declaration index.
fn topological_order(dependencies: &[Vec<usize>], dependents: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputValue, NodeOptions, Reference};
    use std::collections::BTreeMap;

    fn refs(pairs: &[(&str, &str)]) -> BTreeMap<String, InputValue> {
        pairs
            .iter()
            .enumerate()
            .map(|(i, (node, field))| (format!("in{i}"), InputValue::Ref(Reference::new(*node, *field))))
            .collect()
    }

    #[test]
    fn test_two_node_chain() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", BTreeMap::new()).unwrap();
        registry.declare("b", "echo", refs(&[("a", "x")])).unwrap();

        let graph = DependencyGraph::build(&registry).unwrap();
        assert_eq!(graph.topological_order(), vec!["a", "b"]);
        assert_eq!(graph.dependencies_of("b"), vec!["a"]);
        assert_eq!(graph.dependents_of("a"), vec!["b"]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let mut registry = NodeRegistry::new();
        registry.declare("webapp", "echo", refs(&[("plan", "id"), ("image", "name")])).unwrap();
        registry.declare("image", "echo", BTreeMap::new()).unwrap();
        registry.declare("rg", "echo", BTreeMap::new()).unwrap();
        registry.declare("plan", "echo", refs(&[("rg", "name")])).unwrap();

        let graph = DependencyGraph::build(&registry).unwrap();
        assert_eq!(graph.topological_order(), vec!["image", "rg", "plan", "webapp"]);
        assert_eq!(graph.levels(), vec![vec!["image", "rg"], vec!["plan"], vec!["webapp"]]);
    }

    #[test]
    fn test_explicit_dependency_edge() {
        let mut registry = NodeRegistry::new();
        registry
            .declare_with(
                "blob",
                "file",
                BTreeMap::new(),
                NodeOptions {
                    depends_on: vec!["site".into()],
                    ..NodeOptions::default()
                },
            )
            .unwrap();
        registry.declare("site", "echo", BTreeMap::new()).unwrap();

        let graph = DependencyGraph::build(&registry).unwrap();
        assert_eq!(graph.topological_order(), vec!["site", "blob"]);
    }

    #[test]
    fn test_cycle_names_every_node() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", refs(&[("c", "x")])).unwrap();
        registry.declare("b", "echo", refs(&[("a", "x")])).unwrap();
        registry.declare("c", "echo", refs(&[("b", "x")])).unwrap();
        registry.declare("d", "echo", BTreeMap::new()).unwrap();

        let err = DependencyGraph::build(&registry).unwrap_err();
        let GraphError::CycleDetected { cycle } = &err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        for name in ["a", "b", "c"] {
            assert!(cycle.iter().any(|n| n == name), "{name} missing from {cycle:?}");
        }
        assert!(!cycle.iter().any(|n| n == "d"));
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", refs(&[("a", "x")])).unwrap();

        let err = DependencyGraph::build(&registry).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["a".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_unknown_reference() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", refs(&[("ghost", "x")])).unwrap();

        assert_eq!(
            DependencyGraph::build(&registry).unwrap_err(),
            GraphError::unknown("ghost")
        );
    }

    #[test]
    fn test_unknown_export_reference() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", BTreeMap::new()).unwrap();
        registry.export("url", Reference::new("webapp", "host"));

        assert_eq!(
            DependencyGraph::build(&registry).unwrap_err(),
            GraphError::unknown("webapp")
        );
    }
}
