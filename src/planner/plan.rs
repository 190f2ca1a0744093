//! Plan types and construction.
//!
//! A plan pairs every declared or recorded resource with one action and the
//! names of the entries that must finish first. Creates, updates and no-ops
//! follow the dependency graph's topological order; deletes come last, each
//! waiting for the resources that depended on it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info};

use crate::error::{PlanError, Result};
use crate::graph::DependencyGraph;
use crate::model::{InputValue, NodeOptions, NodeRegistry, Outputs, Reference, generate_secret_salt};
use crate::state::{ResourceRecord, StackState};

use super::diff::{DiffDetail, DiffEngine, DiffType, PlannedValue};

/// An ordered set of actions.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Stack hash this plan is based on.
    pub config_hash: String,
    /// Salt for secret digests, taken from the last state or freshly generated.
    pub secret_salt: String,
    /// Entries in execution order.
    pub entries: Vec<PlanEntry>,
}

/// One resource and the action decided for it.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Resource name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Action to perform.
    pub action: ActionType,
    /// Entries that must finish before this one may start.
    pub prerequisites: Vec<String>,
    /// Desired inputs; empty for deletes.
    pub inputs: BTreeMap<String, InputValue>,
    /// Node options; for deletes, the options recorded in state.
    pub options: NodeOptions,
    /// Graph dependencies, recorded in state after apply.
    pub dependencies: Vec<String>,
    /// Last applied record, if any.
    pub previous: Option<ResourceRecord>,
    /// Differing fields for updates.
    pub changes: Vec<DiffDetail>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update an existing resource in place.
    Update,
    /// Delete a resource that is no longer declared.
    Delete,
    /// Nothing to do; outputs come from state.
    Noop,
}

/// Builds plans from declarations and the last applied state.
#[derive(Debug, Default)]
pub struct Planner {
    diff: DiffEngine,
}

impl Planner {
    /// Creates a new planner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            diff: DiffEngine::new(),
        }
    }

    /// Plans the changes that bring `last_state` to the declarations.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::TypeChanged`] if a resource changed type,
    /// [`PlanError::ProtectedResource`] if a protected resource would be
    /// deleted, and a graph error if recorded dependencies are cyclic.
    pub fn plan(
        &self,
        registry: &NodeRegistry,
        graph: &DependencyGraph,
        last_state: Option<&StackState>,
        config_hash: &str,
    ) -> Result<Plan> {
        let mut entries = Vec::with_capacity(registry.len());
        let mut known: HashMap<String, Outputs> = HashMap::new();
        let secret_salt = last_state.map_or_else(generate_secret_salt, |s| s.secret_salt.clone());

        for name in graph.topological_order() {
            let Some(node) = registry.get(name) else {
                continue;
            };
            let previous = last_state.and_then(|s| s.get_resource(name));

            if let Some(record) = previous {
                if record.resource_type != node.resource_type() {
                    return Err(PlanError::TypeChanged {
                        name: name.to_string(),
                        old_type: record.resource_type.clone(),
                        new_type: node.resource_type().to_string(),
                    }
                    .into());
                }
            }

            let desired = planned_inputs(&node.inputs, &known, &secret_salt);
            let diff = self
                .diff
                .diff_resource(name, &desired, previous.map(|r| &r.inputs));

            let action = match diff.diff_type {
                DiffType::Create => ActionType::Create,
                DiffType::NoChange => ActionType::Noop,
                DiffType::Update | DiffType::Delete => ActionType::Update,
            };

            if let (ActionType::Noop, Some(record)) = (action, previous) {
                known.insert(name.to_string(), record.outputs.clone());
            }

            debug!("Planned {action} for {name}");
            let dependencies: Vec<String> = graph
                .dependencies_of(name)
                .into_iter()
                .map(String::from)
                .collect();

            entries.push(PlanEntry {
                name: name.to_string(),
                resource_type: node.resource_type().to_string(),
                action,
                prerequisites: dependencies.clone(),
                inputs: node.inputs.clone(),
                options: node.options.clone(),
                dependencies,
                previous: previous.cloned(),
                changes: diff.details,
            });
        }

        if let Some(state) = last_state {
            let deletes = self.plan_deletes(registry, state, &entries)?;
            entries.extend(deletes);
        }

        let plan = Plan {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            secret_salt,
            entries,
        };
        info!(
            "Plan: {} to create, {} to update, {} to delete, {} unchanged",
            plan.count(ActionType::Create),
            plan.count(ActionType::Update),
            plan.count(ActionType::Delete),
            plan.count(ActionType::Noop)
        );
        Ok(plan)
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ProtectedResource`] if any resource is protected.
    pub fn plan_destroy(&self, last_state: &StackState) -> Result<Plan> {
        self.plan(
            &NodeRegistry::new(),
            &DependencyGraph::default(),
            Some(last_state),
            &last_state.config_hash,
        )
    }

    /// Deletes for recorded resources that are no longer declared, dependents first.
    ///
    /// A delete also waits for every kept entry whose recorded dependencies
    /// name it, so nothing still pointing at a resource outlives it.
    fn plan_deletes(
        &self,
        registry: &NodeRegistry,
        state: &StackState,
        kept: &[PlanEntry],
    ) -> Result<Vec<PlanEntry>> {
        let removed: Vec<&ResourceRecord> = state
            .resources
            .values()
            .filter(|record| !registry.contains(&record.name))
            .collect();

        if let Some(protected) = removed.iter().find(|record| record.protect) {
            return Err(PlanError::ProtectedResource {
                name: protected.name.clone(),
            }
            .into());
        }

        let names: Vec<String> = removed.iter().map(|r| r.name.clone()).collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        // A delete waits for every removed resource that depended on it.
        let mut waits_for: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (dependent, record) in removed.iter().enumerate() {
            for dep in &record.dependencies {
                if let Some(&dependency) = index.get(dep.as_str()) {
                    waits_for[dependency].push(dependent);
                }
            }
        }

        let order = DependencyGraph::from_dependencies(names.clone(), waits_for)?;
        let mut entries = Vec::with_capacity(removed.len());

        for name in order.topological_order() {
            let Some(&i) = index.get(name) else {
                continue;
            };
            let record = removed[i];
            let diff = self.diff.diff_removed(name);
            debug!("Planned {} for {name}", diff.diff_type);

            let mut prerequisites: Vec<String> = kept
                .iter()
                .filter(|entry| {
                    entry
                        .previous
                        .as_ref()
                        .is_some_and(|previous| previous.dependencies.iter().any(|d| d == name))
                })
                .map(|entry| entry.name.clone())
                .collect();
            prerequisites.extend(order.dependencies_of(name).into_iter().map(String::from));

            entries.push(PlanEntry {
                name: name.to_string(),
                resource_type: record.resource_type.clone(),
                action: ActionType::Delete,
                prerequisites,
                inputs: BTreeMap::new(),
                options: NodeOptions {
                    protect: record.protect,
                    ..NodeOptions::default()
                },
                dependencies: record.dependencies.clone(),
                previous: Some(record.clone()),
                changes: diff.details,
            });
        }

        Ok(entries)
    }
}

/// Resolves each input field as far as possible at plan time.
fn planned_inputs(
    inputs: &BTreeMap<String, InputValue>,
    known: &HashMap<String, Outputs>,
    salt: &str,
) -> BTreeMap<String, PlannedValue> {
    let lookup = |reference: &Reference| -> Option<Value> {
        known
            .get(&reference.node)
            .and_then(|outputs| reference.lookup(outputs))
            .cloned()
    };

    inputs
        .iter()
        .map(|(field, value)| {
            let planned = value
                .resolve(&lookup, salt)
                .map_or(PlannedValue::Unknown, |resolved| {
                    PlannedValue::Known(resolved.sanitized)
                });
            (field.clone(), planned)
        })
        .collect()
}

impl Plan {
    /// Returns true if the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.action == ActionType::Noop)
    }

    /// Returns the number of entries with the given action.
    #[must_use]
    pub fn count(&self, action: ActionType) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Returns the entries that change something.
    #[must_use]
    pub fn changes(&self) -> Vec<&PlanEntry> {
        self.entries
            .iter()
            .filter(|e| e.action != ActionType::Noop)
            .collect()
    }

    /// Gets an entry by resource name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

impl PlanEntry {
    /// Returns a human-readable description of the entry.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionType::Create => format!("Create {} '{}'", self.resource_type, self.name),
            ActionType::Update => format!("Update {} '{}'", self.resource_type, self.name),
            ActionType::Delete => format!("Delete {} '{}'", self.resource_type, self.name),
            ActionType::Noop => format!("No change for '{}'", self.name),
        }
    }
}

impl ActionType {
    /// Returns the one-character marker used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Delete => "-",
            Self::Noop => " ",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.name)?;
        if !self.prerequisites.is_empty() {
            write!(f, " (after {})", self.prerequisites.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({} changes):", self.changes().len())?;
        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f, "  {i}. {entry}")?;
            for change in &entry.changes {
                writeln!(f, "       {change}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuickstackError;
    use serde_json::json;

    fn registry_a_b() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "echo", BTreeMap::new()).unwrap();
        let mut inputs = BTreeMap::new();
        inputs.insert(String::from("value"), InputValue::Ref(Reference::new("a", "x")));
        registry.declare("b", "echo", inputs).unwrap();
        registry
    }

    fn plan_for(registry: &NodeRegistry, state: Option<&StackState>) -> Result<Plan> {
        let graph = DependencyGraph::build(registry).unwrap();
        Planner::new().plan(registry, &graph, state, "hash")
    }

    fn actions(plan: &Plan) -> Vec<(ActionType, &str)> {
        plan.entries.iter().map(|e| (e.action, e.name.as_str())).collect()
    }

    /// State as if `plan` had been applied with the given outputs.
    fn applied(plan: &Plan, outputs: &[(&str, Outputs)]) -> StackState {
        let mut state = StackState::new("quickstart", "dev");
        state.secret_salt.clone_from(&plan.secret_salt);
        let outputs: HashMap<&str, &Outputs> = outputs.iter().map(|(n, o)| (*n, o)).collect();
        let lookup = |r: &Reference| -> Option<Value> {
            outputs.get(r.node.as_str()).and_then(|o| r.lookup(o)).cloned()
        };
        for entry in &plan.entries {
            let (_, sanitized) =
                crate::model::resolve_entries(&entry.inputs, &lookup, &plan.secret_salt).unwrap();
            let mut record = ResourceRecord::new(
                &entry.name,
                &entry.resource_type,
                sanitized,
                outputs.get(entry.name.as_str()).map(|o| (*o).clone()).unwrap_or_default(),
            );
            record.dependencies.clone_from(&entry.dependencies);
            record.protect = entry.options.protect;
            state.set_resource(record);
        }
        state
    }

    fn outputs(value: Value) -> Outputs {
        match value {
            Value::Object(map) => map,
            _ => Outputs::new(),
        }
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let plan = plan_for(&registry_a_b(), None).unwrap();
        assert_eq!(
            actions(&plan),
            vec![(ActionType::Create, "a"), (ActionType::Create, "b")]
        );
        assert_eq!(plan.entries[1].prerequisites, vec!["a"]);
    }

    #[test]
    fn test_replanning_applied_state_is_all_noop() {
        let registry = registry_a_b();
        let first = plan_for(&registry, None).unwrap();
        let state = applied(
            &first,
            &[("a", outputs(json!({ "x": 1 }))), ("b", outputs(json!({ "value": 1 })))],
        );

        let second = plan_for(&registry, Some(&state)).unwrap();
        assert!(second.is_empty());
        assert_eq!(second.count(ActionType::Noop), 2);

        let third = plan_for(&registry, Some(&state)).unwrap();
        assert_eq!(actions(&second), actions(&third));
    }

    #[test]
    fn test_changed_producer_marks_consumer_unknown() {
        let registry = registry_a_b();
        let first = plan_for(&registry, None).unwrap();
        let mut state = applied(
            &first,
            &[("a", outputs(json!({ "x": 1 }))), ("b", outputs(json!({})))],
        );
        state
            .resources
            .get_mut("a")
            .unwrap()
            .inputs
            .insert(String::from("stale"), json!(true));

        let plan = plan_for(&registry, Some(&state)).unwrap();
        assert_eq!(
            actions(&plan),
            vec![(ActionType::Update, "a"), (ActionType::Update, "b")]
        );
        assert_eq!(plan.entries[1].changes[0].new_value, Some(PlannedValue::Unknown));
    }

    #[test]
    fn test_removed_resources_delete_dependents_first() {
        let registry = registry_a_b();
        let first = plan_for(&registry, None).unwrap();
        let state = applied(
            &first,
            &[("a", outputs(json!({ "x": 1 }))), ("b", outputs(json!({})))],
        );

        let plan = Planner::new().plan_destroy(&state).unwrap();
        assert_eq!(
            actions(&plan),
            vec![(ActionType::Delete, "b"), (ActionType::Delete, "a")]
        );
        assert_eq!(plan.entries[1].prerequisites, vec!["b"]);
        assert!(plan.entries[0].prerequisites.is_empty());
    }

    #[test]
    fn test_creates_precede_deletes() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("old", "echo", Outputs::new(), Outputs::new()));

        let plan = plan_for(&registry_a_b(), Some(&state)).unwrap();
        assert_eq!(
            actions(&plan),
            vec![
                (ActionType::Create, "a"),
                (ActionType::Create, "b"),
                (ActionType::Delete, "old"),
            ]
        );
    }

    #[test]
    fn test_delete_waits_for_kept_former_dependent() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("rg_old", "echo", Outputs::new(), Outputs::new()));
        let mut web = ResourceRecord::new("web", "echo", Outputs::new(), Outputs::new());
        web.dependencies = vec![String::from("rg_old")];
        state.set_resource(web);

        let mut registry = NodeRegistry::new();
        let inputs = BTreeMap::from([(String::from("group"), InputValue::Literal(json!("rg-new")))]);
        registry.declare("web", "echo", inputs).unwrap();

        let plan = plan_for(&registry, Some(&state)).unwrap();
        assert_eq!(
            actions(&plan),
            vec![(ActionType::Update, "web"), (ActionType::Delete, "rg_old")]
        );
        assert_eq!(plan.get("rg_old").unwrap().prerequisites, vec!["web"]);
    }

    #[test]
    fn test_protected_resource_blocks_plan() {
        let mut state = StackState::new("quickstart", "dev");
        let mut record = ResourceRecord::new("site", "file", Outputs::new(), Outputs::new());
        record.protect = true;
        state.set_resource(record);

        let err = Planner::new().plan_destroy(&state).unwrap_err();
        assert!(matches!(
            err,
            QuickstackError::Plan(PlanError::ProtectedResource { ref name }) if name == "site"
        ));
    }

    #[test]
    fn test_type_change_is_rejected() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("a", "file", Outputs::new(), Outputs::new()));

        let err = plan_for(&registry_a_b(), Some(&state)).unwrap_err();
        assert!(matches!(err, QuickstackError::Plan(PlanError::TypeChanged { .. })));
    }

    #[test]
    fn test_secret_compares_by_digest() {
        let mut registry = NodeRegistry::new();
        let mut inputs = BTreeMap::new();
        inputs.insert(String::from("password"), InputValue::secret("hunter2"));
        registry.declare("registry", "echo", inputs).unwrap();

        let first = plan_for(&registry, None).unwrap();
        let state = applied(&first, &[]);
        let stored = &state.get_resource("registry").unwrap().inputs["password"];
        assert!(!stored.to_string().contains("hunter2"));

        let second = plan_for(&registry, Some(&state)).unwrap();
        assert!(second.is_empty());
        assert_eq!(second.secret_salt, state.secret_salt);

        let mut other = state.clone();
        other.secret_salt = generate_secret_salt();
        let resalted = plan_for(&registry, Some(&other)).unwrap();
        assert_eq!(actions(&resalted), vec![(ActionType::Update, "registry")]);
    }
}
