//! Reconciler: preview, up and destroy for a stack.
//!
//! Ties the pieces together. Declarations are built from the stack file, the
//! planner compares them with the last applied state, the executor applies
//! the plan and every result is folded back into state as it arrives.

use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ConfigValues, StackConfig, build_registry};
use crate::error::Result;
use crate::executor::{ApplyReport, ExecutionResult, Executor, NodeOutcome};
use crate::graph::DependencyGraph;
use crate::model::{NodeOptions, NodeRegistry, Reference};
use crate::planner::{ActionType, Plan, Planner};
use crate::state::{
    ResourceRecord, RunHistoryEntry, RunOperation, StackState, StateStore, generate_holder_id,
};

/// Reconciler for a single stack.
pub struct Reconciler<'a, S: StateStore> {
    /// Stack configuration.
    config: &'a StackConfig,
    /// Resolved configuration values.
    values: &'a ConfigValues,
    /// State store.
    state_store: &'a S,
    /// Executor with the stack's handlers.
    executor: Executor,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Planner.
    planner: Planner,
}

/// Result of an `up` or `destroy` run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether the run succeeded.
    pub success: bool,
    /// Resources created.
    pub created: usize,
    /// Resources updated.
    pub updated: usize,
    /// Resources deleted.
    pub deleted: usize,
    /// Resources unchanged.
    pub unchanged: usize,
    /// Resources blocked by a failure.
    pub blocked: usize,
    /// Resources not started because the run was cancelled.
    pub cancelled: usize,
    /// Errors encountered, one per failed resource.
    pub errors: Vec<String>,
    /// Stack outputs after the run.
    pub outputs: BTreeMap<String, Value>,
    /// Per-resource ledger.
    #[serde(skip)]
    pub report: ApplyReport,
}

/// Declarations derived from the stack file.
struct Declarations {
    registry: NodeRegistry,
    graph: DependencyGraph,
    config_hash: String,
}

/// What the state update needs to know about each plan entry.
struct EntryMeta {
    dependencies: Vec<String>,
    options: NodeOptions,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        values: &'a ConfigValues,
        state_store: &'a S,
        executor: Executor,
    ) -> Self {
        Self {
            config,
            values,
            state_store,
            executor,
            hasher: ConfigHasher::new(),
            planner: Planner::new(),
        }
    }

    /// Returns the executor, e.g. to reach its cancellation token.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    fn declarations(&self) -> Result<Declarations> {
        let registry = build_registry(self.config, self.values)?;
        self.executor.handlers().check_types(&registry)?;
        let graph = DependencyGraph::build(&registry)?;
        Ok(Declarations {
            registry,
            graph,
            config_hash: self.hasher.hash_config(self.config),
        })
    }

    /// Computes the plan for `up` without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if declarations are invalid, state cannot be read or
    /// the plan would violate a guardrail.
    pub async fn preview(&self) -> Result<Plan> {
        let declarations = self.declarations()?;
        let state = self.state_store.load().await?;
        self.planner.plan(
            &declarations.registry,
            &declarations.graph,
            state.as_ref(),
            &declarations.config_hash,
        )
    }

    /// Computes the plan for `destroy` without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read or holds protected resources.
    pub async fn preview_destroy(&self) -> Result<Plan> {
        let state = self.load_state().await?;
        self.planner.plan_destroy(&state)
    }

    /// Brings resources in line with the declarations.
    ///
    /// `on_result` is called for every result as soon as it is produced.
    ///
    /// # Errors
    ///
    /// Returns an error if anything fails before execution starts, or if the
    /// state cannot be locked or saved. Per-resource failures are reported in
    /// the result instead.
    pub async fn up<F>(&self, on_result: F) -> Result<ReconciliationResult>
    where
        F: FnMut(&ExecutionResult),
    {
        info!(
            "Starting up for {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let declarations = self.declarations()?;

        self.with_lock("up", async {
            let mut state = self.load_state().await?;
            let plan = self.planner.plan(
                &declarations.registry,
                &declarations.graph,
                Some(&state),
                &declarations.config_hash,
            )?;

            let mut result = self
                .apply(plan, &mut state, RunOperation::Up, on_result)
                .await?;

            state.outputs = resolve_exports(&declarations.registry, &state);
            state.config_hash.clone_from(&declarations.config_hash);
            result.outputs = state.outputs.clone();

            self.record(&mut state, RunOperation::Up, &declarations.config_hash, &result)
                .await?;
            Ok(result)
        })
        .await
    }

    /// Deletes every resource recorded in state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be locked or saved, or if a
    /// protected resource is recorded.
    pub async fn destroy<F>(&self, on_result: F) -> Result<ReconciliationResult>
    where
        F: FnMut(&ExecutionResult),
    {
        info!(
            "Starting destroy for {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let config_hash = self.hasher.hash_config(self.config);

        self.with_lock("destroy", async {
            let mut state = self.load_state().await?;
            let plan = self.planner.plan_destroy(&state)?;

            let mut result = self
                .apply(plan, &mut state, RunOperation::Destroy, on_result)
                .await?;

            if state.is_empty() {
                state.outputs.clear();
            }
            result.outputs = state.outputs.clone();

            self.record(&mut state, RunOperation::Destroy, &config_hash, &result)
                .await?;
            Ok(result)
        })
        .await
    }

    /// Runs `body` holding the state lock, releasing it afterwards.
    async fn with_lock<T, Fut>(&self, operation: &str, body: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let lock = self
            .state_store
            .acquire_lock(&generate_holder_id(), operation)
            .await?;
        debug!("Acquired state lock {} for {operation}", lock.lock_id);

        let outcome = body.await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            error!("Failed to release state lock: {e}");
            if outcome.is_ok() {
                return Err(e);
            }
        }
        outcome
    }

    async fn load_state(&self) -> Result<StackState> {
        Ok(self.state_store.load().await?.unwrap_or_else(|| {
            StackState::new(&self.config.project.name, &self.config.project.environment)
        }))
    }

    /// Applies a plan, folding each result into `state` as it arrives.
    async fn apply<F>(
        &self,
        plan: Plan,
        state: &mut StackState,
        operation: RunOperation,
        mut on_result: F,
    ) -> Result<ReconciliationResult>
    where
        F: FnMut(&ExecutionResult),
    {
        let unchanged = plan.count(ActionType::Noop);
        if plan.is_empty() {
            info!("No changes required");
        } else {
            info!(
                "Plan: {} to create, {} to update, {} to delete, {unchanged} unchanged",
                plan.count(ActionType::Create),
                plan.count(ActionType::Update),
                plan.count(ActionType::Delete)
            );
        }

        let meta: HashMap<String, EntryMeta> = plan
            .entries
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    EntryMeta {
                        dependencies: e.dependencies.clone(),
                        options: e.options.clone(),
                    },
                )
            })
            .collect();

        let mut report = ApplyReport::default();
        let mut stream = self.executor.apply(plan);
        while let Some(result) = stream.next().await {
            apply_to_state(state, &result, meta.get(&result.name));
            on_result(&result);
            report.push(result);
        }

        let count = |action: ActionType| {
            report
                .results
                .iter()
                .filter(|r| r.action == action && r.outcome.is_success())
                .count()
        };
        let errors = report
            .results
            .iter()
            .filter_map(|r| match &r.outcome {
                NodeOutcome::Failed {
                    error,
                    tolerated: false,
                } => Some(format!("{}: {error}", r.name)),
                _ => None,
            })
            .collect();

        let result = ReconciliationResult {
            success: report.is_success(),
            created: count(ActionType::Create),
            updated: count(ActionType::Update),
            deleted: count(ActionType::Delete),
            unchanged,
            blocked: report.blocked,
            cancelled: report.cancelled,
            errors,
            outputs: BTreeMap::new(),
            report,
        };

        if result.success {
            info!("{operation} finished");
        } else {
            warn!("{operation} finished with {} failures", result.errors.len());
        }
        Ok(result)
    }

    async fn record(
        &self,
        state: &mut StackState,
        operation: RunOperation,
        config_hash: &str,
        result: &ReconciliationResult,
    ) -> Result<()> {
        let touched = result
            .report
            .results
            .iter()
            .filter(|r| r.action != ActionType::Noop)
            .map(|r| r.name.clone())
            .collect();

        let entry = if result.success {
            RunHistoryEntry::new(operation, config_hash, touched)
        } else {
            RunHistoryEntry::failed(operation, config_hash, touched, &result.errors.join("; "))
        };
        state.add_history(entry);
        self.state_store.save(state).await
    }
}

/// Folds one execution result into state.
fn apply_to_state(state: &mut StackState, result: &ExecutionResult, meta: Option<&EntryMeta>) {
    let NodeOutcome::Succeeded { outputs } = &result.outcome else {
        return;
    };
    let inputs = result.applied_inputs.clone().unwrap_or_default();

    let record = match result.action {
        ActionType::Delete => {
            state.remove_resource(&result.name);
            return;
        }
        ActionType::Create => Some(ResourceRecord::new(
            &result.name,
            &result.resource_type,
            inputs,
            outputs.clone(),
        )),
        ActionType::Update => state.get_resource(&result.name).cloned().map(|mut record| {
            record.updated(inputs, outputs.clone());
            record
        }),
        ActionType::Noop => state.get_resource(&result.name).cloned(),
    };

    let Some(mut record) = record else {
        warn!("{}: no recorded state to update", result.name);
        return;
    };
    if let Some(meta) = meta {
        record.dependencies.clone_from(&meta.dependencies);
        record.protect = meta.options.protect;
    }
    state.set_resource(record);
}

/// Resolves stack exports against recorded outputs.
///
/// Exports whose producer has no outputs are left out. Secret exports are
/// stored by digest.
fn resolve_exports(registry: &NodeRegistry, state: &StackState) -> BTreeMap<String, Value> {
    let lookup = |reference: &Reference| -> Option<Value> {
        state
            .get_resource(&reference.node)
            .and_then(|record| reference.lookup(&record.outputs))
            .cloned()
    };

    let mut outputs = BTreeMap::new();
    for (name, value) in registry.exports() {
        match value.resolve(&lookup, &state.secret_salt) {
            Ok(resolved) => {
                outputs.insert(name.clone(), resolved.sanitized);
            }
            Err(reference) => warn!("Export '{name}' is unavailable: {reference} has no value"),
        }
    }
    outputs
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Run {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        if self.blocked > 0 {
            writeln!(f, "  Blocked: {}", self.blocked)?;
        }
        if self.cancelled > 0 {
            writeln!(f, "  Cancelled: {}", self.cancelled)?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{PlanError, QuickstackError, StateError};
    use crate::executor::{HandlerRegistry, ProviderConfig};
    use crate::handlers::builtin_handlers_with;
    use crate::state::LocalStateStore;
    use serde_json::json;
    use tempfile::TempDir;

    const STACK: &str = r#"
project:
  name: quickstart
  environment: dev

config:
  dockerhub:username: pulumibot

resources:
  - name: rg
    type: echo
    inputs:
      location: westeurope
  - name: app-image
    type: echo
    inputs:
      imageName: "${config:dockerhub:username}/node-app:v1.0.0"
  - name: webapp
    type: echo
    inputs:
      resourceGroup: "${rg.id}"
      linuxFxVersion: "DOCKER|${app-image.imageName}"

exports:
  image: "${app-image.imageName}"
"#;

    fn setup(yaml: &str) -> (StackConfig, ConfigValues, TempDir, LocalStateStore) {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let values = ConfigValues::resolve_with(&config, |_| None).unwrap();
        let dir = TempDir::new().unwrap();
        let store = LocalStateStore::with_base_dir(dir.path().join(".quickstack"));
        (config, values, dir, store)
    }

    fn executor() -> Executor {
        let handlers: HandlerRegistry = builtin_handlers_with(None, |_| None).unwrap();
        Executor::new(handlers, ProviderConfig::new("quickstart", "dev"))
    }

    #[tokio::test]
    async fn test_up_records_state_and_exports() {
        let (config, values, _dir, store) = setup(STACK);
        let reconciler = Reconciler::new(&config, &values, &store, executor());

        let mut seen = Vec::new();
        let result = reconciler.up(|r| seen.push(r.name.clone())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.created, 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().map(String::as_str), Some("webapp"));
        assert_eq!(result.outputs["image"], json!("pulumibot/node-app:v1.0.0"));

        let state = store.load().await.unwrap().unwrap();
        assert_eq!(state.resources.len(), 3);
        assert_eq!(state.get_resource("webapp").unwrap().dependencies, vec!["app-image", "rg"]);
        assert_eq!(state.history.len(), 1);
        assert!(store.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_up_is_noop() {
        let (config, values, _dir, store) = setup(STACK);
        let reconciler = Reconciler::new(&config, &values, &store, executor());
        reconciler.up(|_| {}).await.unwrap();

        let plan = reconciler.preview().await.unwrap();
        assert!(plan.is_empty());

        let result = reconciler.up(|_| {}).await.unwrap();
        assert_eq!(result.unchanged, 3);
        assert_eq!(result.created + result.updated + result.deleted, 0);
        assert_eq!(result.outputs["image"], json!("pulumibot/node-app:v1.0.0"));
    }

    #[tokio::test]
    async fn test_secret_digest_uses_stack_salt() {
        let yaml = "project:\n  name: quickstart\nconfig:\n  db:password:\n    value: hunter2\n    secret: true\nresources:\n  - name: db\n    type: echo\n    inputs:\n      password: \"${config:db:password}\"\n";
        let (config, values, _dir, store) = setup(yaml);
        let reconciler = Reconciler::new(&config, &values, &store, executor());
        reconciler.up(|_| {}).await.unwrap();

        let state = store.load().await.unwrap().unwrap();
        assert!(!state.secret_salt.is_empty());
        let stored = &state.get_resource("db").unwrap().inputs["password"];
        assert_eq!(*stored, crate::model::secret_digest(&state.secret_salt, &json!("hunter2")));
        assert_ne!(*stored, crate::model::secret_digest("", &json!("hunter2")));

        let second = reconciler.up(|_| {}).await.unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(store.load().await.unwrap().unwrap().secret_salt, state.secret_salt);
    }

    #[tokio::test]
    async fn test_removed_resource_is_deleted() {
        let (config, values, _dir, store) = setup(STACK);
        Reconciler::new(&config, &values, &store, executor())
            .up(|_| {})
            .await
            .unwrap();

        let mut smaller = config.clone();
        smaller.resources.retain(|r| r.name != "webapp");
        let result = Reconciler::new(&smaller, &values, &store, executor())
            .up(|_| {})
            .await
            .unwrap();

        assert_eq!(result.deleted, 1);
        let state = store.load().await.unwrap().unwrap();
        assert!(state.get_resource("webapp").is_none());
    }

    #[tokio::test]
    async fn test_destroy_empties_state() {
        let (config, values, _dir, store) = setup(STACK);
        let reconciler = Reconciler::new(&config, &values, &store, executor());
        reconciler.up(|_| {}).await.unwrap();

        let mut order = Vec::new();
        let result = reconciler.destroy(|r| order.push(r.name.clone())).await.unwrap();

        assert!(result.success);
        assert_eq!(result.deleted, 3);
        assert_eq!(order.first().map(String::as_str), Some("webapp"));
        let state = store.load().await.unwrap().unwrap();
        assert!(state.is_empty());
        assert!(state.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_refuses_protected_resource() {
        let yaml = "project:\n  name: quickstart\nresources:\n  - name: db\n    type: echo\n    protect: true\n";
        let (config, values, _dir, store) = setup(yaml);
        let reconciler = Reconciler::new(&config, &values, &store, executor());
        reconciler.up(|_| {}).await.unwrap();

        let err = reconciler.destroy(|_| {}).await.unwrap_err();
        assert!(matches!(err, QuickstackError::Plan(PlanError::ProtectedResource { .. })));
        assert!(store.get_lock_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lock_is_reported() {
        let (config, values, _dir, store) = setup(STACK);
        store.acquire_lock("someone-else", "up").await.unwrap();

        let err = Reconciler::new(&config, &values, &store, executor())
            .up(|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, QuickstackError::State(StateError::LockedByOther { .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_type_fails_before_lock() {
        let yaml = "project:\n  name: quickstart\nresources:\n  - name: site\n    type: azure:storage\n";
        let (config, values, _dir, store) = setup(yaml);

        let err = Reconciler::new(&config, &values, &store, executor())
            .up(|_| {})
            .await
            .unwrap_err();
        assert!(err.is_pre_execution());
        assert!(!store.exists().await.unwrap());
    }
}
