//! Plan execution.
//!
//! [`Executor::apply`] returns a lazy stream of [`ExecutionResult`]s. The
//! stream body is the only code that touches the per-run lifecycle table;
//! worker tasks in a [`JoinSet`] only call handlers. An entry is spawned once
//! all its prerequisites are ready, at most `max_in_flight` at a time, ties
//! broken by plan order.

use futures::{FutureExt, Stream};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ActionError;
use crate::model::{LifecycleState, Outputs, Reference, resolve_entries};
use crate::planner::{ActionType, Plan, PlanEntry};

use super::handler::{ActionRequest, HandlerRegistry, ProviderConfig, ResourceHandler};
use super::result::{ExecutionResult, NodeOutcome};

/// Default bound on concurrent handler calls.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Stream of per-node results produced by [`Executor::apply`].
pub type ApplyStream = Pin<Box<dyn Stream<Item = ExecutionResult> + Send>>;

/// What a worker task reports back.
type TaskOutput = (usize, Result<Outputs, ActionError>, Duration);

/// Runs plans against registered handlers.
#[derive(Debug, Clone)]
pub struct Executor {
    /// Handlers by resource type.
    handlers: HandlerRegistry,
    /// Provider configuration passed to every handler call.
    provider: Arc<ProviderConfig>,
    /// Maximum concurrent handler calls.
    max_in_flight: usize,
    /// Stops scheduling new actions when cancelled.
    cancel: CancellationToken,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(handlers: HandlerRegistry, provider: ProviderConfig) -> Self {
        Self {
            handlers,
            provider: Arc::new(provider),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the concurrency bound; zero is treated as one.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle to the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the handler registry.
    #[must_use]
    pub const fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Applies a plan.
    ///
    /// Nothing happens until the stream is polled. Every plan entry yields
    /// exactly one result; the stream ends once all of them have.
    #[must_use]
    pub fn apply(&self, plan: Plan) -> ApplyStream {
        let handlers = self.handlers.clone();
        let provider = Arc::clone(&self.provider);
        let max_in_flight = self.max_in_flight;
        let cancel = self.cancel.clone();

        Box::pin(async_stream::stream! {
            info!("Applying plan with {} entries (max {max_in_flight} in flight)", plan.entries.len());
            let mut run = RunState::new(plan.entries, plan.secret_salt);
            let mut join_set: JoinSet<TaskOutput> = JoinSet::new();

            loop {
                while !cancel.is_cancelled() && join_set.len() < max_in_flight {
                    let Some(index) = run.next_ready() else {
                        break;
                    };

                    let Some(active) = active_state(run.entries[index].action) else {
                        yield run.skip(index);
                        continue;
                    };

                    match run.start(index, active, &handlers, &provider) {
                        Ok((handler, action, request)) => {
                            debug!("Spawning {action} for {}", request.name);
                            join_set.spawn(async move {
                                let started = Instant::now();
                                let result = run_action(handler, action, request).await;
                                (index, result, started.elapsed())
                            });
                        }
                        Err(error) => {
                            for result in run.fail(index, error, Duration::ZERO) {
                                yield result;
                            }
                        }
                    }
                }

                if join_set.is_empty() {
                    break;
                }

                match join_set.join_next().await {
                    Some(Ok((index, Ok(outputs), elapsed))) => {
                        yield run.succeed(index, outputs, elapsed);
                    }
                    Some(Ok((index, Err(error), elapsed))) => {
                        for result in run.fail(index, error, elapsed) {
                            yield result;
                        }
                    }
                    Some(Err(join_error)) => {
                        error!("Handler task did not complete: {join_error}");
                    }
                    None => break,
                }
            }

            for result in run.finish(cancel.is_cancelled()) {
                yield result;
            }
        })
    }
}

/// State an entry holds while its handler runs. No-ops never run one.
const fn active_state(action: ActionType) -> Option<LifecycleState> {
    match action {
        ActionType::Create => Some(LifecycleState::Creating),
        ActionType::Update => Some(LifecycleState::Updating),
        ActionType::Delete => Some(LifecycleState::Deleting),
        ActionType::Noop => None,
    }
}

/// Calls the handler, turning a panic into an [`ActionError`].
async fn run_action(
    handler: Arc<dyn ResourceHandler>,
    action: ActionType,
    request: ActionRequest,
) -> Result<Outputs, ActionError> {
    let call = async {
        match action {
            ActionType::Create => handler.create(&request).await,
            ActionType::Update => handler.update(&request).await,
            ActionType::Delete => handler.delete(&request).await.map(|()| Outputs::new()),
            ActionType::Noop => Ok(request.previous_outputs.clone().unwrap_or_default()),
        }
    };

    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(ActionError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}

/// Per-run bookkeeping, owned by the stream body.
struct RunState {
    entries: Vec<PlanEntry>,
    states: Vec<LifecycleState>,
    /// Number of unfinished prerequisites per entry.
    pending_prerequisites: Vec<usize>,
    /// Entries waiting on each entry.
    waiters: Vec<Vec<usize>>,
    /// Outputs of ready entries, by name.
    outputs: HashMap<String, Outputs>,
    /// Sanitized inputs of started entries.
    applied: Vec<Option<Outputs>>,
    /// Entries whose prerequisites are all ready, by plan index.
    ready: BTreeSet<usize>,
    /// Salt for secret digests in sanitized inputs.
    secret_salt: String,
    reported: Vec<bool>,
}

impl RunState {
    fn new(entries: Vec<PlanEntry>, secret_salt: String) -> Self {
        let count = entries.len();
        let index: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.as_str(), i))
            .collect();

        let mut pending_prerequisites = vec![0; count];
        let mut waiters: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (i, entry) in entries.iter().enumerate() {
            for prerequisite in &entry.prerequisites {
                if let Some(&p) = index.get(prerequisite.as_str()) {
                    waiters[p].push(i);
                    pending_prerequisites[i] += 1;
                } else {
                    warn!("{}: prerequisite '{prerequisite}' is not in the plan", entry.name);
                }
            }
        }

        // Every entry handed to the executor has already been planned.
        let states = vec![LifecycleState::Planned; count];

        let ready = (0..count).filter(|&i| pending_prerequisites[i] == 0).collect();

        Self {
            entries,
            states,
            pending_prerequisites,
            waiters,
            outputs: HashMap::new(),
            applied: vec![None; count],
            ready,
            secret_salt,
            reported: vec![false; count],
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_first()
    }

    fn transition(&mut self, index: usize, next: LifecycleState) {
        let current = self.states[index];
        if current.can_transition_to(next) {
            self.states[index] = next;
        } else {
            warn!(
                "{}: ignoring illegal transition {current} -> {next}",
                self.entries[index].name
            );
        }
    }

    /// Marks an entry active and builds its handler request.
    fn start(
        &mut self,
        index: usize,
        active: LifecycleState,
        handlers: &HandlerRegistry,
        provider: &Arc<ProviderConfig>,
    ) -> Result<(Arc<dyn ResourceHandler>, ActionType, ActionRequest), ActionError> {
        let action = self.entries[index].action;
        self.transition(index, active);

        let entry = &self.entries[index];
        let handler = handlers
            .get(&entry.resource_type)
            .ok_or_else(|| ActionError::MissingHandler {
                resource_type: entry.resource_type.clone(),
            })?;

        let (inputs, sanitized_inputs) = if action == ActionType::Delete {
            let recorded = entry
                .previous
                .as_ref()
                .map(|record| record.inputs.clone())
                .unwrap_or_default();
            (recorded.clone(), recorded)
        } else {
            let outputs = &self.outputs;
            let lookup = |reference: &Reference| -> Option<Value> {
                outputs
                    .get(&reference.node)
                    .and_then(|o| reference.lookup(o))
                    .cloned()
            };
            resolve_entries(&entry.inputs, &lookup, &self.secret_salt).map_err(|reference| {
                ActionError::UnresolvedReference {
                    node: reference.node,
                    field: reference.field,
                }
            })?
        };

        let request = ActionRequest {
            name: entry.name.clone(),
            resource_type: entry.resource_type.clone(),
            inputs,
            sanitized_inputs: sanitized_inputs.clone(),
            previous_inputs: entry.previous.as_ref().map(|r| r.inputs.clone()),
            previous_outputs: entry.previous.as_ref().map(|r| r.outputs.clone()),
            provider: Arc::clone(provider),
        };

        self.applied[index] = Some(sanitized_inputs);
        Ok((handler, action, request))
    }

    /// A no-op entry goes straight to ready with its recorded outputs.
    fn skip(&mut self, index: usize) -> ExecutionResult {
        let outputs = self.entries[index]
            .previous
            .as_ref()
            .map(|record| record.outputs.clone())
            .unwrap_or_default();
        debug!("{} unchanged", self.entries[index].name);
        self.complete(index, outputs, Duration::ZERO)
    }

    fn succeed(&mut self, index: usize, outputs: Outputs, elapsed: Duration) -> ExecutionResult {
        let entry = &self.entries[index];
        info!(
            "{} {} succeeded in {:.2}s",
            entry.action,
            entry.name,
            elapsed.as_secs_f64()
        );
        self.complete(index, outputs, elapsed)
    }

    fn complete(&mut self, index: usize, outputs: Outputs, elapsed: Duration) -> ExecutionResult {
        self.transition(index, LifecycleState::Ready);
        self.outputs
            .insert(self.entries[index].name.clone(), outputs.clone());

        for waiter in self.waiters[index].clone() {
            self.pending_prerequisites[waiter] = self.pending_prerequisites[waiter].saturating_sub(1);
            if self.pending_prerequisites[waiter] == 0 && self.states[waiter] == LifecycleState::Planned {
                self.ready.insert(waiter);
            }
        }

        let applied = self.applied[index].take();
        self.report(index, NodeOutcome::Succeeded { outputs }, applied, elapsed)
    }

    /// Marks an entry failed and every transitive waiter blocked.
    fn fail(&mut self, index: usize, error: ActionError, elapsed: Duration) -> Vec<ExecutionResult> {
        self.transition(index, LifecycleState::Failed);

        let entry = &self.entries[index];
        let tolerated = entry.options.best_effort;
        if tolerated {
            warn!("{} {} failed (tolerated): {error}", entry.action, entry.name);
        } else {
            error!("{} {} failed: {error}", entry.action, entry.name);
        }
        let failed_name = entry.name.clone();

        let mut results = vec![self.report(
            index,
            NodeOutcome::Failed { error, tolerated },
            None,
            elapsed,
        )];

        let mut blocked = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.waiters[index].iter().copied().collect();
        while let Some(waiter) = queue.pop_front() {
            if self.states[waiter] == LifecycleState::Planned && blocked.insert(waiter) {
                queue.extend(self.waiters[waiter].iter().copied());
            }
        }

        for waiter in blocked {
            self.ready.remove(&waiter);
            self.transition(waiter, LifecycleState::Blocked);
            warn!("{} blocked by {failed_name}", self.entries[waiter].name);
            results.push(self.report(
                waiter,
                NodeOutcome::Blocked {
                    blocked_by: failed_name.clone(),
                },
                None,
                Duration::ZERO,
            ));
        }

        results
    }

    /// Reports every entry that never reached a terminal state.
    fn finish(&mut self, cancelled: bool) -> Vec<ExecutionResult> {
        let mut results = Vec::new();

        let aborted: Vec<usize> = (0..self.entries.len())
            .filter(|&index| self.states[index].is_active())
            .collect();
        for index in aborted {
            results.extend(self.fail(
                index,
                ActionError::Panicked {
                    message: String::from("handler task was aborted"),
                },
                Duration::ZERO,
            ));
        }

        for index in 0..self.entries.len() {
            if !self.reported[index] {
                if !cancelled {
                    warn!("{} was never scheduled", self.entries[index].name);
                }
                results.push(self.report(index, NodeOutcome::Cancelled, None, Duration::ZERO));
            }
        }

        if cancelled && !results.is_empty() {
            info!("Run cancelled; {} entries not started", results.len());
        }
        results
    }

    fn report(
        &mut self,
        index: usize,
        outcome: NodeOutcome,
        applied_inputs: Option<Outputs>,
        duration: Duration,
    ) -> ExecutionResult {
        self.reported[index] = true;
        let entry = &self.entries[index];
        ExecutionResult {
            name: entry.name.clone(),
            resource_type: entry.resource_type.clone(),
            action: entry.action,
            state: self.states[index],
            outcome,
            applied_inputs,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::handler::MockResourceHandler;
    use crate::executor::result::ApplyReport;
    use crate::graph::DependencyGraph;
    use crate::model::{InputValue, NodeOptions, NodeRegistry};
    use crate::planner::Planner;
    use crate::state::{ResourceRecord, StackState};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handler that echoes inputs, records call order and tracks concurrency.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        current: AtomicUsize,
        peak: AtomicUsize,
        fail: Vec<&'static str>,
        panic: Vec<&'static str>,
    }

    #[async_trait]
    impl ResourceHandler for Recorder {
        async fn create(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(format!("create {}", request.name));
            assert!(!self.panic.contains(&request.name.as_str()), "boom in {}", request.name);
            if self.fail.contains(&request.name.as_str()) {
                return Err(ActionError::handler(format!("{} exploded", request.name)));
            }
            let mut outputs = request.inputs.clone();
            outputs.insert("x".into(), json!(format!("{}-x", request.name)));
            Ok(outputs)
        }

        async fn update(&self, request: &ActionRequest) -> Result<Outputs, ActionError> {
            self.calls.lock().unwrap().push(format!("start update {}", request.name));
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.calls.lock().unwrap().push(format!("end update {}", request.name));
            Ok(request.inputs.clone())
        }

        async fn delete(&self, request: &ActionRequest) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(format!("delete {}", request.name));
            if self.fail.contains(&request.name.as_str()) {
                return Err(ActionError::handler("still in use"));
            }
            Ok(())
        }
    }

    fn reference(node: &str) -> BTreeMap<String, InputValue> {
        BTreeMap::from([(String::from("value"), InputValue::Ref(Reference::new(node, "x")))])
    }

    fn plan_for(registry: &NodeRegistry, state: Option<&StackState>) -> Plan {
        let graph = DependencyGraph::build(registry).unwrap();
        Planner::new().plan(registry, &graph, state, "hash").unwrap()
    }

    fn executor(handler: Arc<dyn ResourceHandler>) -> Executor {
        let handlers = HandlerRegistry::new().with("test", handler);
        Executor::new(handlers, ProviderConfig::new("quickstart", "dev"))
    }

    fn outcomes(report: &ApplyReport) -> Vec<(String, &'static str)> {
        report
            .results
            .iter()
            .map(|r| (r.name.clone(), r.outcome.label()))
            .collect()
    }

    #[tokio::test]
    async fn test_failure_blocks_dependent() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();

        let recorder = Arc::new(Recorder {
            fail: vec!["a"],
            ..Recorder::default()
        });
        let report = ApplyReport::collect(executor(recorder.clone()).apply(plan_for(&registry, None))).await;

        assert_eq!(
            outcomes(&report),
            vec![(String::from("a"), "failed"), (String::from("b"), "blocked")]
        );
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["create a"]);
        assert!(!report.is_success());
        assert_eq!(report.results[1].state, LifecycleState::Blocked);
    }

    #[tokio::test]
    async fn test_failure_blocks_transitive_dependents() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();
        registry.declare("c", "test", reference("b")).unwrap();

        let recorder = Arc::new(Recorder {
            fail: vec!["a"],
            ..Recorder::default()
        });
        let report = ApplyReport::collect(executor(recorder.clone()).apply(plan_for(&registry, None))).await;

        for name in ["b", "c"] {
            let result = report.get(name).unwrap();
            assert_eq!(
                result.outcome,
                NodeOutcome::Blocked {
                    blocked_by: String::from("a")
                }
            );
            assert_eq!(result.state, LifecycleState::Blocked);
        }
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["create a"]);
        assert_eq!(report.blocked, 2);
    }

    #[tokio::test]
    async fn test_outputs_flow_into_dependents() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();

        let report = ApplyReport::collect(
            executor(Arc::new(Recorder::default())).apply(plan_for(&registry, None)),
        )
        .await;

        assert!(report.is_success());
        let b = report.get("b").unwrap();
        let NodeOutcome::Succeeded { outputs } = &b.outcome else {
            panic!("{b:?}");
        };
        assert_eq!(outputs["value"], json!("a-x"));
        assert_eq!(b.applied_inputs.as_ref().unwrap()["value"], json!("a-x"));
    }

    #[tokio::test]
    async fn test_independent_branch_continues_after_failure() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();
        registry.declare("c", "test", BTreeMap::new()).unwrap();
        registry.declare("d", "test", reference("c")).unwrap();

        let recorder = Arc::new(Recorder {
            fail: vec!["a"],
            ..Recorder::default()
        });
        let report = ApplyReport::collect(executor(recorder).apply(plan_for(&registry, None))).await;

        assert_eq!(report.get("b").unwrap().outcome.label(), "blocked");
        assert_eq!(report.get("d").unwrap().outcome.label(), "succeeded");
        assert_eq!(report.failed, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn test_best_effort_failure_is_tolerated() {
        let mut registry = NodeRegistry::new();
        registry.declare("site", "test", BTreeMap::new()).unwrap();
        registry
            .declare_with(
                "favicon",
                "test",
                BTreeMap::new(),
                NodeOptions {
                    best_effort: true,
                    depends_on: vec![String::from("site")],
                    ..NodeOptions::default()
                },
            )
            .unwrap();
        registry.declare("cdn", "test", reference("favicon")).unwrap();

        let recorder = Arc::new(Recorder {
            fail: vec!["favicon"],
            ..Recorder::default()
        });
        let report = ApplyReport::collect(executor(recorder).apply(plan_for(&registry, None))).await;

        assert!(matches!(
            report.get("favicon").unwrap().outcome,
            NodeOutcome::Failed { tolerated: true, .. }
        ));
        assert_eq!(report.get("cdn").unwrap().outcome.label(), "blocked");
        assert_eq!(report.failed, 0);
        assert_eq!(report.tolerated, 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut registry = NodeRegistry::new();
        for i in 0..8 {
            registry.declare(format!("n{i}"), "test", BTreeMap::new()).unwrap();
        }

        let recorder = Arc::new(Recorder::default());
        let report = ApplyReport::collect(
            executor(recorder.clone())
                .with_max_in_flight(3)
                .apply(plan_for(&registry, None)),
        )
        .await;

        assert_eq!(report.succeeded, 8);
        let peak = recorder.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {peak}");
        assert!(peak >= 2, "expected parallel execution, peak {peak}");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", BTreeMap::new()).unwrap();

        let recorder = Arc::new(Recorder {
            panic: vec!["a"],
            ..Recorder::default()
        });
        let report = ApplyReport::collect(executor(recorder).apply(plan_for(&registry, None))).await;

        assert!(matches!(
            &report.get("a").unwrap().outcome,
            NodeOutcome::Failed { error: ActionError::Panicked { message }, .. } if message.contains("boom in a")
        ));
        assert_eq!(report.get("b").unwrap().outcome.label(), "succeeded");
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_every_entry() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();

        let recorder = Arc::new(Recorder::default());
        let executor = executor(recorder.clone());
        executor.cancellation_token().cancel();

        let report = ApplyReport::collect(executor.apply(plan_for(&registry, None))).await;
        assert_eq!(report.cancelled, 2);
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_finish() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();

        let recorder = Arc::new(Recorder::default());
        let executor = executor(recorder.clone()).with_max_in_flight(1);
        let token = executor.cancellation_token();

        let mut stream = executor.apply(plan_for(&registry, None));
        let first = stream.next().await.unwrap();
        assert_eq!(first.name, "a");
        assert_eq!(first.outcome.label(), "succeeded");

        token.cancel();
        let rest: Vec<ExecutionResult> = stream.collect().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "b");
        assert_eq!(rest[0].outcome, NodeOutcome::Cancelled);
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["create a"]);
    }

    #[tokio::test]
    async fn test_noop_uses_recorded_outputs_and_skips_handler() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "test", BTreeMap::new()).unwrap();
        registry.declare("b", "test", reference("a")).unwrap();

        let mut state = StackState::new("quickstart", "dev");
        let mut outputs = Outputs::new();
        outputs.insert("x".into(), json!("recorded"));
        state.set_resource(ResourceRecord::new("a", "test", Outputs::new(), outputs));

        let mut mock = MockResourceHandler::new();
        mock.expect_create()
            .withf(|request| request.name == "b" && request.inputs["value"] == json!("recorded"))
            .times(1)
            .returning(|request| Ok(request.inputs.clone()));
        mock.expect_update().never();
        mock.expect_delete().never();

        let report = ApplyReport::collect(executor(Arc::new(mock)).apply(plan_for(&registry, Some(&state)))).await;
        assert_eq!(report.get("a").unwrap().action, ActionType::Noop);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_deletes_wait_for_dependents_and_block_on_failure() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("rg", "test", Outputs::new(), Outputs::new()));
        let mut web = ResourceRecord::new("web", "test", Outputs::new(), Outputs::new());
        web.dependencies = vec![String::from("rg")];
        state.set_resource(web);

        let recorder = Arc::new(Recorder {
            fail: vec!["web"],
            ..Recorder::default()
        });
        let plan = Planner::new().plan_destroy(&state).unwrap();
        let report = ApplyReport::collect(executor(recorder.clone()).apply(plan)).await;

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["delete web"]);
        assert_eq!(report.get("rg").unwrap().outcome.label(), "blocked");
    }

    #[tokio::test]
    async fn test_delete_waits_for_slow_update_of_former_dependent() {
        let mut state = StackState::new("quickstart", "dev");
        state.set_resource(ResourceRecord::new("rg_old", "test", Outputs::new(), Outputs::new()));
        let mut web = ResourceRecord::new("web", "test", Outputs::new(), Outputs::new());
        web.dependencies = vec![String::from("rg_old")];
        state.set_resource(web);

        let mut registry = NodeRegistry::new();
        let inputs = BTreeMap::from([(String::from("group"), InputValue::Literal(json!("rg-new")))]);
        registry.declare("web", "test", inputs).unwrap();

        let recorder = Arc::new(Recorder::default());
        let report =
            ApplyReport::collect(executor(recorder.clone()).apply(plan_for(&registry, Some(&state)))).await;

        assert!(report.is_success());
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["start update web", "end update web", "delete rg_old"]
        );
    }

    #[test]
    fn test_only_changing_actions_have_an_active_state() {
        assert_eq!(active_state(ActionType::Noop), None);
        assert_eq!(active_state(ActionType::Create), Some(LifecycleState::Creating));
        assert_eq!(active_state(ActionType::Update), Some(LifecycleState::Updating));
        assert!(active_state(ActionType::Delete).is_some_and(LifecycleState::is_active));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_node() {
        let mut registry = NodeRegistry::new();
        registry.declare("a", "unregistered", BTreeMap::new()).unwrap();

        let report = ApplyReport::collect(
            executor(Arc::new(Recorder::default())).apply(plan_for(&registry, None)),
        )
        .await;
        assert!(matches!(
            report.get("a").unwrap().outcome,
            NodeOutcome::Failed { error: ActionError::MissingHandler { .. }, .. }
        ));
    }
}
