//! The Scheduler / Engine (spec.md §4.6) — the heart of the crate. Walks a
//! payload's effective topological order exactly once, resolving each
//! node's inbound edges against the State Store, applying the unified skip
//! rule, dispatching to the Node Executor Registry, and reporting lifecycle
//! events to the Observer bus.
//!
//! A single-pass orchestration loop in the `#[instrument(skip(...), err)]`
//! style, built around a dependency-driven walk rather than a fixed
//! barrier-synchronized superstep model: spec.md §5 only requires
//! single-threaded cooperative dispatch outside explicit Parallel regions,
//! so the scheduler here is a plain loop over a precomputed topo order rather
//! than generation-counted barrier machinery.
//!
//! **Skip propagation (spec.md §3 invariant 7, §4.6 "Running → Skipped").**
//! A node is `Skipped` iff it has at least one inbound edge and every
//! resolved inbound value is `Skipped`. This single rule, applied uniformly,
//! produces every per-kind exception the spec calls out without special
//! casing: a Condition/Switch's inactive branch resolves to `Skipped` for
//! that one edge (see [`resolve_edge_value`]), so a node fed only by an
//! inactive branch sees "all inputs skipped" and is itself skipped; a Join
//! fed by one completed branch and several skipped ones sees "not all
//! skipped" and proceeds, matching "Join collects non-skipped inputs"
//! without the scheduler knowing what a Join is.
//!
//! **Composite nodes (Loop, Parallel, Try/Catch/Finally, Retry, Timeout).**
//! Rather than routing errors across regions of one shared graph, these
//! node kinds carry an embedded `subgraph` field (spec.md §4.6's own
//! simplification for loop bodies, generalized here to every composite
//! kind — see `DESIGN.md`) and recurse into [`execute_subgraph`] through
//! [`crate::node::ExecutionContext::run_subgraph`]. Only a failure inside an
//! embedded subgraph is ever "catchable"; a `Failed` node at the top level
//! always aborts the run.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::TryRngCore;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event_bus::{EventBus, Observer, WorkflowEvent, WorkflowStatus};
use crate::graph::{self, ExecutionGraph, ResolvedEdge};
use crate::http_client::HttpClientRegistry;
use tokio::sync::Mutex as AsyncMutex;

use crate::node::executors::{self, condition};
use crate::node::{ExecutionContext, NodeExecutorRegistry, NodeOutcome};
use crate::payload::{ExecutionResult, Payload};
use crate::state::{CacheRegion, CancelToken, StateStore};
use crate::value::Value;

/// One node's terminal state for this run (spec.md §4.6's state machine,
/// collapsed to the three outcomes that matter for downstream edge
/// resolution — `Cancelled` never reaches this map because the walk stops
/// before deciding any further node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Completed,
    Skipped,
    Failed,
}

/// The result of walking one DAG to completion or to its first fatal error,
/// shared by the top-level [`Engine::execute`] and every nested
/// [`execute_subgraph`] call.
pub struct SubgraphRun {
    pub node_results: FxHashMap<String, Value>,
    pub final_output: Value,
    pub errors: Vec<String>,
    pub outcome: WorkflowStatus,
}

impl SubgraphRun {
    pub fn failed(&self) -> bool {
        !matches!(self.outcome, WorkflowStatus::Completed)
    }
}

/// Process-lifetime collaborators (spec.md §4.3, §4.8) plus the per-call
/// dispatch entry point. Construct one `Engine` per process; `Execute` is
/// the only public per-run operation (spec.md §4.6).
pub struct Engine {
    registry: NodeExecutorRegistry,
    http_clients: HttpClientRegistry,
    /// Shared across every `execute` call on this `Engine` (spec.md §9 open
    /// question on `global` variable scope, resolved here as a process-wide
    /// mutex; see `DESIGN.md`).
    global_variables: Arc<RwLock<FxHashMap<String, Value>>>,
    /// Shared across every `execute` call, read only by `cache` nodes that
    /// declare `storage=process` (spec.md §5).
    process_caches: Arc<AsyncMutex<FxHashMap<String, CacheRegion>>>,
}

impl Engine {
    /// An engine with every built-in node kind registered (spec.md §6) and
    /// a default HTTP Client Registry whose SSRF policy is derived from
    /// `config`. Register additional named HTTP clients afterward via
    /// [`Engine::http_clients_mut`].
    pub fn new(config: &EngineConfig) -> Self {
        let mut registry = NodeExecutorRegistry::new();
        executors::register_all(&mut registry).expect("built-in node kinds each register under a distinct name");
        Self {
            registry,
            http_clients: HttpClientRegistry::new(config),
            global_variables: Arc::new(RwLock::new(FxHashMap::default())),
            process_caches: Arc::new(AsyncMutex::new(FxHashMap::default())),
        }
    }

    pub fn http_clients_mut(&mut self) -> &mut HttpClientRegistry {
        &mut self.http_clients
    }

    pub fn registry(&self) -> &NodeExecutorRegistry {
        &self.registry
    }

    /// `Execute(payload, config, observers) -> Result` (spec.md §4.6).
    /// `cancel` is the external cancellation handle (spec.md §5 "External
    /// cancel invoked from the caller propagates identically to timeout");
    /// pass [`CancelToken::new`] if the caller has no external trigger.
    #[instrument(skip_all, fields(workflow_id = payload.workflow_id.as_deref().unwrap_or("")))]
    pub async fn execute(
        &self,
        payload: Payload,
        config: EngineConfig,
        observers: Vec<Arc<dyn Observer>>,
        cancel: CancelToken,
    ) -> ExecutionResult {
        let events = EventBus::new();
        for observer in observers {
            events.register(observer);
        }

        let execution_id = generate_execution_id();
        let workflow_id = payload.workflow_id.clone();

        let graph = match graph::analyze(&payload) {
            Ok(g) => g,
            Err(e) => return validation_failure(execution_id, workflow_id, e),
        };
        if let Err(e) = self.registry.validate_all(&graph.nodes) {
            return validation_failure(execution_id, workflow_id, e);
        }

        let node_count = graph.nodes.len();
        let state = StateStore::new(config, self.global_variables.clone(), self.process_caches.clone(), cancel);

        tracing::debug!(execution_id = %execution_id, node_count, "workflow started");
        events.emit(WorkflowEvent::WorkflowStarted {
            execution_id: execution_id.clone(),
            workflow_id: workflow_id.clone(),
            node_count,
        });

        let start = Instant::now();
        let run = run_dag(&graph, &self.registry, &self.http_clients, &events, &state).await;
        let duration_ns = start.elapsed().as_nanos() as u64;

        tracing::debug!(execution_id = %execution_id, ?run.outcome, duration_ns, "workflow completed");
        events.emit(WorkflowEvent::WorkflowCompleted {
            execution_id: execution_id.clone(),
            status: run.outcome,
            duration_ns,
        });

        ExecutionResult {
            execution_id,
            workflow_id,
            node_results: run.node_results.iter().map(|(id, v)| (id.clone(), v.to_json())).collect(),
            final_output: run.final_output.to_json(),
            errors: run.errors,
        }
    }
}

fn validation_failure(execution_id: String, workflow_id: Option<String>, e: EngineError) -> ExecutionResult {
    tracing::warn!(error = %e, "payload rejected before WorkflowStarted");
    ExecutionResult {
        execution_id,
        workflow_id,
        node_results: FxHashMap::default(),
        final_output: Json::Null,
        errors: vec![e.sanitized_message()],
    }
}

/// Run an already-analyzed, already-validated graph to completion against
/// `state`, dispatching through `registry`. Shared by [`Engine::execute`]
/// (the top-level run) and [`execute_subgraph`] (every embedded composite
/// body); the caller decides what, if anything, a non-`Completed` outcome
/// means for it.
async fn run_dag(
    graph: &ExecutionGraph,
    registry: &NodeExecutorRegistry,
    http_clients: &HttpClientRegistry,
    events: &EventBus,
    state: &StateStore,
) -> SubgraphRun {
    let mut status: Vec<Option<NodeStatus>> = vec![None; graph.nodes.len()];
    let mut errors = Vec::new();
    let mut outcome = WorkflowStatus::Completed;

    for &idx in &graph.topo_order {
        if let Err(e) = state.check_liveness() {
            tracing::warn!(error = %e, "execution stopped: deadline or cancellation");
            outcome = if matches!(e, EngineError::Cancelled | EngineError::WorkflowTimeout { .. }) {
                WorkflowStatus::Cancelled
            } else {
                WorkflowStatus::Failed
            };
            errors.push(e.sanitized_message());
            break;
        }

        let node = &graph.nodes[idx];
        let mut inbound_values: Vec<(Option<String>, Value)> = graph
            .inbound_edges(idx)
            .map(|edge| {
                let source_result = state.get_result(graph.node_id(edge.source));
                let value = resolve_edge_value(status[edge.source], source_result.as_ref(), edge);
                (edge.target_handle.clone(), value)
            })
            .collect();
        // Handle-sorted, not completion-order, per spec.md §5 ordering
        // guarantee 2 — relevant to Join, harmless (stable) for everyone else.
        inbound_values.sort_by(|a, b| a.0.cmp(&b.0));

        let has_inbound = !inbound_values.is_empty();
        if has_inbound && inbound_values.iter().all(|(_, v)| v.is_skipped()) {
            state.set_result(node.id.clone(), Value::Skipped);
            status[idx] = Some(NodeStatus::Skipped);
            events.emit(WorkflowEvent::NodeSkipped {
                node_id: node.id.clone(),
                reason: "all data-carrying inputs were skipped".to_string(),
            });
            continue;
        }

        let executor = match registry.get(&node.kind) {
            Ok(e) => e,
            Err(e) => {
                // Already checked in the setup-phase validate_all pass; reaching
                // here would mean the graph changed under us, which it can't.
                errors.push(e.to_string());
                outcome = WorkflowStatus::Failed;
                break;
            }
        };

        if let Err(e) = state.record_node_execution() {
            tracing::warn!(error = %e, "node execution limit exceeded");
            errors.push(e.sanitized_message());
            outcome = WorkflowStatus::Failed;
            break;
        }

        events.emit(WorkflowEvent::NodeStarted { node_id: node.id.clone(), kind: node.kind.clone() });
        let started = Instant::now();

        let ctx = ExecutionContext {
            node_id: &node.id,
            inbound_values,
            state,
            http_clients,
            events,
            registry,
        };
        let outcome_of_node = executor.execute(&ctx, node).await;
        let duration_ns = started.elapsed().as_nanos() as u64;

        match outcome_of_node {
            NodeOutcome::Completed(value) => {
                state.set_result(node.id.clone(), value.clone());
                status[idx] = Some(NodeStatus::Completed);
                events.emit(WorkflowEvent::NodeCompleted {
                    node_id: node.id.clone(),
                    kind: node.kind.clone(),
                    result: value,
                    duration_ns,
                });
            }
            NodeOutcome::Skipped { reason } => {
                state.set_result(node.id.clone(), Value::Skipped);
                status[idx] = Some(NodeStatus::Skipped);
                events.emit(WorkflowEvent::NodeSkipped { node_id: node.id.clone(), reason });
            }
            NodeOutcome::Failed(err) => {
                status[idx] = Some(NodeStatus::Failed);
                tracing::error!(node_id = %node.id, error = %err, "node failed");
                events.emit(WorkflowEvent::NodeFailed {
                    node_id: node.id.clone(),
                    kind: node.kind.clone(),
                    message: err.sanitized_message(),
                    duration_ns,
                });
                errors.push(err.sanitized_message());
                outcome = WorkflowStatus::Failed;
                break;
            }
        }
    }

    let node_results = state.all_results();
    let final_output =
        if matches!(outcome, WorkflowStatus::Completed) { pick_final_output(graph, &status, &node_results) } else { Value::Null };

    SubgraphRun { node_results, final_output, errors, outcome }
}

/// Resolve one inbound edge's value given its source's decided status
/// (spec.md §4.6 "Running → Skipped" exceptions, folded into a single rule
/// — see the module doc comment).
fn resolve_edge_value(source_status: Option<NodeStatus>, source_result: Option<&Value>, edge: &ResolvedEdge) -> Value {
    match source_status {
        Some(NodeStatus::Completed) => {
            let result = source_result.cloned().unwrap_or(Value::Null);
            match condition::active_branch(&result) {
                Some(active) => match edge.source_handle.as_deref() {
                    Some(h) if h == active => result,
                    Some(_) => Value::Skipped,
                    None => result,
                },
                None => result,
            }
        }
        Some(NodeStatus::Skipped) | None => Value::Skipped,
        Some(NodeStatus::Failed) => Value::Skipped, // unreachable: a Failed node aborts the run first
    }
}

/// Final-output selection (spec.md §4.6 / §3): an explicit `final: true` tag
/// wins if exactly one tagged node completed; several tagged completions (or,
/// failing that, several completed sink nodes) aggregate into a map keyed by
/// node id, matching the deterministic handle-sorted-map convention used for
/// Join (see `DESIGN.md`); otherwise the last `Completed` node in
/// topological order; otherwise `null`.
fn pick_final_output(graph: &ExecutionGraph, status: &[Option<NodeStatus>], node_results: &FxHashMap<String, Value>) -> Value {
    let completed = |idx: usize| -> Option<Value> {
        (status[idx] == Some(NodeStatus::Completed)).then(|| node_results.get(graph.node_id(idx)).cloned()).flatten()
    };

    let tagged_final: Vec<usize> = (0..graph.nodes.len())
        .filter(|&i| graph.nodes[i].data.get("final").and_then(Json::as_bool) == Some(true))
        .filter(|&i| completed(i).is_some())
        .collect();

    match tagged_final.as_slice() {
        [] => {}
        [only] => return completed(*only).unwrap(),
        many => return aggregate(graph, many, node_results),
    }

    let sinks: Vec<usize> = (0..graph.nodes.len()).filter(|&i| graph.adjacency[i].is_empty()).filter(|&i| completed(i).is_some()).collect();

    match sinks.as_slice() {
        [] => graph.topo_order.iter().rev().find_map(|&i| completed(i)).unwrap_or(Value::Null),
        [only] => completed(*only).unwrap(),
        many => aggregate(graph, many, node_results),
    }
}

fn aggregate(graph: &ExecutionGraph, indices: &[usize], node_results: &FxHashMap<String, Value>) -> Value {
    let mut map = FxHashMap::default();
    for &i in indices {
        let id = graph.node_id(i);
        if let Some(v) = node_results.get(id) {
            map.insert(id.to_string(), v.clone());
        }
    }
    Value::Map(map)
}

/// Run an embedded `subgraph` (a Loop body, Parallel branch, Try/Catch/
/// Finally region, Retry's wrapped operation, or Timeout's wrapped body) to
/// completion against an already-scoped [`StateStore`] (spec.md §4.6's "push
/// the loop's scope onto the State Store"). A non-`Completed` outcome
/// becomes an `Err` so the caller — the composite node's own executor —
/// decides what it means: catchable for Try/Catch, retryable for Retry,
/// fatal (propagated) for Loop and Parallel.
pub async fn execute_subgraph(
    payload: Payload,
    registry: &NodeExecutorRegistry,
    http_clients: &HttpClientRegistry,
    events: &EventBus,
    scope: StateStore,
) -> Result<SubgraphRun, EngineError> {
    let graph = graph::analyze(&payload)?;
    registry.validate_all(&graph.nodes)?;
    let run = run_dag(&graph, registry, http_clients, events, &scope).await;
    if run.failed() {
        let message = run.errors.last().cloned().unwrap_or_else(|| "subgraph execution failed".to_string());
        return Err(EngineError::Executor { kind: "subgraph".to_string(), message });
    }
    Ok(run)
}

/// 16 lowercase hex characters from a cryptographically secure generator,
/// falling back to a timestamp-seeded `exec_<ns>` if the OS RNG is
/// unavailable (spec.md §6 "Execution identifier format").
fn generate_execution_id() -> String {
    let mut bytes = [0u8; 8];
    match rand::rngs::OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Err(_) => {
            let ns = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            format!("exec_{ns}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{EdgeSpec, NodeSpec};
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(&EngineConfig::default())
    }

    fn node(id: &str, kind: &str, data: Json) -> NodeSpec {
        NodeSpec { id: id.to_string(), kind: kind.to_string(), data }
    }

    fn edge(source: &str, target: &str) -> EdgeSpec {
        EdgeSpec { source: source.into(), target: target.into(), source_handle: None, target_handle: None }
    }

    #[tokio::test]
    async fn addition_scenario_produces_fifteen() {
        let payload = Payload {
            workflow_id: None,
            nodes: vec![
                node("1", "number", json!({"value": 10.0})),
                node("2", "number", json!({"value": 5.0})),
                node("3", "operation", json!({"op": "add"})),
            ],
            edges: vec![edge("1", "3"), edge("2", "3")],
        };
        let result = engine().execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new()).await;
        assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
        assert_eq!(result.final_output, json!(15.0));
        assert_eq!(result.node_results.get("3"), Some(&json!(15.0)));
    }

    #[tokio::test]
    async fn conditional_branch_skips_the_inactive_side() {
        let payload = Payload {
            workflow_id: None,
            nodes: vec![
                node("a", "number", json!({"value": 25.0})),
                node("c", "condition", json!({"expression": ">=18"})),
                node("b", "text_input", json!({"value": "adult"})),
                node("e", "text_input", json!({"value": "minor"})),
            ],
            edges: vec![
                edge("a", "c"),
                EdgeSpec { source: "c".into(), target: "b".into(), source_handle: Some("true".into()), target_handle: None },
                EdgeSpec { source: "c".into(), target: "e".into(), source_handle: Some("false".into()), target_handle: None },
            ],
        };
        let result = engine().execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new()).await;
        assert_eq!(result.node_results.get("b"), Some(&json!("adult")));
        assert_eq!(result.node_results.get("e"), Some(&Json::Null));
    }

    #[tokio::test]
    async fn cyclic_graph_fails_before_any_node_runs() {
        let payload = Payload {
            workflow_id: None,
            nodes: vec![node("a", "number", json!({"value": 1.0})), node("b", "number", json!({"value": 2.0}))],
            edges: vec![edge("a", "b"), edge("b", "a")],
        };
        let result = engine().execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new()).await;
        assert!(result.node_results.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("cyclic"));
    }
}
