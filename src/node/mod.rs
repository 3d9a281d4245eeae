//! Node Executor Registry (spec.md §4.3): the `kind → executor` map plus the
//! `ExecutionContext` executors are given to read/write state.
//!
//! One trait object per kind, looked up by tag: an open registry keyed by
//! the wire `type` string rather than a closed, compile-time enum (spec.md
//! §4.3 "Dynamic dispatch across node kinds ... registry keyed by the kind
//! string. Executors expose a small capability set ... no inheritance").

pub mod executors;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;

pub use registry::{NodeExecutorRegistry, RegistryError};

use crate::error::EngineError;
use crate::event_bus::EventBus;
use crate::expr::{self, Scope};
use crate::http_client::HttpClientRegistry;
use crate::payload::{NodeSpec, SubgraphSpec};
use crate::state::{StateStore, VarScope};
use crate::value::Value;

/// What an executor's `execute` call decided (spec.md §4.3 "Execute(ctx,
/// node) -> (value, non-fatal error | fatal error | SKIPPED)").
pub enum NodeOutcome {
    Completed(Value),
    Skipped { reason: String },
    Failed(EngineError),
}

/// A node kind's behavior: structural validation up front, then execution
/// against an [`ExecutionContext`]. Implementors hold no state of their own
/// — everything mutable lives in the `StateStore` reached through the
/// context.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Eagerly checked for every node of this kind before any node runs
    /// (spec.md §4.6 "Setup phase ... eagerly validate every node").
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError>;

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome;
}

/// Everything one node execution is allowed to touch: the values flowing in
/// along its incoming edges, the shared `StateStore`, and process-lifetime
/// collaborators (HTTP clients, the event bus).
pub struct ExecutionContext<'a> {
    pub node_id: &'a str,
    pub inbound_values: Vec<(Option<String>, Value)>,
    pub state: &'a StateStore,
    pub http_clients: &'a HttpClientRegistry,
    pub events: &'a EventBus,
    /// Needed only by composite nodes (Loop, Parallel, Try/Catch, Retry,
    /// Timeout) to recurse into [`run_subgraph`](Self::run_subgraph).
    pub registry: &'a NodeExecutorRegistry,
}

impl<'a> ExecutionContext<'a> {
    /// Ordered values from edges targeting this node, `SKIPPED` entries
    /// omitted (spec.md §4.3 "skipped inputs omitted unless the node
    /// requests them").
    pub fn inputs(&self) -> Vec<Value> {
        self.inbound_values.iter().filter(|(_, v)| !v.is_skipped()).map(|(_, v)| v.clone()).collect()
    }

    /// Inputs including `SKIPPED` entries, tagged by source-handle — used by
    /// Join, which must see which branch produced nothing.
    pub fn inputs_with_handles(&self) -> &[(Option<String>, Value)] {
        &self.inbound_values
    }

    pub fn single_input(&self) -> Value {
        self.inputs().into_iter().next().unwrap_or(Value::Null)
    }

    pub fn node_result(&self, id: &str) -> Option<Value> {
        self.state.get_result(id)
    }

    pub fn all_results(&self) -> FxHashMap<String, Value> {
        self.state.all_results()
    }

    pub fn set_result(&self, value: Value) {
        self.state.set_result(self.node_id, value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.state.get_variable(name)
    }

    pub fn set_variable(&self, scope: VarScope, name: &str, value: Value) {
        self.state.set_variable(scope, name, value);
    }

    pub fn increment_http_call(&self) -> Result<(), EngineError> {
        self.state.record_http_call()
    }

    pub fn increment_loop_iteration(&self, loop_node_id: &str) -> Result<u64, EngineError> {
        self.state.record_loop_iteration(loop_node_id)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn http_client(&self, uid: Option<&str>) -> Result<Arc<crate::http_client::HttpClient>, EngineError> {
        self.http_clients
            .get(uid)
            .map_err(|e| EngineError::Executor { kind: "http".to_string(), message: e.to_string() })
    }

    /// Build an expression [`Scope`] for this node: node results, flat
    /// variables, and the node's single scalar input bound as `input`
    /// (spec.md §4.1 "the bare `<id>` root"/"input").
    pub fn expr_scope(&self) -> Scope {
        Scope {
            node_results: self.state.all_results(),
            variables: self.state.all_variables_flat(),
            context: FxHashMap::default(),
            item: Value::Null,
            acc: Value::Null,
            input: self.single_input(),
        }
    }

    pub fn eval(&self, source: &str) -> Result<Value, EngineError> {
        let expr = expr::parse(source)?;
        Ok(expr::eval::eval(&expr, &self.expr_scope())?)
    }

    pub fn eval_with_scope(&self, source: &str, scope: &Scope) -> Result<Value, EngineError> {
        let expr = expr::parse(source)?;
        Ok(expr::eval::eval(&expr, scope)?)
    }

    /// Run an embedded `subgraph` to completion in a fresh child scope
    /// (spec.md §4.6's "push the loop's scope onto the State Store"):
    /// composite nodes (Loop, Parallel, Try/Catch/Finally, Retry, Timeout)
    /// use this instead of a region-based error-routing scheme, so only
    /// embedded-subgraph failures are "catchable". Only a failure's state is
    /// left behind in the returned [`ExecutionContext`]'s parent scope if the
    /// caller chooses to merge it back; results from the child scope do not
    /// leak into `self.state` automatically.
    pub async fn run_subgraph(
        &self,
        subgraph: SubgraphSpec,
        scope_inputs: Vec<(String, Value)>,
    ) -> Result<crate::engine::SubgraphRun, EngineError> {
        let child = self.state.child_scope();
        for (name, value) in scope_inputs {
            child.set_variable(VarScope::Local, &name, value);
        }
        crate::engine::execute_subgraph(subgraph.into_payload(), self.registry, self.http_clients, self.events, child)
            .await
    }
}

/// Deserialize a node's embedded `subgraph` field, used by every composite
/// executor (Loop body, Parallel branches, Try/Catch/Finally regions,
/// Retry's wrapped operation, Timeout's wrapped body).
pub(crate) fn parse_subgraph(data: &Json, field: &str, kind: &str) -> Result<SubgraphSpec, EngineError> {
    let raw = data_field(data, field).ok_or_else(|| missing_field(kind, field))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| EngineError::Validation(format!("node kind '{kind}' field '{field}' is not a valid subgraph: {e}")))
}

pub(crate) fn data_field<'a>(data: &'a Json, name: &str) -> Option<&'a Json> {
    data.get(name)
}

pub(crate) fn str_field<'a>(data: &'a Json, name: &str) -> Option<&'a str> {
    data.get(name).and_then(Json::as_str)
}

pub(crate) fn missing_field(kind: &str, field: &str) -> EngineError {
    EngineError::Validation(format!("node kind '{kind}' requires field '{field}'"))
}
