//! `foreach`, `while_loop`, and `until` node kinds (spec.md §4.6 "Loops").
//! Each repeatedly re-runs an embedded `body` subgraph
//! ([`crate::node::ExecutionContext::run_subgraph`]), binding the loop's own
//! variables (`item`/`index` for ForEach) as local scope on every iteration,
//! and accumulates the body's final output into a list.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, parse_subgraph, str_field, ExecutionContext, Executor, NodeOutcome};

fn items_of(ctx: &ExecutionContext, node: &NodeSpec) -> Result<Vec<Value>, EngineError> {
    match node.data.get("items") {
        Some(serde_json::Value::Array(items)) => Ok(items.iter().map(Value::from_json).collect()),
        Some(serde_json::Value::String(expr)) => ctx
            .eval(expr)
            .and_then(|v| v.as_list().map(<[Value]>::to_vec).ok_or_else(|| EngineError::Executor {
                kind: "foreach".to_string(),
                message: "'items' expression did not evaluate to a list".to_string(),
            })),
        _ => ctx.single_input().as_list().map(<[Value]>::to_vec).ok_or_else(|| EngineError::Executor {
            kind: "foreach".to_string(),
            message: "no 'items' configured and input is not a list".to_string(),
        }),
    }
}

/// `foreach` — `data.items` (literal list, expression string, or falls back
/// to this node's input), `data.body` (embedded subgraph). Binds `item` and
/// `index` as local variables visible inside the body.
pub struct ForEachNode;

#[async_trait]
impl Executor for ForEachNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        parse_subgraph(&node.data, "body", "foreach").map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let body = match parse_subgraph(&node.data, "body", "foreach") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let items = match items_of(ctx, node) {
            Ok(i) => i,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let mut outputs = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if let Err(e) = ctx.increment_loop_iteration(ctx.node_id) {
                return NodeOutcome::Failed(e);
            }
            if let Err(e) = ctx.state.check_liveness() {
                return NodeOutcome::Failed(e);
            }
            let scope_inputs = vec![("item".to_string(), item), ("index".to_string(), Value::Number(index as f64))];
            match ctx.run_subgraph(body.clone(), scope_inputs).await {
                Ok(run) => outputs.push(run.final_output),
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(outputs))
    }
}

/// `while_loop` — `data.condition` (expression, re-evaluated before every
/// iteration), `data.body`. Stops as soon as the condition is no longer
/// truthy; never runs the body at all if it starts false.
pub struct WhileLoopNode;

#[async_trait]
impl Executor for WhileLoopNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "condition").is_none() {
            return Err(missing_field("while_loop", "condition"));
        }
        parse_subgraph(&node.data, "body", "while_loop").map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let condition = str_field(&node.data, "condition").unwrap_or("false");
        let body = match parse_subgraph(&node.data, "body", "while_loop") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let mut outputs = Vec::new();
        loop {
            match ctx.eval(condition) {
                Ok(v) if v.is_truthy() => {}
                Ok(_) => break,
                Err(e) => return NodeOutcome::Failed(e),
            }
            if let Err(e) = ctx.increment_loop_iteration(ctx.node_id) {
                return NodeOutcome::Failed(e);
            }
            if let Err(e) = ctx.state.check_liveness() {
                return NodeOutcome::Failed(e);
            }
            match ctx.run_subgraph(body.clone(), Vec::new()).await {
                Ok(run) => outputs.push(run.final_output),
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(outputs))
    }
}

#[cfg(test)]
mod foreach_tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    fn doubling_body() -> serde_json::Value {
        json!({
            "nodes": [{"id": "doubled", "type": "transform", "data": {"expression": "variables.item * 2"}}],
            "edges": [],
        })
    }

    #[tokio::test]
    async fn foreach_runs_the_body_once_per_item() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("loop", "foreach", json!({"items": [1.0, 2.0, 3.0], "body": doubling_body()}));
        let ctx = test_ctx("loop", vec![], &state, &http, &events, &registry);

        let NodeOutcome::Completed(Value::List(outputs)) = ForEachNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert_eq!(outputs, vec![Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]);
    }

    #[tokio::test]
    async fn foreach_over_empty_items_runs_the_body_zero_times() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("loop", "foreach", json!({"items": [], "body": doubling_body()}));
        let ctx = test_ctx("loop", vec![], &state, &http, &events, &registry);
        let NodeOutcome::Completed(Value::List(outputs)) = ForEachNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert!(outputs.is_empty());
    }
}

/// `until` — `data.condition`, `data.body`; the mirror of `while_loop`: the
/// body always runs at least once, and the loop stops once `condition`
/// becomes truthy (do-while-until, not do-while-while).
pub struct UntilNode;

#[async_trait]
impl Executor for UntilNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "condition").is_none() {
            return Err(missing_field("until", "condition"));
        }
        parse_subgraph(&node.data, "body", "until").map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let condition = str_field(&node.data, "condition").unwrap_or("true");
        let body = match parse_subgraph(&node.data, "body", "until") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let mut outputs = Vec::new();
        loop {
            if let Err(e) = ctx.increment_loop_iteration(ctx.node_id) {
                return NodeOutcome::Failed(e);
            }
            if let Err(e) = ctx.state.check_liveness() {
                return NodeOutcome::Failed(e);
            }
            match ctx.run_subgraph(body.clone(), Vec::new()).await {
                Ok(run) => outputs.push(run.final_output),
                Err(e) => return NodeOutcome::Failed(e),
            }
            match ctx.eval(condition) {
                Ok(v) if v.is_truthy() => break,
                Ok(_) => continue,
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(outputs))
    }
}
