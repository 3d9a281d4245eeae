//! `try_catch`, `retry`, `timeout`, and `delay` node kinds (spec.md §4.6).
//! Durations on the wire are positive integer nanoseconds (spec.md §6).

use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, parse_subgraph, str_field, ExecutionContext, Executor, NodeOutcome};

fn duration_field(node: &NodeSpec, field: &str) -> Option<Duration> {
    node.data.get(field).and_then(serde_json::Value::as_u64).map(Duration::from_nanos)
}

/// Sleep for `duration`, checking the execution's liveness (cancellation or
/// overall deadline) at short, bounded intervals so the wait is a genuine
/// suspension point rather than one long uninterruptible sleep (spec.md §5
/// "Delays are cancellable").
async fn cancellable_sleep(ctx: &ExecutionContext, duration: Duration) -> Result<(), EngineError> {
    const TICK: Duration = Duration::from_millis(20);
    let deadline = std::time::Instant::now() + duration;
    loop {
        ctx.state.check_liveness()?;
        let now = std::time::Instant::now();
        if now >= deadline {
            return Ok(());
        }
        tokio::time::sleep((deadline - now).min(TICK)).await;
    }
}

fn error_value(err: &EngineError) -> Value {
    let mut m = FxHashMap::default();
    m.insert("message".to_string(), Value::String(err.sanitized_message()));
    Value::Map(m)
}

/// `try_catch` — `data.tryBody` (required), `data.catchBody` (optional,
/// receives `error` as a bound local variable), `data.finallyBody`
/// (optional, always runs, its output is not part of the node's result).
pub struct TryCatchNode;

#[async_trait]
impl Executor for TryCatchNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        parse_subgraph(&node.data, "tryBody", "try_catch")?;
        if node.data.get("catchBody").is_some() {
            parse_subgraph(&node.data, "catchBody", "try_catch")?;
        }
        if node.data.get("finallyBody").is_some() {
            parse_subgraph(&node.data, "finallyBody", "try_catch")?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let try_body = match parse_subgraph(&node.data, "tryBody", "try_catch") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let outcome = match ctx.run_subgraph(try_body, Vec::new()).await {
            Ok(run) => Ok(run.final_output),
            Err(err) => {
                if node.data.get("catchBody").is_some() {
                    let catch_body = match parse_subgraph(&node.data, "catchBody", "try_catch") {
                        Ok(b) => b,
                        Err(e) => return NodeOutcome::Failed(e),
                    };
                    match ctx.run_subgraph(catch_body, vec![("error".to_string(), error_value(&err))]).await {
                        Ok(run) => Ok(run.final_output),
                        Err(catch_err) => Err(catch_err),
                    }
                } else {
                    Err(err)
                }
            }
        };

        if node.data.get("finallyBody").is_some() {
            let finally_body = match parse_subgraph(&node.data, "finallyBody", "try_catch") {
                Ok(b) => b,
                Err(e) => return NodeOutcome::Failed(e),
            };
            if let Err(e) = ctx.run_subgraph(finally_body, Vec::new()).await {
                return NodeOutcome::Failed(e);
            }
        }

        match outcome {
            Ok(value) => NodeOutcome::Completed(value),
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}

#[derive(Clone, Copy)]
enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

/// `retry` — `data.body`, `data.policy: {type: fixed|linear|exponential,
/// initial, multiplier, max, maxAttempts}`. Each attempt consumes one node
/// execution (the embedded body's own); delays between attempts are
/// cancellable.
pub struct RetryNode;

#[async_trait]
impl Executor for RetryNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        parse_subgraph(&node.data, "body", "retry")?;
        let policy = node.data.get("policy").ok_or_else(|| missing_field("retry", "policy"))?;
        match str_field(policy, "type") {
            Some("fixed") | Some("linear") | Some("exponential") | None => Ok(()),
            Some(other) => Err(EngineError::Validation(format!("retry policy: unknown type '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let body = match parse_subgraph(&node.data, "body", "retry") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let policy = node.data.get("policy").cloned().unwrap_or_default();
        let backoff = match str_field(&policy, "type") {
            Some("linear") => Backoff::Linear,
            Some("exponential") => Backoff::Exponential,
            _ => Backoff::Fixed,
        };
        let initial = policy.get("initial").and_then(serde_json::Value::as_u64).map(Duration::from_nanos).unwrap_or(Duration::from_millis(100));
        let max_delay = policy.get("max").and_then(serde_json::Value::as_u64).map(Duration::from_nanos).unwrap_or(Duration::from_secs(30));
        let multiplier = policy.get("multiplier").and_then(serde_json::Value::as_f64).unwrap_or(2.0);
        let max_attempts = policy.get("maxAttempts").and_then(serde_json::Value::as_u64).unwrap_or(3).max(1);

        let mut last_err = None;
        for attempt in 0..max_attempts {
            if let Err(e) = ctx.state.check_liveness() {
                return NodeOutcome::Failed(e);
            }
            match ctx.run_subgraph(body.clone(), Vec::new()).await {
                Ok(run) => return NodeOutcome::Completed(run.final_output),
                Err(e) => last_err = Some(e),
            }
            if attempt + 1 < max_attempts {
                let delay = match backoff {
                    Backoff::Fixed => initial,
                    Backoff::Linear => initial * (attempt as u32 + 1),
                    Backoff::Exponential => initial.mul_f64(multiplier.powi(attempt as i32)),
                }
                .min(max_delay);
                if let Err(e) = cancellable_sleep(ctx, delay).await {
                    return NodeOutcome::Failed(e);
                }
            }
        }
        NodeOutcome::Failed(last_err.unwrap_or_else(|| EngineError::Executor {
            kind: "retry".to_string(),
            message: "all attempts failed".to_string(),
        }))
    }
}

/// `timeout` — `data.duration` (nanoseconds), `data.body`. The body runs
/// under a derived, per-node deadline; on expiry the node fails with
/// `NodeTimeout` rather than aborting the whole run (spec.md §5 "Per-node
/// `timeout` ... derives a child signal").
pub struct TimeoutNode;

#[async_trait]
impl Executor for TimeoutNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if duration_field(node, "duration").is_none() {
            return Err(missing_field("timeout", "duration"));
        }
        parse_subgraph(&node.data, "body", "timeout").map(|_| ())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let duration = duration_field(node, "duration").unwrap_or(Duration::from_secs(30));
        let body = match parse_subgraph(&node.data, "body", "timeout") {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };
        match tokio::time::timeout(duration, ctx.run_subgraph(body, Vec::new())).await {
            Ok(Ok(run)) => NodeOutcome::Completed(run.final_output),
            Ok(Err(e)) => NodeOutcome::Failed(e),
            Err(_elapsed) => NodeOutcome::Failed(EngineError::NodeTimeout { node_id: ctx.node_id.to_string() }),
        }
    }
}

/// `delay` — `data.duration` (nanoseconds); passes its single input through
/// unchanged after waiting.
pub struct DelayNode;

#[async_trait]
impl Executor for DelayNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if duration_field(node, "duration").is_none() {
            return Err(missing_field("delay", "duration"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let duration = duration_field(node, "duration").unwrap_or_default();
        if let Err(e) = cancellable_sleep(ctx, duration).await {
            return NodeOutcome::Failed(e);
        }
        NodeOutcome::Completed(ctx.single_input())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};
    use crate::state::VarScope;

    fn failing_body_with_inputs() -> serde_json::Value {
        json!({
            "nodes": [
                {"id": "num", "type": "number", "data": {"value": 1.0}},
                {"id": "den", "type": "number", "data": {"value": 0.0}},
                {"id": "boom", "type": "operation", "data": {"op": "divide"}},
            ],
            "edges": [{"source": "num", "target": "boom"}, {"source": "den", "target": "boom"}],
        })
    }

    #[tokio::test]
    async fn try_catch_routes_a_failure_to_the_catch_body() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "tc",
            "try_catch",
            json!({
                "tryBody": {
                    "nodes": [
                        {"id": "num", "type": "number", "data": {"value": 1.0}},
                        {"id": "den", "type": "number", "data": {"value": 0.0}},
                        {"id": "boom", "type": "operation", "data": {"op": "divide"}},
                    ],
                    "edges": [{"source": "num", "target": "boom"}, {"source": "den", "target": "boom"}],
                },
                "catchBody": {
                    "nodes": [{"id": "caught", "type": "text_input", "data": {"value": "caught"}}],
                    "edges": [],
                },
                "finallyBody": {
                    "nodes": [{"id": "mark", "type": "variable", "data": {"name": "finally_ran", "op": "set", "value": true}}],
                    "edges": [],
                },
            }),
        );
        let ctx = test_ctx("tc", vec![], &state, &http, &events, &registry);
        let outcome = TryCatchNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::String(s)) if s == "caught"));
        assert_eq!(state.get_variable("finally_ran"), Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn try_catch_without_a_catch_body_propagates_the_failure() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("tc", "try_catch", json!({"tryBody": failing_body_with_inputs()}));
        let ctx = test_ctx("tc", vec![], &state, &http, &events, &registry);
        assert!(matches!(TryCatchNode.execute(&ctx, &node).await, NodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn retry_succeeds_after_exhausting_earlier_failures() {
        let state = test_state();
        state.set_variable(VarScope::Workflow, "attempts", Value::Number(0.0));
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "r",
            "retry",
            json!({
                "policy": {"type": "fixed", "initial": 1_000_000u64, "maxAttempts": 3},
                "body": {
                    "nodes": [
                        {"id": "bump", "type": "counter", "data": {"name": "attempts", "step": 1.0}},
                        {"id": "flaky", "type": "transform", "data": {
                            "expression": "1 / ((variables.attempts - 1) * (variables.attempts - 2))",
                        }},
                    ],
                    "edges": [{"source": "bump", "target": "flaky"}],
                },
            }),
        );
        let ctx = test_ctx("r", vec![], &state, &http, &events, &registry);
        let outcome = RetryNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Number(n)) if n == 0.5));
        assert_eq!(state.get_variable("attempts"), Some(Value::Number(3.0)));
    }

    #[tokio::test]
    async fn retry_surfaces_the_last_error_once_attempts_are_exhausted() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "r",
            "retry",
            json!({
                "policy": {"type": "fixed", "initial": 1_000_000u64, "maxAttempts": 2},
                "body": failing_body_with_inputs(),
            }),
        );
        let ctx = test_ctx("r", vec![], &state, &http, &events, &registry);
        assert!(matches!(RetryNode.execute(&ctx, &node).await, NodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn timeout_fails_the_node_when_the_body_outlives_its_duration() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "t",
            "timeout",
            json!({
                "duration": 5_000_000u64,
                "body": {
                    "nodes": [{"id": "slow", "type": "delay", "data": {"duration": 2_000_000_000u64}}],
                    "edges": [],
                },
            }),
        );
        let ctx = test_ctx("t", vec![], &state, &http, &events, &registry);
        assert!(matches!(TimeoutNode.execute(&ctx, &node).await, NodeOutcome::Failed(EngineError::NodeTimeout { .. })));
    }

    #[tokio::test]
    async fn delay_passes_its_input_through_after_waiting() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("d", "delay", json!({"duration": 1_000_000u64}));
        let ctx = test_ctx("d", vec![Value::Number(9.0)], &state, &http, &events, &registry);
        let outcome = DelayNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Number(n)) if n == 9.0));
    }
}
