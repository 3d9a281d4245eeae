//! `condition` and `switch` node kinds (spec.md §6, §4.6 "Conditional
//! branching"). Both report which outgoing handle is active; the engine
//! reads that back out of the completed value to decide which edges fire.

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

/// The active-branch tag an engine reads off a Condition/Switch result to
/// decide which outgoing edges are live this run.
pub fn active_branch(result: &Value) -> Option<&str> {
    match result {
        Value::Map(m) => m.get("branch").and_then(Value::as_str),
        _ => None,
    }
}

fn condition_result(is_true: bool) -> Value {
    let mut m = FxHashMap::default();
    m.insert("kind".to_string(), Value::String("condition".to_string()));
    m.insert("value".to_string(), Value::Bool(is_true));
    m.insert("branch".to_string(), Value::String(if is_true { "true" } else { "false" }.to_string()));
    Value::Map(m)
}

fn switch_result(branch: &str) -> Value {
    let mut m = FxHashMap::default();
    m.insert("kind".to_string(), Value::String("switch".to_string()));
    m.insert("branch".to_string(), Value::String(branch.to_string()));
    Value::Map(m)
}

/// `condition` — `data.expression`, evaluated against this node's single
/// incoming value bound as `input`. Unresolved identifiers fall back to a
/// simple numeric comparison against the scalar input, for backward
/// compatibility with `">0"`-style conditions (spec.md §4.1).
pub struct ConditionNode;

#[async_trait]
impl Executor for ConditionNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "expression").is_none() {
            return Err(missing_field("condition", "expression"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("false");
        match ctx.eval(expr) {
            Ok(v) => NodeOutcome::Completed(condition_result(v.is_truthy())),
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}

/// `switch` — `data.cases: [{label, expression}]`, `data.default`
/// (optional). The first case whose expression is truthy wins; otherwise
/// `default`, or the node fails if no default is configured.
pub struct SwitchNode;

#[async_trait]
impl Executor for SwitchNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        let cases = node.data.get("cases").and_then(|v| v.as_array()).ok_or_else(|| missing_field("switch", "cases"))?;
        for case in cases {
            if case.get("label").and_then(|v| v.as_str()).is_none() {
                return Err(EngineError::Validation("switch case requires a 'label'".to_string()));
            }
            if case.get("expression").and_then(|v| v.as_str()).is_none() {
                return Err(EngineError::Validation("switch case requires an 'expression'".to_string()));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let cases = node.data.get("cases").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        for case in &cases {
            let label = case.get("label").and_then(|v| v.as_str()).unwrap_or_default();
            let expression = case.get("expression").and_then(|v| v.as_str()).unwrap_or("false");
            match ctx.eval(expression) {
                Ok(v) if v.is_truthy() => return NodeOutcome::Completed(switch_result(label)),
                Ok(_) => continue,
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        if str_field(&node.data, "default").is_some() || node.data.get("default").is_some() {
            NodeOutcome::Completed(switch_result("default"))
        } else {
            NodeOutcome::Failed(EngineError::Executor {
                kind: "switch".to_string(),
                message: "no case matched and no default configured".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    #[tokio::test]
    async fn condition_backward_compatible_numeric_comparison() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("c", "condition", json!({"expression": ">=18"}));

        let ctx = test_ctx("c", vec![Value::Number(25.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(result) = ConditionNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert_eq!(active_branch(&result), Some("true"));

        let ctx = test_ctx("c", vec![Value::Number(15.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(result) = ConditionNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert_eq!(active_branch(&result), Some("false"));
    }

    #[tokio::test]
    async fn switch_picks_first_truthy_case_else_default() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "s",
            "switch",
            json!({
                "cases": [
                    {"label": "small", "expression": "input < 10"},
                    {"label": "big", "expression": "input >= 10"},
                ],
                "default": "other",
            }),
        );

        let ctx = test_ctx("s", vec![Value::Number(20.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(result) = SwitchNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert_eq!(active_branch(&result), Some("big"));
    }

    #[tokio::test]
    async fn switch_falls_back_to_default_when_no_case_matches() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec(
            "s",
            "switch",
            json!({"cases": [{"label": "only", "expression": "input > 1000"}], "default": "fallback"}),
        );
        let ctx = test_ctx("s", vec![Value::Number(1.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(result) = SwitchNode.execute(&ctx, &node).await else {
            panic!("expected completion");
        };
        assert_eq!(active_branch(&result), Some("default"));
    }

    #[tokio::test]
    async fn switch_without_default_fails_when_no_case_matches() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("s", "switch", json!({"cases": [{"label": "only", "expression": "input > 1000"}]}));
        let ctx = test_ctx("s", vec![Value::Number(1.0)], &state, &http, &events, &registry);
        assert!(matches!(SwitchNode.execute(&ctx, &node).await, NodeOutcome::Failed(_)));
    }
}
