//! `transform` and `extract` node kinds (spec.md §6). Both operate on this
//! node's single scalar input rather than a list, unlike the `map`/`filter`
//! family in [`super::list_ops`].

use async_trait::async_trait;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

/// `transform` — `data.expression`, evaluated with this node's single input
/// bound as `input` (spec.md §4.1).
pub struct TransformNode;

#[async_trait]
impl Executor for TransformNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "expression").is_none() {
            return Err(missing_field("transform", "expression"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("input");
        match ctx.eval(expr) {
            Ok(v) => NodeOutcome::Completed(v),
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}

/// `extract` — `data.field`, a dot-separated path walked over this node's
/// single map-valued input. Missing intermediate keys yield `null` rather
/// than failing the node.
pub struct ExtractNode;

#[async_trait]
impl Executor for ExtractNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "field").is_none() {
            return Err(missing_field("extract", "field"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let field = str_field(&node.data, "field").unwrap_or_default();
        let mut current = ctx.single_input();
        for segment in field.split('.') {
            current = match current.as_map().and_then(|m| m.get(segment)) {
                Some(v) => v.clone(),
                None => return NodeOutcome::Completed(Value::Null),
            };
        }
        NodeOutcome::Completed(current)
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    #[tokio::test]
    async fn transform_evaluates_expression_against_input() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("t", "transform", json!({"expression": "input * 2"}));
        let ctx = test_ctx("t", vec![Value::Number(21.0)], &state, &http, &events, &registry);
        let outcome = TransformNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Number(n)) if n == 42.0));
    }

    #[tokio::test]
    async fn extract_walks_nested_path() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("e", "extract", json!({"field": "user.name"}));
        let mut inner = FxHashMap::default();
        inner.insert("name".to_string(), Value::String("ada".to_string()));
        let mut outer = FxHashMap::default();
        outer.insert("user".to_string(), Value::Map(inner));
        let ctx = test_ctx("e", vec![Value::Map(outer)], &state, &http, &events, &registry);
        let outcome = ExtractNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::String(s)) if s == "ada"));
    }

    #[tokio::test]
    async fn extract_missing_key_yields_null_not_a_failure() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("e", "extract", json!({"field": "missing"}));
        let ctx = test_ctx("e", vec![Value::Map(FxHashMap::default())], &state, &http, &events, &registry);
        let outcome = ExtractNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Null)));
    }
}
