//! `operation` and `text_operation` node kinds (spec.md §6).

use async_trait::async_trait;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

const NUMERIC_OPS: &[&str] = &["add", "subtract", "multiply", "divide", "modulo", "power"];
const TEXT_OPS: &[&str] = &["concat", "uppercase", "lowercase", "trim", "split", "replace"];

/// `operation` — `data.op` in `{add, subtract, multiply, divide, modulo,
/// power}`, applied left-to-right over this node's inputs.
pub struct OperationNode;

#[async_trait]
impl Executor for OperationNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        let op = str_field(&node.data, "op").ok_or_else(|| missing_field("operation", "op"))?;
        if !NUMERIC_OPS.contains(&op) {
            return Err(EngineError::Validation(format!("operation node: unknown op '{op}'")));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let op = str_field(&node.data, "op").unwrap_or("add");
        let operands = ctx.inputs();
        let numbers: Option<Vec<f64>> = operands.iter().map(Value::as_f64).collect();
        let Some(numbers) = numbers else {
            return NodeOutcome::Failed(EngineError::Executor {
                kind: "operation".to_string(),
                message: "all inputs to an operation node must be numeric".to_string(),
            });
        };
        if numbers.is_empty() {
            return NodeOutcome::Failed(EngineError::Executor {
                kind: "operation".to_string(),
                message: "operation node requires at least one input".to_string(),
            });
        }
        let mut iter = numbers.into_iter();
        let first = iter.next().unwrap();
        let result = iter.try_fold(first, |acc, n| match op {
            "add" => Ok(acc + n),
            "subtract" => Ok(acc - n),
            "multiply" => Ok(acc * n),
            "divide" => {
                if n == 0.0 {
                    Err(())
                } else {
                    Ok(acc / n)
                }
            }
            "modulo" => {
                if n == 0.0 {
                    Err(())
                } else {
                    Ok(acc % n)
                }
            }
            "power" => Ok(acc.powf(n)),
            _ => Ok(acc),
        });
        match result {
            Ok(v) => NodeOutcome::Completed(Value::Number(v)),
            Err(()) => NodeOutcome::Failed(EngineError::Executor {
                kind: "operation".to_string(),
                message: "division or modulo by zero".to_string(),
            }),
        }
    }
}

/// `text_operation` — `data.op` in `{concat, uppercase, lowercase, trim,
/// split, replace}`.
pub struct TextOperationNode;

#[async_trait]
impl Executor for TextOperationNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        let op = str_field(&node.data, "op").ok_or_else(|| missing_field("text_operation", "op"))?;
        if !TEXT_OPS.contains(&op) {
            return Err(EngineError::Validation(format!("text_operation node: unknown op '{op}'")));
        }
        if op == "replace" && (str_field(&node.data, "from").is_none() || str_field(&node.data, "to").is_none()) {
            return Err(EngineError::Validation("text_operation 'replace' requires 'from' and 'to'".to_string()));
        }
        if op == "split" && str_field(&node.data, "separator").is_none() {
            return Err(EngineError::Validation("text_operation 'split' requires 'separator'".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let op = str_field(&node.data, "op").unwrap_or("concat");
        let inputs = ctx.inputs();
        let result = match op {
            "concat" => Value::String(inputs.iter().map(Value::to_string).collect::<Vec<_>>().join("")),
            "uppercase" => Value::String(ctx.single_input().to_string().to_uppercase()),
            "lowercase" => Value::String(ctx.single_input().to_string().to_lowercase()),
            "trim" => Value::String(ctx.single_input().to_string().trim().to_string()),
            "split" => {
                let sep = str_field(&node.data, "separator").unwrap_or(",");
                let parts = ctx.single_input().to_string().split(sep).map(|s| Value::String(s.to_string())).collect();
                Value::List(parts)
            }
            "replace" => {
                let from = str_field(&node.data, "from").unwrap_or_default();
                let to = str_field(&node.data, "to").unwrap_or_default();
                Value::String(ctx.single_input().to_string().replace(from, to))
            }
            _ => Value::Null,
        };
        NodeOutcome::Completed(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    async fn run(kind: &str, data: serde_json::Value, inputs: Vec<Value>) -> NodeOutcome {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("n", kind, data);
        let ctx = test_ctx("n", inputs, &state, &http, &events, &registry);
        let executor = registry.get(kind).unwrap();
        executor.execute(&ctx, &node).await
    }

    #[tokio::test]
    async fn add_folds_left_to_right() {
        let outcome = run("operation", json!({"op": "add"}), vec![Value::Number(10.0), Value::Number(5.0), Value::Number(1.0)]).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Number(n)) if n == 16.0));
    }

    #[tokio::test]
    async fn divide_by_zero_fails() {
        let outcome = run("operation", json!({"op": "divide"}), vec![Value::Number(1.0), Value::Number(0.0)]).await;
        assert!(matches!(outcome, NodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn non_numeric_input_fails() {
        let outcome = run("operation", json!({"op": "add"}), vec![Value::String("x".into())]).await;
        assert!(matches!(outcome, NodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn text_concat_joins_all_inputs() {
        let outcome =
            run("text_operation", json!({"op": "concat"}), vec![Value::String("foo".into()), Value::String("bar".into())]).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::String(s)) if s == "foobar"));
    }

    #[tokio::test]
    async fn text_replace_requires_from_and_to_at_validation() {
        let node = spec("n", "text_operation", json!({"op": "replace", "from": "a"}));
        assert!(TextOperationNode.validate(&node).is_err());
    }

    #[tokio::test]
    async fn text_split_on_separator() {
        let outcome = run("text_operation", json!({"op": "split", "separator": ","}), vec![Value::String("a,b,c".into())]).await;
        let NodeOutcome::Completed(Value::List(items)) = outcome else { panic!("expected list") };
        assert_eq!(items, vec![Value::String("a".into()), Value::String("b".into()), Value::String("c".into())]);
    }
}
