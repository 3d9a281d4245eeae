//! Value-producing and variable/counter/accumulator node kinds (spec.md §6).

use async_trait::async_trait;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::state::VarScope;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

/// `number` — a literal numeric constant, `data.value`.
pub struct NumberNode;

#[async_trait]
impl Executor for NumberNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if node.data.get("value").and_then(|v| v.as_f64()).is_none() {
            return Err(missing_field("number", "value"));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let n = node.data.get("value").and_then(|v| v.as_f64()).unwrap_or(0.0);
        NodeOutcome::Completed(Value::Number(n))
    }
}

/// `text_input` — a literal string constant, `data.value`.
pub struct TextInputNode;

#[async_trait]
impl Executor for TextInputNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "value").is_none() {
            return Err(missing_field("text_input", "value"));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let s = str_field(&node.data, "value").unwrap_or_default().to_string();
        NodeOutcome::Completed(Value::String(s))
    }
}

/// `variable` — `data.name`, `data.op` (`get`|`set`), `data.scope`
/// (`workflow`|`local`|`global`, default `workflow`), `data.value` for `set`.
pub struct VariableNode;

fn parse_scope(data: &serde_json::Value) -> VarScope {
    match str_field(data, "scope") {
        Some("local") => VarScope::Local,
        Some("global") => VarScope::Global,
        _ => VarScope::Workflow,
    }
}

#[async_trait]
impl Executor for VariableNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "name").is_none() {
            return Err(missing_field("variable", "name"));
        }
        match str_field(&node.data, "op") {
            Some("get") | Some("set") | None => Ok(()),
            Some(other) => Err(EngineError::Validation(format!("variable node: unknown op '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let name = str_field(&node.data, "name").unwrap_or_default();
        let scope = parse_scope(&node.data);
        match str_field(&node.data, "op").unwrap_or("get") {
            "set" => {
                let value = node
                    .data
                    .get("value")
                    .map(Value::from_json)
                    .unwrap_or_else(|| ctx.single_input());
                ctx.set_variable(scope, name, value.clone());
                NodeOutcome::Completed(value)
            }
            _ => NodeOutcome::Completed(ctx.get_variable(name).unwrap_or(Value::Null)),
        }
    }
}

/// `counter` — monotonically increments a named numeric variable by
/// `data.step` (default 1) and returns the new value.
pub struct CounterNode;

#[async_trait]
impl Executor for CounterNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "name").is_none() {
            return Err(missing_field("counter", "name"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let name = str_field(&node.data, "name").unwrap_or_default();
        let step = node.data.get("step").and_then(|v| v.as_f64()).unwrap_or(1.0);
        let current = ctx.get_variable(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let next = current + step;
        ctx.set_variable(VarScope::Workflow, name, Value::Number(next));
        NodeOutcome::Completed(Value::Number(next))
    }
}

/// `accumulator` — `data.op` (`add`|`array`|`concat`) folds this node's
/// input into a named variable.
pub struct AccumulatorNode;

#[async_trait]
impl Executor for AccumulatorNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "name").is_none() {
            return Err(missing_field("accumulator", "name"));
        }
        match str_field(&node.data, "op") {
            Some("add") | Some("array") | Some("concat") => Ok(()),
            other => Err(EngineError::Validation(format!("accumulator node: unknown op {other:?}"))),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let name = str_field(&node.data, "name").unwrap_or_default();
        let op = str_field(&node.data, "op").unwrap_or("array");
        let input = ctx.single_input();
        let updated = match op {
            "add" => {
                let current = ctx.get_variable(name).and_then(|v| v.as_f64()).unwrap_or(0.0);
                let delta = input.as_f64().unwrap_or(0.0);
                Value::Number(current + delta)
            }
            "concat" => {
                let current = ctx.get_variable(name).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default();
                Value::String(format!("{current}{input}"))
            }
            _ => {
                let mut items = ctx.get_variable(name).and_then(|v| v.as_list().map(|s| s.to_vec())).unwrap_or_default();
                items.push(input);
                Value::List(items)
            }
        };
        ctx.set_variable(VarScope::Workflow, name, updated.clone());
        NodeOutcome::Completed(updated)
    }
}
