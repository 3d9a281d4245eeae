//! Array/list transformation node kinds (spec.md §6): `map`, `filter`,
//! `reduce`, `slice`, `sort`, `find`, `flat_map`, `group_by`, `unique`,
//! `chunk`, `reverse`, `partition`, `zip`, `sample`, `range`, `transpose`,
//! `split`.
//!
//! All operate on this node's single list-valued input, via expressions
//! evaluated with `item`/`acc` bound per spec.md §4.1.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

fn input_list(ctx: &ExecutionContext) -> Result<Vec<Value>, EngineError> {
    ctx.single_input()
        .as_list()
        .map(<[Value]>::to_vec)
        .ok_or_else(|| EngineError::Executor { kind: "list".to_string(), message: "input is not a list".to_string() })
}

fn eval_over_item(ctx: &ExecutionContext, expression: &str, item: &Value) -> Result<Value, EngineError> {
    let mut scope = ctx.expr_scope();
    scope.item = item.clone();
    ctx.eval_with_scope(expression, &scope)
}

macro_rules! require_expression {
    ($kind:literal) => {
        fn validate_impl(node: &NodeSpec) -> Result<(), EngineError> {
            if str_field(&node.data, "expression").is_none() {
                return Err(missing_field($kind, "expression"));
            }
            Ok(())
        }
    };
}

pub struct MapNode;
#[async_trait]
impl Executor for MapNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("map");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("item");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            match eval_over_item(ctx, expr, item) {
                Ok(v) => out.push(v),
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

pub struct FilterNode;
#[async_trait]
impl Executor for FilterNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("filter");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("true");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut out = Vec::new();
        for item in items {
            match eval_over_item(ctx, expr, &item) {
                Ok(v) if v.is_truthy() => out.push(item),
                Ok(_) => {}
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

pub struct ReduceNode;
#[async_trait]
impl Executor for ReduceNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("reduce");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("acc");
        let initial = node.data.get("initial").map(Value::from_json).unwrap_or(Value::Number(0.0));
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut acc = initial;
        for item in items {
            let mut scope = ctx.expr_scope();
            scope.item = item;
            scope.acc = acc;
            match ctx.eval_with_scope(expr, &scope) {
                Ok(v) => acc = v,
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(acc)
    }
}

pub struct SliceNode;
#[async_trait]
impl Executor for SliceNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let len = items.len() as i64;
        let norm = |raw: i64| if raw < 0 { (len + raw).max(0) } else { raw.min(len) } as usize;
        let start = norm(node.data.get("start").and_then(|v| v.as_i64()).unwrap_or(0));
        let end = norm(node.data.get("end").and_then(|v| v.as_i64()).unwrap_or(len));
        let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
        NodeOutcome::Completed(Value::List(slice))
    }
}

pub struct SortNode;
#[async_trait]
impl Executor for SortNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let mut items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let field = str_field(&node.data, "field");
        let descending = str_field(&node.data, "order") == Some("desc");
        let key_of = |v: &Value| -> f64 {
            match field {
                Some(f) => v.as_map().and_then(|m| m.get(f)).and_then(Value::as_f64).unwrap_or(f64::NAN),
                None => v.as_f64().unwrap_or(f64::NAN),
            }
        };
        items.sort_by(|a, b| key_of(a).partial_cmp(&key_of(b)).unwrap_or(std::cmp::Ordering::Equal));
        if descending {
            items.reverse();
        }
        NodeOutcome::Completed(Value::List(items))
    }
}

pub struct FindNode;
#[async_trait]
impl Executor for FindNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("find");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("true");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        for item in items {
            match eval_over_item(ctx, expr, &item) {
                Ok(v) if v.is_truthy() => return NodeOutcome::Completed(item),
                Ok(_) => {}
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::Null)
    }
}

pub struct FlatMapNode;
#[async_trait]
impl Executor for FlatMapNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("flat_map");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("item");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut out = Vec::new();
        for item in &items {
            match eval_over_item(ctx, expr, item) {
                Ok(Value::List(mut inner)) => out.append(&mut inner),
                Ok(other) => out.push(other),
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

pub struct GroupByNode;
#[async_trait]
impl Executor for GroupByNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("group_by");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("item");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut groups: FxHashMap<String, Vec<Value>> = FxHashMap::default();
        for item in items {
            let key = match eval_over_item(ctx, expr, &item) {
                Ok(v) => v.to_string(),
                Err(e) => return NodeOutcome::Failed(e),
            };
            groups.entry(key).or_default().push(item);
        }
        let map = groups.into_iter().map(|(k, v)| (k, Value::List(v))).collect();
        NodeOutcome::Completed(Value::Map(map))
    }
}

pub struct UniqueNode;
#[async_trait]
impl Executor for UniqueNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, _node: &NodeSpec) -> NodeOutcome {
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let mut out: Vec<Value> = Vec::new();
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

pub struct ChunkNode;
#[async_trait]
impl Executor for ChunkNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if node.data.get("size").and_then(|v| v.as_u64()).unwrap_or(0) == 0 {
            return Err(missing_field("chunk", "size"));
        }
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let size = node.data.get("size").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let chunks = items.chunks(size.max(1)).map(|c| Value::List(c.to_vec())).collect();
        NodeOutcome::Completed(Value::List(chunks))
    }
}

pub struct ReverseNode;
#[async_trait]
impl Executor for ReverseNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, _node: &NodeSpec) -> NodeOutcome {
        let mut items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        items.reverse();
        NodeOutcome::Completed(Value::List(items))
    }
}

pub struct PartitionNode;
#[async_trait]
impl Executor for PartitionNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        require_expression!("partition");
        validate_impl(node)
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let expr = str_field(&node.data, "expression").unwrap_or("true");
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let (mut yes, mut no) = (Vec::new(), Vec::new());
        for item in items {
            match eval_over_item(ctx, expr, &item) {
                Ok(v) if v.is_truthy() => yes.push(item),
                Ok(_) => no.push(item),
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        let mut m = FxHashMap::default();
        m.insert("true".to_string(), Value::List(yes));
        m.insert("false".to_string(), Value::List(no));
        NodeOutcome::Completed(Value::Map(m))
    }
}

/// `zip` — combines this node's input list with `data.other` (a literal
/// list) pairwise, truncating to the shorter length.
pub struct ZipNode;
#[async_trait]
impl Executor for ZipNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if node.data.get("other").and_then(|v| v.as_array()).is_none() {
            return Err(missing_field("zip", "other"));
        }
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let other: Vec<Value> = node.data.get("other").and_then(|v| v.as_array()).map(|a| a.iter().map(Value::from_json).collect()).unwrap_or_default();
        let zipped = items.into_iter().zip(other).map(|(a, b)| Value::List(vec![a, b])).collect();
        NodeOutcome::Completed(Value::List(zipped))
    }
}

/// `sample` — `data.count` random elements without replacement.
pub struct SampleNode;
#[async_trait]
impl Executor for SampleNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let count = node.data.get("count").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let mut rng = rand::rng();
        let sampled = items.choose_multiple(&mut rng, count.min(items.len())).cloned().collect();
        NodeOutcome::Completed(Value::List(sampled))
    }
}

/// `range` — `data.start`, `data.end`, `data.step` (default 1); produces the
/// inclusive sequence `[start, end]` (spec.md §8 scenario 3's sum of even
/// squares 2..100 requires 100 itself to be a member of the range).
pub struct RangeNode;
#[async_trait]
impl Executor for RangeNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if node.data.get("start").and_then(|v| v.as_f64()).is_none() {
            return Err(missing_field("range", "start"));
        }
        if node.data.get("end").and_then(|v| v.as_f64()).is_none() {
            return Err(missing_field("range", "end"));
        }
        Ok(())
    }
    async fn execute(&self, _ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let start = node.data.get("start").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let end = node.data.get("end").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let step = node.data.get("step").and_then(|v| v.as_f64()).unwrap_or(1.0);
        if step == 0.0 {
            return NodeOutcome::Failed(EngineError::Executor {
                kind: "range".to_string(),
                message: "step must be non-zero".to_string(),
            });
        }
        let mut out = Vec::new();
        let mut cur = start;
        while (step > 0.0 && cur <= end) || (step < 0.0 && cur >= end) {
            out.push(Value::Number(cur));
            cur += step;
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

/// `transpose` — input is a list of equal-length lists; swaps rows/columns.
pub struct TransposeNode;
#[async_trait]
impl Executor for TransposeNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, _node: &NodeSpec) -> NodeOutcome {
        let rows = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let matrix: Option<Vec<Vec<Value>>> = rows.iter().map(|r| r.as_list().map(<[Value]>::to_vec)).collect();
        let Some(matrix) = matrix else {
            return NodeOutcome::Failed(EngineError::Executor {
                kind: "transpose".to_string(),
                message: "transpose requires a list of lists".to_string(),
            });
        };
        let cols = matrix.first().map(Vec::len).unwrap_or(0);
        let mut out = vec![Vec::with_capacity(matrix.len()); cols];
        for row in &matrix {
            for (c, v) in row.iter().enumerate().take(cols) {
                out[c].push(v.clone());
            }
        }
        NodeOutcome::Completed(Value::List(out.into_iter().map(Value::List).collect()))
    }
}

/// `split` — `data.parts` (default 2), the dual of `chunk`: divides the
/// input list into that many contiguous, roughly-equal-sized sub-lists
/// (earlier parts receive the remainder) rather than fixing a chunk size.
pub struct SplitNode;
#[async_trait]
impl Executor for SplitNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if let Some(parts) = node.data.get("parts") {
            if parts.as_u64().filter(|&n| n > 0).is_none() {
                return Err(EngineError::Validation("split node: 'parts' must be a positive integer".to_string()));
            }
        }
        Ok(())
    }
    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let parts = node.data.get("parts").and_then(serde_json::Value::as_u64).unwrap_or(2).max(1) as usize;
        let items = match input_list(ctx) {
            Ok(v) => v,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let base = items.len() / parts;
        let remainder = items.len() % parts;
        let mut out = Vec::with_capacity(parts);
        let mut rest = items.as_slice();
        for i in 0..parts {
            let take = base + usize::from(i < remainder);
            let (chunk, tail) = rest.split_at(take.min(rest.len()));
            out.push(Value::List(chunk.to_vec()));
            rest = tail;
        }
        NodeOutcome::Completed(Value::List(out))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};

    fn nums(values: &[f64]) -> Value {
        Value::List(values.iter().map(|n| Value::Number(*n)).collect())
    }

    async fn run(kind: &str, data: serde_json::Value, input: Value) -> NodeOutcome {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("n", kind, data);
        let ctx = test_ctx("n", vec![input], &state, &http, &events, &registry);
        registry.get(kind).unwrap().execute(&ctx, &node).await
    }

    #[tokio::test]
    async fn map_applies_expression_to_every_item() {
        let outcome = run("map", json!({"expression": "item * item"}), nums(&[1.0, 2.0, 3.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[1.0, 4.0, 9.0])));
    }

    #[tokio::test]
    async fn filter_keeps_only_truthy_items() {
        let outcome = run("filter", json!({"expression": "item % 2 == 0"}), nums(&[1.0, 2.0, 3.0, 4.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[2.0, 4.0])));
    }

    #[tokio::test]
    async fn reduce_folds_with_initial_value() {
        let outcome = run("reduce", json!({"expression": "acc + item", "initial": 0.0}), nums(&[1.0, 2.0, 3.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(Value::Number(n)) if n == 6.0));
    }

    #[tokio::test]
    async fn filter_map_reduce_pipeline_sums_squares_of_evens() {
        // Same composition as the even-square-sum scenario in spec.md §8,
        // computed independently here rather than hardcoding its literal.
        let evens: Vec<f64> = (1..100).filter(|n| n % 2 == 0).map(|n| n as f64).collect();
        let expected: f64 = evens.iter().map(|n| n * n).sum();

        let filtered = run("filter", json!({"expression": "item % 2 == 0"}), Value::List((1..100).map(|n| Value::Number(n as f64)).collect()))
            .await;
        let NodeOutcome::Completed(filtered) = filtered else { panic!("filter failed") };
        let mapped = run("map", json!({"expression": "item * item"}), filtered).await;
        let NodeOutcome::Completed(mapped) = mapped else { panic!("map failed") };
        let reduced = run("reduce", json!({"expression": "acc + item", "initial": 0.0}), mapped).await;
        assert!(matches!(reduced, NodeOutcome::Completed(Value::Number(n)) if n == expected));
    }

    #[tokio::test]
    async fn slice_supports_negative_indices() {
        let outcome = run("slice", json!({"start": -2, "end": 5}), nums(&[1.0, 2.0, 3.0, 4.0, 5.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[4.0, 5.0])));
    }

    #[tokio::test]
    async fn sort_descending() {
        let outcome = run("sort", json!({"order": "desc"}), nums(&[3.0, 1.0, 2.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[3.0, 2.0, 1.0])));
    }

    #[tokio::test]
    async fn find_returns_first_match_or_null() {
        let found = run("find", json!({"expression": "item > 2"}), nums(&[1.0, 2.0, 3.0, 4.0])).await;
        assert!(matches!(found, NodeOutcome::Completed(Value::Number(n)) if n == 3.0));
        let not_found = run("find", json!({"expression": "item > 100"}), nums(&[1.0, 2.0])).await;
        assert!(matches!(not_found, NodeOutcome::Completed(Value::Null)));
    }

    #[tokio::test]
    async fn unique_drops_duplicates_preserving_first_occurrence() {
        let outcome = run("unique", json!({}), nums(&[1.0, 2.0, 1.0, 3.0, 2.0])).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[1.0, 2.0, 3.0])));
    }

    #[tokio::test]
    async fn chunk_groups_into_fixed_size_lists() {
        let outcome = run("chunk", json!({"size": 2}), nums(&[1.0, 2.0, 3.0, 4.0, 5.0])).await;
        let NodeOutcome::Completed(Value::List(chunks)) = outcome else { panic!("expected list") };
        assert_eq!(chunks, vec![nums(&[1.0, 2.0]), nums(&[3.0, 4.0]), nums(&[5.0])]);
    }

    #[tokio::test]
    async fn partition_splits_into_true_false_buckets() {
        let outcome = run("partition", json!({"expression": "item >= 3"}), nums(&[1.0, 2.0, 3.0, 4.0])).await;
        let NodeOutcome::Completed(Value::Map(m)) = outcome else { panic!("expected map") };
        assert_eq!(m.get("true"), Some(&nums(&[3.0, 4.0])));
        assert_eq!(m.get("false"), Some(&nums(&[1.0, 2.0])));
    }

    #[tokio::test]
    async fn range_produces_an_inclusive_sequence() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("r", "range", json!({"start": 0.0, "end": 5.0, "step": 1.0}));
        let ctx = test_ctx("r", vec![], &state, &http, &events, &registry);
        let outcome = RangeNode.execute(&ctx, &node).await;
        assert!(matches!(outcome, NodeOutcome::Completed(v) if v == nums(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])));
    }

    #[tokio::test]
    async fn range_rejects_zero_step() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("r", "range", json!({"start": 0.0, "end": 5.0, "step": 0.0}));
        let ctx = test_ctx("r", vec![], &state, &http, &events, &registry);
        assert!(matches!(RangeNode.execute(&ctx, &node).await, NodeOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn group_by_buckets_on_key_expression() {
        let outcome = run("group_by", json!({"expression": "item % 2"}), nums(&[1.0, 2.0, 3.0, 4.0])).await;
        let NodeOutcome::Completed(Value::Map(m)) = outcome else { panic!("expected map") };
        assert_eq!(m.get("0"), Some(&nums(&[2.0, 4.0])));
        assert_eq!(m.get("1"), Some(&nums(&[1.0, 3.0])));
    }
}
