//! `cache` node kind (spec.md §6 "`cache` (key, ttl, eviction)"). Wraps this
//! node's single input: a cache hit returns the stored value without
//! re-running anything upstream of the edge feeding it, a miss stores the
//! input under `key` for subsequent iterations/branches to reuse. Misses
//! racing the same key coalesce through `StateStore`'s singleflight guard
//! (spec.md §9 Open Question on Cache/Parallel interaction; see `DESIGN.md`).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::state::EvictionPolicy;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

fn eviction_policy(node: &NodeSpec) -> Result<EvictionPolicy, EngineError> {
    match str_field(&node.data, "eviction") {
        Some("lru") | None => Ok(EvictionPolicy::Lru),
        Some("lfu") => Ok(EvictionPolicy::Lfu),
        Some("ttl") => Ok(EvictionPolicy::Ttl),
        Some(other) => Err(EngineError::Validation(format!("cache node: unknown eviction policy '{other}'"))),
    }
}

/// `cache` — `data.key` (expression, evaluated per-execution to a string),
/// `data.ttl` (nanoseconds, optional), `data.eviction` (`lru`|`lfu`|`ttl`,
/// default `lru`), `data.maxSize` (default 1000), `data.storage`
/// (`execution`|`process`, default `execution`; spec.md §5 "Caches are
/// per-execution unless a Cache node declares `storage=process`").
pub struct CacheNode;

#[async_trait]
impl Executor for CacheNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "key").is_none() {
            return Err(missing_field("cache", "key"));
        }
        eviction_policy(node)?;
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let key_expr = str_field(&node.data, "key").unwrap_or_default();
        let key = match ctx.eval(key_expr) {
            Ok(v) => v.to_string(),
            Err(e) => return NodeOutcome::Failed(e),
        };
        let policy = match eviction_policy(node) {
            Ok(p) => p,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let max_size = node.data.get("maxSize").and_then(serde_json::Value::as_u64).unwrap_or(1000) as usize;
        let ttl = node.data.get("ttl").and_then(serde_json::Value::as_u64).map(Duration::from_nanos);
        let process_scoped = str_field(&node.data, "storage") == Some("process");
        let input = ctx.single_input();

        let value = if process_scoped {
            ctx.state.process_cache_get_or_insert(ctx.node_id, policy, max_size, &key, ttl, move || async move { input }).await
        } else {
            ctx.state.cache_get_or_insert(ctx.node_id, policy, max_size, &key, ttl, move || async move { input }).await
        };
        NodeOutcome::Completed(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event_bus::EventBus;
    use crate::node::test_support::{spec, test_ctx, test_http_clients, test_registry, test_state};
    use crate::value::Value;

    #[tokio::test]
    async fn second_hit_returns_the_value_stored_by_the_first_miss() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();
        let node = spec("c", "cache", json!({"key": "'fixed-key'"}));

        let ctx = test_ctx("c", vec![Value::Number(1.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(first) = CacheNode.execute(&ctx, &node).await else { panic!("expected completion") };
        assert_eq!(first, Value::Number(1.0));

        // A second call with a different input still sees the cached value.
        let ctx = test_ctx("c", vec![Value::Number(2.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(second) = CacheNode.execute(&ctx, &node).await else { panic!("expected completion") };
        assert_eq!(second, Value::Number(1.0));
    }

    #[tokio::test]
    async fn distinct_keys_on_the_same_node_are_independent() {
        let state = test_state();
        let http = test_http_clients();
        let events = EventBus::new();
        let registry = test_registry();

        let node_a = spec("c", "cache", json!({"key": "'key-a'"}));
        let ctx = test_ctx("c", vec![Value::Number(1.0)], &state, &http, &events, &registry);
        CacheNode.execute(&ctx, &node_a).await;

        let node_b = spec("c", "cache", json!({"key": "'key-b'"}));
        let ctx = test_ctx("c", vec![Value::Number(2.0)], &state, &http, &events, &registry);
        let NodeOutcome::Completed(value) = CacheNode.execute(&ctx, &node_b).await else { panic!("expected completion") };
        assert_eq!(value, Value::Number(2.0));
    }

    #[test]
    fn validate_rejects_unknown_eviction_policy() {
        let node = spec("c", "cache", json!({"key": "'k'", "eviction": "mru"}));
        assert!(CacheNode.validate(&node).is_err());
    }
}
