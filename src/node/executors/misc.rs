//! `rate_limiter`, `schema_validator`, and `paginator` node kinds (spec.md
//! §6). None of these have a direct counterpart in the retrieved teacher or
//! pack examples; they are written in the idiom of their nearest siblings
//! (`delay`/`retry` for the cancellable wait, `http` for the request/response
//! shape) rather than grounded on a specific file — see `DESIGN.md`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{missing_field, str_field, ExecutionContext, Executor, NodeOutcome};

fn fail(kind: &'static str, message: impl Into<String>) -> NodeOutcome {
    NodeOutcome::Failed(EngineError::Executor { kind: kind.to_string(), message: message.into() })
}

/// Wait until `ctx.state`'s liveness check or `deadline` trips, whichever
/// comes first, polling in short ticks like `composite::cancellable_sleep`.
async fn cancellable_wait_until(ctx: &ExecutionContext, deadline: std::time::Instant) -> Result<(), EngineError> {
    const TICK: Duration = Duration::from_millis(20);
    loop {
        ctx.state.check_liveness()?;
        let now = std::time::Instant::now();
        if now >= deadline {
            return Ok(());
        }
        tokio::time::sleep((deadline - now).min(TICK)).await;
    }
}

/// `rate_limiter` — `data.key` (expression, resolves to the bucket's
/// identity), `data.maxPerInterval`, `data.interval` (nanoseconds),
/// `data.onLimitExceeded` (`wait`|`fail`, default `wait`). Shares one
/// fixed-window bucket per key across every node execution in this workflow
/// run, including across loop iterations and parallel branches (spec.md §4.5
/// "shared across ... the execution").
pub struct RateLimiterNode;

#[async_trait]
impl Executor for RateLimiterNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "key").is_none() {
            return Err(missing_field("rate_limiter", "key"));
        }
        if node.data.get("maxPerInterval").and_then(serde_json::Value::as_u64).filter(|&n| n > 0).is_none() {
            return Err(missing_field("rate_limiter", "maxPerInterval"));
        }
        if node.data.get("interval").and_then(serde_json::Value::as_u64).is_none() {
            return Err(missing_field("rate_limiter", "interval"));
        }
        match str_field(&node.data, "onLimitExceeded") {
            Some("wait") | Some("fail") | None => Ok(()),
            Some(other) => Err(EngineError::Validation(format!("rate_limiter node: unknown onLimitExceeded '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let key_expr = str_field(&node.data, "key").unwrap_or_default();
        let key = match ctx.eval(key_expr) {
            Ok(v) => v.to_string(),
            Err(e) => return NodeOutcome::Failed(e),
        };
        let max_per_interval = node.data.get("maxPerInterval").and_then(serde_json::Value::as_u64).unwrap_or(1);
        let interval = node.data.get("interval").and_then(serde_json::Value::as_u64).map(Duration::from_nanos).unwrap_or(Duration::from_secs(1));
        let on_limit = str_field(&node.data, "onLimitExceeded").unwrap_or("wait");

        loop {
            let wait = ctx.state.rate_limit_acquire(&key, max_per_interval, interval);
            if wait.is_zero() {
                return NodeOutcome::Completed(ctx.single_input());
            }
            if on_limit == "fail" {
                return fail("rate_limiter", format!("rate limit exceeded for key '{key}'"));
            }
            if let Err(e) = cancellable_wait_until(ctx, std::time::Instant::now() + wait).await {
                return NodeOutcome::Failed(e);
            }
        }
    }
}

fn schema_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "array",
        Value::Map(_) => "object",
        Value::Date(_) => "string",
        Value::Skipped => "null",
    }
}

/// Validate `value` against a small JSON-Schema-like subset: `type`,
/// `required` (object), `properties` (object), `items` (array).
fn validate_schema(value: &Value, schema: &serde_json::Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(serde_json::Value::as_str) {
        let actual = schema_type_name(value);
        if actual != expected {
            return Err(format!("{path}: expected type '{expected}', found '{actual}'"));
        }
    }

    if let Value::Map(fields) = value {
        if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
            for name in required {
                let name = name.as_str().unwrap_or_default();
                if !fields.contains_key(name) {
                    return Err(format!("{path}: missing required field '{name}'"));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (name, sub_schema) in properties {
                if let Some(field_value) = fields.get(name) {
                    validate_schema(field_value, sub_schema, &format!("{path}.{name}"))?;
                }
            }
        }
    }

    if let Value::List(items) = value {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_schema(item, item_schema, &format!("{path}[{i}]"))?;
            }
        }
    }

    Ok(())
}

/// `schema_validator` — `data.schema` (a JSON-Schema-like object supporting
/// `type`/`required`/`properties`/`items`), `data.onFailure` (`fail`|`pass`,
/// default `fail`; `pass` reports failures as `{valid, errors}` instead of a
/// fatal error, for callers that want to branch on validity downstream).
pub struct SchemaValidatorNode;

#[async_trait]
impl Executor for SchemaValidatorNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if node.data.get("schema").is_none() {
            return Err(missing_field("schema_validator", "schema"));
        }
        match str_field(&node.data, "onFailure") {
            Some("fail") | Some("pass") | None => Ok(()),
            Some(other) => Err(EngineError::Validation(format!("schema_validator node: unknown onFailure '{other}'"))),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let schema = node.data.get("schema").cloned().unwrap_or_default();
        let input = ctx.single_input();
        let report_only = str_field(&node.data, "onFailure") == Some("pass");

        match validate_schema(&input, &schema, "$") {
            Ok(()) => {
                if report_only {
                    let mut m = FxHashMap::default();
                    m.insert("valid".to_string(), Value::Bool(true));
                    m.insert("data".to_string(), input);
                    NodeOutcome::Completed(Value::Map(m))
                } else {
                    NodeOutcome::Completed(input)
                }
            }
            Err(reason) if report_only => {
                let mut m = FxHashMap::default();
                m.insert("valid".to_string(), Value::Bool(false));
                m.insert("errors".to_string(), Value::List(vec![Value::String(reason)]));
                NodeOutcome::Completed(Value::Map(m))
            }
            Err(reason) => fail("schema_validator", reason),
        }
    }
}

/// `paginator` — `data.url`, `data.method` (default `GET`), `data.headers`,
/// `data.clientUid`, `data.itemsField` (optional: extract and flatten this
/// field from each page instead of collecting whole page bodies),
/// `data.nextPageExpression` (evaluated per page with the page's response
/// bound as `input`; a falsy/missing result stops pagination, otherwise the
/// result must be a string and becomes the next request's URL),
/// `data.maxPages` (default 100, a hard upper bound independent of
/// `max_http_calls_per_exec`).
///
/// Implemented as a first-class node rather than a recipe of `http` +
/// `while_loop` + `accumulator` (spec.md §9 Open Question): a loop body would
/// need its `while_loop` condition, `http` target, and accumulator kept in
/// lockstep by the workflow author, and the Graph Analyzer's implicit-edge
/// pass has no way to see "the next URL" threading between iterations except
/// through variables — collapsing that threading into one executor is worth
/// the loss of in-workflow visibility into individual page fetches. See
/// `DESIGN.md`.
pub struct PaginatorNode;

#[async_trait]
impl Executor for PaginatorNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "url").is_none() {
            return Err(missing_field("paginator", "url"));
        }
        if let Some(m) = str_field(&node.data, "method") {
            if Method::from_bytes(m.as_bytes()).is_err() {
                return Err(EngineError::Validation(format!("paginator node: unknown method '{m}'")));
            }
        }
        if str_field(&node.data, "nextPageExpression").is_none() {
            return Err(missing_field("paginator", "nextPageExpression"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let method = str_field(&node.data, "method").and_then(|m| Method::from_bytes(m.as_bytes()).ok()).unwrap_or(Method::GET);
        let next_page_expr = str_field(&node.data, "nextPageExpression").unwrap_or("null");
        let items_field = str_field(&node.data, "itemsField");
        let max_pages = node.data.get("maxPages").and_then(serde_json::Value::as_u64).unwrap_or(100).max(1);
        let client_uid = str_field(&node.data, "clientUid");

        let client = match ctx.http_client(client_uid) {
            Ok(c) => c,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let mut current_url = client.resolve_url(str_field(&node.data, "url").unwrap_or_default());
        let mut pages = Vec::new();

        for _ in 0..max_pages {
            if let Err(e) = ctx.state.check_liveness() {
                return NodeOutcome::Failed(e);
            }
            if let Err(e) = client.ssrf_policy.validate(&current_url) {
                return NodeOutcome::Failed(e.into());
            }
            if let Err(e) = ctx.increment_http_call() {
                return NodeOutcome::Failed(e);
            }

            let mut builder = client.inner.request(method.clone(), &current_url);
            builder = client.apply_auth(builder);
            if let Some(headers) = node.data.get("headers").and_then(serde_json::Value::as_object) {
                for (name, value) in headers {
                    if let Some(v) = value.as_str() {
                        builder = builder.header(name, v);
                    }
                }
            }
            for (name, value) in &client.default_headers {
                builder = builder.header(name, value);
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => return fail("paginator", format!("request failed: {e}")),
            };
            let status = response.status().as_u16();
            let body = match response.bytes().await {
                Ok(b) => b,
                Err(e) => return fail("paginator", format!("failed to read response body: {e}")),
            };
            if body.len() > ctx.state.config().max_response_size {
                return NodeOutcome::Failed(EngineError::LimitExceeded { kind: "max_response_size" });
            }
            if !(200..300).contains(&status) {
                return fail("paginator", format!("http status {status}"));
            }

            let page = serde_json::from_slice::<serde_json::Value>(&body)
                .map(|j| Value::from_json(&j))
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()));

            match items_field {
                Some(field) => match page.as_map().and_then(|m| m.get(field)).and_then(Value::as_list) {
                    Some(items) => pages.extend_from_slice(items),
                    None => return fail("paginator", format!("response has no array field '{field}'")),
                },
                None => pages.push(page.clone()),
            }

            let mut scope = ctx.expr_scope();
            scope.input = page;
            let next = match ctx.eval_with_scope(next_page_expr, &scope) {
                Ok(v) => v,
                Err(e) => return NodeOutcome::Failed(e),
            };
            if !next.is_truthy() {
                break;
            }
            let next_url = match next.as_str() {
                Some(s) => s.to_string(),
                None => return fail("paginator", "nextPageExpression must resolve to a URL string or a falsy value"),
            };
            current_url = client.resolve_url(&next_url);
        }

        NodeOutcome::Completed(Value::List(pages))
    }
}
