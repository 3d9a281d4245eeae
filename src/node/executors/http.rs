//! `http` node kind (spec.md §6, §4.8). Every request — and every redirect
//! hop it follows — is re-validated against the owning [`HttpClient`]'s
//! [`crate::ssrf::SsrfPolicy`] before a socket is opened (spec.md §4.2
//! "Validation is re-run on every request and on every redirect"), which is
//! why [`crate::http_client::HttpClient`] builds its inner `reqwest::Client`
//! with redirects disabled: this executor walks them by hand.

use async_trait::async_trait;
use reqwest::Method;
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;
use crate::value::Value;

use super::super::{str_field, ExecutionContext, Executor, NodeOutcome};

/// `http` — `data.url`, `data.method` (default `GET`), `data.headers`
/// (object), `data.body` (any JSON value, sent as the request body),
/// `data.clientUid` (selects a registered named client; omitted uses the
/// default client). `data.treat_errors_as_data: true` turns a non-2xx
/// response into a completed `{status, headers, body}` value instead of a
/// fatal error (spec.md §4.6 "unless the node kind opts into non-fatal
/// errors").
pub struct HttpNode;

fn response_as_value(status: u16, headers: &reqwest::header::HeaderMap, body: &[u8]) -> Value {
    let mut headers_map = FxHashMap::default();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            headers_map.insert(name.as_str().to_string(), Value::String(v.to_string()));
        }
    }
    let body_value = serde_json::from_slice::<serde_json::Value>(body)
        .map(|j| Value::from_json(&j))
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).to_string()));
    let mut m = FxHashMap::default();
    m.insert("status".to_string(), Value::Number(status as f64));
    m.insert("headers".to_string(), Value::Map(headers_map));
    m.insert("body".to_string(), body_value);
    Value::Map(m)
}

fn fail(message: impl Into<String>) -> NodeOutcome {
    NodeOutcome::Failed(EngineError::Executor { kind: "http".to_string(), message: message.into() })
}

#[async_trait]
impl Executor for HttpNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        if str_field(&node.data, "url").is_none() {
            return Err(super::super::missing_field("http", "url"));
        }
        if let Some(m) = str_field(&node.data, "method") {
            if Method::from_bytes(m.as_bytes()).is_err() {
                return Err(EngineError::Validation(format!("http node: unknown method '{m}'")));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let url = str_field(&node.data, "url").unwrap_or_default();
        let method = str_field(&node.data, "method").and_then(|m| Method::from_bytes(m.as_bytes()).ok()).unwrap_or(Method::GET);
        let treat_errors_as_data = node.data.get("treat_errors_as_data").and_then(serde_json::Value::as_bool).unwrap_or(false);
        let client_uid = str_field(&node.data, "clientUid");

        let client = match ctx.http_client(client_uid) {
            Ok(c) => c,
            Err(e) => return NodeOutcome::Failed(e),
        };

        let mut current_url = client.resolve_url(url);
        let max_response_size = ctx.state.config().max_response_size;

        for hop in 0..=client.redirect_cap {
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
            if let Some(body) = node.data.get("body") {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => return fail(format!("request failed: {}", sanitize_reqwest_error(&e))),
            };

            if response.status().is_redirection() && hop < client.redirect_cap {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match location {
                    Some(next) => {
                        current_url = resolve_redirect(&current_url, &next);
                        continue;
                    }
                    None => return fail("redirect response missing Location header"),
                }
            }

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = match response.bytes().await {
                Ok(b) => b,
                Err(e) => return fail(format!("failed to read response body: {}", sanitize_reqwest_error(&e))),
            };
            if body.len() > max_response_size {
                return NodeOutcome::Failed(EngineError::LimitExceeded { kind: "max_response_size" });
            }

            if (400..600).contains(&status) && !treat_errors_as_data {
                return fail(format!("http status {status}"));
            }
            return NodeOutcome::Completed(response_as_value(status, &headers, &body));
        }

        fail("too many redirects")
    }
}


fn resolve_redirect(base: &str, location: &str) -> String {
    match url::Url::parse(location) {
        Ok(absolute) => absolute.to_string(),
        Err(_) => match url::Url::parse(base).and_then(|b| b.join(location)) {
            Ok(joined) => joined.to_string(),
            Err(_) => location.to_string(),
        },
    }
}

/// `reqwest` error messages sometimes embed the request URL including its
/// query string — strip that before it reaches `errors` (spec.md §7).
fn sanitize_reqwest_error(err: &reqwest::Error) -> String {
    match err.url() {
        Some(u) => err.to_string().replace(u.as_str(), &crate::ssrf::sanitize_url_for_log(u.as_str())),
        None => err.to_string(),
    }
}
