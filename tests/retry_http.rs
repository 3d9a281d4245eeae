//! Integration coverage for an `http` node wrapped in `retry`, exercising the
//! two components together end to end (spec.md §8 scenario 6's intent: a
//! flaky downstream service, backed off and retried, eventually fails or
//! succeeds as its policy dictates).

use flowgraph::config::EngineConfig;
use flowgraph::engine::Engine;
use flowgraph::payload::{NodeSpec, Payload};
use flowgraph::state::CancelToken;
use httpmock::Method::GET;
use httpmock::MockServer;
use serde_json::json;

fn node(id: &str, kind: &str, data: serde_json::Value) -> NodeSpec {
    NodeSpec { id: id.to_string(), kind: kind.to_string(), data }
}

#[tokio::test]
async fn retry_exhausts_its_attempts_against_a_permanently_failing_endpoint() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(503);
    });

    let payload = Payload {
        workflow_id: None,
        nodes: vec![node(
            "r",
            "retry",
            json!({
                "policy": {"type": "fixed", "initial": 1_000_000u64, "maxAttempts": 3},
                "body": {
                    "nodes": [{"id": "call", "type": "http", "data": {"url": format!("{}/flaky", server.base_url())}}],
                    "edges": [],
                },
            }),
        )],
        edges: vec![],
    };

    let config = EngineConfig::default().with_allow_http_dev_scheme().with_allow_localhost();
    let result = Engine::new(&config).execute(payload, config.clone(), Vec::new(), CancelToken::new()).await;

    mock.assert_hits(3);
    assert!(!result.errors.is_empty(), "expected the run to fail once retries are exhausted");
    assert!(result.node_results.get("r").is_none());
}

#[tokio::test]
async fn retry_succeeds_once_the_endpoint_recovers() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/ok");
        then.status(200).json_body(json!({"ready": true}));
    });

    let payload = Payload {
        workflow_id: None,
        nodes: vec![node(
            "r",
            "retry",
            json!({
                "policy": {"type": "fixed", "initial": 1_000_000u64, "maxAttempts": 3},
                "body": {
                    "nodes": [{"id": "call", "type": "http", "data": {"url": format!("{}/ok", server.base_url())}}],
                    "edges": [],
                },
            }),
        )],
        edges: vec![],
    };

    let config = EngineConfig::default().with_allow_http_dev_scheme().with_allow_localhost();
    let result = Engine::new(&config).execute(payload, config.clone(), Vec::new(), CancelToken::new()).await;

    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    let value = result.node_results.get("r").expect("retry node should have a result");
    assert_eq!(value.get("status"), Some(&json!(200.0)));
}
