//! The concrete literal-input/expected-output scenarios from spec.md §8,
//! run end-to-end against `Engine::execute`.

use flowgraph::config::EngineConfig;
use flowgraph::engine::Engine;
use flowgraph::payload::{EdgeSpec, NodeSpec, Payload};
use flowgraph::state::CancelToken;
use serde_json::json;
use std::time::Duration;

fn node(id: &str, kind: &str, data: serde_json::Value) -> NodeSpec {
    NodeSpec { id: id.to_string(), kind: kind.to_string(), data }
}

fn edge(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec { source: source.into(), target: target.into(), source_handle: None, target_handle: None }
}

fn handled_edge(source: &str, target: &str, source_handle: &str) -> EdgeSpec {
    EdgeSpec { source: source.into(), target: target.into(), source_handle: Some(source_handle.into()), target_handle: None }
}

#[tokio::test]
async fn scenario_1_addition() {
    let payload = Payload {
        workflow_id: None,
        nodes: vec![
            node("1", "number", json!({"value": 10.0})),
            node("2", "number", json!({"value": 5.0})),
            node("3", "operation", json!({"op": "add"})),
        ],
        edges: vec![edge("1", "3"), edge("2", "3")],
    };
    let result = Engine::new(&EngineConfig::default())
        .execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert_eq!(result.final_output, json!(15.0));
    assert_eq!(result.node_results.get("1"), Some(&json!(10.0)));
    assert_eq!(result.node_results.get("2"), Some(&json!(5.0)));
    assert_eq!(result.node_results.get("3"), Some(&json!(15.0)));
}

fn conditional_branching_payload(age: f64) -> Payload {
    Payload {
        workflow_id: None,
        nodes: vec![
            node("a", "number", json!({"value": age})),
            node("c", "condition", json!({"expression": ">=18"})),
            node("b", "text_input", json!({"value": "adult"})),
            node("e", "text_input", json!({"value": "minor"})),
        ],
        edges: vec![edge("a", "c"), handled_edge("c", "b", "true"), handled_edge("c", "e", "false")],
    }
}

#[tokio::test]
async fn scenario_2_conditional_branching_adult() {
    let engine = Engine::new(&EngineConfig::default());
    let result = engine
        .execute(conditional_branching_payload(25.0), EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert_eq!(result.node_results.get("b"), Some(&json!("adult")));
    assert_eq!(result.node_results.get("e"), Some(&serde_json::Value::Null));
}

#[tokio::test]
async fn scenario_2_conditional_branching_minor() {
    let engine = Engine::new(&EngineConfig::default());
    let result = engine
        .execute(conditional_branching_payload(15.0), EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert_eq!(result.node_results.get("e"), Some(&json!("minor")));
    assert_eq!(result.node_results.get("b"), Some(&serde_json::Value::Null));
}

#[tokio::test]
async fn scenario_3_filter_map_reduce_sum_of_even_squares() {
    let payload = Payload {
        workflow_id: None,
        nodes: vec![
            node("range", "range", json!({"start": 1, "end": 100, "step": 1})),
            node("evens", "filter", json!({"expression": "item % 2 == 0"})),
            node("squares", "map", json!({"expression": "item * item"})),
            node("sum", "reduce", json!({"expression": "acc + item", "initial": 0})),
        ],
        edges: vec![edge("range", "evens"), edge("evens", "squares"), edge("squares", "sum")],
    };
    let result = Engine::new(&EngineConfig::default())
        .execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.final_output, json!(171_700.0));
}

#[tokio::test]
async fn scenario_4_ssrf_blocks_cloud_metadata_with_no_network_traffic() {
    let payload = Payload {
        workflow_id: None,
        nodes: vec![node("h", "http", json!({"url": "http://169.254.169.254/latest/meta-data"}))],
        edges: vec![],
    };
    let result = Engine::new(&EngineConfig::default())
        .execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert_eq!(result.errors, vec!["URL validation failed".to_string()]);
    assert!(result.node_results.get("h").is_none());
}

#[tokio::test]
async fn scenario_5_workflow_timeout_aborts_the_run() {
    let payload = Payload {
        workflow_id: None,
        nodes: vec![node("d", "delay", json!({"duration": 10_000_000_000u64}))],
        edges: vec![],
    };
    let config = EngineConfig::default().with_max_execution_time(Duration::from_secs(1));
    let result = Engine::new(&config).execute(payload, config.clone(), Vec::new(), CancelToken::new()).await;
    assert_eq!(result.errors, vec!["workflow execution timeout: exceeded 1s".to_string()]);
    assert!(result.node_results.get("d").is_none());
}

#[tokio::test]
async fn scenario_7_cyclic_graph_fails_before_any_node_runs() {
    let payload = Payload {
        workflow_id: None,
        nodes: vec![node("a", "number", json!({"value": 1.0})), node("b", "number", json!({"value": 2.0}))],
        edges: vec![edge("a", "b"), edge("b", "a")],
    };
    let result = Engine::new(&EngineConfig::default())
        .execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new())
        .await;
    assert!(result.node_results.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("cyclic"), "unexpected error: {:?}", result.errors);
}
