//! # flowgraph: a workflow execution engine
//!
//! `flowgraph` takes a JSON [`Payload`](payload::Payload) describing a
//! directed graph of typed nodes and runs it to completion exactly once:
//! resolving dependencies, evaluating expressions against node results and
//! variables, dispatching each node to its registered executor, and
//! reporting lifecycle events to any registered [`Observer`](event_bus::Observer).
//!
//! ## Quick start
//!
//! ```
//! use flowgraph::config::EngineConfig;
//! use flowgraph::engine::Engine;
//! use flowgraph::payload::{EdgeSpec, NodeSpec, Payload};
//! use flowgraph::state::CancelToken;
//!
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let payload = Payload {
//!     workflow_id: Some("demo".to_string()),
//!     nodes: vec![
//!         NodeSpec { id: "a".to_string(), kind: "number".to_string(), data: serde_json::json!({"value": 2}) },
//!         NodeSpec { id: "b".to_string(), kind: "number".to_string(), data: serde_json::json!({"value": 3}) },
//!         NodeSpec {
//!             id: "sum".to_string(),
//!             kind: "operation".to_string(),
//!             data: serde_json::json!({"op": "add"}),
//!         },
//!     ],
//!     edges: vec![
//!         EdgeSpec { source: "a".to_string(), target: "sum".to_string(), source_handle: None, target_handle: None },
//!         EdgeSpec { source: "b".to_string(), target: "sum".to_string(), source_handle: None, target_handle: None },
//!     ],
//! };
//!
//! let engine = Engine::new(&EngineConfig::default());
//! let result = engine.execute(payload, EngineConfig::default(), Vec::new(), CancelToken::new()).await;
//! assert_eq!(result.final_output, serde_json::json!(5.0));
//! # });
//! ```
//!
//! ## Module guide
//!
//! - [`payload`] — wire contract: `Payload`, `NodeSpec`, `EdgeSpec`, `ExecutionResult`
//! - [`graph`] — Graph Analyzer: implicit-edge derivation, cycle detection, topological order
//! - [`engine`] — the Scheduler/Engine: `Engine::execute` and the single-pass DAG walk
//! - [`node`] — the Executor trait, `ExecutionContext`, and the built-in node kinds
//! - [`state`] — the State Store: results, scoped variables, caches, counters, deadline/cancellation
//! - [`expr`] — the expression language: lexer, parser, AST, pure evaluator
//! - [`value`] — the dynamic `Value` type threaded between nodes
//! - [`error`] — the `EngineError` taxonomy
//! - [`config`] — `EngineConfig`, loadable from the environment
//! - [`event_bus`] — the synchronous Observer bus and `WorkflowEvent`
//! - [`http_client`] — the HTTP Client Registry consumed by the `http` node
//! - [`ssrf`] — the SSRF Guard enforced on every outbound request
//! - [`telemetry`] — `tracing` subscriber initialization

pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod expr;
pub mod graph;
pub mod http_client;
pub mod node;
pub mod payload;
pub mod ssrf;
pub mod state;
pub mod telemetry;
pub mod value;
