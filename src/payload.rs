//! Wire contract types: the JSON shapes `Execute` accepts and returns
//! (spec.md §6). Deserialization is intentionally permissive about unknown
//! `data` fields — individual executors validate the subset they care about.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::value::Value;

/// Input to an execution (spec.md §3 "Payload").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Payload {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

/// A node as it appears on the wire: id, kind tag, and kind-specific config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Json,
}

/// A directed dependency with optional handle tags discriminating
/// multi-output (Condition, Switch, Parallel) and multi-input (Join) nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default, rename = "targetHandle")]
    pub target_handle: Option<String>,
}

/// An embedded node/edge set carried in a composite node's `data` (spec.md
/// §4.6's "body subgraph" simplification for Loop, Parallel branches,
/// Try/Catch/Finally regions, Retry's wrapped operation and Timeout's
/// wrapped body): same shape as the top-level [`Payload`], minus
/// `workflow_id`, so the Graph Analyzer can run [`crate::graph::analyze`]
/// over it unchanged by wrapping it in a `Payload` at the call site.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubgraphSpec {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl SubgraphSpec {
    pub fn into_payload(self) -> Payload {
        Payload { workflow_id: None, nodes: self.nodes, edges: self.edges }
    }
}

/// Output of an execution (spec.md §3 "Result" / §6 "Result JSON").
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub workflow_id: Option<String>,
    pub node_results: FxHashMap<String, Json>,
    pub final_output: Json,
    pub errors: Vec<String>,
}

impl ExecutionResult {
    pub(crate) fn value_for(results: &FxHashMap<String, Value>, id: &str) -> Json {
        results.get(id).map(Value::to_json).unwrap_or(Json::Null)
    }
}
