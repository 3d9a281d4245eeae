//! `parallel` and `join` node kinds (spec.md §6 "`parallel` (branches,
//! maxConcurrency)", "`join`"; §4.6 "Parallel node"). A Parallel node
//! declares a set of named branch subgraphs and fans them out to a bounded
//! worker pool (spec.md §5 "Nodes inside a Parallel node's subgraph may be
//! dispatched concurrently up to `maxConcurrency`"); a Join node downstream
//! combines its inbound values in a handle-sorted, not completion-order,
//! sequence (spec.md §5 "Join combines branch results in a stable,
//! handle-sorted order regardless of completion order").

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::{NodeSpec, SubgraphSpec};
use crate::value::Value;

use super::super::{missing_field, ExecutionContext, Executor, NodeOutcome};

fn branches_of(node: &NodeSpec) -> Result<Vec<(String, SubgraphSpec)>, EngineError> {
    let branches = node.data.get("branches").and_then(|v| v.as_array()).ok_or_else(|| missing_field("parallel", "branches"))?;
    branches
        .iter()
        .map(|b| {
            let label = b
                .get("label")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| EngineError::Validation("parallel branch requires a 'label'".to_string()))?
                .to_string();
            let subgraph = b.get("subgraph").ok_or_else(|| missing_field("parallel", "branches[].subgraph"))?;
            let subgraph: SubgraphSpec = serde_json::from_value(subgraph.clone())
                .map_err(|e| EngineError::Validation(format!("parallel branch '{label}' has an invalid subgraph: {e}")))?;
            Ok((label, subgraph))
        })
        .collect()
}

/// `parallel` — `data.branches: [{label, subgraph}]`, `data.maxConcurrency`
/// (default: all branches at once). Every branch runs to completion or the
/// whole node fails; results land in a map keyed by branch label, which a
/// downstream `join`/`extract` node reads back out.
pub struct ParallelNode;

#[async_trait]
impl Executor for ParallelNode {
    fn validate(&self, node: &NodeSpec) -> Result<(), EngineError> {
        let branches = branches_of(node)?;
        if branches.is_empty() {
            return Err(EngineError::Validation("parallel node requires at least one branch".to_string()));
        }
        if let Some(m) = node.data.get("maxConcurrency") {
            if m.as_u64().filter(|&n| n > 0).is_none() {
                return Err(EngineError::Validation("parallel node: 'maxConcurrency' must be a positive integer".to_string()));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &NodeSpec) -> NodeOutcome {
        let branches = match branches_of(node) {
            Ok(b) => b,
            Err(e) => return NodeOutcome::Failed(e),
        };
        let max_concurrency =
            node.data.get("maxConcurrency").and_then(serde_json::Value::as_u64).map(|n| n as usize).unwrap_or(branches.len());

        let results: Vec<Result<(String, Value), EngineError>> = stream::iter(branches.into_iter().map(|(label, subgraph)| async move {
            if let Err(e) = ctx.state.check_liveness() {
                return Err(e);
            }
            match ctx.run_subgraph(subgraph, Vec::new()).await {
                Ok(run) => Ok((label, run.final_output)),
                Err(e) => Err(e),
            }
        }))
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

        let mut branch_outputs = FxHashMap::default();
        for result in results {
            match result {
                Ok((label, value)) => {
                    branch_outputs.insert(label, value);
                }
                Err(e) => return NodeOutcome::Failed(e),
            }
        }
        NodeOutcome::Completed(Value::Map(branch_outputs))
    }
}

/// `join` — a multi-input sink with no configuration of its own. Collects
/// every non-`SKIPPED` inbound value, sorted by source-handle tag; handle-less
/// inputs are returned as a plain list, handled ones as a map keyed by handle
/// (falling back to positional index for any edge left unhandled).
pub struct JoinNode;

#[async_trait]
impl Executor for JoinNode {
    fn validate(&self, _node: &NodeSpec) -> Result<(), EngineError> {
        Ok(())
    }

    async fn execute(&self, ctx: &ExecutionContext, _node: &NodeSpec) -> NodeOutcome {
        let mut entries: Vec<(Option<String>, Value)> =
            ctx.inputs_with_handles().iter().filter(|(_, v)| !v.is_skipped()).cloned().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        if entries.iter().all(|(handle, _)| handle.is_none()) {
            NodeOutcome::Completed(Value::List(entries.into_iter().map(|(_, v)| v).collect()))
        } else {
            let mut map = FxHashMap::default();
            for (index, (handle, value)) in entries.into_iter().enumerate() {
                map.insert(handle.unwrap_or_else(|| index.to_string()), value);
            }
            NodeOutcome::Completed(Value::Map(map))
        }
    }
}
