//! The Graph Analyzer (spec.md §4.4): validates a [`Payload`], derives the
//! implicit edges that expression-bearing fields imply, builds the
//! effective DAG, and produces a deterministic topological order.
//!
//! Built on `petgraph::graph::DiGraph` for the node/edge representation
//! and `petgraph::algo::is_cyclic_directed` for cycle detection, taken as a
//! required dependency rather than an optional feature since this crate's
//! scheduling is inherently graph-shaped. The topological sort itself is a
//! manual Kahn's-algorithm pass rather than `petgraph::algo::toposort`:
//! Kahn's lets us break ties by payload order, which `toposort`'s DFS does
//! not guarantee, and spec.md §4.4 requires a deterministic order for
//! equal-priority ready sets.
//!
//! An edge is drawn in the effective DAG when either an explicit
//! [`EdgeSpec`] names it, or an executor's expression-bearing `data` fields
//! reference `node.<id>` (spec.md §4.4 item 2, via
//! [`crate::expr::extract_node_refs`]).

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;

use crate::error::EngineError;
use crate::expr;
use crate::payload::{NodeSpec, Payload};

/// One resolved edge in the effective DAG, carrying the handle tags the
/// Scheduler/Engine needs to resolve Condition/Switch branch selection and
/// Join/Parallel fan-in (spec.md §4.4, §6 node kinds): a [`NodeSpec`] can
/// declare multiple outbound handles (e.g. Switch's per-case outputs), and
/// downstream executors key off `target_handle` (e.g. Join's named inputs).
#[derive(Debug, Clone)]
pub struct ResolvedEdge {
    pub source: usize,
    pub target: usize,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    /// `true` if this edge was derived from an expression reference rather
    /// than an explicit [`crate::payload::EdgeSpec`] (spec.md §4.4 item 2).
    pub implicit: bool,
}

/// The effective DAG plus the bookkeeping the Scheduler/Engine needs to
/// drive execution: adjacency, in-degrees, and a deterministic topo order.
pub struct ExecutionGraph {
    pub nodes: Vec<NodeSpec>,
    node_index_by_id: FxHashMap<String, usize>,
    pub adjacency: Vec<Vec<usize>>,
    pub in_degree: Vec<usize>,
    pub topo_order: Vec<usize>,
    pub edges: Vec<ResolvedEdge>,
    /// Indices into `edges`, grouped by target node — the Scheduler/Engine's
    /// view of "what values feed this node, and through which handles".
    pub inbound: Vec<Vec<usize>>,
}

impl ExecutionGraph {
    pub fn node_id(&self, idx: usize) -> &str {
        &self.nodes[idx].id
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.node_index_by_id.get(id).copied()
    }

    pub fn dependencies_of(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency.iter().enumerate().filter_map(move |(from, tos)| tos.contains(&idx).then_some(from))
    }

    /// The resolved inbound edges for `idx`, in deterministic (payload edge
    /// order, then derived-edge order) sequence.
    pub fn inbound_edges(&self, idx: usize) -> impl Iterator<Item = &ResolvedEdge> + '_ {
        self.inbound[idx].iter().map(move |&e| &self.edges[e])
    }
}

/// Validate a payload and build its effective execution DAG.
pub fn analyze(payload: &Payload) -> Result<ExecutionGraph, EngineError> {
    validate_ids_and_edges(payload)?;

    let mut node_index_by_id = FxHashMap::default();
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut petgraph_index = Vec::with_capacity(payload.nodes.len());

    for (i, node) in payload.nodes.iter().enumerate() {
        node_index_by_id.insert(node.id.clone(), i);
        petgraph_index.push(graph.add_node(node.id.clone()));
    }

    let mut edge_set: FxHashSet<(usize, usize)> = FxHashSet::default();
    let mut edges: Vec<ResolvedEdge> = Vec::with_capacity(payload.edges.len());

    for edge in &payload.edges {
        let (Some(&s), Some(&t)) = (node_index_by_id.get(&edge.source), node_index_by_id.get(&edge.target)) else {
            continue; // already rejected in validate_ids_and_edges
        };
        if edge_set.insert((s, t)) {
            graph.add_edge(petgraph_index[s], petgraph_index[t], ());
        }
        edges.push(ResolvedEdge {
            source: s,
            target: t,
            source_handle: edge.source_handle.clone(),
            target_handle: edge.target_handle.clone(),
            implicit: false,
        });
    }

    for (i, node) in payload.nodes.iter().enumerate() {
        for referenced_id in expression_node_refs(&node.data) {
            if let Some(&s) = node_index_by_id.get(&referenced_id) {
                if s != i && edge_set.insert((s, i)) {
                    graph.add_edge(petgraph_index[s], petgraph_index[i], ());
                    edges.push(ResolvedEdge {
                        source: s,
                        target: i,
                        source_handle: None,
                        target_handle: None,
                        implicit: true,
                    });
                }
            }
        }
    }

    if petgraph::algo::is_cyclic_directed(&graph) {
        let cycle_desc = describe_a_cycle(&graph);
        return Err(EngineError::CyclicGraph(cycle_desc));
    }

    let n = payload.nodes.len();
    let mut adjacency = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    let mut inbound: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (e, edge) in edges.iter().enumerate() {
        adjacency[edge.source].push(edge.target);
        inbound[edge.target].push(e);
    }
    // in_degree counts distinct upstream nodes, not edges, so parallel
    // explicit+implicit edges from the same source don't inflate Kahn's count.
    for &(_, t) in &edge_set {
        in_degree[t] += 1;
    }
    for adj in &mut adjacency {
        adj.sort_unstable();
        adj.dedup();
    }

    let topo_order = kahn_topo_sort(n, &adjacency, &in_degree);

    Ok(ExecutionGraph { nodes: payload.nodes.clone(), node_index_by_id, adjacency, in_degree, topo_order, edges, inbound })
}

fn validate_ids_and_edges(payload: &Payload) -> Result<(), EngineError> {
    if payload.nodes.is_empty() {
        return Err(EngineError::Validation("payload must declare at least one node".to_string()));
    }
    let mut seen = FxHashSet::default();
    for node in &payload.nodes {
        if node.id.is_empty() {
            return Err(EngineError::Validation("node id must not be empty".to_string()));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(EngineError::Validation(format!("duplicate node id '{}'", node.id)));
        }
    }
    for edge in &payload.edges {
        if !seen.contains(edge.source.as_str()) {
            return Err(EngineError::Validation(format!("edge references unknown source node '{}'", edge.source)));
        }
        if !seen.contains(edge.target.as_str()) {
            return Err(EngineError::Validation(format!("edge references unknown target node '{}'", edge.target)));
        }
    }
    Ok(())
}

/// Kahn's algorithm with a payload-order tiebreak: among all currently-ready
/// nodes, always take the one with the smallest payload index next, so the
/// resulting order is a deterministic function of the payload alone.
fn kahn_topo_sort(n: usize, adjacency: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    use std::collections::BinaryHeap;
    use std::cmp::Reverse;

    let mut remaining = in_degree.to_vec();
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|&i| remaining[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &next in &adjacency[i] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }
    order
}

fn describe_a_cycle(graph: &DiGraph<String, ()>) -> String {
    match petgraph::algo::toposort(graph, None) {
        Ok(_) => "cycle detected".to_string(),
        Err(cycle) => {
            let id = &graph[cycle.node_id()];
            format!("cycle involving node '{id}'")
        }
    }
}

/// Collect every `node.<id>` the given node's `data` fields reference,
/// scanning all string values for parseable expressions. Fields that fail
/// to parse as expressions are treated as opaque (non-expression) data.
fn expression_node_refs(data: &Json) -> FxHashSet<String> {
    let mut out = FxHashSet::default();
    walk_json_strings(data, &mut out);
    out
}

fn walk_json_strings(value: &Json, out: &mut FxHashSet<String>) {
    match value {
        Json::String(s) => {
            if let Ok(expr) = expr::parse(s) {
                out.extend(expr::extract_node_refs(&expr));
            }
        }
        Json::Array(items) => items.iter().for_each(|v| walk_json_strings(v, out)),
        Json::Object(map) => map.values().for_each(|v| walk_json_strings(v, out)),
        _ => {}
    }
}
