//! Benchmarks for the Graph Analyzer: payload validation, implicit-edge
//! derivation, cycle detection, and the deterministic topological sort.
//!
//! Linear, fan-out, and layered graphs at several sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flowgraph::graph;
use flowgraph::payload::{EdgeSpec, NodeSpec, Payload};
use serde_json::json;

fn node(id: &str) -> NodeSpec {
    NodeSpec { id: id.to_string(), kind: "number".to_string(), data: json!({"value": 1}) }
}

fn edge(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec { source: source.to_string(), target: target.to_string(), source_handle: None, target_handle: None }
}

/// `n0 -> n1 -> ... -> n(N-1)`.
fn linear_payload(n: usize) -> Payload {
    let nodes = (0..n).map(|i| node(&format!("n{i}"))).collect();
    let edges = (0..n.saturating_sub(1)).map(|i| edge(&format!("n{i}"), &format!("n{}", i + 1))).collect();
    Payload { workflow_id: None, nodes, edges }
}

/// One source fanning out to `n` independent targets.
fn fanout_payload(n: usize) -> Payload {
    let mut nodes = vec![node("source")];
    nodes.extend((0..n).map(|i| node(&format!("w{i}"))));
    let edges = (0..n).map(|i| edge("source", &format!("w{i}"))).collect();
    Payload { workflow_id: None, nodes, edges }
}

/// Implicit edges only, derived from `node.<id>` expression references
/// instead of explicit `EdgeSpec`s.
fn implicit_edge_payload(n: usize) -> Payload {
    let mut nodes = vec![node("n0")];
    for i in 1..n {
        nodes.push(NodeSpec {
            id: format!("n{i}"),
            kind: "transform".to_string(),
            data: json!({"expression": format!("node.n{}", i - 1)}),
        });
    }
    Payload { workflow_id: None, nodes, edges: Vec::new() }
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_analyze");
    for size in [10, 100, 1000] {
        let linear = linear_payload(size);
        group.bench_with_input(BenchmarkId::new("linear", size), &linear, |b, p| {
            b.iter(|| graph::analyze(p).unwrap());
        });

        let fanout = fanout_payload(size);
        group.bench_with_input(BenchmarkId::new("fanout", size), &fanout, |b, p| {
            b.iter(|| graph::analyze(p).unwrap());
        });

        let implicit = implicit_edge_payload(size);
        group.bench_with_input(BenchmarkId::new("implicit_edges", size), &implicit, |b, p| {
            b.iter(|| graph::analyze(p).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analyze);
criterion_main!(benches);
