//! Benchmarks for edge insertion, reachability, and rollback churn.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{ActionKind, ActionRecord, Location, MemOrder, ThreadId};
use tessera_graph::CycleGraph;

fn write_action(i: u64) -> ActionRecord {
    ActionRecord {
        kind: ActionKind::AtomicWrite,
        order: MemOrder::Relaxed,
        location: Location(8),
        thread: ThreadId((i % 4) as u32),
        value: i,
        position: None,
        seq: i + 1,
    }
}

/// A modification-order chain with periodic cross edges, the shape the
/// driver produces for a handful of threads hammering one location.
fn build_chain(graph: &mut CycleGraph, n: u64) {
    graph.begin_txn();
    for i in 1..n {
        graph.add_edge(&write_action(i - 1), &write_action(i));
        if i % 7 == 0 && i > 7 {
            graph.add_edge(&write_action(i - 7), &write_action(i));
        }
    }
    graph.commit();
}

fn bench_add_edge(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_edge_chain");
    for n in [64u64, 512, 2048] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut graph = CycleGraph::new();
                build_chain(&mut graph, n);
                graph
            });
        });
    }
    group.finish();
}

fn bench_speculate_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("speculate_rollback");
    for n in [64u64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut graph = CycleGraph::new();
            build_chain(&mut graph, n);
            b.iter(|| {
                graph.begin_txn();
                // A speculative back edge that poisons the graph.
                graph.add_edge(&write_action(n - 1), &write_action(0));
                let poisoned = graph.has_cycles();
                graph.rollback();
                poisoned
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add_edge, bench_speculate_rollback);
criterion_main!(benches);
