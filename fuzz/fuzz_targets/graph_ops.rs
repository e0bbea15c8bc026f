#![no_main]
use libfuzzer_sys::fuzz_target;
use tessera_core::{ActionKind, ActionRecord, Location, MemOrder, ThreadId};
use tessera_graph::{CycleGraph, Promise};

fn write_action(i: u8) -> ActionRecord {
    ActionRecord {
        kind: ActionKind::AtomicWrite,
        order: MemOrder::Relaxed,
        location: Location(u64::from(i % 4) * 8),
        thread: ThreadId(u32::from(i % 4)),
        value: u64::from(i),
        position: None,
        seq: u64::from(i) + 1,
    }
}

fn read_action(i: u8) -> ActionRecord {
    ActionRecord {
        kind: ActionKind::AtomicRead,
        order: MemOrder::Relaxed,
        location: Location(u64::from(i % 4) * 8),
        thread: ThreadId(u32::from(i % 4)),
        value: u64::from(i),
        position: None,
        seq: 200 + u64::from(i),
    }
}

// Interpret the input as a stream of cycle-graph operations and check the
// structural invariants after every transaction boundary.
fuzz_target!(|data: &[u8]| {
    let mut graph = CycleGraph::new();
    graph.begin_txn();
    let mut digest_at_commit = graph.digest();
    let mut chunks = data.chunks_exact(3);

    for chunk in &mut chunks {
        let (op, a, b) = (chunk[0] % 6, chunk[1] % 16, chunk[2] % 16);
        match op {
            0 => {
                if a != b {
                    graph.add_edge(&write_action(a), &write_action(b));
                }
            }
            1 => {
                if a != b {
                    let rmw = ActionRecord {
                        kind: ActionKind::AtomicRmw,
                        ..write_action(b)
                    };
                    graph.add_rmw_edge(&write_action(a), &rmw);
                }
            }
            2 => {
                let promise = Promise::new(read_action(a), 4);
                let node = graph.get_or_create_promise_node(&promise);
                graph.add_edge_to_node(&write_action(b), node);
            }
            3 => {
                if !graph.has_cycles() {
                    graph.commit();
                    digest_at_commit = graph.digest();
                    graph.begin_txn();
                }
            }
            4 => {
                graph.rollback();
                assert_eq!(graph.digest(), digest_at_commit);
                graph.begin_txn();
            }
            _ => {
                let promise = Promise::new(read_action(a), 4);
                let node = graph.get_or_create_promise_node(&promise);
                graph.add_edge_from_node(node, &write_action(b));
            }
        }
        assert!(graph.verify_edge_symmetry());
        if graph.find_cycle_by_search() {
            assert!(graph.has_cycles());
        }
    }

    graph.rollback();
    assert_eq!(graph.digest(), digest_at_commit);
});
