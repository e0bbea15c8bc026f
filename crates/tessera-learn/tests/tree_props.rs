//! Property tests for the predicate tree's structural invariants: the leaf
//! set tracks exactly the childless attached nodes, no node carries two
//! branches with unset predicates for the same instruction, and sibling
//! branches never duplicate a predicate set.

use proptest::prelude::*;
use tessera_core::{ActionKind, ActionRecord, Location, MemOrder, PositionTable, ThreadId};
use tessera_learn::{FuncId, FuncNode, HistoryIndex};

const MASK: u64 = 0xffff_ffff;

/// One call through the function under test: three fixed reads (the last
/// two share a cell, feeding equality inference) and a roaming position
/// that retires at two cells, feeding the latch, loop, and nullity paths.
#[derive(Debug, Clone)]
struct Call {
    values: [u64; 3],
    roam_cells: (u64, u64),
    roam_values: (u64, u64),
}

fn call_strategy() -> impl Strategy<Value = Call> {
    (
        prop::array::uniform3(0u64..3),
        (0u64..3, 0u64..3),
        (0u64..3, 0u64..3),
    )
        .prop_map(|(values, roam_cells, roam_values)| Call {
            values,
            roam_cells,
            roam_values,
        })
}

fn read(
    positions: &mut PositionTable,
    pos: &str,
    loc: u64,
    value: u64,
    seq: &mut u64,
) -> ActionRecord {
    *seq += 1;
    ActionRecord {
        kind: ActionKind::AtomicRead,
        order: MemOrder::Acquire,
        location: Location(loc),
        thread: ThreadId(0),
        value,
        position: Some(positions.intern(pos)),
        seq: *seq,
    }
}

fn feed(node: &mut FuncNode, history: &mut HistoryIndex, act: ActionRecord) {
    node.add_inst(&act);
    node.update_tree(&act, history);
}

fn run_call(
    node: &mut FuncNode,
    history: &mut HistoryIndex,
    positions: &mut PositionTable,
    call: &Call,
    seq: &mut u64,
) {
    node.function_entry_handler(ThreadId(0));
    // Fixed positions, read every call in the same order: t.c:0 owns cell 8,
    // t.c:1 and t.c:2 share cell 16.
    let locs = [8u64, 16, 16];
    for i in 0..3 {
        let act = read(positions, &format!("t.c:{i}"), locs[i], call.values[i], seq);
        feed(node, history, act);
    }
    // The roaming position.
    let act = read(
        positions,
        "t.c:9",
        100 + call.roam_cells.0 * 8,
        call.roam_values.0,
        seq,
    );
    feed(node, history, act);
    let act = read(
        positions,
        "t.c:9",
        100 + call.roam_cells.1 * 8,
        call.roam_values.1,
        seq,
    );
    feed(node, history, act);
    node.function_exit_handler(ThreadId(0));
}

fn check_invariants(node: &FuncNode) {
    for id in node.pred_ids() {
        let pred = node.pred(id);

        // Leaf set: exactly the childless nodes attached below the entry.
        let should_be_leaf = pred.children().is_empty() && pred.parent().is_some();
        assert_eq!(
            node.predicate_leaves().contains(&id),
            should_be_leaf,
            "leaf set out of sync for node {id:?}"
        );

        // Children discriminating on one instruction: at most one branch
        // with an unset predicate set, and no duplicated predicate sets.
        for (i, &a) in pred.children().iter().enumerate() {
            let pa = node.pred(a);
            for &b in &pred.children()[i + 1..] {
                let pb = node.pred(b);
                if pa.func_inst() != pb.func_inst() {
                    continue;
                }
                assert!(
                    !(pa.exprs().is_empty() && pb.exprs().is_empty()),
                    "two unset branches for one instruction"
                );
                assert_ne!(
                    pa.exprs(),
                    pb.exprs(),
                    "duplicate sibling predicate sets under {id:?}"
                );
            }
            // Children link back to their parent.
            assert_eq!(pa.parent(), Some(id));
        }
    }
}

proptest! {
    #[test]
    fn tree_invariants_hold_across_calls(
        first_exec in prop::collection::vec(call_strategy(), 1..5),
        second_exec in prop::collection::vec(call_strategy(), 1..5),
    ) {
        let mut node = FuncNode::new(FuncId(0), "subject", MASK);
        let mut history = HistoryIndex::new();
        let mut positions = PositionTable::new();
        let mut seq = 0;

        node.on_new_execution(1);
        for call in &first_exec {
            run_call(&mut node, &mut history, &mut positions, call, &mut seq);
            check_invariants(&node);
        }

        node.on_new_execution(2);
        for call in &second_exec {
            run_call(&mut node, &mut history, &mut positions, call, &mut seq);
            check_invariants(&node);
        }
    }

    /// Explored counts only grow, and every call adds exactly one entry to
    /// the exit count.
    #[test]
    fn exit_count_tracks_calls(calls in prop::collection::vec(call_strategy(), 1..6)) {
        let mut node = FuncNode::new(FuncId(0), "subject", MASK);
        let mut history = HistoryIndex::new();
        let mut positions = PositionTable::new();
        let mut seq = 0;

        node.on_new_execution(1);
        for (i, call) in calls.iter().enumerate() {
            run_call(&mut node, &mut history, &mut positions, call, &mut seq);
            prop_assert_eq!(node.exit_count(), i as u64 + 1);
        }
    }
}
