//! Incremental DAG maintenance over memory operations.
//!
//! Nodes live in a per-execution arena and are addressed by `NodeId`; edges
//! are stored as vectors of ids so the general directed graph needs no
//! shared ownership. Every mutation between `begin_txn` and `commit` is
//! recorded in an undo log, because speculative edge additions may be
//! retracted many times between heap snapshots.

use ahash::{AHashMap, AHashSet};
use std::hash::{Hash, Hasher};
use tracing::trace;

use crate::promise::Promise;
use tessera_core::ActionRecord;

/// Index of a node in the per-execution arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a vertex: a concrete write/RMW, or a promise placeholder.
#[derive(Debug, Clone)]
enum NodeKind {
    Concrete(ActionRecord),
    Promise(Promise),
}

/// Vertex in the cycle graph.
#[derive(Debug, Clone)]
struct CycleNode {
    kind: NodeKind,
    /// Outgoing edges, in insertion order.
    edges: Vec<NodeId>,
    /// Incoming edges, kept in sync with the sources' `edges`.
    back_edges: Vec<NodeId>,
    /// The unique RMW that reads from this node, if any.
    rmw: Option<NodeId>,
    /// Set when a promise placeholder has been fused into a concrete node;
    /// dead nodes keep their arena slot but carry no edges.
    dead: bool,
}

impl CycleNode {
    fn concrete(act: ActionRecord) -> Self {
        Self {
            kind: NodeKind::Concrete(act),
            edges: Vec::new(),
            back_edges: Vec::new(),
            rmw: None,
            dead: false,
        }
    }

    fn promise(promise: Promise) -> Self {
        Self {
            kind: NodeKind::Promise(promise),
            edges: Vec::new(),
            back_edges: Vec::new(),
            rmw: None,
            dead: false,
        }
    }

    #[inline]
    fn is_promise(&self) -> bool {
        matches!(self.kind, NodeKind::Promise(_))
    }

    fn action(&self) -> &ActionRecord {
        match &self.kind {
            NodeKind::Concrete(act) => act,
            NodeKind::Promise(_) => panic!("promise node has no action"),
        }
    }

    fn promise_ref(&self) -> &Promise {
        match &self.kind {
            NodeKind::Promise(p) => p,
            NodeKind::Concrete(_) => panic!("concrete node has no promise"),
        }
    }
}

/// The cycle graph of one execution.
///
/// All operations that could introduce a cycle raise the `has_cycles` flag
/// instead of failing; the offending edges are still inserted so the caller
/// can inspect the poisoned graph before rolling back.
pub struct CycleGraph {
    nodes: Vec<CycleNode>,
    /// Concrete write, by retirement seq, to its node.
    action_to_node: AHashMap<u64, NodeId>,
    /// Reader action, by retirement seq, to its promise placeholder.
    reader_to_promise: AHashMap<u64, NodeId>,
    has_cycles: bool,
    /// `has_cycles` as of the last commit; restored by rollback.
    old_cycles: bool,
    /// One entry per forward-edge push since the last commit.
    rollback_edges: Vec<NodeId>,
    /// Nodes whose `rmw` successor was set since the last commit.
    rollback_rmws: Vec<NodeId>,
    /// Arena length at `begin_txn`; rollback truncates back to it.
    txn_watermark: usize,
    /// Scratch for reachability queries, reused to avoid allocation.
    discovered: AHashSet<NodeId>,
    scratch_queue: Vec<NodeId>,
}

impl Default for CycleGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            action_to_node: AHashMap::new(),
            reader_to_promise: AHashMap::new(),
            has_cycles: false,
            old_cycles: false,
            rollback_edges: Vec::new(),
            rollback_rmws: Vec::new(),
            txn_watermark: 0,
            discovered: AHashSet::new(),
            scratch_queue: Vec::new(),
        }
    }

    /// Discard every per-execution structure. Called when a new execution
    /// starts; the graph never survives across executions.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.action_to_node.clear();
        self.reader_to_promise.clear();
        self.has_cycles = false;
        self.old_cycles = false;
        self.rollback_edges.clear();
        self.rollback_rmws.clear();
        self.txn_watermark = 0;
    }

    #[inline]
    pub fn has_cycles(&self) -> bool {
        self.has_cycles
    }

    /// Number of arena slots, dead placeholders included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_action(&self, act: &ActionRecord) -> bool {
        self.action_to_node.contains_key(&act.seq)
    }

    /// Seq of the RMW that reads from `act`, if one has been recorded.
    pub fn rmw_successor_of(&self, act: &ActionRecord) -> Option<u64> {
        let node = self.action_to_node.get(&act.seq)?;
        let rmw = self.nodes[node.idx()].rmw?;
        match &self.nodes[rmw.idx()].kind {
            NodeKind::Concrete(a) => Some(a.seq),
            NodeKind::Promise(_) => None,
        }
    }

    fn alloc(&mut self, node: CycleNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Look up or create the concrete node for a write action.
    fn get_node(&mut self, act: &ActionRecord) -> NodeId {
        if let Some(&id) = self.action_to_node.get(&act.seq) {
            return id;
        }
        debug_assert!(act.is_write(), "cycle graph vertices are writes");
        let id = self.alloc(CycleNode::concrete(*act));
        self.action_to_node.insert(act.seq, id);
        id
    }

    /// Placeholder node for a read that speculatively consumed a future
    /// write. Idempotent per reader.
    pub fn get_or_create_promise_node(&mut self, promise: &Promise) -> NodeId {
        let reader_seq = promise.reader().seq;
        if let Some(&id) = self.reader_to_promise.get(&reader_seq) {
            return id;
        }
        let id = self.alloc(CycleNode::promise(promise.clone()));
        self.reader_to_promise.insert(reader_seq, id);
        id
    }

    /// Establish "`from` is ordered before `to`". Returns true iff at least
    /// one new edge was inserted; duplicate edges are no-ops and are not
    /// recorded for rollback. A detected cycle raises `has_cycles`.
    pub fn add_edge(&mut self, from: &ActionRecord, to: &ActionRecord) -> bool {
        let from = self.get_node(from);
        let to = self.get_node(to);
        self.add_node_edge(from, to)
    }

    /// `add_edge` with a promise placeholder as the target.
    pub fn add_edge_to_node(&mut self, from: &ActionRecord, to: NodeId) -> bool {
        let from = self.get_node(from);
        self.add_node_edge(from, to)
    }

    /// `add_edge` with a promise placeholder as the source.
    pub fn add_edge_from_node(&mut self, from: NodeId, to: &ActionRecord) -> bool {
        let to = self.get_node(to);
        self.add_node_edge(from, to)
    }

    /// `add_edge` between two existing nodes.
    pub fn add_edge_between_nodes(&mut self, from: NodeId, to: NodeId) -> bool {
        self.add_node_edge(from, to)
    }

    fn add_node_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        if !self.has_cycles {
            self.has_cycles = self.reachable(to, from);
            if self.has_cycles {
                trace!(from = from.0, to = to.0, "edge closes a cycle");
            }
        }
        let mut added = self.push_edge(from, to);
        if added {
            self.rollback_edges.push(from);
        }

        // An RMW that reads from `from` must also precede anything `from`
        // precedes; nothing else may interleave between the two.
        if let Some(rmw) = self.nodes[from.idx()].rmw {
            if rmw != to {
                if !self.has_cycles {
                    self.has_cycles = self.reachable(to, rmw);
                }
                if self.push_edge(rmw, to) {
                    self.rollback_edges.push(rmw);
                    added = true;
                }
            }
        }
        added
    }

    /// Append a forward edge if not already present, keeping the target's
    /// back-edge list in sync.
    fn push_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        if self.nodes[from.idx()].edges.contains(&to) {
            return false;
        }
        self.nodes[from.idx()].edges.push(to);
        self.nodes[to.idx()].back_edges.push(from);
        true
    }

    /// Detach and return the most recently added forward edge of `node`.
    fn remove_last_edge(&mut self, node: NodeId) -> Option<NodeId> {
        let to = self.nodes[node.idx()].edges.pop()?;
        let back = &mut self.nodes[to.idx()].back_edges;
        if let Some(pos) = back.iter().position(|&b| b == node) {
            back.remove(pos);
        }
        Some(to)
    }

    /// Detach and return the most recently added back edge of `node`.
    fn remove_last_back_edge(&mut self, node: NodeId) -> Option<NodeId> {
        let from = self.nodes[node.idx()].back_edges.pop()?;
        let edges = &mut self.nodes[from.idx()].edges;
        if let Some(pos) = edges.iter().position(|&e| e == node) {
            edges.remove(pos);
        }
        Some(from)
    }

    /// Record that `rmw` reads from `from`. At most one RMW may read from a
    /// given write; a second raises `has_cycles`. All existing outgoing
    /// edges of `from` migrate onto the RMW, then `from -> rmw` is added.
    pub fn add_rmw_edge(&mut self, from: &ActionRecord, rmw: &ActionRecord) {
        let from = self.get_node(from);
        let rmw_node = self.get_node(rmw);

        if self.nodes[from.idx()].rmw.is_some() {
            // Two RMWs reading from the same write cannot be serialized.
            self.has_cycles = true;
        } else {
            self.nodes[from.idx()].rmw = Some(rmw_node);
            self.rollback_rmws.push(from);
        }

        // The migration cannot itself close a cycle: either the RMW node is
        // new and has no incoming edges, or the write node is new and has no
        // outgoing edges.
        let targets: Vec<NodeId> = self.nodes[from.idx()].edges.clone();
        for to in targets {
            if to != rmw_node && self.push_edge(rmw_node, to) {
                self.rollback_edges.push(rmw_node);
            }
        }

        self.add_node_edge(from, rmw_node);
    }

    /// Called when a concrete write is chosen to satisfy a promised read.
    /// If a node for the writer already exists the placeholder is merged
    /// into it; otherwise the placeholder is re-badged in place. Promises
    /// that must be resolved against the same writer as a consequence are
    /// appended to `must_resolve`. Returns false if the resolution results
    /// in a cycle.
    pub fn resolve_promise(
        &mut self,
        reader: &ActionRecord,
        writer: &ActionRecord,
        must_resolve: &mut Vec<Promise>,
    ) -> bool {
        let p_node = match self.reader_to_promise.get(&reader.seq) {
            Some(&id) => id,
            None => panic!("resolve_promise: no promise node for reader {}", reader.seq),
        };

        if let Some(&w_node) = self.action_to_node.get(&writer.seq) {
            return self.merge(w_node, p_node, must_resolve);
        }

        // No existing write node; convert the placeholder in place.
        {
            let node = &mut self.nodes[p_node.idx()];
            match &node.kind {
                NodeKind::Promise(p) => {
                    assert!(
                        p.is_compatible(writer),
                        "resolving promise with incompatible writer {}",
                        writer.seq
                    );
                    node.kind = NodeKind::Concrete(*writer);
                }
                NodeKind::Concrete(_) => {
                    panic!("resolve_promise: placeholder already concrete")
                }
            }
        }
        self.reader_to_promise.remove(&reader.seq);
        self.action_to_node.insert(writer.seq, p_node);
        true
    }

    /// Fuse a promise placeholder into the concrete node that fulfils it.
    /// Edges of the placeholder are redirected onto `w_node`; a predecessor
    /// or successor that is itself a promise and whose redirection would
    /// close a cycle is queued on `must_merge` and merged recursively.
    ///
    /// This operation is not transactional: a subsequent rollback undoes the
    /// recorded edge additions but not the fusion itself. The driver treats
    /// a failed merge as poisoning the whole execution.
    fn merge(&mut self, w_node: NodeId, p_node: NodeId, must_merge: &mut Vec<Promise>) -> bool {
        assert!(
            !self.nodes[w_node.idx()].is_promise(),
            "merge target must be concrete"
        );
        assert!(
            self.nodes[p_node.idx()].is_promise(),
            "merge source must be a promise"
        );

        let (compatible, reader_seq) = {
            let p = self.nodes[p_node.idx()].promise_ref();
            let w = self.nodes[w_node.idx()].action();
            (p.is_compatible(w), p.reader().seq)
        };
        if !compatible {
            self.has_cycles = true;
            return false;
        }

        // Transfer back edges onto the write node.
        while let Some(back) = self.remove_last_back_edge(p_node) {
            if back == w_node {
                continue;
            }
            if self.nodes[back.idx()].is_promise() {
                if self.reachable(w_node, back) {
                    // The redirected edge would close a cycle; that promise
                    // must resolve to the same writer instead.
                    must_merge.push(self.nodes[back.idx()].promise_ref().clone());
                    if !self.merge(w_node, back, must_merge) {
                        return false;
                    }
                } else {
                    self.push_edge(back, w_node);
                }
            } else {
                self.add_node_edge(back, w_node);
            }
        }

        // Transfer forward edges symmetrically.
        while let Some(forward) = self.remove_last_edge(p_node) {
            if forward == w_node {
                continue;
            }
            if self.nodes[forward.idx()].is_promise() {
                if self.reachable(forward, w_node) {
                    must_merge.push(self.nodes[forward.idx()].promise_ref().clone());
                    if !self.merge(w_node, forward, must_merge) {
                        return false;
                    }
                } else {
                    self.push_edge(w_node, forward);
                }
            } else {
                self.add_node_edge(w_node, forward);
            }
        }

        self.nodes[p_node.idx()].dead = true;
        self.reader_to_promise.remove(&reader_seq);

        !self.has_cycles
    }

    /// Walk everything ordered at or after `from`, eliminating the thread of
    /// every concrete node reached from the promise's candidate writers.
    /// Returns true iff this leaves the promise unsatisfiable.
    pub fn check_promise_failure(&mut self, from: &ActionRecord, promise: &mut Promise) -> bool {
        let Some(&start) = self.action_to_node.get(&from.seq) else {
            return false;
        };

        let mut discovered = std::mem::take(&mut self.discovered);
        let mut queue = std::mem::take(&mut self.scratch_queue);
        discovered.clear();
        queue.clear();

        queue.push(start);
        discovered.insert(start);
        let mut failed = false;
        while let Some(node) = queue.pop() {
            if let NodeKind::Concrete(act) = &self.nodes[node.idx()].kind {
                if promise.eliminate_thread(act.thread) {
                    failed = true;
                    break;
                }
            }
            let n = &self.nodes[node.idx()];
            for &next in n.edges.iter().chain(n.rmw.iter()) {
                if discovered.insert(next) {
                    queue.push(next);
                }
            }
        }

        self.discovered = discovered;
        self.scratch_queue = queue;
        failed
    }

    /// Iterative BFS over forward + RMW edges. The scratch set is reused
    /// across queries.
    fn reachable(&mut self, from: NodeId, to: NodeId) -> bool {
        let mut discovered = std::mem::take(&mut self.discovered);
        let mut queue = std::mem::take(&mut self.scratch_queue);
        discovered.clear();
        queue.clear();

        queue.push(from);
        discovered.insert(from);
        let mut found = false;
        while let Some(node) = queue.pop() {
            if node == to {
                found = true;
                break;
            }
            let n = &self.nodes[node.idx()];
            for &next in n.edges.iter().chain(n.rmw.iter()) {
                if discovered.insert(next) {
                    queue.push(next);
                }
            }
        }

        self.discovered = discovered;
        self.scratch_queue = queue;
        found
    }

    /// Whether `to` is reachable from `from` via forward + RMW edges.
    pub fn is_reachable(&mut self, from: &ActionRecord, to: &ActionRecord) -> bool {
        let (Some(&f), Some(&t)) = (
            self.action_to_node.get(&from.seq),
            self.action_to_node.get(&to.seq),
        ) else {
            return false;
        };
        self.reachable(f, t)
    }

    /// Open a transaction. Must be balanced by `commit` or `rollback`.
    pub fn begin_txn(&mut self) {
        debug_assert!(self.rollback_edges.is_empty());
        debug_assert!(self.rollback_rmws.is_empty());
        debug_assert_eq!(self.old_cycles, self.has_cycles);
        self.txn_watermark = self.nodes.len();
    }

    /// Make every change since `begin_txn` permanent.
    pub fn commit(&mut self) {
        self.rollback_edges.clear();
        self.rollback_rmws.clear();
        self.old_cycles = self.has_cycles;
        self.txn_watermark = self.nodes.len();
    }

    /// Undo every change since `begin_txn`: pushed edges are popped, RMW
    /// links cleared, nodes allocated inside the transaction discarded, and
    /// `has_cycles` restored to its value at `begin_txn`.
    pub fn rollback(&mut self) {
        while let Some(node) = self.rollback_edges.pop() {
            self.remove_last_edge(node);
        }
        while let Some(node) = self.rollback_rmws.pop() {
            self.nodes[node.idx()].rmw = None;
        }

        let watermark = self.txn_watermark;
        if self.nodes.len() > watermark {
            self.nodes.truncate(watermark);
            let keep = watermark as u32;
            self.action_to_node.retain(|_, id| id.0 < keep);
            self.reader_to_promise.retain(|_, id| id.0 < keep);
            // A failed merge may have left unrecorded edges into the
            // truncated tail; scrub any dangling references.
            for node in &mut self.nodes {
                node.edges.retain(|id| id.0 < keep);
                node.back_edges.retain(|id| id.0 < keep);
                if matches!(node.rmw, Some(id) if id.0 >= keep) {
                    node.rmw = None;
                }
            }
        }

        self.has_cycles = self.old_cycles;
    }

    /// Structural fingerprint of the graph: nodes, edges, RMW links, and the
    /// cycle flag. Two graphs with equal digests are operationally
    /// indistinguishable; used by the rollback-soundness tests.
    pub fn digest(&self) -> u64 {
        let mut h = ahash::AHasher::default();
        self.has_cycles.hash(&mut h);
        self.nodes.len().hash(&mut h);
        for node in &self.nodes {
            match &node.kind {
                NodeKind::Concrete(act) => {
                    0u8.hash(&mut h);
                    act.seq.hash(&mut h);
                }
                NodeKind::Promise(p) => {
                    1u8.hash(&mut h);
                    p.reader().seq.hash(&mut h);
                    p.value().hash(&mut h);
                }
            }
            node.dead.hash(&mut h);
            node.edges.hash(&mut h);
            node.back_edges.hash(&mut h);
            node.rmw.hash(&mut h);
        }
        h.finish()
    }

    /// Every forward edge has exactly one matching back edge and vice versa.
    pub fn verify_edge_symmetry(&self) -> bool {
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            for &to in &node.edges {
                let backs = &self.nodes[to.idx()].back_edges;
                if backs.iter().filter(|&&b| b == id).count() != 1 {
                    return false;
                }
            }
            for &from in &node.back_edges {
                let edges = &self.nodes[from.idx()].edges;
                if edges.iter().filter(|&&e| e == id).count() != 1 {
                    return false;
                }
            }
        }
        true
    }

    /// Exhaustive search for a directed cycle; `has_cycles` must agree with
    /// this whenever no poisoned edge has been rolled back yet.
    pub fn find_cycle_by_search(&mut self) -> bool {
        for i in 0..self.nodes.len() {
            let id = NodeId(i as u32);
            let n = &self.nodes[id.idx()];
            let starts: Vec<NodeId> = n.edges.iter().chain(n.rmw.iter()).copied().collect();
            for s in starts {
                if s == id || self.reachable(s, id) {
                    return true;
                }
            }
        }
        false
    }

    /// Write the graph in dot format; dotted edges mark `rmw_successor`.
    pub fn dump_dot<W: std::io::Write>(&self, name: &str, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "digraph {} {{", name)?;
        for node in &self.nodes {
            if node.dead {
                continue;
            }
            let label = Self::node_label(node);
            if let NodeKind::Concrete(act) = &node.kind {
                writeln!(out, "{} [label=\"{}, T{}\"];", label, act.seq, act.thread.0)?;
            } else {
                writeln!(out, "{} [label=\"promise\", shape=diamond];", label)?;
            }
            if let Some(rmw) = node.rmw {
                writeln!(
                    out,
                    "{} -> {}[style=dotted];",
                    label,
                    Self::node_label(&self.nodes[rmw.idx()])
                )?;
            }
            for &to in &node.edges {
                writeln!(out, "{} -> {};", label, Self::node_label(&self.nodes[to.idx()]))?;
            }
        }
        writeln!(out, "}}")
    }

    fn node_label(node: &CycleNode) -> String {
        match &node.kind {
            NodeKind::Concrete(act) => format!("N{}", act.seq),
            NodeKind::Promise(p) => format!("P{}", p.reader().seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ActionKind, Location, MemOrder, ThreadId};

    fn wr(thread: u32, loc: u64, value: u64, seq: u64) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::AtomicWrite,
            order: MemOrder::Relaxed,
            location: Location(loc),
            thread: ThreadId(thread),
            value,
            position: None,
            seq,
        }
    }

    fn rmw(thread: u32, loc: u64, value: u64, seq: u64) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::AtomicRmw,
            order: MemOrder::AcqRel,
            location: Location(loc),
            thread: ThreadId(thread),
            value,
            position: None,
            seq,
        }
    }

    fn rd(thread: u32, loc: u64, value: u64, seq: u64) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::AtomicRead,
            order: MemOrder::Relaxed,
            location: Location(loc),
            thread: ThreadId(thread),
            value,
            position: None,
            seq,
        }
    }

    #[test]
    fn test_add_edge_and_reachability() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        let b = wr(2, 8, 2, 2);
        let c = wr(1, 8, 3, 3);
        assert!(g.add_edge(&a, &b));
        assert!(g.add_edge(&b, &c));
        assert!(!g.has_cycles());
        assert!(g.is_reachable(&a, &c));
        assert!(!g.is_reachable(&c, &a));
        assert!(g.verify_edge_symmetry());
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        let b = wr(2, 8, 2, 2);
        assert!(g.add_edge(&a, &b));
        let digest = g.digest();
        assert!(!g.add_edge(&a, &b));
        assert_eq!(g.digest(), digest);
    }

    #[test]
    fn test_cycle_detection_poisons_graph() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        let b = wr(2, 8, 2, 2);
        g.add_edge(&a, &b);
        assert!(!g.has_cycles());
        // The reverse edge is still inserted, but the graph is poisoned.
        g.add_edge(&b, &a);
        assert!(g.has_cycles());
        assert!(g.is_reachable(&b, &a));
        assert!(g.find_cycle_by_search());
    }

    #[test]
    fn test_rollback_restores_bit_for_bit() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        let b = wr(2, 8, 2, 2);
        g.add_edge(&a, &b);
        g.commit();
        let digest = g.digest();

        g.begin_txn();
        let c = wr(1, 8, 3, 3);
        let r = rmw(2, 8, 4, 4);
        g.add_edge(&b, &c);
        g.add_rmw_edge(&c, &r);
        g.add_edge(&r, &a); // closes a cycle
        assert!(g.has_cycles());
        g.rollback();

        assert_eq!(g.digest(), digest);
        assert!(!g.has_cycles());
        assert!(!g.contains_action(&c));
        assert!(g.verify_edge_symmetry());
    }

    #[test]
    fn test_commit_finality() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        let b = wr(2, 8, 2, 2);
        g.add_edge(&a, &b);
        g.commit();
        let digest = g.digest();
        // Rollback with no open changes is a no-op for committed state.
        g.begin_txn();
        g.rollback();
        assert_eq!(g.digest(), digest);
        assert!(g.is_reachable(&a, &b));
    }

    #[test]
    fn test_rmw_edge_migrates_outgoing_edges() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w = wr(1, 8, 1, 1);
        let c = wr(2, 8, 2, 2);
        let r = rmw(2, 8, 3, 3);
        g.add_edge(&w, &c);
        g.add_rmw_edge(&w, &r);
        assert!(!g.has_cycles());
        assert_eq!(g.rmw_successor_of(&w), Some(r.seq));
        // The RMW inherited w's ordering obligations.
        assert!(g.is_reachable(&r, &c));
        assert!(g.is_reachable(&w, &r));
        assert!(g.verify_edge_symmetry());
    }

    #[test]
    fn test_second_rmw_on_same_write_raises_cycle() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w = wr(1, 8, 1, 1);
        let r1 = rmw(2, 8, 2, 2);
        let r2 = rmw(3, 8, 3, 3);
        g.add_rmw_edge(&w, &r1);
        assert!(!g.has_cycles());
        g.add_rmw_edge(&w, &r2);
        assert!(g.has_cycles());
    }

    #[test]
    fn test_rmw_rollback_clears_successor() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w = wr(1, 8, 1, 1);
        g.add_edge(&w, &wr(2, 8, 9, 9));
        g.commit();

        g.begin_txn();
        let r = rmw(2, 8, 2, 2);
        g.add_rmw_edge(&w, &r);
        assert_eq!(g.rmw_successor_of(&w), Some(r.seq));
        g.rollback();
        assert_eq!(g.rmw_successor_of(&w), None);
    }

    #[test]
    fn test_resolve_promise_in_place() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let reader = rd(1, 8, 42, 1);
        let promise = Promise::new(reader, 2);
        let p_node = g.get_or_create_promise_node(&promise);
        assert_eq!(p_node, g.get_or_create_promise_node(&promise));

        let writer = wr(0, 8, 42, 2);
        let mut must_resolve = Vec::new();
        assert!(g.resolve_promise(&reader, &writer, &mut must_resolve));
        assert!(must_resolve.is_empty());
        assert!(g.contains_action(&writer));
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_resolve_promise_merges_existing_node() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let reader = rd(1, 8, 42, 1);
        let before = wr(1, 8, 0, 2);
        let after = wr(2, 8, 7, 3);
        let writer = wr(0, 8, 42, 4);

        let promise = Promise::new(reader, 3);
        let p_node = g.get_or_create_promise_node(&promise);
        // before -> P -> after, and the writer already has its own node.
        g.add_edge_to_node(&before, p_node);
        g.add_edge_from_node(p_node, &after);
        g.add_edge(&writer, &wr(3, 16, 0, 5));

        let mut must_resolve = Vec::new();
        assert!(g.resolve_promise(&reader, &writer, &mut must_resolve));
        // Merge preserves reachability through the placeholder.
        assert!(g.is_reachable(&before, &writer));
        assert!(g.is_reachable(&writer, &after));
        assert!(g.is_reachable(&before, &after));
        assert!(g.verify_edge_symmetry());
    }

    #[test]
    fn test_merge_rejects_incompatible_value() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let reader = rd(1, 8, 42, 1);
        let writer = wr(0, 8, 7, 2);
        let promise = Promise::new(reader, 2);
        g.get_or_create_promise_node(&promise);
        g.add_edge(&writer, &wr(2, 8, 1, 3));

        let mut must_resolve = Vec::new();
        assert!(!g.resolve_promise(&reader, &writer, &mut must_resolve));
        assert!(g.has_cycles());
    }

    #[test]
    fn test_merge_detects_cycle_through_intermediate() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let reader = rd(1, 8, 42, 1);
        let mid = wr(2, 8, 5, 2);
        let writer = wr(0, 8, 42, 3);

        let promise = Promise::new(reader, 3);
        let p_node = g.get_or_create_promise_node(&promise);
        // P -> mid -> writer; resolving P to writer closes a cycle.
        g.add_edge_from_node(p_node, &mid);
        g.add_edge(&mid, &writer);

        let mut must_resolve = Vec::new();
        assert!(!g.resolve_promise(&reader, &writer, &mut must_resolve));
        assert!(g.has_cycles());
    }

    #[test]
    fn test_check_promise_failure_eliminates_reachable_threads() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w1 = wr(1, 8, 1, 1);
        let w2 = wr(2, 8, 2, 2);
        g.add_edge(&w1, &w2);

        // Reader on thread 0 of a 3-thread program: candidates are T1, T2.
        let mut promise = Promise::new(rd(0, 8, 42, 3), 3);
        assert!(g.check_promise_failure(&w1, &mut promise));
        assert!(promise.has_failed());
    }

    #[test]
    fn test_check_promise_failure_partial_elimination() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w1 = wr(1, 8, 1, 1);
        let w2 = wr(2, 8, 2, 2);
        g.add_edge(&w1, &w2);

        // Thread 3 is unreachable from w2, so the promise survives.
        let mut promise = Promise::new(rd(0, 8, 42, 3), 4);
        assert!(!g.check_promise_failure(&w2, &mut promise));
        assert!(!promise.thread_allowed(ThreadId(2)));
        assert!(promise.thread_allowed(ThreadId(3)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let a = wr(1, 8, 1, 1);
        g.add_edge(&a, &wr(2, 8, 2, 2));
        g.commit();
        g.reset();
        assert_eq!(g.node_count(), 0);
        assert!(!g.contains_action(&a));
        assert!(!g.has_cycles());
    }

    #[test]
    fn test_dump_dot_format() {
        let mut g = CycleGraph::new();
        g.begin_txn();
        let w = wr(1, 8, 1, 1);
        let r = rmw(2, 8, 2, 2);
        g.add_rmw_edge(&w, &r);
        g.commit();

        let mut out = Vec::new();
        g.dump_dot("exec_1", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("digraph exec_1 {"));
        assert!(text.contains("N1 [label=\"1, T1\"];"));
        assert!(text.contains("N1 -> N2[style=dotted];"));
        assert!(text.contains("N1 -> N2;"));
        assert!(text.trim_end().ends_with('}'));
    }
}
