//! Per-function learner: instruction interning, the predicate tree, and the
//! may-equal location sets.
//!
//! The same function can sit on several fibers' call stacks at once, so all
//! call-local state is keyed by thread id: a stack of tree positions, the
//! predicates traversed by the current call, and the per-call instruction
//! maps that drive loop detection and equality inference.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::history::HistoryIndex;
use crate::inst::{kinds_match, FuncInst, InstId};
use crate::predicate::{PredExpr, PredId, PredToken, PredicateNode};
use crate::FuncId;
use tessera_core::{ActionRecord, Location, PositionId, ThreadId};

/// Relationship of another function reachable from this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Out,
    In,
    Bi,
}

/// A half-built predicate expression produced by inference; sign
/// combinations are filled in by `generate_predicates`.
struct HalfExpr {
    token: PredToken,
    inst: Option<InstId>,
}

/// Outcome of searching the current node's branches for one that matches
/// the incoming action.
enum Branch {
    Found(PredId),
    /// The only candidate is a branch with an empty predicate set.
    Unset(PredId),
    NotFound,
}

/// The per-function decision-tree learner. Instructions and the predicate
/// tree survive across executions; location histories are re-imported from
/// the `HistoryIndex` at each execution.
pub struct FuncNode {
    func_id: FuncId,
    name: String,
    execution_number: usize,
    exit_count: u64,
    inst_counter: u32,
    marker: u32,
    thrd_markers: Vec<u32>,

    insts: Vec<FuncInst>,
    inst_by_position: AHashMap<PositionId, InstId>,
    entry_insts: Vec<InstId>,

    preds: Vec<PredicateNode>,
    entry_pred: PredId,
    exit_pred: PredId,
    predicate_leaves: AHashSet<PredId>,
    failed_predicates: AHashSet<PredId>,

    thrd_loc_inst: Vec<AHashMap<Location, InstId>>,
    thrd_inst_id: Vec<AHashMap<InstId, u32>>,
    thrd_inst_pred: Vec<AHashMap<InstId, PredId>>,
    /// Per-thread stack of tree positions; entry pushes, exit pops.
    thrd_tree_position: Vec<Vec<PredId>>,
    /// Per-thread stack of per-call predicate traces.
    thrd_trace: Vec<Vec<Vec<PredId>>>,

    read_locations: AHashSet<Location>,
    write_locations: AHashSet<Location>,
    val_loc_map: AHashMap<u64, AHashSet<Location>>,
    loc_may_equal: AHashMap<Location, AHashSet<Location>>,

    out_edges: Vec<FuncId>,
    edge_kinds: AHashMap<FuncId, EdgeKind>,

    nullity_mask: u64,
}

impl FuncNode {
    pub fn new(func_id: FuncId, name: impl Into<String>, nullity_mask: u64) -> Self {
        let mut preds = Vec::new();
        preds.push(PredicateNode::entry_sentinel());
        preds.push(PredicateNode::exit_sentinel());
        Self {
            func_id,
            name: name.into(),
            execution_number: 0,
            exit_count: 0,
            inst_counter: 1,
            marker: 1,
            thrd_markers: Vec::new(),
            insts: Vec::new(),
            inst_by_position: AHashMap::new(),
            entry_insts: Vec::new(),
            preds,
            entry_pred: PredId(0),
            exit_pred: PredId(1),
            predicate_leaves: AHashSet::new(),
            failed_predicates: AHashSet::new(),
            thrd_loc_inst: Vec::new(),
            thrd_inst_id: Vec::new(),
            thrd_inst_pred: Vec::new(),
            thrd_tree_position: Vec::new(),
            thrd_trace: Vec::new(),
            read_locations: AHashSet::new(),
            write_locations: AHashSet::new(),
            val_loc_map: AHashMap::new(),
            loc_may_equal: AHashMap::new(),
            out_edges: Vec::new(),
            edge_kinds: AHashMap::new(),
            nullity_mask,
        }
    }

    #[inline]
    pub fn func_id(&self) -> FuncId {
        self.func_id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn exit_count(&self) -> u64 {
        self.exit_count
    }

    #[inline]
    pub fn entry_pred(&self) -> PredId {
        self.entry_pred
    }

    #[inline]
    pub fn exit_pred(&self) -> PredId {
        self.exit_pred
    }

    #[inline]
    pub fn pred(&self, id: PredId) -> &PredicateNode {
        &self.preds[id.index()]
    }

    /// Number of predicate nodes, sentinels included.
    pub fn pred_count(&self) -> usize {
        self.preds.len()
    }

    /// All predicate node ids, in creation order.
    pub fn pred_ids(&self) -> impl Iterator<Item = PredId> + '_ {
        (0..self.preds.len() as u32).map(PredId)
    }

    #[inline]
    pub fn inst(&self, id: InstId) -> &FuncInst {
        &self.insts[id.index()]
    }

    #[inline]
    pub fn predicate_leaves(&self) -> &AHashSet<PredId> {
        &self.predicate_leaves
    }

    pub fn may_equal_neighbors(&self, loc: Location) -> Option<&AHashSet<Location>> {
        self.loc_may_equal.get(&loc)
    }

    /// Reset the per-execution state: the location views, and any call
    /// stacks an infeasible execution abandoned mid-call. The instruction
    /// table and the predicate tree survive; they are the learned model.
    pub fn on_new_execution(&mut self, execution_number: usize) {
        self.execution_number = execution_number;
        self.read_locations.clear();
        self.write_locations.clear();
        self.val_loc_map.clear();
        self.loc_may_equal.clear();
        for t in 0..self.thrd_markers.len() {
            self.thrd_loc_inst[t].clear();
            self.thrd_inst_id[t].clear();
            self.thrd_inst_pred[t].clear();
            self.thrd_tree_position[t].clear();
            self.thrd_trace[t].clear();
        }
    }

    /// Intern the instruction at `act`'s source position, creating it or a
    /// collision entry as needed, and latch non-uniqueness if the position
    /// retires at a different location within one execution.
    pub fn add_inst(&mut self, act: &ActionRecord) {
        // Thread primitives carry no source position.
        let Some(position) = act.position else {
            return;
        };

        let primary = match self.inst_by_position.get(&position) {
            Some(&id) => id,
            None => {
                let id = self.create_inst(act, position);
                self.inst_by_position.insert(position, id);
                return;
            }
        };

        let mut inst = primary;
        if !kinds_match(self.insts[primary.index()].kind(), act.kind) {
            match self.search_in_collision(primary, act) {
                Some(found) => inst = found,
                None => {
                    let id = self.create_inst(act, position);
                    self.insts[primary.index()].add_collision(id);
                    return;
                }
            }
        }

        // The location view resets when a new execution starts, before the
        // uniqueness latch is evaluated.
        if self.insts[inst.index()].execution_number() != self.execution_number {
            self.insts[inst.index()].set_location(act.location);
            self.insts[inst.index()].set_execution_number(self.execution_number);
        }
        if self.insts[inst.index()].location_seen() != act.location {
            self.insts[inst.index()].not_single_location();
        }
    }

    fn create_inst(&mut self, act: &ActionRecord, position: PositionId) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(FuncInst::new(
            position,
            act.location,
            act.kind,
            act.order,
            self.execution_number,
        ));
        id
    }

    /// The instruction with the same position and a matching kind, if any.
    pub fn get_inst(&self, act: &ActionRecord) -> Option<InstId> {
        let position = act.position?;
        let &primary = self.inst_by_position.get(&position)?;
        if kinds_match(self.insts[primary.index()].kind(), act.kind) {
            return Some(primary);
        }
        self.search_in_collision(primary, act)
    }

    fn search_in_collision(&self, primary: InstId, act: &ActionRecord) -> Option<InstId> {
        self.insts[primary.index()]
            .collisions()
            .iter()
            .copied()
            .find(|id| kinds_match(self.insts[id.index()].kind(), act.kind))
    }

    fn add_entry_inst(&mut self, inst: InstId) {
        if !self.entry_insts.contains(&inst) {
            self.entry_insts.push(inst);
        }
    }

    pub fn entry_insts(&self) -> &[InstId] {
        &self.entry_insts
    }

    /// A fiber crossed into this function: stamp a fresh call marker and
    /// push the entry position onto its tree-position stack.
    pub fn function_entry_handler(&mut self, tid: ThreadId) {
        let t = self.ensure_thread(tid);
        self.marker += 1;
        self.thrd_markers[t] = self.marker;
        self.thrd_loc_inst[t].clear();
        self.thrd_inst_id[t].clear();
        self.thrd_inst_pred[t].clear();
        self.thrd_tree_position[t].push(self.entry_pred);
        self.thrd_trace[t].push(Vec::new());
    }

    /// A fiber left this function: link the final position to the shared
    /// exit node, propagate weights along the call's trace, and pop the
    /// per-thread tracking state.
    pub fn function_exit_handler(&mut self, tid: ThreadId) {
        let t = self.ensure_thread(tid);
        self.exit_count += 1;

        self.thrd_loc_inst[t].clear();
        self.thrd_inst_id[t].clear();
        self.thrd_inst_pred[t].clear();

        let final_pos = *self
            .thrd_tree_position[t]
            .last()
            .expect("function exit without matching entry");
        if self.preds[final_pos.index()].exit_link().is_none() {
            let exit = self.exit_pred;
            self.preds[final_pos.index()].set_exit_link(exit);
        }

        self.update_predicate_tree_weight(t);

        self.thrd_tree_position[t].pop();
        self.thrd_trace[t].pop();
    }

    /// Feed one retired action into the learner. No-op unless the action is
    /// a read, write, or RMW with a known source position.
    pub fn update_tree(&mut self, act: &ActionRecord, history: &mut HistoryIndex) {
        if !(act.is_read() || act.is_write()) {
            return;
        }
        let Some(inst) = self.get_inst(act) else {
            return;
        };
        let loc = act.location;

        if act.is_write() {
            if self.write_locations.insert(loc) {
                history.add_writer(loc, self.func_id);
            }
            // Writes carry no predicate information yet.
            return;
        }

        // The first time a single-location instruction reads a cell, import
        // every value ever written there so equality inference can relate
        // this cell to others holding the same values.
        if !self.read_locations.contains(&loc) && self.insts[inst.index()].is_single_location() {
            self.read_locations.insert(loc);
            let values: Vec<u64> = history.values_written(loc).to_vec();
            for value in values {
                self.add_to_val_loc_map(value, loc);
            }
            history.add_reader(loc, self.func_id);
        }

        self.update_predicate_tree(act);
    }

    fn update_predicate_tree(&mut self, act: &ActionRecord) {
        let tid = act.thread;
        let t = self.ensure_thread(tid);
        let marker = self.thrd_markers[t];
        let mut curr = *self
            .thrd_tree_position[t]
            .last()
            .expect("action retired outside a function call");

        let inst = self.get_inst(act).expect("instruction not interned");
        self.insts[inst.index()].set_associated_read(tid, marker, act.value);
        if self.preds[curr.index()].is_entry() {
            self.add_entry_inst(inst);
        }

        loop {
            match self.follow_branch(curr, inst, act, tid, marker) {
                Branch::Found(next) => {
                    curr = next;
                }
                Branch::Unset(unset) => {
                    if self.amend_predicate_expr(curr, unset, inst, act) {
                        continue;
                    }
                    curr = unset;
                }
                Branch::NotFound => {
                    // A revisited instruction with a smaller call-local id
                    // means the user code looped; record a back-edge and
                    // continue from the loop head instead of descending
                    // forever.
                    if let Some(&next_id) = self.thrd_inst_id[t].get(&inst) {
                        let curr_id = self.preds[curr.index()]
                            .func_inst()
                            .and_then(|ci| self.thrd_inst_id[t].get(&ci))
                            .copied()
                            .unwrap_or(0);
                        if curr_id >= next_id {
                            if let Some(&old_pred) = self.thrd_inst_pred[t].get(&inst) {
                                if let Some(back) = self.preds[old_pred.index()].parent() {
                                    self.preds[curr.index()].add_backedge(back);
                                    curr = back;
                                    continue;
                                }
                            }
                        }
                    }

                    let halves = self.infer_predicates(inst, act, t);
                    self.generate_predicates(curr, inst, &halves);
                    continue;
                }
            }

            // Arrived at the branch that matches this action.
            if act.is_write() {
                self.preds[curr.index()].set_write(true);
            }
            if act.is_read() {
                self.thrd_loc_inst[t].insert(act.location, inst);
            }
            self.thrd_inst_pred[t].insert(inst, curr);
            *self.thrd_tree_position[t].last_mut().unwrap() = curr;
            if !self.thrd_inst_id[t].contains_key(&inst) {
                self.thrd_inst_id[t].insert(inst, self.inst_counter);
                self.inst_counter += 1;
            }
            self.preds[curr.index()].incr_explored();
            self.thrd_trace[t].last_mut().unwrap().push(curr);
            break;
        }
    }

    /// Among `curr`'s children discriminating on `inst`, find the one whose
    /// predicate expressions all hold for the incoming action. At most one
    /// child may carry an empty predicate set.
    fn follow_branch(
        &self,
        curr: PredId,
        inst: InstId,
        act: &ActionRecord,
        tid: ThreadId,
        marker: u32,
    ) -> Branch {
        let mut unset = None;
        for &child_id in self.preds[curr.index()].children() {
            let child = &self.preds[child_id.index()];
            if child.func_inst() != Some(inst) {
                continue;
            }

            if child.exprs().is_empty() {
                assert!(
                    unset.is_none(),
                    "two branches with unset predicates under one node"
                );
                unset = Some(child_id);
                continue;
            }

            let mut correct = true;
            for expr in child.exprs() {
                let holds = match expr.token {
                    PredToken::NoPredicate => true,
                    PredToken::Equality => {
                        let other = expr.inst.expect("equality predicate without instruction");
                        let last = self.insts[other.index()]
                            .associated_read(tid, marker)
                            .expect("equality predicate against unread instruction");
                        (last == act.value) == expr.expected
                    }
                    PredToken::Nullity => {
                        ((act.value & self.nullity_mask) == 0) == expr.expected
                    }
                };
                if !holds {
                    correct = false;
                    break;
                }
            }
            if correct {
                return Branch::Found(child_id);
            }
        }

        match unset {
            Some(id) => Branch::Unset(id),
            None => Branch::NotFound,
        }
    }

    /// Candidate half-expressions for a branch that was not found. Reads
    /// relate to the previous read at the same location, to may-equal
    /// neighbors, or to nullity; writes produce nothing.
    fn infer_predicates(
        &self,
        inst: InstId,
        act: &ActionRecord,
        t: usize,
    ) -> SmallVec<[HalfExpr; 2]> {
        let mut halves = SmallVec::new();
        let loc = act.location;
        if !self.insts[inst.index()].is_read() {
            return halves;
        }

        if let Some(&last) = self.thrd_loc_inst[t].get(&loc) {
            halves.push(HalfExpr {
                token: PredToken::Equality,
                inst: Some(last),
            });
        } else if self.insts[inst.index()].is_single_location() {
            if let Some(neighbors) = self.loc_may_equal.get(&loc) {
                let mut sorted: Vec<Location> = neighbors.iter().copied().collect();
                sorted.sort();
                for neighbor in sorted {
                    if let Some(&last) = self.thrd_loc_inst[t].get(&neighbor) {
                        halves.push(HalfExpr {
                            token: PredToken::Equality,
                            inst: Some(last),
                        });
                    }
                }
            }
        } else if act.value & self.nullity_mask == 0 {
            // Only infer nullity when the value actually is null.
            halves.push(HalfExpr {
                token: PredToken::Nullity,
                inst: None,
            });
        }
        halves
    }

    /// Materialise all 2^k sign combinations of `halves` as children of
    /// `curr`. With no halves, attach a single child: entry predicates and
    /// pure-write branches get an explicit no-predicate expression, reads
    /// are left unset for later amendment.
    fn generate_predicates(&mut self, curr: PredId, inst: InstId, halves: &[HalfExpr]) {
        if halves.is_empty() {
            let child = self.alloc_pred(Some(inst));
            if self.preds[curr.index()].is_entry() || self.insts[inst.index()].is_write() {
                self.preds[child.index()].push_expr(PredExpr {
                    token: PredToken::NoPredicate,
                    inst: None,
                    expected: true,
                });
            }
            self.attach(curr, child);
            self.predicate_leaves.insert(child);
            self.predicate_leaves.remove(&curr);
            return;
        }

        let mut generated = Vec::with_capacity(1 << halves.len());
        for expected in [true, false] {
            let node = self.alloc_pred(Some(inst));
            self.preds[node.index()].push_expr(PredExpr {
                token: halves[0].token,
                inst: halves[0].inst,
                expected,
            });
            generated.push(node);
        }

        for half in &halves[1..] {
            let doubled = generated.len();
            for j in 0..doubled {
                let twin = self.alloc_pred(Some(inst));
                let copied: Vec<PredExpr> = self.preds[generated[j].index()].exprs().to_vec();
                for expr in copied {
                    self.preds[twin.index()].push_expr(expr);
                }
                self.preds[generated[j].index()].push_expr(PredExpr {
                    token: half.token,
                    inst: half.inst,
                    expected: true,
                });
                self.preds[twin.index()].push_expr(PredExpr {
                    token: half.token,
                    inst: half.inst,
                    expected: false,
                });
                generated.push(twin);
            }
        }

        trace!(
            func = %self.name,
            count = generated.len(),
            "generated predicate branches"
        );
        for node in generated {
            self.attach(curr, node);
            self.predicate_leaves.insert(node);
        }
        self.predicate_leaves.remove(&curr);
    }

    /// Split a branch with an unset predicate set once a null read shows up:
    /// the existing branch becomes the non-null case and a new sibling takes
    /// the null case. Only applies to instructions that roam locations.
    fn amend_predicate_expr(
        &mut self,
        curr: PredId,
        unset: PredId,
        inst: InstId,
        act: &ActionRecord,
    ) -> bool {
        if self.insts[inst.index()].is_single_location() || act.value & self.nullity_mask != 0 {
            return false;
        }

        let twin = self.alloc_pred(Some(inst));
        self.preds[twin.index()].push_expr(PredExpr {
            token: PredToken::Nullity,
            inst: None,
            expected: true,
        });
        self.attach(curr, twin);
        self.preds[unset.index()].push_expr(PredExpr {
            token: PredToken::Nullity,
            inst: None,
            expected: false,
        });
        self.predicate_leaves.insert(twin);
        true
    }

    fn alloc_pred(&mut self, func_inst: Option<InstId>) -> PredId {
        let id = PredId(self.preds.len() as u32);
        self.preds.push(PredicateNode::new(func_inst));
        id
    }

    fn attach(&mut self, parent: PredId, child: PredId) {
        let depth = self.preds[parent.index()].depth() + 1;
        self.preds[parent.index()].add_child(child);
        self.preds[child.index()].set_parent(parent);
        self.preds[child.index()].set_depth(depth);
    }

    /// Record that exploring through `pred` led to an infeasible execution.
    pub fn mark_failed(&mut self, pred: PredId) {
        self.failed_predicates.insert(pred);
        self.preds[pred.index()].incr_failed();
    }

    pub fn failed_predicates(&self) -> &AHashSet<PredId> {
        &self.failed_predicates
    }

    /// The thread's current position in the predicate tree.
    pub fn tree_position(&self, tid: ThreadId) -> Option<PredId> {
        self.thrd_tree_position
            .get(tid.0 as usize)?
            .last()
            .copied()
    }

    /// Walk the call's trace from the last action back to the entry,
    /// rescoring each node: leaves decay with exploration, interior nodes
    /// average their children discounted by depth.
    fn update_predicate_tree_weight(&mut self, t: usize) {
        self.failed_predicates.clear();

        let trace = self.thrd_trace[t]
            .last()
            .cloned()
            .expect("weight update without an open call");
        for &node in trace.iter().rev() {
            let weight = if self.predicate_leaves.contains(&node) {
                let n = &self.preds[node.index()];
                100.0 / (f64::from(n.explored() + n.failed() + 1)).sqrt()
            } else {
                let children = self.preds[node.index()].children();
                debug_assert!(!children.is_empty());
                let sum: f64 = children
                    .iter()
                    .map(|c| self.preds[c.index()].weight())
                    .sum();
                let average = sum / children.len() as f64;
                average * 0.9f64.powi(self.preds[node.index()].depth() as i32)
            };
            self.preds[node.index()].set_weight(weight);
        }
    }

    /// Leaves ordered by depth, shallowest first; ties break on creation
    /// order.
    pub fn sorted_leaves_by_depth(&self) -> Vec<PredId> {
        let mut leaves: Vec<PredId> = self.predicate_leaves.iter().copied().collect();
        leaves.sort_by_key(|p| (self.preds[p.index()].depth(), p.0));
        leaves
    }

    /// Weighted roulette over the leaf set; drives biased exploration.
    pub fn select_leaf_weighted<R: rand::Rng>(&self, rng: &mut R) -> Option<PredId> {
        let leaves = self.sorted_leaves_by_depth();
        if leaves.is_empty() {
            return None;
        }
        let total: f64 = leaves
            .iter()
            .map(|p| self.preds[p.index()].weight().max(0.0))
            .sum();
        if total <= 0.0 {
            return leaves.first().copied();
        }
        let mut pick = rng.gen_range(0.0..total);
        for &leaf in &leaves {
            let w = self.preds[leaf.index()].weight().max(0.0);
            if pick < w {
                return Some(leaf);
            }
            pick -= w;
        }
        leaves.last().copied()
    }

    fn add_to_val_loc_map(&mut self, value: u64, loc: Location) {
        let old_locations: Vec<Location> = self
            .val_loc_map
            .get(&value)
            .map(|s| {
                let mut v: Vec<Location> = s.iter().copied().collect();
                v.sort();
                v
            })
            .unwrap_or_default();
        self.update_loc_may_equal_map(loc, &old_locations);
        self.val_loc_map.entry(value).or_default().insert(loc);
    }

    /// Link `new_loc` with every location that has stored the same value,
    /// in both directions.
    fn update_loc_may_equal_map(&mut self, new_loc: Location, old_locations: &[Location]) {
        if old_locations.contains(&new_loc) {
            return;
        }
        for &member in old_locations {
            self.loc_may_equal.entry(new_loc).or_default().insert(member);
            self.loc_may_equal.entry(member).or_default().insert(new_loc);
        }
    }

    /// Record that control can flow from this function into `other`.
    pub fn add_out_edge(&mut self, other: FuncId) {
        match self.edge_kinds.get(&other) {
            None => {
                self.edge_kinds.insert(other, EdgeKind::Out);
                self.out_edges.push(other);
            }
            Some(EdgeKind::In) => {
                self.edge_kinds.insert(other, EdgeKind::Bi);
                self.out_edges.push(other);
            }
            Some(_) => {}
        }
    }

    /// Record that control can flow from `other` into this function.
    pub fn note_in_edge(&mut self, other: FuncId) {
        match self.edge_kinds.get(&other) {
            None => {
                self.edge_kinds.insert(other, EdgeKind::In);
            }
            Some(EdgeKind::Out) => {
                self.edge_kinds.insert(other, EdgeKind::Bi);
            }
            Some(_) => {}
        }
    }

    pub fn out_edges(&self) -> &[FuncId] {
        &self.out_edges
    }

    /// Write the predicate tree in dot format.
    pub fn dump_predicate_tree<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "digraph function_{} {{", self.name)?;
        for (i, node) in self.preds.iter().enumerate() {
            writeln!(out, "P{} [label=\"{}\"];", i, self.pred_label(node))?;
            for child in node.children() {
                writeln!(out, "P{} -> P{};", i, child.0)?;
            }
            let mut backs: Vec<PredId> = node.backedges().iter().copied().collect();
            backs.sort();
            for back in backs {
                writeln!(out, "P{} -> P{} [style=dashed];", i, back.0)?;
            }
            if let Some(exit) = node.exit_link() {
                writeln!(out, "P{} -> P{} [style=dotted];", i, exit.0)?;
            }
        }
        writeln!(out, "}}")
    }

    fn pred_label(&self, node: &PredicateNode) -> String {
        if node.is_entry() {
            return "entry".to_string();
        }
        if node.is_exit() {
            return "exit".to_string();
        }
        let mut label = match node.func_inst() {
            Some(inst) => format!("i{}", inst.0),
            None => "?".to_string(),
        };
        for expr in node.exprs() {
            let part = match expr.token {
                PredToken::NoPredicate => "any".to_string(),
                PredToken::Equality => format!(
                    "eq(i{})={}",
                    expr.inst.map(|i| i.0).unwrap_or(u32::MAX),
                    expr.expected
                ),
                PredToken::Nullity => format!("null={}", expr.expected),
            };
            label.push(' ');
            label.push_str(&part);
        }
        label
    }

    fn ensure_thread(&mut self, tid: ThreadId) -> usize {
        let t = tid.0 as usize;
        if self.thrd_markers.len() <= t {
            self.thrd_markers.resize(t + 1, 0);
            self.thrd_loc_inst.resize_with(t + 1, AHashMap::new);
            self.thrd_inst_id.resize_with(t + 1, AHashMap::new);
            self.thrd_inst_pred.resize_with(t + 1, AHashMap::new);
            self.thrd_tree_position.resize_with(t + 1, Vec::new);
            self.thrd_trace.resize_with(t + 1, Vec::new);
        }
        t
    }
}

/// Distance in call-graph hops from `from` to `target`, bounded by
/// `max_step`; `None` when unreachable or farther than the bound.
pub fn compute_distance(
    funcs: &[FuncNode],
    from: FuncId,
    target: FuncId,
    max_step: u32,
) -> Option<u32> {
    if from == target {
        return Some(0);
    }

    let mut distances: AHashMap<FuncId, u32> = AHashMap::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(from);
    distances.insert(from, 0);

    while let Some(curr) = queue.pop_front() {
        let dist = distances[&curr];
        if dist >= max_step {
            return None;
        }
        for &out in funcs[curr.0 as usize].out_edges() {
            if !distances.contains_key(&out) {
                if out == target {
                    return Some(dist + 1);
                }
                queue.push_back(out);
                distances.insert(out, dist + 1);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{ActionKind, MemOrder, PositionTable};

    const MASK: u64 = 0xffff_ffff;

    struct Fixture {
        node: FuncNode,
        history: HistoryIndex,
        positions: PositionTable,
        seq: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let mut node = FuncNode::new(FuncId(0), "push", MASK);
            node.on_new_execution(1);
            Self {
                node,
                history: HistoryIndex::new(),
                positions: PositionTable::new(),
                seq: 0,
            }
        }

        fn read(&mut self, tid: u32, pos: &str, loc: u64, value: u64) -> ActionRecord {
            self.seq += 1;
            ActionRecord {
                kind: ActionKind::AtomicRead,
                order: MemOrder::Acquire,
                location: Location(loc),
                thread: ThreadId(tid),
                value,
                position: Some(self.positions.intern(pos)),
                seq: self.seq,
            }
        }

        fn write(&mut self, tid: u32, pos: &str, loc: u64, value: u64) -> ActionRecord {
            self.seq += 1;
            ActionRecord {
                kind: ActionKind::AtomicWrite,
                order: MemOrder::Release,
                location: Location(loc),
                thread: ThreadId(tid),
                value,
                position: Some(self.positions.intern(pos)),
                seq: self.seq,
            }
        }

        fn feed(&mut self, act: ActionRecord) {
            self.node.add_inst(&act);
            self.node.update_tree(&act, &mut self.history);
        }
    }

    #[test]
    fn test_interning_by_position() {
        let mut fx = Fixture::new();
        let a1 = fx.read(0, "q.c:10", 8, 0);
        let a2 = fx.read(0, "q.c:10", 8, 1);
        let b = fx.read(0, "q.c:20", 8, 0);
        fx.node.add_inst(&a1);
        fx.node.add_inst(&a2);
        fx.node.add_inst(&b);

        let ia = fx.node.get_inst(&a1).unwrap();
        assert_eq!(fx.node.get_inst(&a2), Some(ia));
        assert_ne!(fx.node.get_inst(&b), Some(ia));
    }

    #[test]
    fn test_collision_same_position_different_kind() {
        // `x++` retires a read and a write at the same position.
        let mut fx = Fixture::new();
        let r = fx.read(0, "x.c:5", 8, 0);
        let w = fx.write(0, "x.c:5", 8, 1);
        fx.node.add_inst(&r);
        fx.node.add_inst(&w);

        let ir = fx.node.get_inst(&r).unwrap();
        let iw = fx.node.get_inst(&w).unwrap();
        assert_ne!(ir, iw);
        assert!(fx.node.inst(ir).is_read());
        assert!(fx.node.inst(iw).is_write());
    }

    #[test]
    fn test_single_location_latch() {
        let mut fx = Fixture::new();
        let a = fx.read(0, "q.c:10", 8, 0);
        let b = fx.read(0, "q.c:10", 16, 0);
        fx.node.add_inst(&a);
        let inst = fx.node.get_inst(&a).unwrap();
        assert!(fx.node.inst(inst).is_single_location());
        fx.node.add_inst(&b);
        assert!(!fx.node.inst(inst).is_single_location());
    }

    #[test]
    fn test_location_resets_between_executions_without_latching() {
        let mut fx = Fixture::new();
        let a = fx.read(0, "q.c:10", 8, 0);
        fx.node.add_inst(&a);
        let inst = fx.node.get_inst(&a).unwrap();

        // A new execution may legitimately place the cell elsewhere.
        fx.node.on_new_execution(2);
        let b = fx.read(0, "q.c:10", 24, 0);
        fx.node.add_inst(&b);
        assert!(fx.node.inst(inst).is_single_location());
        assert_eq!(fx.node.inst(inst).location_seen(), Location(24));
    }

    #[test]
    fn test_first_read_creates_entry_branch() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let act = fx.read(0, "q.c:10", 8, 5);
        fx.feed(act);

        let entry = fx.node.entry_pred();
        assert_eq!(fx.node.pred(entry).children().len(), 1);
        let child = fx.node.pred(entry).children()[0];
        assert_eq!(
            fx.node.pred(child).exprs(),
            &[PredExpr {
                token: PredToken::NoPredicate,
                inst: None,
                expected: true
            }]
        );
        assert!(fx.node.predicate_leaves().contains(&child));
        assert_eq!(fx.node.tree_position(ThreadId(0)), Some(child));
    }

    #[test]
    fn test_equality_predicates_split_on_repeated_location() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        // A second position reading the same cell discriminates on whether
        // it observed the same value.
        let second = fx.read(0, "q.c:20", 8, 5);
        fx.feed(second);

        let pos = fx.node.tree_position(ThreadId(0)).unwrap();
        let exprs = fx.node.pred(pos).exprs();
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].token, PredToken::Equality);
        assert!(exprs[0].expected);

        // Both sign combinations were materialised and are disjoint.
        let parent = fx.node.pred(pos).parent().unwrap();
        let siblings = fx.node.pred(parent).children();
        assert_eq!(siblings.len(), 2);
        let expected: Vec<bool> = siblings
            .iter()
            .map(|s| fx.node.pred(*s).exprs()[0].expected)
            .collect();
        assert!(expected.contains(&true) && expected.contains(&false));

        // A later call observing a different value takes the other branch.
        fx.node.function_exit_handler(ThreadId(0));
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let second = fx.read(0, "q.c:20", 8, 9);
        fx.feed(second);
        let pos2 = fx.node.tree_position(ThreadId(0)).unwrap();
        assert_ne!(pos2, pos);
        assert!(!fx.node.pred(pos2).exprs()[0].expected);
    }

    #[test]
    fn test_amendment_splits_unset_branch_on_null() {
        let mut fx = Fixture::new();

        // Latch the second read's position as multi-location first.
        let probe_a = fx.read(0, "q.c:20", 16, 7);
        let probe_b = fx.read(0, "q.c:20", 24, 7);
        fx.node.add_inst(&probe_a);
        fx.node.add_inst(&probe_b);

        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let second = fx.read(0, "q.c:20", 16, 7);
        fx.feed(second);

        // The non-null read landed on a branch with an unset predicate set.
        let unset = fx.node.tree_position(ThreadId(0)).unwrap();
        assert!(fx.node.pred(unset).exprs().is_empty());
        fx.node.function_exit_handler(ThreadId(0));

        let leaves_before = fx.node.predicate_leaves().len();

        // A null read through the same branch amends it.
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let second = fx.read(0, "q.c:20", 16, 0);
        fx.feed(second);

        let null_branch = fx.node.tree_position(ThreadId(0)).unwrap();
        assert_eq!(
            fx.node.pred(null_branch).exprs(),
            &[PredExpr {
                token: PredToken::Nullity,
                inst: None,
                expected: true
            }]
        );
        assert_eq!(
            fx.node.pred(unset).exprs(),
            &[PredExpr {
                token: PredToken::Nullity,
                inst: None,
                expected: false
            }]
        );
        assert_eq!(fx.node.predicate_leaves().len(), leaves_before + 1);
    }

    #[test]
    fn test_loop_records_backedge() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let node_after_first = fx.node.tree_position(ThreadId(0)).unwrap();

        // The same position retiring again means the user code looped.
        let again = fx.read(0, "q.c:10", 8, 5);
        fx.feed(again);

        let entry = fx.node.entry_pred();
        assert!(fx
            .node
            .pred(node_after_first)
            .backedges()
            .contains(&entry));
        // Descent resumed from the loop head, not below the first node.
        assert_eq!(fx.node.tree_position(ThreadId(0)), Some(node_after_first));
    }

    #[test]
    fn test_exit_links_and_weights() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let second = fx.read(0, "q.c:20", 8, 5);
        fx.feed(second);
        let last = fx.node.tree_position(ThreadId(0)).unwrap();
        fx.node.function_exit_handler(ThreadId(0));

        assert_eq!(fx.node.exit_count(), 1);
        assert_eq!(fx.node.pred(last).exit_link(), Some(fx.node.exit_pred()));

        // Leaf score: 100 / sqrt(explored + failed + 1) with explored = 1.
        let leaf_weight = fx.node.pred(last).weight();
        assert!((leaf_weight - 100.0 / 2.0f64.sqrt()).abs() < 1e-9);

        // Its parent averages children and decays by depth.
        let parent = fx.node.pred(last).parent().unwrap();
        let children = fx.node.pred(parent).children();
        let sum: f64 = children.iter().map(|c| fx.node.pred(*c).weight()).sum();
        let expected = sum / children.len() as f64 * 0.9;
        assert!((fx.node.pred(parent).weight() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_may_equal_links_through_history() {
        let mut fx = Fixture::new();
        fx.history.record_write_value(Location(8), 42);
        fx.history.record_write_value(Location(16), 42);

        fx.node.function_entry_handler(ThreadId(0));
        let a = fx.read(0, "q.c:10", 8, 42);
        fx.feed(a);
        let b = fx.read(0, "q.c:20", 16, 42);
        fx.feed(b);

        let neighbors = fx.node.may_equal_neighbors(Location(16)).unwrap();
        assert!(neighbors.contains(&Location(8)));
        let neighbors = fx.node.may_equal_neighbors(Location(8)).unwrap();
        assert!(neighbors.contains(&Location(16)));
    }

    #[test]
    fn test_write_records_location_and_skips_tree() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let w = fx.write(0, "q.c:30", 8, 1);
        fx.feed(w);

        // Writes register with the history but grow no branches yet.
        assert!(fx.history.writers(Location(8)).unwrap().contains(&FuncId(0)));
        assert_eq!(fx.node.pred(fx.node.entry_pred()).children().len(), 0);
        assert_eq!(fx.node.tree_position(ThreadId(0)), Some(fx.node.entry_pred()));
    }

    #[test]
    fn test_leaf_selection_prefers_heavier_leaves() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let first = fx.read(0, "q.c:10", 8, 5);
        fx.feed(first);
        let second = fx.read(0, "q.c:20", 8, 5);
        fx.feed(second);
        fx.node.function_exit_handler(ThreadId(0));

        let mut rng = StdRng::seed_from_u64(7);
        let picked = fx.node.select_leaf_weighted(&mut rng);
        assert!(picked.is_some());
        assert!(fx.node.predicate_leaves().contains(&picked.unwrap()));
    }

    #[test]
    fn test_compute_distance() {
        let mut a = FuncNode::new(FuncId(0), "a", MASK);
        let mut b = FuncNode::new(FuncId(1), "b", MASK);
        let c = FuncNode::new(FuncId(2), "c", MASK);
        a.add_out_edge(FuncId(1));
        b.add_out_edge(FuncId(2));
        b.note_in_edge(FuncId(0));
        let funcs = vec![a, b, c];

        assert_eq!(compute_distance(&funcs, FuncId(0), FuncId(0), 10), Some(0));
        assert_eq!(compute_distance(&funcs, FuncId(0), FuncId(2), 10), Some(2));
        assert_eq!(compute_distance(&funcs, FuncId(2), FuncId(0), 10), None);
        // Bounded search gives up beyond max_step hops.
        assert_eq!(compute_distance(&funcs, FuncId(0), FuncId(2), 1), None);
    }

    #[test]
    fn test_dump_predicate_tree_shape() {
        let mut fx = Fixture::new();
        fx.node.function_entry_handler(ThreadId(0));
        let act = fx.read(0, "q.c:10", 8, 5);
        fx.feed(act);
        fx.node.function_exit_handler(ThreadId(0));

        let mut out = Vec::new();
        fx.node.dump_predicate_tree(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("digraph function_push {"));
        assert!(text.contains("P0 [label=\"entry\"];"));
        assert!(text.contains("P0 -> P2;"));
        assert!(text.contains("[style=dotted];"));
    }
}
