//! Vertices of the per-function predicate tree.

use crate::inst::InstId;
use ahash::AHashSet;
use smallvec::SmallVec;

/// Index of a predicate node in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub(crate) u32);

impl PredId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Depth assigned to the shared exit node; it sorts after every real leaf.
pub(crate) const EXIT_DEPTH: u32 = u32::MAX;

/// Kind of a runtime predicate expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredToken {
    /// Always matches; entry edges and pure-write branches carry this.
    NoPredicate,
    /// The value last read by the referenced instruction equals the
    /// incoming read value.
    Equality,
    /// The incoming read value is null under the configured mask.
    Nullity,
}

/// One predicate expression attached to a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredExpr {
    pub token: PredToken,
    /// The earlier instruction an `Equality` refers to.
    pub inst: Option<InstId>,
    pub expected: bool,
}

/// Vertex in the predicate tree. Tree surgery lives in `FuncNode`; this type
/// only owns the per-node data.
#[derive(Debug, Clone)]
pub struct PredicateNode {
    func_inst: Option<InstId>,
    entry: bool,
    exit: bool,
    /// Set once a write action has passed through this branch.
    write: bool,
    exprs: SmallVec<[PredExpr; 2]>,
    children: Vec<PredId>,
    parent: Option<PredId>,
    /// Loop targets. Never followed during descent; kept for weight
    /// propagation and biased exploration.
    backedges: AHashSet<PredId>,
    /// Where a call that ends on this node leaves the tree.
    exit_link: Option<PredId>,
    explored: u32,
    failed: u32,
    depth: u32,
    weight: f64,
}

impl PredicateNode {
    pub(crate) fn new(func_inst: Option<InstId>) -> Self {
        Self {
            func_inst,
            entry: false,
            exit: false,
            write: false,
            exprs: SmallVec::new(),
            children: Vec::new(),
            parent: None,
            backedges: AHashSet::new(),
            exit_link: None,
            explored: 0,
            failed: 0,
            depth: 0,
            weight: 0.0,
        }
    }

    pub(crate) fn entry_sentinel() -> Self {
        let mut node = Self::new(None);
        node.entry = true;
        node.exprs.push(PredExpr {
            token: PredToken::NoPredicate,
            inst: None,
            expected: true,
        });
        node
    }

    pub(crate) fn exit_sentinel() -> Self {
        let mut node = Self::new(None);
        node.exit = true;
        node.depth = EXIT_DEPTH;
        node
    }

    #[inline]
    pub fn func_inst(&self) -> Option<InstId> {
        self.func_inst
    }

    #[inline]
    pub fn is_entry(&self) -> bool {
        self.entry
    }

    #[inline]
    pub fn is_exit(&self) -> bool {
        self.exit
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.write
    }

    pub(crate) fn set_write(&mut self, write: bool) {
        self.write = write;
    }

    #[inline]
    pub fn exprs(&self) -> &[PredExpr] {
        &self.exprs
    }

    pub(crate) fn push_expr(&mut self, expr: PredExpr) {
        self.exprs.push(expr);
    }

    #[inline]
    pub fn children(&self) -> &[PredId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: PredId) {
        self.children.push(child);
    }

    #[inline]
    pub fn parent(&self) -> Option<PredId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: PredId) {
        self.parent = Some(parent);
    }

    #[inline]
    pub fn backedges(&self) -> &AHashSet<PredId> {
        &self.backedges
    }

    pub(crate) fn add_backedge(&mut self, target: PredId) {
        self.backedges.insert(target);
    }

    #[inline]
    pub fn exit_link(&self) -> Option<PredId> {
        self.exit_link
    }

    pub(crate) fn set_exit_link(&mut self, exit: PredId) {
        self.exit_link = Some(exit);
    }

    #[inline]
    pub fn explored(&self) -> u32 {
        self.explored
    }

    pub(crate) fn incr_explored(&mut self) {
        self.explored += 1;
    }

    #[inline]
    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub(crate) fn incr_failed(&mut self) {
        self.failed += 1;
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
    }

    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub(crate) fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}
