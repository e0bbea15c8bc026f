//! Interned per-source-position representations of atomic operations.

use tessera_core::{ActionKind, Location, MemOrder, PositionId, ThreadId};

/// Index of a `FuncInst` in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) u32);

impl InstId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whether an action of kind `act` belongs to the instruction interned with
/// kind `interned`. The RMW variants collapse onto one instruction: a
/// compare-exchange retires as a plain read when its comparison fails.
pub(crate) fn kinds_match(interned: ActionKind, act: ActionKind) -> bool {
    interned == act
        || (interned == ActionKind::AtomicRmw && act == ActionKind::AtomicRmwRCas)
        || (interned == ActionKind::AtomicRmwRCas
            && matches!(act, ActionKind::AtomicRmw | ActionKind::AtomicRead))
}

/// The interned handle for one atomic operation, identified by its source
/// position. Survives across executions; it is part of the learned model.
#[derive(Debug, Clone)]
pub struct FuncInst {
    position: PositionId,
    /// Memory cell seen when this instruction last retired. The same source
    /// position can touch different cells (the next field of a queue head,
    /// for instance); this holds only the latest.
    location_seen: Location,
    kind: ActionKind,
    order: MemOrder,
    /// Starts true; latches false the first time this position retires at a
    /// different location within one execution.
    single_location: bool,
    execution_number: usize,
    /// Instructions at the same position with a different kind (`x++`
    /// retires both a read and a write at one position).
    collisions: Vec<InstId>,
    /// Per-thread last value read by this instruction, validated against the
    /// function's call marker.
    assoc_reads: Vec<AssocRead>,
}

#[derive(Debug, Clone, Copy, Default)]
struct AssocRead {
    marker: u32,
    value: u64,
}

impl FuncInst {
    pub(crate) fn new(
        position: PositionId,
        location: Location,
        kind: ActionKind,
        order: MemOrder,
        execution_number: usize,
    ) -> Self {
        Self {
            position,
            location_seen: location,
            kind,
            order,
            single_location: true,
            execution_number,
            collisions: Vec::new(),
            assoc_reads: Vec::new(),
        }
    }

    #[inline]
    pub fn position(&self) -> PositionId {
        self.position
    }

    #[inline]
    pub fn location_seen(&self) -> Location {
        self.location_seen
    }

    pub(crate) fn set_location(&mut self, location: Location) {
        self.location_seen = location;
    }

    #[inline]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    #[inline]
    pub fn order(&self) -> MemOrder {
        self.order
    }

    #[inline]
    pub fn is_read(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::AtomicRead | ActionKind::AtomicRmw | ActionKind::AtomicRmwRCas
        )
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(self.kind, ActionKind::AtomicWrite | ActionKind::AtomicRmw)
    }

    #[inline]
    pub fn is_single_location(&self) -> bool {
        self.single_location
    }

    pub(crate) fn not_single_location(&mut self) {
        self.single_location = false;
    }

    #[inline]
    pub(crate) fn execution_number(&self) -> usize {
        self.execution_number
    }

    pub(crate) fn set_execution_number(&mut self, n: usize) {
        self.execution_number = n;
    }

    pub(crate) fn add_collision(&mut self, id: InstId) {
        self.collisions.push(id);
    }

    pub(crate) fn collisions(&self) -> &[InstId] {
        &self.collisions
    }

    /// Record the value this instruction read on `tid` during the call
    /// stamped `marker`.
    pub(crate) fn set_associated_read(&mut self, tid: ThreadId, marker: u32, value: u64) {
        let t = tid.0 as usize;
        if self.assoc_reads.len() <= t {
            self.assoc_reads.resize(t + 1, AssocRead::default());
        }
        self.assoc_reads[t] = AssocRead { marker, value };
    }

    /// The value this instruction last read on `tid`, if it was read during
    /// the call stamped `marker`.
    pub(crate) fn associated_read(&self, tid: ThreadId, marker: u32) -> Option<u64> {
        let slot = self.assoc_reads.get(tid.0 as usize)?;
        (slot.marker == marker).then_some(slot.value)
    }
}
