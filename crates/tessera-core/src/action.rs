//! Immutable descriptions of observed memory and thread events.

use crate::intern::PositionId;
use std::fmt;

/// Identifier of a target memory cell. Pointer-sized payload; equality is
/// the only operation the checker performs on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(pub u64);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Integer id of a user-program thread (fiber).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Bit of this thread in a 64-wide thread bitmap. Threads beyond the
    /// bitmap width get no bit and can never host a promised write.
    #[inline]
    pub fn bit(self) -> u64 {
        if self.0 >= 64 {
            0
        } else {
            1u64 << self.0
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// The universe of events the checker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    ThreadCreate,
    ThreadJoin,
    ThreadYield,
    AtomicRead,
    AtomicWrite,
    AtomicRmw,
    /// The read half of a compare-exchange whose comparison failed. Behaves
    /// as a pure read; interning folds it onto the RMW at the same position.
    AtomicRmwRCas,
}

/// C11-style memory order of an atomic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemOrder {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

/// One observed memory or thread event, immutable once retired.
///
/// `value` holds the written value for writes and RMWs, and the observed
/// value for plain reads once their reads-from choice is resolved. `seq` is
/// assigned at retirement and is unique and monotone within one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub order: MemOrder,
    pub location: Location,
    pub thread: ThreadId,
    pub value: u64,
    /// Interned source position; `None` for thread primitives.
    pub position: Option<PositionId>,
    pub seq: u64,
}

impl ActionRecord {
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
    pub fn is_rmw(&self) -> bool {
        matches!(self.kind, ActionKind::AtomicRmw | ActionKind::AtomicRmwRCas)
    }

    #[inline]
    pub fn is_acquire(&self) -> bool {
        self.is_read()
            && matches!(
                self.order,
                MemOrder::Acquire | MemOrder::AcqRel | MemOrder::SeqCst
            )
    }

    #[inline]
    pub fn is_release(&self) -> bool {
        self.is_write()
            && matches!(
                self.order,
                MemOrder::Release | MemOrder::AcqRel | MemOrder::SeqCst
            )
    }

    #[inline]
    pub fn same_location(&self, other: &ActionRecord) -> bool {
        self.location == other.location
    }

    #[inline]
    pub fn same_thread(&self, other: &ActionRecord) -> bool {
        self.thread == other.thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(kind: ActionKind, order: MemOrder) -> ActionRecord {
        ActionRecord {
            kind,
            order,
            location: Location(8),
            thread: ThreadId(1),
            value: 0,
            position: None,
            seq: 1,
        }
    }

    #[test]
    fn test_read_write_predicates() {
        assert!(act(ActionKind::AtomicRead, MemOrder::Relaxed).is_read());
        assert!(!act(ActionKind::AtomicRead, MemOrder::Relaxed).is_write());
        assert!(act(ActionKind::AtomicWrite, MemOrder::Relaxed).is_write());
        assert!(act(ActionKind::AtomicRmw, MemOrder::Relaxed).is_read());
        assert!(act(ActionKind::AtomicRmw, MemOrder::Relaxed).is_write());
        assert!(act(ActionKind::AtomicRmwRCas, MemOrder::Relaxed).is_read());
        assert!(!act(ActionKind::AtomicRmwRCas, MemOrder::Relaxed).is_write());
    }

    #[test]
    fn test_acquire_release() {
        assert!(act(ActionKind::AtomicRead, MemOrder::Acquire).is_acquire());
        assert!(!act(ActionKind::AtomicRead, MemOrder::Release).is_acquire());
        assert!(act(ActionKind::AtomicWrite, MemOrder::Release).is_release());
        assert!(!act(ActionKind::AtomicWrite, MemOrder::Acquire).is_release());
        assert!(act(ActionKind::AtomicRmw, MemOrder::AcqRel).is_acquire());
        assert!(act(ActionKind::AtomicRmw, MemOrder::AcqRel).is_release());
    }

    #[test]
    fn test_thread_bit() {
        assert_eq!(ThreadId(0).bit(), 1);
        assert_eq!(ThreadId(3).bit(), 8);
        assert_eq!(ThreadId(64).bit(), 0);
        assert_eq!(ThreadId(u32::MAX).bit(), 0);
    }
}
