//! Speculative commitments by reads to values no write has yet produced.

use tessera_core::{ActionRecord, Location, MemOrder, ThreadId};

/// A speculative commitment by a read: some future write to `location` will
/// produce `value` with a memory order compatible with `order`.
///
/// The promise tracks which threads may still host the satisfying write in a
/// 64-wide bitmap; as ordering constraints accumulate, threads are
/// eliminated, and a promise with no candidate threads left has failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Promise {
    reader: ActionRecord,
    location: Location,
    value: u64,
    order: MemOrder,
    thread_mask: u64,
}

impl Promise {
    /// Create a promise for `reader`, with every thread in `0..num_threads`
    /// initially able to host the write except the reader itself (a read
    /// never observes its own thread's future write).
    pub fn new(reader: ActionRecord, num_threads: u32) -> Self {
        debug_assert!(reader.is_read());
        let all = if num_threads >= 64 {
            u64::MAX
        } else {
            (1u64 << num_threads) - 1
        };
        Self {
            location: reader.location,
            value: reader.value,
            order: reader.order,
            thread_mask: all & !reader.thread.bit(),
            reader,
        }
    }

    #[inline]
    pub fn reader(&self) -> &ActionRecord {
        &self.reader
    }

    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn order(&self) -> MemOrder {
        self.order
    }

    /// Whether a concrete write can fulfil this promise: same location, the
    /// promised value, an order the reader can observe, and a thread that
    /// has not been eliminated.
    pub fn is_compatible(&self, writer: &ActionRecord) -> bool {
        writer.is_write()
            && writer.location == self.location
            && writer.value == self.value
            && order_satisfies(writer.order, self.order)
            && self.thread_allowed(writer.thread)
    }

    /// Remove `tid` from the candidate writer threads. Returns true iff the
    /// promise has become unsatisfiable.
    pub fn eliminate_thread(&mut self, tid: ThreadId) -> bool {
        self.thread_mask &= !tid.bit();
        self.has_failed()
    }

    #[inline]
    pub fn thread_allowed(&self, tid: ThreadId) -> bool {
        self.thread_mask & tid.bit() != 0
    }

    /// True once no thread can host the satisfying write.
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.thread_mask == 0
    }
}

/// Whether a write with order `have` can satisfy a read that promised a
/// write compatible with `want`. A seq-cst read only pairs with a seq-cst
/// write; weaker reads accept any write order.
fn order_satisfies(have: MemOrder, want: MemOrder) -> bool {
    match want {
        MemOrder::SeqCst => have == MemOrder::SeqCst,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ActionKind;

    fn read(thread: u32, loc: u64, value: u64, order: MemOrder) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::AtomicRead,
            order,
            location: Location(loc),
            thread: ThreadId(thread),
            value,
            position: None,
            seq: 1,
        }
    }

    fn write(thread: u32, loc: u64, value: u64, order: MemOrder) -> ActionRecord {
        ActionRecord {
            kind: ActionKind::AtomicWrite,
            order,
            location: Location(loc),
            thread: ThreadId(thread),
            value,
            position: None,
            seq: 2,
        }
    }

    #[test]
    fn test_reader_thread_is_eliminated_up_front() {
        let p = Promise::new(read(0, 8, 42, MemOrder::Relaxed), 2);
        assert!(!p.thread_allowed(ThreadId(0)));
        assert!(p.thread_allowed(ThreadId(1)));
    }

    #[test]
    fn test_compatibility() {
        let p = Promise::new(read(0, 8, 42, MemOrder::Relaxed), 2);
        assert!(p.is_compatible(&write(1, 8, 42, MemOrder::Relaxed)));
        // Wrong value.
        assert!(!p.is_compatible(&write(1, 8, 7, MemOrder::Relaxed)));
        // Wrong location.
        assert!(!p.is_compatible(&write(1, 16, 42, MemOrder::Relaxed)));
        // Reader's own thread.
        assert!(!p.is_compatible(&write(0, 8, 42, MemOrder::Relaxed)));
    }

    #[test]
    fn test_seq_cst_reader_needs_seq_cst_writer() {
        let p = Promise::new(read(0, 8, 42, MemOrder::SeqCst), 2);
        assert!(!p.is_compatible(&write(1, 8, 42, MemOrder::Relaxed)));
        assert!(p.is_compatible(&write(1, 8, 42, MemOrder::SeqCst)));
    }

    #[test]
    fn test_elimination_fails_promise() {
        let mut p = Promise::new(read(0, 8, 42, MemOrder::Relaxed), 3);
        assert!(!p.eliminate_thread(ThreadId(1)));
        assert!(p.eliminate_thread(ThreadId(2)));
        assert!(p.has_failed());
        assert!(!p.is_compatible(&write(1, 8, 42, MemOrder::Relaxed)));
    }
}
