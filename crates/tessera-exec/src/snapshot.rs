//! The snapshot seam.
//!
//! The snapshot/rollback memory allocator that restores user-program heap
//! state between explorations is an external collaborator; the driver only
//! asks for capture and restore through this trait.

/// Opaque handle to a captured heap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHandle(pub u64);

pub trait SnapshotManager {
    fn snapshot(&mut self) -> SnapshotHandle;
    fn restore(&mut self, handle: SnapshotHandle);
    /// Discard user-heap effects of actions at or after `seq`.
    fn backtrack_before(&mut self, seq: u64);
}

/// No-op manager for embeddings whose user state is rebuilt per execution;
/// the scripted test harness re-seeds thread programs itself.
#[derive(Debug, Default)]
pub struct NullSnapshot {
    counter: u64,
}

impl NullSnapshot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotManager for NullSnapshot {
    fn snapshot(&mut self) -> SnapshotHandle {
        self.counter += 1;
        SnapshotHandle(self.counter)
    }

    fn restore(&mut self, _handle: SnapshotHandle) {}

    fn backtrack_before(&mut self, _seq: u64) {}
}
