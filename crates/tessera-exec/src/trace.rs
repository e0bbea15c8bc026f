//! Immutable ordered view of a completed execution, and the trace-analysis
//! plugin seam run over every complete feasible execution.

use tessera_core::{ActionRecord, ThreadId};

/// The retired actions of one execution, in retirement order.
#[derive(Debug, Default)]
pub struct ExecutionTrace {
    actions: Vec<ActionRecord>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, act: ActionRecord) {
        debug_assert!(self
            .actions
            .last()
            .map(|prev| prev.seq < act.seq)
            .unwrap_or(true));
        self.actions.push(act);
    }

    pub(crate) fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter()
    }

    /// Actions retired by one thread, in order.
    pub fn by_thread(&self, tid: ThreadId) -> impl Iterator<Item = &ActionRecord> {
        self.actions.iter().filter(move |a| a.thread == tid)
    }
}

/// Analysis run over each complete feasible execution.
pub trait TraceAnalysis {
    fn analyze(&mut self, trace: &ExecutionTrace);
    /// Called once when the checker finishes.
    fn finish(&mut self) {}
}
