//! The scheduler seam.
//!
//! Fiber switching and the user-thread scheduler live outside the core; the
//! driver only consumes "next runnable thread" decisions through this trait.

use tessera_core::ThreadId;

pub trait Scheduler {
    /// Pick the next thread among `runnable`, or `None` to end the
    /// execution early.
    fn select_next(&mut self, runnable: &[ThreadId]) -> Option<ThreadId>;

    /// A thread became blocked (join target incomplete).
    fn sleep(&mut self, _tid: ThreadId) {}

    /// The driver switched control to `tid`.
    fn set_current(&mut self, _tid: ThreadId) {}

    /// A new execution is starting.
    fn begin_execution(&mut self) {}
}

/// Default cooperative scheduler: cycles fairly through runnable threads in
/// id order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last: Option<ThreadId>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn select_next(&mut self, runnable: &[ThreadId]) -> Option<ThreadId> {
        if runnable.is_empty() {
            return None;
        }
        let pick = match self.last {
            Some(last) => runnable
                .iter()
                .copied()
                .find(|tid| *tid > last)
                .unwrap_or(runnable[0]),
            None => runnable[0],
        };
        self.last = Some(pick);
        Some(pick)
    }

    fn begin_execution(&mut self) {
        self.last = None;
    }
}

/// Replays a fixed thread order, deferring to round-robin when the script
/// runs out. Tests use this to pin down one interleaving.
#[derive(Debug)]
pub struct ScriptedScheduler {
    script: Vec<ThreadId>,
    cursor: usize,
    fallback: RoundRobin,
}

impl ScriptedScheduler {
    pub fn new(script: Vec<ThreadId>) -> Self {
        Self {
            script,
            cursor: 0,
            fallback: RoundRobin::new(),
        }
    }
}

impl Scheduler for ScriptedScheduler {
    fn select_next(&mut self, runnable: &[ThreadId]) -> Option<ThreadId> {
        while self.cursor < self.script.len() {
            let wanted = self.script[self.cursor];
            self.cursor += 1;
            if runnable.contains(&wanted) {
                return Some(wanted);
            }
        }
        self.fallback.select_next(runnable)
    }

    fn begin_execution(&mut self) {
        self.cursor = 0;
        self.fallback.begin_execution();
    }
}
