//! Scripted user programs.
//!
//! The compiled-program shim is an external collaborator; for tests and
//! benches, user threads are expressed as flat op scripts that the driver
//! feeds through the same shim surface the instrumentation would call.

use tessera_core::{Location, MemOrder, ThreadId};
use tessera_learn::FuncId;

/// One operation of a scripted thread.
#[derive(Debug, Clone, Copy)]
pub enum ProgramOp {
    Load {
        loc: Location,
        order: MemOrder,
        position: &'static str,
    },
    Store {
        loc: Location,
        order: MemOrder,
        value: u64,
        position: &'static str,
    },
    FetchAdd {
        loc: Location,
        order: MemOrder,
        operand: u64,
        position: &'static str,
    },
    CompareExchange {
        loc: Location,
        order: MemOrder,
        expected: u64,
        desired: u64,
        position: &'static str,
    },
    ThreadCreate {
        target: ThreadId,
    },
    ThreadJoin {
        target: ThreadId,
    },
    ThreadYield,
    FunctionEntry {
        func: FuncId,
    },
    FunctionExit {
        func: FuncId,
    },
    /// Check a predicate against the thread's last read value; a failure is
    /// collected as a user-asserted bug.
    Assert {
        check: fn(u64) -> bool,
        message: &'static str,
    },
}

/// A fixed set of thread scripts; thread 0 is the initial thread, the rest
/// stay dormant until created.
#[derive(Debug, Clone, Default)]
pub struct Program {
    scripts: Vec<Vec<ProgramOp>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the script of the next thread id.
    pub fn thread(mut self, ops: Vec<ProgramOp>) -> Self {
        self.scripts.push(ops);
        self
    }

    pub fn num_threads(&self) -> usize {
        self.scripts.len()
    }

    pub fn script(&self, tid: ThreadId) -> &[ProgramOp] {
        &self.scripts[tid.0 as usize]
    }
}

pub fn load(loc: u64, order: MemOrder, position: &'static str) -> ProgramOp {
    ProgramOp::Load {
        loc: Location(loc),
        order,
        position,
    }
}

pub fn store(loc: u64, order: MemOrder, value: u64, position: &'static str) -> ProgramOp {
    ProgramOp::Store {
        loc: Location(loc),
        order,
        value,
        position,
    }
}

pub fn fetch_add(loc: u64, order: MemOrder, operand: u64, position: &'static str) -> ProgramOp {
    ProgramOp::FetchAdd {
        loc: Location(loc),
        order,
        operand,
        position,
    }
}

pub fn compare_exchange(
    loc: u64,
    order: MemOrder,
    expected: u64,
    desired: u64,
    position: &'static str,
) -> ProgramOp {
    ProgramOp::CompareExchange {
        loc: Location(loc),
        order,
        expected,
        desired,
        position,
    }
}

pub fn create(target: u32) -> ProgramOp {
    ProgramOp::ThreadCreate {
        target: ThreadId(target),
    }
}

pub fn join(target: u32) -> ProgramOp {
    ProgramOp::ThreadJoin {
        target: ThreadId(target),
    }
}

pub fn assert_last(check: fn(u64) -> bool, message: &'static str) -> ProgramOp {
    ProgramOp::Assert { check, message }
}

pub fn enter(func: FuncId) -> ProgramOp {
    ProgramOp::FunctionEntry { func }
}

pub fn exit(func: FuncId) -> ProgramOp {
    ProgramOp::FunctionExit { func }
}
