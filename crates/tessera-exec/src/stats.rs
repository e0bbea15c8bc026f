//! Cross-execution exploration counters.

use std::fmt;

/// Classification counts over every execution the checker ran.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStats {
    pub total: u64,
    /// Feasible, ran to completion, no bugs.
    pub complete: u64,
    /// Feasible but a bug was reported.
    pub buggy: u64,
    /// Rolled back: a cycle or a failed promise.
    pub infeasible: u64,
    /// Ended early by the scheduler with work remaining.
    pub redundant: u64,
}

impl fmt::Display for ExecutionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of complete, bug-free executions: {}", self.complete)?;
        writeln!(f, "Number of redundant executions: {}", self.redundant)?;
        writeln!(f, "Number of buggy executions: {}", self.buggy)?;
        writeln!(f, "Number of infeasible executions: {}", self.infeasible)?;
        write!(f, "Total executions: {}", self.total)
    }
}
