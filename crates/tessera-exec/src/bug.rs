//! Per-execution bug collection.
//!
//! Bugs never stop the checker; they are gathered while the execution runs
//! and reported at the end if the execution turned out feasible.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BugKind {
    /// A user-level assertion failed.
    UserAssert,
    /// Every live thread is blocked.
    Deadlock,
    /// Reported by the external race detector.
    DataRace,
}

/// A bug observed during one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bug {
    pub kind: BugKind,
    pub message: String,
}

impl Bug {
    pub fn user_assert(message: impl Into<String>) -> Self {
        Self {
            kind: BugKind::UserAssert,
            message: message.into(),
        }
    }

    pub fn deadlock(message: impl Into<String>) -> Self {
        Self {
            kind: BugKind::Deadlock,
            message: message.into(),
        }
    }

    pub fn data_race(message: impl Into<String>) -> Self {
        Self {
            kind: BugKind::DataRace,
            message: message.into(),
        }
    }
}

impl fmt::Display for Bug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            BugKind::UserAssert => "assertion",
            BugKind::Deadlock => "deadlock",
            BugKind::DataRace => "data race",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

/// A bug together with the execution that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugReport {
    pub execution: usize,
    pub bug: Bug,
}
