//! Execution driver for the tessera model checker.
//!
//! Glues the cycle graph and the predicate-tree learners into the outer
//! exploration loop: pick a thread, retire its pending action, decide
//! feasibility, roll back or commit, and start the next execution when this
//! one ends. Fiber switching and heap snapshotting stay behind the
//! `Scheduler` and `SnapshotManager` seams.

pub mod bug;
pub mod choices;
pub mod driver;
pub mod harness;
pub mod scheduler;
pub mod snapshot;
pub mod stats;
pub mod trace;

pub use bug::{Bug, BugKind, BugReport};
pub use choices::ChoiceStack;
pub use driver::{CheckError, ExecutionDriver, RunSummary, StepOutcome};
pub use harness::{Program, ProgramOp};
pub use scheduler::{RoundRobin, ScriptedScheduler, Scheduler};
pub use snapshot::{NullSnapshot, SnapshotHandle, SnapshotManager};
pub use stats::ExecutionStats;
pub use trace::{ExecutionTrace, TraceAnalysis};
