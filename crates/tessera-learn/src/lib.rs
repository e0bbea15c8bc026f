//! The per-function predicate-tree learner.
//!
//! A `FuncNode` accumulates, across executions, which runtime predicates on
//! earlier reads lead each successor read to observe which values. The
//! execution driver feeds it every retired action of the current function;
//! the tree it grows is what biases later executions into previously
//! unexplored equivalence classes.

pub mod funcnode;
pub mod history;
pub mod inst;
pub mod predicate;

pub use funcnode::{compute_distance, FuncNode};
pub use history::HistoryIndex;
pub use inst::{FuncInst, InstId};
pub use predicate::{PredExpr, PredId, PredToken, PredicateNode};

/// Identifier of an instrumented user function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);
