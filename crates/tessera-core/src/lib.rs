//! Core types shared across the tessera model checker: action records,
//! memory orders, identifier newtypes, source-position interning, and
//! checker configuration.

pub mod action;
pub mod config;
pub mod intern;

pub use action::{ActionKind, ActionRecord, Location, MemOrder, ThreadId};
pub use config::CheckerConfig;
pub use intern::{PositionId, PositionTable};
