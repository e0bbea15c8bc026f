//! The modification-order / happens-before cycle graph.
//!
//! Vertices are the writes (or promised future writes) of the current
//! execution; edges conservatively over-approximate the ordering constraints
//! implied by the chosen reads-from and modification-order assignments. A
//! cycle means the current choices are infeasible. Edge additions are
//! speculative: the driver wraps each retirement in a transaction and rolls
//! back when the graph reports a cycle.

pub mod graph;
pub mod promise;

pub use graph::{CycleGraph, NodeId};
pub use promise::Promise;
