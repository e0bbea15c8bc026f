//! Process-wide index of observed writes and of the functions that read or
//! write each location. Accumulates learning across executions; never
//! cleared.

use crate::FuncId;
use ahash::{AHashMap, AHashSet};
use tessera_core::Location;

#[derive(Debug, Default)]
struct ValueSet {
    /// First-observed order; candidate indices derived from this stay
    /// stable across executions because the list is append-only.
    ordered: Vec<u64>,
    seen: AHashSet<u64>,
}

/// Global mapping from memory locations to the set of values ever written to
/// them and to the function nodes that read or write them.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    write_values: AHashMap<Location, ValueSet>,
    loc_readers: AHashMap<Location, AHashSet<FuncId>>,
    loc_writers: AHashMap<Location, AHashSet<FuncId>>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value written to `loc`. Returns true if the value is new
    /// for this location.
    pub fn record_write_value(&mut self, loc: Location, value: u64) -> bool {
        let set = self.write_values.entry(loc).or_default();
        if set.seen.insert(value) {
            set.ordered.push(value);
            true
        } else {
            false
        }
    }

    /// Every value ever written to `loc`, in first-observed order.
    pub fn values_written(&self, loc: Location) -> &[u64] {
        self.write_values
            .get(&loc)
            .map(|v| v.ordered.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_reader(&mut self, loc: Location, func: FuncId) {
        self.loc_readers.entry(loc).or_default().insert(func);
    }

    pub fn add_writer(&mut self, loc: Location, func: FuncId) {
        self.loc_writers.entry(loc).or_default().insert(func);
    }

    pub fn readers(&self, loc: Location) -> Option<&AHashSet<FuncId>> {
        self.loc_readers.get(&loc)
    }

    pub fn writers(&self, loc: Location) -> Option<&AHashSet<FuncId>> {
        self.loc_writers.get(&loc)
    }
}
