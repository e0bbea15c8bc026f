//! Checker configuration.

/// Tunable parameters of the checker. The embedding program builds one of
/// these at start-up; the core only ever reads it.
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Output verbosity, 0..=3.
    pub verbose: u8,
    /// Number of executions to explore before stopping (0 = run until the
    /// choice stack is exhausted).
    pub max_executions: usize,
    /// Honor user-asserted bugs.
    pub assert_enabled: bool,
    /// Dump the cycle graph in dot format at the end of each execution.
    pub dump_cycle_graph: bool,
    /// Value a load observes when no write to the location has retired yet.
    pub uninitialized_value: u64,
    /// Mask applied to a read value before the nullity test. Address payloads
    /// narrower than 64 bits keep their pointer half in the low bits, so the
    /// default keeps the low 32.
    pub nullity_mask: u64,
    /// Seed for weighted predicate-leaf selection; `None` disables biased
    /// exploration. Always seeded so runs are reproducible.
    pub bias_seed: Option<u64>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_executions: 0,
            assert_enabled: true,
            dump_cycle_graph: false,
            uninitialized_value: 0,
            nullity_mask: 0xffff_ffff,
            bias_seed: None,
        }
    }
}
