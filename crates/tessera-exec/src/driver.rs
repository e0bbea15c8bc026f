//! The execution driver.
//!
//! Outer loop: ask the scheduler for the next thread, retire its pending
//! action, feed the action to the cycle graph and the current function's
//! learner, and decide feasibility. Infeasible choices are rolled back and
//! the next reads-from candidate is tried; when an execution ends, the
//! choice stack is advanced and the user heap restored for the next one.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bug::{Bug, BugReport};
use crate::choices::ChoiceStack;
use crate::harness::{Program, ProgramOp};
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotManager;
use crate::stats::ExecutionStats;
use crate::trace::{ExecutionTrace, TraceAnalysis};
use tessera_core::{
    ActionKind, ActionRecord, CheckerConfig, Location, MemOrder, PositionTable, ThreadId,
};
use tessera_graph::{CycleGraph, NodeId, Promise};
use tessera_learn::{FuncId, FuncNode, HistoryIndex, PredId};

/// Seq namespace for the synthetic initial writes; real actions never get
/// this high.
const INIT_SEQ_BASE: u64 = 1 << 62;

/// Thread id carried by synthetic initial writes. It has no bit in the
/// promise bitmaps, so an initial write can never fulfil a promise.
const INIT_THREAD: ThreadId = ThreadId(u32::MAX);

/// Errors for misuse of the driver by the embedding program. Infeasibility
/// is not an error; it is an expected outcome handled by rollback.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("program declares {got} threads; promise bitmaps track at most {max}")]
    TooManyThreads { got: usize, max: usize },

    #[error("thread T{0} does not exist")]
    UnknownThread(u32),

    #[error("thread T{0} created twice")]
    ThreadRespawned(u32),

    #[error("function f{0} is not registered")]
    UnknownFunction(u32),

    #[error("function exit does not match the current call")]
    MismatchedExit,
}

/// Result of one shim call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The operation retired and produced a value.
    Value(u64),
    /// The operation retired.
    Done,
    /// The current execution became infeasible; it will be rolled back.
    Infeasible,
}

/// End-of-run summary.
#[derive(Debug)]
pub struct RunSummary {
    pub stats: ExecutionStats,
    pub bug_reports: Vec<BugReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Dormant,
    Running,
    Blocked(ThreadId),
    Complete,
}

/// Which write a thread last observed at a location: a retired write, or a
/// promise placeholder.
#[derive(Debug, Clone, Copy)]
enum RfSource {
    Write(ActionRecord),
    Promise(NodeId),
}

#[derive(Debug, Clone, Copy)]
enum EdgeTarget {
    Action(ActionRecord),
    Node(NodeId),
}

/// A reads-from candidate for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// The location's initial value.
    Initial,
    /// Index into the location's retired writes, in modification order.
    Write(usize),
    /// A promised future value drawn from the write history.
    Future(u64),
}

#[derive(Debug, Clone)]
struct PendingPromise {
    promise: Promise,
    node: NodeId,
}

#[derive(Debug, Clone)]
struct ThreadState {
    lifecycle: Lifecycle,
    ops: VecDeque<ProgramOp>,
    func_stack: Vec<FuncId>,
    last_value: u64,
    /// Last write this thread performed, per location.
    last_write_at: AHashMap<Location, ActionRecord>,
    /// Last write this thread observed, per location.
    last_rf_at: AHashMap<Location, RfSource>,
    /// Who created this thread, and at which seq.
    creator: Option<(ThreadId, u64)>,
}

enum RmwOp {
    Add(u64),
    Cas { expected: u64, desired: u64 },
}

struct RmwRetired {
    act: ActionRecord,
    rf: ActionRecord,
    read_val: u64,
    wrote: bool,
}

pub struct ExecutionDriver<S: Scheduler, M: SnapshotManager> {
    config: CheckerConfig,
    scheduler: S,
    snapshots: M,
    positions: PositionTable,
    graph: CycleGraph,
    history: HistoryIndex,
    funcs: Vec<FuncNode>,

    // Per-execution state.
    threads: Vec<ThreadState>,
    trace: ExecutionTrace,
    bugs: Vec<Bug>,
    next_seq: u64,
    init_seq: u64,
    /// Retired writes per location, in modification (retirement) order.
    writes_at: AHashMap<Location, Vec<ActionRecord>>,
    init_writes: AHashMap<Location, ActionRecord>,
    promises: Vec<PendingPromise>,
    infeasible: bool,
    ended_early: bool,

    // Cross-execution state.
    choices: ChoiceStack,
    stats: ExecutionStats,
    execution_number: usize,
    analyses: Vec<Box<dyn TraceAnalysis>>,
    bug_reports: Vec<BugReport>,
    rng: Option<StdRng>,
    /// Set when the history learned a value this round; earlier candidate
    /// sets may have grown, so exploration reruns once more.
    history_dirty: bool,
}

impl<S: Scheduler, M: SnapshotManager> ExecutionDriver<S, M> {
    pub fn new(config: CheckerConfig, scheduler: S, snapshots: M) -> Self {
        let rng = config.bias_seed.map(StdRng::seed_from_u64);
        Self {
            config,
            scheduler,
            snapshots,
            positions: PositionTable::new(),
            graph: CycleGraph::new(),
            history: HistoryIndex::new(),
            funcs: Vec::new(),
            threads: Vec::new(),
            trace: ExecutionTrace::new(),
            bugs: Vec::new(),
            next_seq: 1,
            init_seq: INIT_SEQ_BASE,
            writes_at: AHashMap::new(),
            init_writes: AHashMap::new(),
            promises: Vec::new(),
            infeasible: false,
            ended_early: false,
            choices: ChoiceStack::new(),
            stats: ExecutionStats::default(),
            execution_number: 1,
            analyses: Vec::new(),
            bug_reports: Vec::new(),
            rng,
            history_dirty: false,
        }
    }

    /// Register an instrumented user function; its learner persists for the
    /// whole run.
    pub fn register_function(&mut self, name: &str) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs
            .push(FuncNode::new(id, name, self.config.nullity_mask));
        id
    }

    pub fn add_analysis(&mut self, analysis: Box<dyn TraceAnalysis>) {
        self.analyses.push(analysis);
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn history(&self) -> &HistoryIndex {
        &self.history
    }

    pub fn func_node(&self, id: FuncId) -> &FuncNode {
        &self.funcs[id.0 as usize]
    }

    pub fn bug_reports(&self) -> &[BugReport] {
        &self.bug_reports
    }

    /// The cycle graph of the most recent execution.
    pub fn cycle_graph_mut(&mut self) -> &mut CycleGraph {
        &mut self.graph
    }

    /// The trace of the most recent execution.
    pub fn last_trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    /// Weighted pick of a predicate leaf when biased exploration is
    /// enabled. Advisory: candidate enumeration stays systematic.
    pub fn biased_leaf(&mut self, func: FuncId) -> Option<PredId> {
        let rng = self.rng.as_mut()?;
        self.funcs[func.0 as usize].select_leaf_weighted(rng)
    }

    /// Explore the program until the choice stack is exhausted or
    /// `max_executions` is reached.
    pub fn run(&mut self, program: &Program) -> Result<RunSummary, CheckError> {
        if program.num_threads() > 64 {
            return Err(CheckError::TooManyThreads {
                got: program.num_threads(),
                max: 64,
            });
        }

        let base = self.snapshots.snapshot();
        loop {
            self.begin_execution(program);
            self.execute()?;
            self.finish_execution();

            if self.config.max_executions != 0
                && self.stats.total as usize >= self.config.max_executions
            {
                break;
            }
            let mut more = self.choices.advance();
            if !more && self.history_dirty {
                // Values learned this round enlarge earlier candidate sets;
                // rerun so the stack records the grown alternatives.
                self.history_dirty = false;
                more = true;
            }
            if !more {
                break;
            }
            self.snapshots.restore(base);
            self.execution_number += 1;
        }

        for analysis in &mut self.analyses {
            analysis.finish();
        }
        info!(
            total = self.stats.total,
            complete = self.stats.complete,
            buggy = self.stats.buggy,
            infeasible = self.stats.infeasible,
            "model checking complete"
        );
        Ok(RunSummary {
            stats: self.stats,
            bug_reports: self.bug_reports.clone(),
        })
    }

    fn begin_execution(&mut self, program: &Program) {
        self.graph.reset();
        self.trace.clear();
        self.bugs.clear();
        self.promises.clear();
        self.writes_at.clear();
        self.init_writes.clear();
        self.next_seq = 1;
        self.init_seq = INIT_SEQ_BASE;
        self.infeasible = false;
        self.ended_early = false;

        self.threads = (0..program.num_threads())
            .map(|i| {
                let ops: VecDeque<ProgramOp> =
                    program.script(ThreadId(i as u32)).iter().copied().collect();
                let lifecycle = if i != 0 {
                    Lifecycle::Dormant
                } else if ops.is_empty() {
                    Lifecycle::Complete
                } else {
                    Lifecycle::Running
                };
                ThreadState {
                    lifecycle,
                    ops,
                    func_stack: Vec::new(),
                    last_value: 0,
                    last_write_at: AHashMap::new(),
                    last_rf_at: AHashMap::new(),
                    creator: None,
                }
            })
            .collect();

        for func in &mut self.funcs {
            func.on_new_execution(self.execution_number);
        }
        self.choices.reset_cursor();
        self.scheduler.begin_execution();
        self.snapshots.backtrack_before(0);
    }

    fn execute(&mut self) -> Result<(), CheckError> {
        loop {
            if self.infeasible {
                break;
            }

            // Wake joiners whose targets completed.
            let complete: Vec<bool> = self
                .threads
                .iter()
                .map(|t| t.lifecycle == Lifecycle::Complete)
                .collect();
            for t in self.threads.iter_mut() {
                if let Lifecycle::Blocked(on) = t.lifecycle {
                    if complete[on.0 as usize] {
                        t.lifecycle = Lifecycle::Running;
                    }
                }
            }

            let runnable: Vec<ThreadId> = self
                .threads
                .iter()
                .enumerate()
                .filter(|(_, t)| t.lifecycle == Lifecycle::Running && !t.ops.is_empty())
                .map(|(i, _)| ThreadId(i as u32))
                .collect();
            if runnable.is_empty() {
                if self
                    .threads
                    .iter()
                    .any(|t| matches!(t.lifecycle, Lifecycle::Blocked(_)))
                {
                    self.bugs.push(Bug::deadlock("every live thread is blocked"));
                }
                break;
            }

            let Some(tid) = self.scheduler.select_next(&runnable) else {
                self.ended_early = true;
                break;
            };
            self.scheduler.set_current(tid);
            self.step(tid)?;

            let t = &mut self.threads[tid.0 as usize];
            if t.lifecycle == Lifecycle::Running && t.ops.is_empty() {
                t.lifecycle = Lifecycle::Complete;
            }
        }

        if !self.promises.is_empty() && !self.infeasible {
            self.declare_infeasible("unresolved promises at end of execution");
        }
        Ok(())
    }

    fn step(&mut self, tid: ThreadId) -> Result<(), CheckError> {
        let t = tid.0 as usize;
        let op = *self.threads[t]
            .ops
            .front()
            .expect("step on a thread with no pending op");

        // Joining an incomplete thread blocks without consuming the op.
        if let ProgramOp::ThreadJoin { target } = op {
            let state = self
                .threads
                .get(target.0 as usize)
                .ok_or(CheckError::UnknownThread(target.0))?;
            if state.lifecycle != Lifecycle::Complete {
                self.threads[t].lifecycle = Lifecycle::Blocked(target);
                self.scheduler.sleep(tid);
                return Ok(());
            }
        }
        self.threads[t].ops.pop_front();

        match op {
            ProgramOp::Load {
                loc,
                order,
                position,
            } => {
                if let StepOutcome::Value(v) = self.on_atomic_load(tid, loc, order, position) {
                    self.threads[t].last_value = v;
                }
            }
            ProgramOp::Store {
                loc,
                order,
                value,
                position,
            } => {
                self.on_atomic_store(tid, loc, order, value, position);
            }
            ProgramOp::FetchAdd {
                loc,
                order,
                operand,
                position,
            } => {
                if let StepOutcome::Value(v) =
                    self.on_atomic_rmw_add(tid, loc, order, operand, position)
                {
                    self.threads[t].last_value = v;
                }
            }
            ProgramOp::CompareExchange {
                loc,
                order,
                expected,
                desired,
                position,
            } => {
                if let StepOutcome::Value(v) =
                    self.on_atomic_rmw_cas(tid, loc, order, expected, desired, position)
                {
                    self.threads[t].last_value = v;
                }
            }
            ProgramOp::ThreadCreate { target } => {
                self.on_thread_create(tid, target)?;
            }
            ProgramOp::ThreadJoin { target } => {
                self.on_thread_join(tid, target)?;
            }
            ProgramOp::ThreadYield => {
                self.on_thread_yield(tid);
            }
            ProgramOp::FunctionEntry { func } => self.on_function_entry(func, tid)?,
            ProgramOp::FunctionExit { func } => self.on_function_exit(func, tid)?,
            ProgramOp::Assert { check, message } => {
                let value = self.threads[t].last_value;
                if self.config.assert_enabled && !check(value) {
                    self.assert_user_bug(message);
                }
            }
        }
        Ok(())
    }

    /// Retire an atomic load, enumerating its reads-from candidates until
    /// one is feasible.
    pub fn on_atomic_load(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        position: &'static str,
    ) -> StepOutcome {
        let position = Some(self.positions.intern(position));
        let candidates = self.read_candidates(loc, true);
        let mut idx = self.choices.begin_point(candidates.len());
        loop {
            self.graph.begin_txn();
            match self.try_read(tid, order, loc, position, &candidates[idx]) {
                Ok((act, rf, pending)) => {
                    self.graph.commit();
                    if let Some(p) = pending {
                        self.promises.push(p);
                    }
                    self.threads[tid.0 as usize].last_rf_at.insert(loc, rf);
                    self.retire(act);
                    return StepOutcome::Value(act.value);
                }
                Err(()) => {
                    self.graph.rollback();
                    match self.choices.retry_current() {
                        Some(next) => idx = next,
                        None => {
                            self.declare_infeasible("no feasible reads-from candidate");
                            return StepOutcome::Infeasible;
                        }
                    }
                }
            }
        }
    }

    fn try_read(
        &mut self,
        tid: ThreadId,
        order: MemOrder,
        loc: Location,
        position: Option<tessera_core::PositionId>,
        candidate: &Candidate,
    ) -> Result<(ActionRecord, RfSource, Option<PendingPromise>), ()> {
        let seq = self.next_seq;
        match *candidate {
            Candidate::Initial => {
                let init = self.init_write(loc);
                self.link_init(loc, &init);
                let act = ActionRecord {
                    kind: ActionKind::AtomicRead,
                    order,
                    location: loc,
                    thread: tid,
                    value: init.value,
                    position,
                    seq,
                };
                self.read_coherence_edges(tid, loc, EdgeTarget::Action(init));
                if self.graph.has_cycles() {
                    return Err(());
                }
                Ok((act, RfSource::Write(init), None))
            }
            Candidate::Write(i) => {
                let w = self.writes_at[&loc][i];
                let act = ActionRecord {
                    kind: ActionKind::AtomicRead,
                    order,
                    location: loc,
                    thread: tid,
                    value: w.value,
                    position,
                    seq,
                };
                self.read_coherence_edges(tid, loc, EdgeTarget::Action(w));
                if self.graph.has_cycles() {
                    return Err(());
                }
                Ok((act, RfSource::Write(w), None))
            }
            Candidate::Future(value) => {
                let act = ActionRecord {
                    kind: ActionKind::AtomicRead,
                    order,
                    location: loc,
                    thread: tid,
                    value,
                    position,
                    seq,
                };
                let mut promise = Promise::new(act, self.threads.len() as u32);
                for (i, state) in self.threads.iter().enumerate() {
                    if state.lifecycle == Lifecycle::Complete {
                        promise.eliminate_thread(ThreadId(i as u32));
                    }
                }
                if promise.has_failed() {
                    return Err(());
                }
                let node = self.graph.get_or_create_promise_node(&promise);
                self.read_coherence_edges(tid, loc, EdgeTarget::Node(node));
                if self.graph.has_cycles() {
                    return Err(());
                }
                Ok((
                    act,
                    RfSource::Promise(node),
                    Some(PendingPromise { promise, node }),
                ))
            }
        }
    }

    /// Retire an atomic store. Stores have no alternatives: an ordering
    /// contradiction makes the whole execution infeasible.
    pub fn on_atomic_store(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        value: u64,
        position: &'static str,
    ) -> StepOutcome {
        let position = Some(self.positions.intern(position));
        let act = ActionRecord {
            kind: ActionKind::AtomicWrite,
            order,
            location: loc,
            thread: tid,
            value,
            position,
            seq: self.next_seq,
        };

        self.graph.begin_txn();
        let ok = self.apply_write(&act).is_ok() && !self.graph.has_cycles();
        if !ok {
            self.graph.rollback();
            self.declare_infeasible("write ordering contradiction");
            return StepOutcome::Infeasible;
        }
        self.graph.commit();
        self.commit_write(act);
        StepOutcome::Done
    }

    /// Retire a fetch-add, enumerating reads-from candidates. RMWs never
    /// read from promises.
    pub fn on_atomic_rmw_add(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        operand: u64,
        position: &'static str,
    ) -> StepOutcome {
        self.rmw(tid, loc, order, position, RmwOp::Add(operand))
    }

    /// Retire a compare-exchange. A failed comparison retires as a pure
    /// read.
    pub fn on_atomic_rmw_cas(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        expected: u64,
        desired: u64,
        position: &'static str,
    ) -> StepOutcome {
        self.rmw(tid, loc, order, position, RmwOp::Cas { expected, desired })
    }

    fn rmw(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        position: &'static str,
        op: RmwOp,
    ) -> StepOutcome {
        let position = Some(self.positions.intern(position));
        let candidates = self.read_candidates(loc, false);
        let mut idx = self.choices.begin_point(candidates.len());
        loop {
            // Promise eliminations are not covered by the graph undo log;
            // keep a copy so a rejected candidate leaves them untouched.
            let saved_promises = self.promises.clone();
            self.graph.begin_txn();
            match self.try_rmw(tid, loc, order, position, &candidates[idx], &op) {
                Ok(retired) => {
                    self.graph.commit();
                    let t = tid.0 as usize;
                    if retired.wrote {
                        self.writes_at.entry(loc).or_default().push(retired.act);
                        if self.history.record_write_value(loc, retired.act.value) {
                            self.history_dirty = true;
                        }
                        self.threads[t].last_write_at.insert(loc, retired.act);
                        self.threads[t]
                            .last_rf_at
                            .insert(loc, RfSource::Write(retired.act));
                    } else {
                        self.threads[t]
                            .last_rf_at
                            .insert(loc, RfSource::Write(retired.rf));
                    }
                    self.retire(retired.act);
                    return StepOutcome::Value(retired.read_val);
                }
                Err(fatal) => {
                    self.graph.rollback();
                    self.promises = saved_promises;
                    if fatal {
                        self.declare_infeasible("promise contradiction at RMW");
                        return StepOutcome::Infeasible;
                    }
                    match self.choices.retry_current() {
                        Some(next) => idx = next,
                        None => {
                            self.declare_infeasible("no feasible reads-from candidate for RMW");
                            return StepOutcome::Infeasible;
                        }
                    }
                }
            }
        }
    }

    /// Err(false) = candidate rejected, try another; Err(true) = the
    /// execution is poisoned (a promise merge went wrong).
    fn try_rmw(
        &mut self,
        tid: ThreadId,
        loc: Location,
        order: MemOrder,
        position: Option<tessera_core::PositionId>,
        candidate: &Candidate,
        op: &RmwOp,
    ) -> Result<RmwRetired, bool> {
        let seq = self.next_seq;
        let rf = match *candidate {
            Candidate::Initial => {
                let init = self.init_write(loc);
                self.link_init(loc, &init);
                init
            }
            Candidate::Write(i) => self.writes_at[&loc][i],
            Candidate::Future(_) => unreachable!("RMWs do not read from promises"),
        };
        let read_val = rf.value;
        let (writes, value) = match *op {
            RmwOp::Add(n) => (true, read_val.wrapping_add(n)),
            RmwOp::Cas { expected, desired } => (read_val == expected, desired),
        };

        if writes {
            let act = ActionRecord {
                kind: ActionKind::AtomicRmw,
                order,
                location: loc,
                thread: tid,
                value,
                position,
                seq,
            };
            self.read_coherence_edges(tid, loc, EdgeTarget::Action(rf));
            self.graph.add_rmw_edge(&rf, &act);
            if self.graph.has_cycles() {
                return Err(false);
            }
            if self.apply_promises_for_write(&act).is_err() {
                return Err(true);
            }
            if self.graph.has_cycles() {
                return Err(true);
            }
            Ok(RmwRetired {
                act,
                rf,
                read_val,
                wrote: true,
            })
        } else {
            let act = ActionRecord {
                kind: ActionKind::AtomicRmwRCas,
                order,
                location: loc,
                thread: tid,
                value: read_val,
                position,
                seq,
            };
            self.read_coherence_edges(tid, loc, EdgeTarget::Action(rf));
            if self.graph.has_cycles() {
                return Err(false);
            }
            Ok(RmwRetired {
                act,
                rf,
                read_val,
                wrote: false,
            })
        }
    }

    pub fn on_thread_create(
        &mut self,
        tid: ThreadId,
        target: ThreadId,
    ) -> Result<StepOutcome, CheckError> {
        let idx = target.0 as usize;
        if idx >= self.threads.len() {
            return Err(CheckError::UnknownThread(target.0));
        }
        if self.threads[idx].lifecycle != Lifecycle::Dormant {
            return Err(CheckError::ThreadRespawned(target.0));
        }

        let act = ActionRecord {
            kind: ActionKind::ThreadCreate,
            order: MemOrder::Relaxed,
            location: Location(0),
            thread: tid,
            value: u64::from(target.0),
            position: None,
            seq: self.next_seq,
        };
        self.threads[idx].lifecycle = if self.threads[idx].ops.is_empty() {
            Lifecycle::Complete
        } else {
            Lifecycle::Running
        };
        self.threads[idx].creator = Some((tid, act.seq));

        // A thread that begins after a promised read cannot host the write
        // that read consumed.
        let mut pending = std::mem::take(&mut self.promises);
        let mut failed = false;
        for entry in pending.iter_mut() {
            let reader = *entry.promise.reader();
            if self.ordered_after_reader(target, &reader) && entry.promise.eliminate_thread(target)
            {
                failed = true;
                break;
            }
        }
        self.promises = pending;

        self.retire(act);
        if failed {
            self.declare_infeasible("promise has no candidate writer threads left");
            return Ok(StepOutcome::Infeasible);
        }
        Ok(StepOutcome::Done)
    }

    /// Retire a join; the caller (or the step loop) guarantees the target
    /// already completed.
    pub fn on_thread_join(
        &mut self,
        tid: ThreadId,
        target: ThreadId,
    ) -> Result<StepOutcome, CheckError> {
        if target.0 as usize >= self.threads.len() {
            return Err(CheckError::UnknownThread(target.0));
        }
        let act = ActionRecord {
            kind: ActionKind::ThreadJoin,
            order: MemOrder::Relaxed,
            location: Location(0),
            thread: tid,
            value: u64::from(target.0),
            position: None,
            seq: self.next_seq,
        };
        self.retire(act);
        Ok(StepOutcome::Done)
    }

    pub fn on_thread_yield(&mut self, tid: ThreadId) -> StepOutcome {
        let act = ActionRecord {
            kind: ActionKind::ThreadYield,
            order: MemOrder::Relaxed,
            location: Location(0),
            thread: tid,
            value: 0,
            position: None,
            seq: self.next_seq,
        };
        self.retire(act);
        StepOutcome::Done
    }

    pub fn on_function_entry(&mut self, func: FuncId, tid: ThreadId) -> Result<(), CheckError> {
        let f = func.0 as usize;
        if f >= self.funcs.len() {
            return Err(CheckError::UnknownFunction(func.0));
        }
        let t = tid.0 as usize;
        if let Some(&prev) = self.threads[t].func_stack.last() {
            self.funcs[prev.0 as usize].add_out_edge(func);
            self.funcs[f].note_in_edge(prev);
        }
        self.funcs[f].function_entry_handler(tid);
        self.threads[t].func_stack.push(func);
        Ok(())
    }

    pub fn on_function_exit(&mut self, func: FuncId, tid: ThreadId) -> Result<(), CheckError> {
        let t = tid.0 as usize;
        if self.threads[t].func_stack.last() != Some(&func) {
            return Err(CheckError::MismatchedExit);
        }
        self.funcs[func.0 as usize].function_exit_handler(tid);
        self.threads[t].func_stack.pop();
        Ok(())
    }

    /// Collect a user-asserted bug. Bugs never terminate the checker; they
    /// are reported if the execution turns out feasible.
    pub fn assert_user_bug(&mut self, message: &str) {
        if !self.config.assert_enabled {
            return;
        }
        self.bugs.push(Bug::user_assert(message));
    }

    fn read_candidates(&self, loc: Location, allow_future: bool) -> Vec<Candidate> {
        let mut out = vec![Candidate::Initial];
        let writes = self.writes_at.get(&loc);
        let count = writes.map(|v| v.len()).unwrap_or(0);
        out.extend((0..count).map(Candidate::Write));

        if allow_future {
            let mut covered: AHashSet<u64> = writes
                .map(|v| v.iter().map(|w| w.value).collect())
                .unwrap_or_default();
            covered.insert(self.config.uninitialized_value);
            for &v in self.history.values_written(loc) {
                if !covered.contains(&v) {
                    out.push(Candidate::Future(v));
                }
            }
        }
        out
    }

    /// Ordering edges a read implies, regardless of which candidate it
    /// chose: the write this thread last performed and the write it last
    /// observed at the location both precede the write observed now.
    fn read_coherence_edges(&mut self, tid: ThreadId, loc: Location, target: EdgeTarget) {
        let t = tid.0 as usize;
        if let Some(w_prev) = self.threads[t].last_write_at.get(&loc).copied() {
            match target {
                EdgeTarget::Action(w) if w.seq != w_prev.seq => {
                    self.graph.add_edge(&w_prev, &w);
                }
                EdgeTarget::Action(_) => {}
                EdgeTarget::Node(n) => {
                    self.graph.add_edge_to_node(&w_prev, n);
                }
            }
        }
        if let Some(rf_prev) = self.threads[t].last_rf_at.get(&loc).copied() {
            match (rf_prev, target) {
                (RfSource::Write(pw), EdgeTarget::Action(w)) if pw.seq != w.seq => {
                    self.graph.add_edge(&pw, &w);
                }
                (RfSource::Write(_), EdgeTarget::Action(_)) => {}
                (RfSource::Write(pw), EdgeTarget::Node(n)) => {
                    self.graph.add_edge_to_node(&pw, n);
                }
                (RfSource::Promise(pn), EdgeTarget::Action(w)) => {
                    self.graph.add_edge_from_node(pn, &w);
                }
                (RfSource::Promise(pn), EdgeTarget::Node(n)) if pn != n => {
                    self.graph.add_edge_between_nodes(pn, n);
                }
                (RfSource::Promise(_), EdgeTarget::Node(_)) => {}
            }
        }
    }

    fn apply_write(&mut self, act: &ActionRecord) -> Result<(), ()> {
        let loc = act.location;
        // Modification order per location follows retirement order.
        if let Some(last) = self.writes_at.get(&loc).and_then(|v| v.last()).copied() {
            self.graph.add_edge(&last, act);
        } else if let Some(init) = self.init_writes.get(&loc).copied() {
            self.graph.add_edge(&init, act);
        }
        self.apply_promises_for_write(act)
    }

    /// Confront every outstanding promise at `act`'s location with the new
    /// write: a write ordered after the promised read eliminates threads; a
    /// compatible one resolves the promise.
    fn apply_promises_for_write(&mut self, act: &ActionRecord) -> Result<(), ()> {
        let mut pending = std::mem::take(&mut self.promises);
        let mut failed = false;
        let mut resolved: Vec<u64> = Vec::new();

        for entry in pending.iter_mut() {
            if entry.promise.location() != act.location {
                continue;
            }
            let reader = *entry.promise.reader();
            if self.ordered_after_reader(act.thread, &reader) {
                // The promised write must come before this one in
                // modification order.
                self.graph.add_edge_from_node(entry.node, act);
                if entry.promise.eliminate_thread(act.thread)
                    || self.graph.check_promise_failure(act, &mut entry.promise)
                {
                    failed = true;
                    break;
                }
            } else if entry.promise.is_compatible(act) {
                let mut must_resolve = Vec::new();
                if !self.graph.resolve_promise(&reader, act, &mut must_resolve) {
                    failed = true;
                    break;
                }
                resolved.push(reader.seq);
                for p in &must_resolve {
                    resolved.push(p.reader().seq);
                }
                self.repoint_rf(entry.node, act);
            }
        }

        if failed {
            self.promises = pending;
            return Err(());
        }
        pending.retain(|e| !resolved.contains(&e.promise.reader().seq));
        self.promises = pending;
        Ok(())
    }

    /// After a promise resolves, threads that observed the placeholder now
    /// observe the concrete write.
    fn repoint_rf(&mut self, node: NodeId, act: &ActionRecord) {
        for state in &mut self.threads {
            if let Some(RfSource::Promise(n)) = state.last_rf_at.get(&act.location) {
                if *n == node {
                    state.last_rf_at.insert(act.location, RfSource::Write(*act));
                }
            }
        }
    }

    fn commit_write(&mut self, act: ActionRecord) {
        let loc = act.location;
        self.writes_at.entry(loc).or_default().push(act);
        if self.history.record_write_value(loc, act.value) {
            self.history_dirty = true;
        }
        let t = act.thread.0 as usize;
        self.threads[t].last_write_at.insert(loc, act);
        self.threads[t].last_rf_at.insert(loc, RfSource::Write(act));
        self.retire(act);
    }

    /// Whether actions of `tid` are ordered after the promised read, via
    /// program order or the thread-creation chain.
    fn ordered_after_reader(&self, tid: ThreadId, reader: &ActionRecord) -> bool {
        if tid == reader.thread {
            return true;
        }
        let mut cur = tid;
        while let Some((creator, at_seq)) = self.threads.get(cur.0 as usize).and_then(|t| t.creator)
        {
            if at_seq <= reader.seq {
                return false;
            }
            if creator == reader.thread {
                return true;
            }
            cur = creator;
        }
        false
    }

    fn init_write(&mut self, loc: Location) -> ActionRecord {
        if let Some(&init) = self.init_writes.get(&loc) {
            return init;
        }
        let init = ActionRecord {
            kind: ActionKind::AtomicWrite,
            order: MemOrder::Relaxed,
            location: loc,
            thread: INIT_THREAD,
            value: self.config.uninitialized_value,
            position: None,
            seq: self.init_seq,
        };
        self.init_seq += 1;
        self.init_writes.insert(loc, init);
        init
    }

    /// The initial write precedes every retired write to its location.
    fn link_init(&mut self, loc: Location, init: &ActionRecord) {
        if let Some(first) = self.writes_at.get(&loc).and_then(|v| v.first()).copied() {
            self.graph.add_edge(init, &first);
        }
    }

    /// Commit one retired action: bump the seq counter, append to the
    /// trace, and feed the current function's learner.
    fn retire(&mut self, act: ActionRecord) {
        self.next_seq += 1;
        self.trace.push(act);
        let t = act.thread.0 as usize;
        if let Some(&func) = self.threads[t].func_stack.last() {
            let f = func.0 as usize;
            self.funcs[f].add_inst(&act);
            self.funcs[f].update_tree(&act, &mut self.history);
        }
    }

    fn declare_infeasible(&mut self, why: &str) {
        debug!(why, execution = self.execution_number, "execution infeasible");
        self.infeasible = true;

        // Penalize the predicate branches the execution was sitting on so
        // the weights steer later executions elsewhere.
        let spots: Vec<(FuncId, ThreadId)> = self
            .threads
            .iter()
            .enumerate()
            .flat_map(|(i, state)| {
                state
                    .func_stack
                    .iter()
                    .map(move |&f| (f, ThreadId(i as u32)))
            })
            .collect();
        for (func, tid) in spots {
            if let Some(pos) = self.funcs[func.0 as usize].tree_position(tid) {
                self.funcs[func.0 as usize].mark_failed(pos);
            }
        }
    }

    fn finish_execution(&mut self) {
        self.stats.total += 1;
        let is_complete = self
            .threads
            .iter()
            .all(|t| matches!(t.lifecycle, Lifecycle::Complete | Lifecycle::Dormant));

        if self.infeasible {
            self.stats.infeasible += 1;
        } else if !self.bugs.is_empty() {
            self.stats.buggy += 1;
        } else if is_complete && !self.ended_early {
            self.stats.complete += 1;
        } else {
            self.stats.redundant += 1;
        }

        if !self.infeasible {
            for bug in &self.bugs {
                warn!(execution = self.execution_number, %bug, "bug detected");
                self.bug_reports.push(BugReport {
                    execution: self.execution_number,
                    bug: bug.clone(),
                });
            }
            if is_complete || !self.bugs.is_empty() {
                for analysis in &mut self.analyses {
                    analysis.analyze(&self.trace);
                }
            }
        }

        if self.config.dump_cycle_graph {
            let path = format!("cycle_graph_exec_{}.dot", self.execution_number);
            if let Ok(mut file) = std::fs::File::create(&path) {
                let name = format!("exec_{}", self.execution_number);
                let _ = self.graph.dump_dot(&name, &mut file);
            }
        }
        if self.config.verbose >= 1 {
            info!(
                execution = self.execution_number,
                actions = self.trace.len(),
                infeasible = self.infeasible,
                bugs = self.bugs.len(),
                choice_depth = self.choices.depth(),
                "execution finished"
            );
        }

        self.choices.truncate_to_cursor();
    }
}
