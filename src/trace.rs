//! Execution traces: what ran, what could have run, and how it ended.

use crate::action::{Lookahead, ThreadAction};
use crate::id::ThreadId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

/// The memory model applied to non-synchronised cell operations.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum MemType {
    /// Writes are published immediately.
    SequentialConsistency,
    /// One write buffer per thread, drained in order by commit steps.
    TotalStoreOrder,
    /// One write buffer per (thread, cell), committed independently.
    PartialStoreOrder,
}

impl Default for MemType {
    fn default() -> Self {
        MemType::TotalStoreOrder
    }
}

/// One scheduling choice.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum Decision {
    /// Run this thread; the previously-running thread is blocked or gone.
    Start(ThreadId),
    /// Keep running the same thread.
    Continue,
    /// Preempt the previously-running thread in favor of this one.
    SwitchTo(ThreadId),
}

/// The thread a decision selects, given the thread that ran before it.
pub fn tid_of(prior: &ThreadId, decision: &Decision) -> ThreadId {
    match decision {
        Decision::Start(tid) | Decision::SwitchTo(tid) => tid.clone(),
        Decision::Continue => prior.clone(),
    }
}

/// The decision that describes scheduling `chosen` after `prior`, given the
/// set of threads that were runnable at the time.
pub fn decision_of(
    prior: Option<&ThreadId>,
    runnable: &BTreeSet<ThreadId>,
    chosen: &ThreadId,
) -> Decision {
    match prior {
        Some(prior) if prior == chosen => Decision::Continue,
        Some(prior) if runnable.contains(prior) => Decision::SwitchTo(chosen.clone()),
        _ => Decision::Start(chosen.clone()),
    }
}

/// One step of an execution: the decision taken, every runnable thread with
/// what it would have done, and what the chosen thread actually did.
pub type TraceItem = (Decision, Vec<(ThreadId, Lookahead)>, ThreadAction);

/// The ordered record of an execution.
pub type Trace = Vec<TraceItem>;

/// Why an execution produced no value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum Failure {
    /// A scheduler violated a runtime invariant, such as selecting a thread
    /// that was not runnable. The built-in schedulers never do.
    InternalError,
    /// The scheduler gave up, typically because a bound was exceeded.
    Abort,
    /// Every live thread was blocked on a blocking variable or an exception
    /// delivery.
    Deadlock,
    /// Every live thread was blocked in a transaction, and no thread can
    /// write the variables they are waiting on.
    STMDeadlock,
    /// The initial thread's handler stack emptied with an exception in
    /// flight.
    UncaughtException,
    /// A nested execution was started inside another one, or while other
    /// threads were live.
    IllegalSubconcurrency,
}

/// The compact rendering of a failure, matching the trace notation.
pub fn show_failure(failure: Failure) -> &'static str {
    match failure {
        Failure::InternalError => "[internal-error]",
        Failure::Abort => "[abort]",
        Failure::Deadlock => "[deadlock]",
        Failure::STMDeadlock => "[stm-deadlock]",
        Failure::UncaughtException => "[exception]",
        Failure::IllegalSubconcurrency => "[illegal-subconcurrency]",
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(show_failure(*self))
    }
}

/// Renders a trace compactly: `Sx-` starts thread x, `Px-` preempts to
/// thread x, `-` continues the same thread, and `C-` is a buffered-write
/// commit. A key below the trace names the non-initial threads that have
/// display names.
pub fn show_trace(trace: &Trace) -> String {
    let mut rendered = String::new();
    for (decision, _, action) in trace {
        if let ThreadAction::CommitCRef(_, _) = action {
            rendered.push_str("C-");
            continue;
        }
        match decision {
            Decision::Start(tid) => rendered.push_str(&format!("S{}-", tid.seq())),
            Decision::SwitchTo(tid) => rendered.push_str(&format!("P{}-", tid.seq())),
            Decision::Continue => rendered.push('-'),
        }
    }

    let mut named = BTreeSet::new();
    for (decision, runnable, action) in trace {
        match decision {
            Decision::Start(tid) | Decision::SwitchTo(tid) => {
                named.insert(tid.clone());
            }
            Decision::Continue => {}
        }
        for (tid, _) in runnable {
            named.insert(tid.clone());
        }
        if let ThreadAction::Fork(tid) = action {
            named.insert(tid.clone());
        }
    }
    for tid in named {
        if tid == ThreadId::initial() || tid.is_commit() {
            continue;
        }
        if let Some(name) = tid.name() {
            rendered.push_str(&format!("\n  {}: {}", tid.seq(), name));
        }
    }
    rendered
}
