//! A library for systematically testing concurrent programs by exploring
//! their schedules.
//!
//! Testing concurrent code by running it in a loop and hoping a bad
//! interleaving shows up is unreliable, and when a run does fail there is
//! no way to reproduce it. Schedright takes scheduling away from the host:
//! programs are written against the capability surface in [`program`]
//! (threads, mutable cells with relaxed-memory semantics, blocking
//! variables, transactions, exceptions), and the engine runs them
//! single-threadedly, suspending at every primitive operation. A scheduler
//! decides who runs at each suspension point, so every run is
//! reproducible from its decisions alone.
//!
//! [`run_sct`] explores the schedule space. Systematic exploration uses
//! bounded dynamic partial-order reduction: each execution's trace is
//! scanned for racing steps, racing steps become backtracking points, and
//! exploration continues until no schedule within the bounds can produce
//! a new behavior. Random exploration runs a fixed number of seeded
//! uniformly-scheduled executions instead.
//!
//! # Example
//!
//! Two threads race to fill a blocking variable; both outcomes are found:
//!
//! ```
//! use schedright::*;
//!
//! let results = results_set(Way::default(), MemType::SequentialConsistency, || {
//!     new_mvar::<i32>(Some("x")).and_then(|x| {
//!         let first = x.clone();
//!         let second = x.clone();
//!         fork(Some("t1"), first.put(1))
//!             .then(fork(Some("t2"), second.put(2)))
//!             .then(x.take())
//!     })
//! });
//! assert!(results.contains(&Ok(1)));
//! assert!(results.contains(&Ok(2)));
//! assert_eq!(results.len(), 2);
//! ```
//!
//! # Memory models
//!
//! Unsynchronised cell operations run under a configurable [`MemType`]:
//! sequential consistency, total store order, or partial store order.
//! Under the relaxed models, writes sit in buffers that commit pseudo-
//! threads publish at scheduler-chosen moments, so reorderings that real
//! hardware exhibits are part of the explored space.

pub mod action;
pub mod id;
pub mod program;
mod runtime;
pub mod sched;
pub mod sct;
pub mod trace;

pub use action::{
    rewind, simplify_action, simplify_lookahead, tvars_of, ActionType, Lookahead, MaskingState,
    TAction, TTrace, ThreadAction,
};
pub use id::{CRefId, Id, IdSource, MVarId, TVarId, ThreadId};
pub use program::{
    atomically, catch, fork, get_num_capabilities, kill, mask_interruptible,
    mask_uninterruptible, my_thread_id, new_cref, new_mvar, new_tvar, or_else, retry,
    set_num_capabilities, stm_catch, stm_throw, subconcurrency, thread_delay, throw, throw_to,
    yield_thread, CRef, Conc, MVar, Stm, TVar, ThreadKilled, Ticket,
};
pub use sched::{NonPreemptive, RandomScheduler, RoundRobinScheduler, Scheduler};
pub use sct::{results_set, run_once, run_sct, Bounds, Way};
pub use trace::{
    decision_of, show_failure, show_trace, tid_of, Decision, Failure, MemType, Trace, TraceItem,
};
