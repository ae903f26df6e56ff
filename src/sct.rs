//! Systematic concurrency testing: the top-level exploration loops.
//!
//! [`run_sct`] runs a program once per schedule the chosen strategy wants
//! to see, collecting every result with the trace that produced it.
//! Systematic exploration walks the bounded DPOR tree to exhaustion;
//! random exploration runs a fixed number of uniformly-scheduled
//! executions.

mod bounds;
mod dpor;

pub use bounds::Bounds;

use crate::program::Conc;
use crate::runtime::run_execution;
use crate::sched::{RandomScheduler, Scheduler};
use crate::trace::{Failure, MemType, Trace};
use dpor::{find_backtrack_steps, incorporate_backtracks, Dpor, DporScheduler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::hash::Hash;

/// How to explore a program's schedules.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Way {
    /// Exhaustive bounded DPOR exploration.
    Systematic(Bounds),
    /// A fixed number of executions under the uniform random scheduler,
    /// reproducible from the seed.
    Random { seed: u64, executions: usize },
}

impl Default for Way {
    fn default() -> Self {
        Way::Systematic(Bounds::default())
    }
}

/// Explores `program` and collects every observed result with the trace
/// that produced it. The program builder is called once per execution and
/// must be deterministic apart from the scheduling the engine controls.
pub fn run_sct<T, P>(way: Way, memtype: MemType, program: P) -> Vec<(Result<T, Failure>, Trace)>
where
    T: 'static,
    P: Fn() -> Conc<T>,
{
    match way {
        Way::Systematic(bounds) => sct_systematic(bounds, memtype, program),
        Way::Random { seed, executions } => sct_random(seed, executions, memtype, program),
    }
}

/// Like [`run_sct`], but discards traces and deduplicates results.
pub fn results_set<T, P>(way: Way, memtype: MemType, program: P) -> HashSet<Result<T, Failure>>
where
    T: Eq + Hash + 'static,
    P: Fn() -> Conc<T>,
{
    run_sct(way, memtype, program)
        .into_iter()
        .map(|(result, _)| result)
        .collect()
}

/// Runs a single execution under any scheduler. Useful for replaying a
/// known schedule or driving a program with a custom strategy.
pub fn run_once<T: 'static>(
    memtype: MemType,
    scheduler: &mut dyn Scheduler,
    program: Conc<T>,
) -> (Result<T, Failure>, Trace) {
    run_execution(memtype, scheduler, program)
}

fn sct_systematic<T, P>(
    bounds: Bounds,
    memtype: MemType,
    program: P,
) -> Vec<(Result<T, Failure>, Trace)>
where
    T: 'static,
    P: Fn() -> Conc<T>,
{
    let mut tree = Dpor::root();
    let mut results = Vec::new();
    let mut executions = 0usize;
    while let Some((prefix, conservative, sleep)) = tree.find_schedule_prefix() {
        executions += 1;
        log::trace!(
            "execution {}: forcing a prefix of {} decisions",
            executions,
            prefix.len()
        );
        let mut scheduler =
            DporScheduler::new(memtype, bounds.clone(), prefix.clone(), sleep);
        let (result, trace) = run_execution(memtype, &mut scheduler, program());

        tree.incorporate_trace(memtype, conservative, &trace);
        tree.prune_todo(&prefix);
        let backtracks = find_backtrack_steps(memtype, &bounds, &trace);
        incorporate_backtracks(&mut tree, &bounds, &backtracks);

        if scheduler.ignored() {
            log::trace!("execution {}: redundant schedule, result dropped", executions);
        } else {
            results.push((result, trace));
        }
    }
    log::debug!(
        "exploration done. executions={}, results={}",
        executions,
        results.len()
    );
    results
}

fn sct_random<T, P>(
    seed: u64,
    executions: usize,
    memtype: MemType,
    program: P,
) -> Vec<(Result<T, Failure>, Trace)>
where
    T: 'static,
    P: Fn() -> Conc<T>,
{
    // The first execution uses the seed itself for reproducibility; later
    // ones draw fresh seeds from it.
    let mut rng = StdRng::seed_from_u64(seed);
    let mut execution_seed = seed;
    let mut results = Vec::with_capacity(executions);
    for i in 0..executions {
        log::trace!("random execution {} with seed={}", i, execution_seed);
        let mut scheduler = RandomScheduler::new(execution_seed);
        results.push(run_execution(memtype, &mut scheduler, program()));
        execution_seed = rng.gen();
    }
    results
}
