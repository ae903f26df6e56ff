//! Schedulers drive the runtime: at every step one receives the trace so
//! far, the thread that last ran with its action, and every runnable
//! thread with its lookahead, and picks who runs next. Returning `None`
//! aborts the execution.

use crate::action::{Lookahead, ThreadAction};
use crate::id::ThreadId;
use crate::trace::Trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the next thread to run.
///
/// The runnable slice is never empty, is sorted in ascending thread order,
/// and includes commit pseudo-threads when the memory model has buffered
/// writes pending.
pub trait Scheduler {
    fn schedule(
        &mut self,
        trace: &Trace,
        prior: Option<&(ThreadId, ThreadAction)>,
        runnable: &[(ThreadId, Lookahead)],
    ) -> Option<ThreadId>;
}

/// Picks uniformly among the runnable threads.
pub struct RandomScheduler {
    rng: StdRng,
}

impl RandomScheduler {
    pub fn new(seed: u64) -> RandomScheduler {
        RandomScheduler { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Scheduler for RandomScheduler {
    fn schedule(
        &mut self,
        _trace: &Trace,
        _prior: Option<&(ThreadId, ThreadAction)>,
        runnable: &[(ThreadId, Lookahead)],
    ) -> Option<ThreadId> {
        let index = self.rng.gen_range(0..runnable.len());
        Some(runnable[index].0.clone())
    }
}

/// Picks the lowest thread strictly above the prior one, wrapping around.
/// Stateless.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinScheduler;

impl Scheduler for RoundRobinScheduler {
    fn schedule(
        &mut self,
        _trace: &Trace,
        prior: Option<&(ThreadId, ThreadAction)>,
        runnable: &[(ThreadId, Lookahead)],
    ) -> Option<ThreadId> {
        let next = match prior {
            Some((prior_tid, _)) => runnable
                .iter()
                .find(|(tid, _)| tid > prior_tid)
                .or_else(|| runnable.first()),
            None => runnable.first(),
        };
        next.map(|(tid, _)| tid.clone())
    }
}

/// Makes any scheduler non-preemptive: while the prior thread is still
/// runnable it keeps running, and the wrapped scheduler only picks at the
/// points where it blocks or terminates.
pub struct NonPreemptive<S>(pub S);

impl<S: Scheduler> Scheduler for NonPreemptive<S> {
    fn schedule(
        &mut self,
        trace: &Trace,
        prior: Option<&(ThreadId, ThreadAction)>,
        runnable: &[(ThreadId, Lookahead)],
    ) -> Option<ThreadId> {
        if let Some((prior_tid, _)) = prior {
            if runnable.iter().any(|(tid, _)| tid == prior_tid) {
                return Some(prior_tid.clone());
            }
        }
        self.0.schedule(trace, prior, runnable)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;

    fn runnable_threads(count: usize) -> Vec<(ThreadId, Lookahead)> {
        let mut source = IdSource::new();
        let mut threads = vec![(ThreadId::initial(), Lookahead::WillStop)];
        for _ in 1..count {
            threads.push((source.next_thread_id(None), Lookahead::WillStop));
        }
        threads
    }

    #[test]
    fn round_robin_cycles_through_threads() {
        let runnable = runnable_threads(3);
        let mut sched = RoundRobinScheduler;
        let mut prior = None;
        let mut picked = Vec::new();
        for _ in 0..6 {
            let tid = sched.schedule(&Vec::new(), prior.as_ref(), &runnable).unwrap();
            picked.push(tid.seq());
            prior = Some((tid, ThreadAction::Yield));
        }
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn round_robin_skips_threads_that_are_not_runnable() {
        let mut runnable = runnable_threads(3);
        runnable.remove(1);
        let mut sched = RoundRobinScheduler;
        let prior = Some((ThreadId::initial(), ThreadAction::Yield));
        let tid = sched.schedule(&Vec::new(), prior.as_ref(), &runnable).unwrap();
        assert_eq!(tid.seq(), 2);
    }

    #[test]
    fn non_preemptive_sticks_with_the_prior_thread() {
        let runnable = runnable_threads(3);
        let mut sched = NonPreemptive(RoundRobinScheduler);
        let prior = Some((runnable[1].0.clone(), ThreadAction::Yield));
        let tid = sched.schedule(&Vec::new(), prior.as_ref(), &runnable).unwrap();
        assert_eq!(tid, runnable[1].0);
    }

    #[test]
    fn non_preemptive_delegates_once_the_prior_thread_blocks() {
        let mut runnable = runnable_threads(3);
        let gone = runnable.remove(1).0;
        let mut sched = NonPreemptive(RoundRobinScheduler);
        let prior = Some((gone, ThreadAction::Yield));
        let tid = sched.schedule(&Vec::new(), prior.as_ref(), &runnable).unwrap();
        assert_eq!(tid.seq(), 2);
    }

    #[test]
    fn random_choices_are_reproducible_and_in_range() {
        let runnable = runnable_threads(4);
        let mut a = RandomScheduler::new(17);
        let mut b = RandomScheduler::new(17);
        for _ in 0..20 {
            let ta = a.schedule(&Vec::new(), None, &runnable).unwrap();
            let tb = b.schedule(&Vec::new(), None, &runnable).unwrap();
            assert_eq!(ta, tb);
            assert!(runnable.iter().any(|(tid, _)| *tid == ta));
        }
    }
}
