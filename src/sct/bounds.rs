//! Private module for selective re-export.
//!
//! Bounds restrict which schedules systematic exploration may take. Each
//! bound is a predicate over the schedule taken so far plus the decision
//! about to be taken; composed bounds hold when every active one does.

use crate::action::{Lookahead, ThreadAction};
use crate::id::ThreadId;
use crate::trace::{tid_of, Decision};
use std::collections::BTreeMap;

/// The bounds applied during systematic exploration.
///
/// `None` disables a bound. [`Bounds::default`] gives a small preemption
/// bound, which in practice finds the vast majority of bugs quickly, plus
/// fairness and length bounds that keep yield-loops and non-terminating
/// programs from running away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bounds {
    /// Maximum number of preemptive context switches.
    pub preemptions: Option<usize>,
    /// Maximum difference in yield counts between any two threads.
    pub fairness: Option<usize>,
    /// Maximum schedule length.
    pub length: Option<usize>,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            preemptions: Some(2),
            fairness: Some(5),
            length: Some(250),
        }
    }
}

impl Bounds {
    /// No restrictions. Exploration only terminates if the program does.
    pub fn none() -> Self {
        Bounds { preemptions: None, fairness: None, length: None }
    }

    /// Whether scheduling `tid` (with `decision` and `lookahead`) after
    /// `path` stays within every active bound.
    pub(crate) fn permits<'a>(
        &self,
        path: impl Iterator<Item = (&'a Decision, &'a ThreadAction)> + Clone,
        decision: &Decision,
        tid: &ThreadId,
        lookahead: &Lookahead,
    ) -> bool {
        let length_ok = match self.length {
            Some(k) => path.clone().count() < k,
            None => true,
        };
        let preemption_ok = match self.preemptions {
            Some(k) => preemption_count(path.clone(), Some(decision)) <= k,
            None => true,
        };
        let fairness_ok = match self.fairness {
            Some(k) => yield_count_spread(path, tid, lookahead) <= k,
            None => true,
        };
        length_ok && preemption_ok && fairness_ok
    }
}

/// Counts the preemptive context switches in a schedule, optionally
/// extended by one more decision.
///
/// A `SwitchTo` is preemptive unless it targets a commit pseudo-thread,
/// follows a `Yield` by the preempted thread, or merely returns to the
/// real thread that was already running before a commit interlude.
pub(crate) fn preemption_count<'a>(
    path: impl Iterator<Item = (&'a Decision, &'a ThreadAction)>,
    candidate: Option<&Decision>,
) -> usize {
    let mut count = 0;
    let mut current: Option<ThreadId> = None;
    let mut last_real: Option<(ThreadId, ThreadAction)> = None;

    let mut consider = |decision: &Decision, last_real: &Option<(ThreadId, ThreadAction)>| {
        if let Decision::SwitchTo(tid) = decision {
            if tid.is_commit() {
                return;
            }
            if let Some((real_tid, real_action)) = last_real {
                if real_tid != tid && *real_action != ThreadAction::Yield {
                    count += 1;
                }
            }
        }
    };

    for (decision, action) in path {
        consider(decision, &last_real);
        let tid = match &current {
            Some(prior) => tid_of(prior, decision),
            None => tid_of(&ThreadId::initial(), decision),
        };
        if !tid.is_commit() {
            last_real = Some((tid.clone(), action.clone()));
        }
        current = Some(tid);
    }
    if let Some(decision) = candidate {
        consider(decision, &last_real);
    }
    count
}

/// The largest difference in yield counts between any two real threads in
/// the schedule, counting the candidate's own pending yield.
fn yield_count_spread<'a>(
    path: impl Iterator<Item = (&'a Decision, &'a ThreadAction)>,
    candidate_tid: &ThreadId,
    candidate_lookahead: &Lookahead,
) -> usize {
    let mut yields: BTreeMap<ThreadId, usize> = BTreeMap::new();
    let mut current: Option<ThreadId> = None;
    for (decision, action) in path {
        let tid = match &current {
            Some(prior) => tid_of(prior, decision),
            None => tid_of(&ThreadId::initial(), decision),
        };
        if !tid.is_commit() {
            let count = yields.entry(tid.clone()).or_insert(0);
            if *action == ThreadAction::Yield {
                *count += 1;
            }
        }
        current = Some(tid);
    }
    if !candidate_tid.is_commit() {
        let count = yields.entry(candidate_tid.clone()).or_insert(0);
        if *candidate_lookahead == Lookahead::WillYield {
            *count += 1;
        }
    }
    let max = yields.values().max().copied().unwrap_or(0);
    let min = yields.values().min().copied().unwrap_or(0);
    max - min
}

/// Whether an action can make another thread runnable.
pub(crate) fn releases(lookahead: &Lookahead) -> bool {
    use Lookahead::*;
    matches!(
        lookahead,
        WillFork
            | WillYield
            | WillPutMVar(_)
            | WillTryPutMVar(_)
            | WillReadMVar(_)
            | WillTryReadMVar(_)
            | WillTakeMVar(_)
            | WillTryTakeMVar(_)
            | WillStm
            | WillThrow
            | WillThrowTo(_)
            | WillSetMasking(_, _)
            | WillResetMasking(_, _)
            | WillStop
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;

    fn path_iter(
        path: &[(Decision, ThreadAction)],
    ) -> impl Iterator<Item = (&Decision, &ThreadAction)> + Clone {
        path.iter().map(|(d, a)| (d, a))
    }

    #[test]
    fn switches_through_commit_threads_are_free() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let cell = source.next_cref_id(None);
        let commit = ThreadId::commit(&worker, None);

        // worker runs, a commit intervenes, worker resumes: no preemption.
        let path = vec![
            (Decision::Start(worker.clone()), ThreadAction::WriteCRef(cell.clone())),
            (
                Decision::SwitchTo(commit.clone()),
                ThreadAction::CommitCRef(worker.clone(), cell.clone()),
            ),
            (Decision::SwitchTo(worker.clone()), ThreadAction::Yield),
        ];
        assert_eq!(preemption_count(path_iter(&path), None), 0);

        // but resuming a different real thread after the commit is one.
        let path = vec![
            (Decision::Start(worker.clone()), ThreadAction::WriteCRef(cell.clone())),
            (
                Decision::SwitchTo(commit),
                ThreadAction::CommitCRef(worker, cell),
            ),
            (Decision::SwitchTo(main), ThreadAction::Stop),
        ];
        assert_eq!(preemption_count(path_iter(&path), None), 1);
    }

    #[test]
    fn switches_after_a_yield_are_free() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let path = vec![
            (Decision::Start(main.clone()), ThreadAction::Yield),
            (Decision::SwitchTo(worker.clone()), ThreadAction::MyThreadId),
            (Decision::SwitchTo(main), ThreadAction::Stop),
        ];
        // The first switch follows main's yield; the second preempts the
        // worker mid-run.
        assert_eq!(preemption_count(path_iter(&path), None), 1);
    }

    #[test]
    fn candidate_decisions_count_toward_the_bound() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let path = vec![(Decision::Start(main.clone()), ThreadAction::MyThreadId)];
        assert_eq!(
            preemption_count(path_iter(&path), Some(&Decision::SwitchTo(worker))),
            1
        );

        let bounds = Bounds { preemptions: Some(0), fairness: None, length: None };
        let mut source2 = IdSource::new();
        let worker2 = source2.next_thread_id(None);
        assert!(!bounds.permits(
            path_iter(&path),
            &Decision::SwitchTo(worker2.clone()),
            &worker2,
            &Lookahead::WillStop,
        ));
        assert!(bounds.permits(
            path_iter(&path),
            &Decision::Continue,
            &main,
            &Lookahead::WillStop,
        ));
    }

    #[test]
    fn fairness_tracks_the_yield_spread() {
        let main = ThreadId::initial();
        let path = vec![
            (Decision::Start(main.clone()), ThreadAction::Yield),
            (Decision::Continue, ThreadAction::Yield),
        ];
        let bounds = Bounds { preemptions: None, fairness: Some(1), length: None };
        // A third yield by main would make the spread 3 against a worker
        // that has never yielded; but with only main in the schedule the
        // spread stays 0.
        assert!(bounds.permits(
            path_iter(&path),
            &Decision::Continue,
            &main,
            &Lookahead::WillYield,
        ));

        let mut source = IdSource::new();
        let worker = source.next_thread_id(None);
        let mut path = path;
        path.push((Decision::SwitchTo(worker.clone()), ThreadAction::MyThreadId));
        // Now the worker exists in the schedule with zero yields, so main
        // yielding again would push the spread to 3.
        assert!(!bounds.permits(
            path_iter(&path),
            &Decision::SwitchTo(main.clone()),
            &main,
            &Lookahead::WillYield,
        ));
    }

    #[test]
    fn length_bound_caps_the_schedule() {
        let main = ThreadId::initial();
        let path = vec![
            (Decision::Start(main.clone()), ThreadAction::MyThreadId),
            (Decision::Continue, ThreadAction::MyThreadId),
        ];
        let bounds = Bounds { preemptions: None, fairness: None, length: Some(2) };
        assert!(!bounds.permits(
            path_iter(&path),
            &Decision::Continue,
            &main,
            &Lookahead::WillStop,
        ));
    }
}
