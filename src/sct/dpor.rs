//! Private module for selective re-export.
//!
//! Dynamic partial-order reduction over schedules. The tree records every
//! explored schedule prefix; race detection over each new trace adds
//! backtracking points, and sleep sets stop re-exploration of schedules
//! that only reorder independent steps.

use crate::action::{
    simplify_action, simplify_lookahead, tvars_of, ActionType, Lookahead, TAction, ThreadAction,
};
use crate::id::{ThreadId, TVarId};
use crate::sct::bounds::{releases, Bounds};
use crate::sched::Scheduler;
use crate::trace::{decision_of, tid_of, Decision, MemType, Trace};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One node of the exploration tree: the state of the search at a point in
/// the schedule, after the decision that reached it.
pub(crate) struct Dpor {
    /// Threads runnable at the next decision point.
    runnable: BTreeSet<ThreadId>,
    /// Threads still to try here, with their conservative flags.
    todo: BTreeMap<ThreadId, bool>,
    /// Fully-explored children.
    done: BTreeMap<ThreadId, Dpor>,
    /// Threads asleep here: trying them would only reorder independent
    /// steps already covered.
    sleep: BTreeMap<ThreadId, ThreadAction>,
    /// First actions of schedules already taken from here.
    taken: BTreeMap<ThreadId, ThreadAction>,
}

impl Dpor {
    /// The root of a fresh exploration: only the initial thread exists.
    pub fn root() -> Dpor {
        let initial = ThreadId::initial();
        let mut todo = BTreeMap::new();
        todo.insert(initial.clone(), false);
        Dpor {
            runnable: std::iter::once(initial).collect(),
            todo,
            done: BTreeMap::new(),
            sleep: BTreeMap::new(),
            taken: BTreeMap::new(),
        }
    }

    /// The next schedule prefix to force, or `None` when the tree is
    /// exhausted. Produces the path of threads to run, whether the final
    /// entry is a conservative point, and the sleep set to carry in.
    ///
    /// Children are searched before this node's own backtracking points,
    /// and real threads are preferred over commit pseudo-threads (which
    /// are tried closest-to-zero first); this picks a canonical schedule
    /// but does not affect the result set.
    pub fn find_schedule_prefix(
        &self,
    ) -> Option<(Vec<ThreadId>, bool, BTreeMap<ThreadId, ThreadAction>)> {
        for (tid, child) in &self.done {
            if let Some((mut prefix, conservative, sleep)) = child.find_schedule_prefix() {
                prefix.insert(0, tid.clone());
                return Some((prefix, conservative, sleep));
            }
        }
        let next = self
            .todo
            .keys()
            .find(|tid| !tid.is_commit())
            .or_else(|| self.todo.keys().filter(|tid| tid.is_commit()).max())?;
        let conservative = self.todo[next];
        let mut sleep = self.sleep.clone();
        for (tid, action) in &self.taken {
            sleep.insert(tid.clone(), action.clone());
        }
        Some((vec![next.clone()], conservative, sleep))
    }

    /// Drops the backtracking point a prefix was discovered from, for the
    /// pathological case where the execution diverged before reaching it
    /// (a scheduler invariant violation). Normally a no-op:
    /// [`Dpor::incorporate_trace`] consumes the point.
    pub fn prune_todo(&mut self, prefix: &[ThreadId]) {
        let (last, path) = match prefix.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut node = self;
        for tid in path {
            node = match node.done.get_mut(tid) {
                Some(child) => child,
                None => return,
            };
        }
        node.todo.remove(last);
    }

    /// Grows the tree with an observed trace: existing nodes are followed
    /// where the trace matches, and the first divergence hangs the rest of
    /// the trace off as a fresh chain of nodes.
    pub fn incorporate_trace(&mut self, memtype: MemType, conservative: bool, trace: &Trace) {
        let mut node = self;
        let mut current = ThreadId::initial();
        let mut steps = trace.as_slice();
        while let Some((item, rest)) = steps.split_first() {
            let (decision, _, action) = item;
            let tid = tid_of(&current, decision);
            if node.done.contains_key(&tid) {
                node = node.done.get_mut(&tid).expect("child vanished");
                current = tid;
                steps = rest;
                continue;
            }
            let mut sleep = node.sleep.clone();
            for (t, a) in &node.taken {
                sleep.insert(t.clone(), a.clone());
            }
            if !conservative {
                node.taken.insert(tid.clone(), action.clone());
            }
            node.todo.remove(&tid);
            node.done
                .insert(tid.clone(), subtree(memtype, &tid, sleep, steps));
            return;
        }
    }
}

/// Builds the chain of fresh nodes for the trace suffix starting at the
/// divergence point. Sleep sets shed any thread whose pending action
/// depends on an action along the way.
fn subtree(
    memtype: MemType,
    tid: &ThreadId,
    mut sleep: BTreeMap<ThreadId, ThreadAction>,
    steps: &[(Decision, Vec<(ThreadId, Lookahead)>, ThreadAction)],
) -> Dpor {
    let (_, _, action) = &steps[0];
    sleep.retain(|t, a| !dependent(memtype, tid, action, t, a));

    let mut node = Dpor {
        runnable: steps
            .get(1)
            .map(|(_, runnable, _)| runnable.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default(),
        todo: BTreeMap::new(),
        done: BTreeMap::new(),
        sleep: sleep.clone(),
        taken: BTreeMap::new(),
    };
    if let Some((next_decision, _, next_action)) = steps.get(1) {
        let next_tid = tid_of(tid, next_decision);
        node.taken.insert(next_tid.clone(), next_action.clone());
        node.done
            .insert(next_tid.clone(), subtree(memtype, &next_tid, sleep, &steps[1..]));
    }
    node
}

/// One step of a trace annotated with the backtracking points discovered
/// for it.
pub(crate) struct BacktrackStep {
    tid: ThreadId,
    decision: Decision,
    action: ThreadAction,
    runnable: BTreeMap<ThreadId, Lookahead>,
    backtracks: BTreeMap<ThreadId, bool>,
}

/// Scans a trace for racing steps and computes where to backtrack.
///
/// For dependent steps `i < j` by different threads, the later thread is
/// scheduled for exploration at `i`, provided it was runnable there. The
/// bounds contribute their own policies on top: an active preemption
/// bound adds a conservative point at the nearest earlier context switch,
/// an active fairness bound widens points at release actions to every
/// runnable thread, and an active length bound widens a point whose
/// thread was not runnable to every thread that was.
pub(crate) fn find_backtrack_steps(
    memtype: MemType,
    bounds: &Bounds,
    trace: &Trace,
) -> Vec<BacktrackStep> {
    let mut steps: Vec<BacktrackStep> = Vec::with_capacity(trace.len());
    let mut current = ThreadId::initial();
    for (decision, runnable, action) in trace {
        let tid = tid_of(&current, decision);
        steps.push(BacktrackStep {
            tid: tid.clone(),
            decision: decision.clone(),
            action: action.clone(),
            runnable: runnable.iter().cloned().collect(),
            backtracks: BTreeMap::new(),
        });
        current = tid;
    }

    for i in 0..steps.len() {
        for j in (i + 1)..steps.len() {
            if steps[i].tid == steps[j].tid {
                continue;
            }
            if dependent(
                memtype,
                &steps[i].tid,
                &steps[i].action,
                &steps[j].tid,
                &steps[j].action,
            ) {
                let racer = steps[j].tid.clone();
                add_backtrack(&mut steps, bounds, i, &racer, false);
            }
        }

        // A race partner need not have executed at all: a thread that was
        // runnable here but starved for the rest of the execution still
        // conflicts through its pending action.
        let pending: Vec<ThreadId> = steps[i]
            .runnable
            .iter()
            .filter(|(tid, lookahead)| {
                **tid != steps[i].tid
                    && dependent_lookahead(
                        memtype,
                        &steps[i].tid,
                        &steps[i].action,
                        tid,
                        lookahead,
                    )
            })
            .map(|(tid, _)| tid.clone())
            .collect();
        for tid in pending {
            add_backtrack(&mut steps, bounds, i, &tid, false);
        }
    }
    steps
}

fn add_backtrack(
    steps: &mut [BacktrackStep],
    bounds: &Bounds,
    i: usize,
    tid: &ThreadId,
    conservative: bool,
) {
    let runnable_here = steps[i].runnable.contains_key(tid);
    let widen_release = bounds.fairness.is_some()
        && steps[i]
            .runnable
            .get(tid)
            .map(releases)
            .unwrap_or(false);
    let to_add: Vec<ThreadId> = if runnable_here {
        if widen_release {
            steps[i].runnable.keys().cloned().collect()
        } else {
            vec![tid.clone()]
        }
    } else if bounds.length.is_some() {
        steps[i].runnable.keys().cloned().collect()
    } else {
        Vec::new()
    };
    if to_add.is_empty() {
        return;
    }
    for t in to_add {
        steps[i]
            .backtracks
            .entry(t)
            .and_modify(|c| *c &= conservative)
            .or_insert(conservative);
    }

    if !conservative && bounds.preemptions.is_some() {
        if let Some(earlier) = nearest_context_switch_before(steps, i) {
            add_backtrack(steps, bounds, earlier, tid, true);
        }
    }
}

/// The nearest index before `i` at which the running real thread changed,
/// ignoring commit pseudo-thread interludes on both sides.
fn nearest_context_switch_before(steps: &[BacktrackStep], i: usize) -> Option<usize> {
    let mut last_real: Option<&ThreadId> = None;
    let mut switch_at = None;
    for (index, step) in steps.iter().enumerate().take(i) {
        if step.tid.is_commit() {
            continue;
        }
        if let Some(prev) = last_real {
            if *prev != step.tid {
                switch_at = Some(index);
            }
        }
        last_real = Some(&step.tid);
    }
    switch_at
}

/// Pushes discovered backtracking points into the tree, subject to the
/// bound: a point is only scheduled if taking it would still be within
/// bounds, and never for a thread already explored or asleep at that node.
pub(crate) fn incorporate_backtracks(root: &mut Dpor, bounds: &Bounds, steps: &[BacktrackStep]) {
    let mut node = root;
    let mut path: Vec<(Decision, ThreadAction)> = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let prior_tid = if i == 0 { None } else { Some(&steps[i - 1].tid) };
        let runnable_set: BTreeSet<ThreadId> = step.runnable.keys().cloned().collect();
        for (tid, &conservative) in &step.backtracks {
            if node.done.contains_key(tid)
                || node.sleep.contains_key(tid)
                || !node.runnable.contains(tid)
            {
                continue;
            }
            let lookahead = match step.runnable.get(tid) {
                Some(lookahead) => lookahead,
                None => continue,
            };
            let decision = decision_of(prior_tid, &runnable_set, tid);
            let within = bounds.permits(
                path.iter().map(|(d, a)| (d, a)),
                &decision,
                tid,
                lookahead,
            );
            if within {
                node.todo
                    .entry(tid.clone())
                    .and_modify(|c| *c &= conservative)
                    .or_insert(conservative);
            }
        }
        path.push((step.decision.clone(), step.action.clone()));
        node = match node.done.get_mut(&step.tid) {
            Some(child) => child,
            None => break,
        };
    }
}

/// Whether two observed actions by different threads can affect each
/// other's outcome when reordered.
pub(crate) fn dependent(
    memtype: MemType,
    t1: &ThreadId,
    a1: &ThreadAction,
    t2: &ThreadId,
    a2: &ThreadAction,
) -> bool {
    if t1 == t2 {
        return true;
    }
    match (a1, a2) {
        // Delivering an exception to a thread interferes with anything it
        // does, and a fork interferes with everything its child does.
        (ThreadAction::ThrowTo(target), _) | (ThreadAction::BlockedThrowTo(target), _)
            if target == t2 =>
        {
            return true
        }
        (_, ThreadAction::ThrowTo(target)) | (_, ThreadAction::BlockedThrowTo(target))
            if target == t1 =>
        {
            return true
        }
        (ThreadAction::Fork(child), _) if child == t2 => return true,
        (_, ThreadAction::Fork(child)) if child == t1 => return true,
        // Transactions conflict when their variable footprints overlap and
        // at least one side wrote an overlapping variable.
        (
            ThreadAction::Stm(trace1, _) | ThreadAction::BlockedStm(trace1),
            ThreadAction::Stm(trace2, _) | ThreadAction::BlockedStm(trace2),
        ) => return stm_conflict(trace1, trace2),
        _ => {}
    }
    dependent_actions(memtype, &simplify_action(a1), &simplify_action(a2))
}

/// Whether an observed action and another thread's pending action can
/// affect each other. Used to wake sleeping threads.
pub(crate) fn dependent_lookahead(
    memtype: MemType,
    t1: &ThreadId,
    a1: &ThreadAction,
    t2: &ThreadId,
    l2: &Lookahead,
) -> bool {
    if t1 == t2 {
        return true;
    }
    match (a1, l2) {
        (ThreadAction::ThrowTo(target), _) | (ThreadAction::BlockedThrowTo(target), _)
            if target == t2 =>
        {
            return true
        }
        (_, Lookahead::WillThrowTo(target)) if target == t1 => return true,
        (ThreadAction::Fork(child), _) if child == t2 => return true,
        // A pending transaction's footprint is unknown, so treat it as
        // overlapping any observed transaction.
        (ThreadAction::Stm(_, _) | ThreadAction::BlockedStm(_), Lookahead::WillStm) => {
            return true
        }
        _ => {}
    }
    dependent_actions(memtype, &simplify_action(a1), &simplify_lookahead(l2))
}

fn stm_conflict(trace1: &[TAction], trace2: &[TAction]) -> bool {
    let all1 = tvars_of(trace1);
    let all2 = tvars_of(trace2);
    let writes1 = tvars_written(trace1);
    let writes2 = tvars_written(trace2);
    writes1.iter().any(|tv| all2.contains(tv)) || writes2.iter().any(|tv| all1.contains(tv))
}

fn tvars_written(trace: &[TAction]) -> BTreeSet<TVarId> {
    let mut written = BTreeSet::new();
    collect_written(trace, &mut written);
    written
}

fn collect_written(trace: &[TAction], written: &mut BTreeSet<TVarId>) {
    for taction in trace {
        match taction {
            TAction::TNew(tv) | TAction::TWrite(tv) => {
                written.insert(tv.clone());
            }
            TAction::TOrElse(a, b) | TAction::TCatch(a, b) => {
                collect_written(a, written);
                if let Some(b) = b {
                    collect_written(b, written);
                }
            }
            _ => {}
        }
    }
}

fn dependent_actions(memtype: MemType, a1: &ActionType, a2: &ActionType) -> bool {
    if let (Some(c1), Some(c2)) = (a1.cref(), a2.cref()) {
        if c1 != c2 {
            return false;
        }
        return match (a1, a2) {
            (ActionType::UnsynchronisedRead(_), ActionType::UnsynchronisedRead(_)) => false,
            // Unbuffered writes conflict directly; buffered writes only
            // conflict through their commits.
            (ActionType::UnsynchronisedWrite(_), ActionType::UnsynchronisedWrite(_)) => {
                memtype == MemType::SequentialConsistency
            }
            _ => true,
        };
    }
    if let (Some(m1), Some(m2)) = (a1.mvar(), a2.mvar()) {
        return m1 == m2;
    }
    false
}

/// The scheduler systematic exploration drives the runtime with: it forces
/// the prefix discovered in the tree, then schedules freely within the
/// bounds, preferring to keep the current thread running.
pub(crate) struct DporScheduler {
    memtype: MemType,
    bounds: Bounds,
    prefix: VecDeque<ThreadId>,
    sleep: BTreeMap<ThreadId, ThreadAction>,
    /// Set when the only options left were asleep: the execution's result
    /// duplicates one already collected and must not be reported.
    ignore: bool,
}

impl DporScheduler {
    pub fn new(
        memtype: MemType,
        bounds: Bounds,
        prefix: Vec<ThreadId>,
        sleep: BTreeMap<ThreadId, ThreadAction>,
    ) -> DporScheduler {
        DporScheduler {
            memtype,
            bounds,
            prefix: prefix.into(),
            sleep,
            ignore: false,
        }
    }

    pub fn ignored(&self) -> bool {
        self.ignore
    }
}

impl Scheduler for DporScheduler {
    fn schedule(
        &mut self,
        trace: &Trace,
        prior: Option<&(ThreadId, ThreadAction)>,
        runnable: &[(ThreadId, Lookahead)],
    ) -> Option<ThreadId> {
        // A sleeping thread wakes once something dependent with its
        // pending action has happened.
        if let Some((prior_tid, prior_action)) = prior {
            let memtype = self.memtype;
            self.sleep.retain(|tid, pending| {
                let lookahead = crate::action::rewind(pending);
                match lookahead {
                    Some(lookahead) => {
                        !dependent_lookahead(memtype, prior_tid, prior_action, tid, &lookahead)
                    }
                    None => false,
                }
            });
        }

        if let Some(tid) = self.prefix.pop_front() {
            return Some(tid);
        }

        let prior_tid = prior.map(|(tid, _)| tid);
        let runnable_set: BTreeSet<ThreadId> = runnable.iter().map(|(t, _)| t.clone()).collect();
        let path = trace.iter().map(|(d, _, a)| (d, a));
        let in_bounds: Vec<&(ThreadId, Lookahead)> = runnable
            .iter()
            .filter(|(tid, lookahead)| {
                let decision = decision_of(prior_tid, &runnable_set, tid);
                self.bounds.permits(path.clone(), &decision, tid, lookahead)
            })
            .collect();
        let awake: Vec<&&(ThreadId, Lookahead)> = in_bounds
            .iter()
            .filter(|(tid, _)| !self.sleep.contains_key(tid))
            .collect();

        if awake.is_empty() {
            if !in_bounds.is_empty() {
                self.ignore = true;
            }
            return None;
        }

        // Keep the prior thread running where allowed, unless it just
        // yielded; otherwise lowest real thread first, then the commit
        // pseudo-thread closest to zero.
        if let Some((prior_tid, prior_action)) = prior {
            if *prior_action != ThreadAction::Yield
                && awake.iter().any(|(tid, _)| tid == prior_tid)
            {
                return Some(prior_tid.clone());
            }
        }
        awake
            .iter()
            .map(|(tid, _)| tid)
            .filter(|tid| !tid.is_commit())
            .min()
            .or_else(|| awake.iter().map(|(tid, _)| tid).max())
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;

    #[test]
    fn root_starts_with_the_initial_thread_to_do() {
        let root = Dpor::root();
        let (prefix, conservative, sleep) = root.find_schedule_prefix().unwrap();
        assert_eq!(prefix, vec![ThreadId::initial()]);
        assert!(!conservative);
        assert!(sleep.is_empty());
    }

    #[test]
    fn incorporating_a_trace_consumes_the_todo() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let cell = source.next_cref_id(None);
        let trace: Trace = vec![
            (
                Decision::Start(main.clone()),
                vec![(main.clone(), Lookahead::WillNewCRef)],
                ThreadAction::NewCRef(cell.clone()),
            ),
            (
                Decision::Continue,
                vec![(main.clone(), Lookahead::WillStop)],
                ThreadAction::Stop,
            ),
        ];
        let mut root = Dpor::root();
        root.incorporate_trace(MemType::SequentialConsistency, false, &trace);
        // Nothing left to try: the only schedule has been taken.
        assert!(root.find_schedule_prefix().is_none());
    }

    #[test]
    fn races_create_backtracking_points() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let cell = source.next_cref_id(None);
        let memtype = MemType::SequentialConsistency;

        // main writes, then the worker writes the same cell; the worker
        // was runnable at the earlier step.
        let trace: Trace = vec![
            (
                Decision::Start(main.clone()),
                vec![
                    (main.clone(), Lookahead::WillWriteCRef(cell.clone())),
                    (worker.clone(), Lookahead::WillWriteCRef(cell.clone())),
                ],
                ThreadAction::WriteCRef(cell.clone()),
            ),
            (
                Decision::SwitchTo(worker.clone()),
                vec![
                    (main.clone(), Lookahead::WillStop),
                    (worker.clone(), Lookahead::WillWriteCRef(cell.clone())),
                ],
                ThreadAction::WriteCRef(cell.clone()),
            ),
        ];
        let bounds = Bounds::none();
        let steps = find_backtrack_steps(memtype, &bounds, &trace);
        assert_eq!(steps[0].backtracks.get(&worker), Some(&false));
    }

    #[test]
    fn unrunnable_racers_widen_only_under_a_length_bound() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let cell = source.next_cref_id(None);
        let memtype = MemType::SequentialConsistency;

        // The worker races with main's write but was not yet runnable at
        // the earlier step.
        let trace: Trace = vec![
            (
                Decision::Start(main.clone()),
                vec![(main.clone(), Lookahead::WillWriteCRef(cell.clone()))],
                ThreadAction::WriteCRef(cell.clone()),
            ),
            (
                Decision::Start(worker.clone()),
                vec![(worker.clone(), Lookahead::WillWriteCRef(cell.clone()))],
                ThreadAction::WriteCRef(cell),
            ),
        ];

        // Without a length bound the race contributes nothing: the base
        // rule requires the racer to have been runnable.
        let steps = find_backtrack_steps(memtype, &Bounds::none(), &trace);
        assert!(steps[0].backtracks.is_empty());

        // The length bound's policy widens the point to every thread that
        // was runnable there.
        let length_only = Bounds { preemptions: None, fairness: None, length: Some(250) };
        let steps = find_backtrack_steps(memtype, &length_only, &trace);
        assert_eq!(steps[0].backtracks.get(&main), Some(&false));
        assert!(!steps[0].backtracks.contains_key(&worker));
    }

    #[test]
    fn independent_actions_do_not_race() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let a = source.next_cref_id(None);
        let b = source.next_cref_id(None);
        assert!(!dependent(
            MemType::SequentialConsistency,
            &main,
            &ThreadAction::WriteCRef(a.clone()),
            &worker,
            &ThreadAction::WriteCRef(b),
        ));
        assert!(dependent(
            MemType::SequentialConsistency,
            &main,
            &ThreadAction::WriteCRef(a.clone()),
            &worker,
            &ThreadAction::ReadCRef(a),
        ));
    }

    #[test]
    fn buffered_writes_race_through_their_commits() {
        let mut source = IdSource::new();
        let main = ThreadId::initial();
        let worker = source.next_thread_id(None);
        let cell = source.next_cref_id(None);
        // Under total store order the raw writes are independent, but a
        // commit races with a read of the same cell.
        assert!(!dependent(
            MemType::TotalStoreOrder,
            &main,
            &ThreadAction::WriteCRef(cell.clone()),
            &worker,
            &ThreadAction::WriteCRef(cell.clone()),
        ));
        assert!(dependent(
            MemType::TotalStoreOrder,
            &ThreadId::commit(&main, None),
            &ThreadAction::CommitCRef(main.clone(), cell.clone()),
            &worker,
            &ThreadAction::ReadCRef(cell),
        ));
    }

    #[test]
    fn transactions_conflict_only_on_overlapping_writes() {
        let mut source = IdSource::new();
        let t1 = ThreadId::initial();
        let t2 = source.next_thread_id(None);
        let x = source.next_tvar_id(None);
        let y = source.next_tvar_id(None);

        let read_x = vec![TAction::TRead(x.clone()), TAction::TStop];
        let write_x = vec![TAction::TWrite(x.clone()), TAction::TStop];
        let write_y = vec![TAction::TWrite(y), TAction::TStop];

        assert!(dependent(
            MemType::SequentialConsistency,
            &t1,
            &ThreadAction::Stm(read_x.clone(), vec![]),
            &t2,
            &ThreadAction::Stm(write_x.clone(), vec![]),
        ));
        assert!(!dependent(
            MemType::SequentialConsistency,
            &t1,
            &ThreadAction::Stm(read_x.clone(), vec![]),
            &t2,
            &ThreadAction::Stm(write_y, vec![]),
        ));
        // Two reads of the same variable commute.
        assert!(!dependent(
            MemType::SequentialConsistency,
            &t1,
            &ThreadAction::Stm(read_x.clone(), vec![]),
            &t2,
            &ThreadAction::Stm(read_x, vec![]),
        ));
    }
}
