//! The abstract concurrency runtime: a single-threaded interpreter that
//! runs one primitive action of one logical thread per scheduler step.
//!
//! The driver loop computes the runnable set (real threads plus commit
//! pseudo-threads), asks the scheduler to pick, steps the chosen thread,
//! and appends the step to the trace. Everything a thread can observe is
//! owned by the [`Execution`], so runs with identical scheduler decisions
//! are bit-identical.

pub(crate) mod memory;
pub(crate) mod stm;
pub(crate) mod threading;

use crate::action::{Lookahead, MaskingState, ThreadAction};
use crate::id::{CRefId, IdSource, MVarId, ThreadId};
use crate::program::{lookahead_of, Action, Conc, Value};
use crate::sched::Scheduler;
use crate::trace::{decision_of, Failure, MemType, Trace};
use memory::{cas_committed, CRefState, CRefs, WriteBuffers};
use nohash_hasher::IntMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use stm::{run_transaction, StmOutcome, TVars};
use threading::{BlockedOn, HandlerEntry, Threads};

struct MVarState {
    value: Option<Value>,
}

/// The live outcome of a nested execution in progress: who entered it and
/// how to resume them when it ends.
struct SubState {
    caller: ThreadId,
    resume: Box<dyn FnOnce(Result<Value, Failure>) -> Action>,
    handler_depth: usize,
    masking: MaskingState,
    masking_stack_depth: usize,
}

/// How one step ended.
enum Stepped {
    /// The step completed; the execution continues.
    Ok(ThreadAction),
    /// The step completed and doomed the whole execution.
    Fatal(ThreadAction, Failure),
}

/// All state owned by one execution.
pub(crate) struct Execution {
    threads: Threads,
    crefs: CRefs,
    mvars: IntMap<MVarId, MVarState>,
    tvars: TVars,
    buffers: WriteBuffers,
    idsource: IdSource,
    capabilities: usize,
    sub: Option<SubState>,
}

impl Execution {
    fn new(root: Action) -> Execution {
        let idsource = IdSource::new();
        let mut threads = Threads::default();
        threads.create(ThreadId::initial(), root, MaskingState::Unmasked);
        Execution {
            threads,
            crefs: CRefs::default(),
            mvars: IntMap::default(),
            tvars: TVars::default(),
            buffers: WriteBuffers::default(),
            idsource,
            capabilities: 2,
            sub: None,
        }
    }

    /// Every schedulable thread with what it is about to do: commit
    /// pseudo-threads for non-empty buffers, then unblocked real threads,
    /// in ascending thread order.
    fn runnable_with_lookaheads(&self, memtype: MemType) -> Vec<(ThreadId, Lookahead)> {
        let mut runnable = Vec::new();
        if memtype != MemType::SequentialConsistency {
            for (commit_tid, writer, cref) in self.buffers.commit_threads() {
                runnable.push((commit_tid, Lookahead::WillCommitCRef(writer, cref)));
            }
        }
        for (tid, thread) in self.threads.runnable() {
            let action = thread
                .continuation
                .as_ref()
                .expect("runnable thread has no continuation");
            runnable.push((tid.clone(), lookahead_of(action)));
        }
        runnable.sort_by(|a, b| a.0.cmp(&b.0));
        runnable
    }

    /// Distinguishes the two no-progress failures: a deadlock is a
    /// transactional one only when every blocked thread is waiting in a
    /// transaction.
    fn classify_deadlock(&self) -> Failure {
        let all_stm = self
            .threads
            .0
            .values()
            .all(|t| matches!(t.blocked_on, Some(BlockedOn::TVars(_))));
        if all_stm {
            Failure::STMDeadlock
        } else {
            Failure::Deadlock
        }
    }

    fn continue_with(&mut self, tid: &ThreadId, action: Action) {
        self.threads
            .get_mut(tid)
            .expect("continuing a dead thread")
            .continuation = Some(action);
    }

    /// Ends the nested execution: surviving threads it forked are
    /// discarded, and the caller resumes with the outcome, its handler and
    /// masking state rolled back to what they were on entry.
    fn end_sub(&mut self, sub: SubState, outcome: Result<Value, Failure>) {
        let caller = sub.caller;
        self.threads.0.retain(|tid, _| *tid == caller);
        let thread = self
            .threads
            .get_mut(&caller)
            .expect("nested execution lost its caller");
        thread.blocked_on = None;
        thread.handlers.truncate(sub.handler_depth);
        thread.masking = sub.masking;
        thread.masking_stack.truncate(sub.masking_stack_depth);
        thread.continuation = Some(Action::StopSubconcurrency(Box::new((sub.resume)(outcome))));
    }

    /// Unwinds `tid`'s handler stack with an in-flight exception. Emits
    /// `Throw` if a handler catches, `Killed` if the thread dies. Inside a
    /// nested execution the unwind stops at the handlers that were already
    /// installed on entry; those belong to the enclosing execution and
    /// survive the nested one failing.
    fn raise(&mut self, tid: &ThreadId, exception: Value) -> Stepped {
        let floor = match &self.sub {
            Some(sub) if sub.caller == *tid => sub.handler_depth,
            _ => 0,
        };
        let thread = self.threads.get_mut(tid).expect("raise in a dead thread");
        let mut exception = exception;
        while thread.handlers.len() > floor {
            let entry = thread.handlers.pop().expect("handler stack shrank");
            match (entry.handler)(exception) {
                Ok(action) => {
                    thread.masking = entry.masking;
                    thread.masking_stack.truncate(entry.masking_depth);
                    thread.continuation = Some(action);
                    return Stepped::Ok(ThreadAction::Throw);
                }
                Err(unhandled) => exception = unhandled,
            }
        }
        if let Some(sub) = self.sub.take() {
            if sub.caller == *tid {
                self.end_sub(sub, Err(Failure::UncaughtException));
                return Stepped::Ok(ThreadAction::Killed);
            }
            self.sub = Some(sub);
        }
        self.threads.remove(tid);
        if *tid == ThreadId::initial() {
            Stepped::Fatal(ThreadAction::Killed, Failure::UncaughtException)
        } else {
            Stepped::Ok(ThreadAction::Killed)
        }
    }

    /// Threads blocked delivering an exception wake once their target can
    /// accept it (or is gone). Checked after every step.
    fn wake_mask_waiters(&mut self) {
        let mut to_wake = Vec::new();
        for (tid, thread) in self.threads.0.iter() {
            if let Some(BlockedOn::Mask(target)) = &thread.blocked_on {
                let deliverable = match self.threads.0.get(target) {
                    None => true,
                    Some(t) => t.interruptible(),
                };
                if deliverable {
                    to_wake.push(tid.clone());
                }
            }
        }
        for tid in to_wake {
            self.threads
                .get_mut(&tid)
                .expect("waking a dead thread")
                .blocked_on = None;
        }
    }

    /// Runs one step of `tid`, which must be runnable.
    fn step(&mut self, memtype: MemType, tid: &ThreadId) -> Stepped {
        if tid.is_commit() {
            let (writer, cref) = self
                .buffers
                .commit_head(&mut self.crefs, tid)
                .expect("commit pseudo-thread scheduled with an empty buffer");
            return Stepped::Ok(ThreadAction::CommitCRef(writer, cref));
        }

        let action = self
            .threads
            .get_mut(tid)
            .expect("scheduled a dead thread")
            .continuation
            .take()
            .expect("scheduled thread has no continuation");

        let stepped = match action {
            Action::Fork(name, child, k) => {
                let child_tid = self.idsource.next_thread_id(name.as_deref());
                let masking = self.threads.get(tid).expect("forker died").masking;
                self.threads.create(child_tid.clone(), *child, masking);
                self.continue_with(tid, k(child_tid.clone()));
                Stepped::Ok(ThreadAction::Fork(child_tid))
            }
            Action::MyThreadId(k) => {
                self.continue_with(tid, k(tid.clone()));
                Stepped::Ok(ThreadAction::MyThreadId)
            }
            Action::GetNumCapabilities(k) => {
                let capabilities = self.capabilities;
                self.continue_with(tid, k(capabilities));
                Stepped::Ok(ThreadAction::GetNumCapabilities(capabilities))
            }
            Action::SetNumCapabilities(n, rest) => {
                self.capabilities = n;
                self.continue_with(tid, *rest);
                Stepped::Ok(ThreadAction::SetNumCapabilities(n))
            }
            Action::Yield(rest) => {
                self.continue_with(tid, *rest);
                Stepped::Ok(ThreadAction::Yield)
            }
            Action::NewCRef(name, value, k) => {
                let id = self.idsource.next_cref_id(name.as_deref());
                self.crefs
                    .insert(id.clone(), CRefState { committed: value, count: 0 });
                self.continue_with(tid, k(id.clone()));
                Stepped::Ok(ThreadAction::NewCRef(id))
            }
            Action::ReadCRef(cref, k) => {
                let value = self
                    .buffers
                    .buffered_value(tid, &cref)
                    .unwrap_or_else(|| self.committed(&cref));
                self.continue_with(tid, k(value));
                Stepped::Ok(ThreadAction::ReadCRef(cref))
            }
            Action::ReadCRefCas(cref, k) => {
                let value = self
                    .buffers
                    .buffered_value(tid, &cref)
                    .unwrap_or_else(|| self.committed(&cref));
                let count = self.crefs.get(&cref).expect("read of an unknown cell").count;
                let token = crate::program::CasToken { cref: cref.clone(), count, value };
                self.continue_with(tid, k(token));
                Stepped::Ok(ThreadAction::ReadCRefCas(cref))
            }
            Action::ModCRef(cref, f, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                let state = self.crefs.get_mut(&cref).expect("modify of an unknown cell");
                let value = f(&state.committed);
                state.committed = value.clone();
                state.count += 1;
                self.continue_with(tid, k(value));
                Stepped::Ok(ThreadAction::ModCRef(cref))
            }
            Action::ModCRefCas(cref, f, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                let state = self.crefs.get_mut(&cref).expect("modify of an unknown cell");
                let value = f(&state.committed);
                state.committed = value.clone();
                state.count += 1;
                self.continue_with(tid, k(value));
                Stepped::Ok(ThreadAction::ModCRefCas(cref))
            }
            Action::WriteCRef(cref, value, rest) => {
                self.buffers
                    .write(memtype, &mut self.crefs, tid, &cref, value);
                self.continue_with(tid, *rest);
                Stepped::Ok(ThreadAction::WriteCRef(cref))
            }
            Action::CasCRef(cref, token, value, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                let (succeeded, fresh) = cas_committed(&mut self.crefs, &cref, &token, value);
                self.continue_with(tid, k((succeeded, fresh)));
                Stepped::Ok(ThreadAction::CasCRef(cref, succeeded))
            }
            Action::NewMVar(name, k) => {
                let id = self.idsource.next_mvar_id(name.as_deref());
                self.mvars.insert(id.clone(), MVarState { value: None });
                self.continue_with(tid, k(id.clone()));
                Stepped::Ok(ThreadAction::NewMVar(id))
            }
            Action::PutMVar(mvar, value, rest) => {
                if self.mvar_full(&mvar) {
                    self.continue_with(tid, Action::PutMVar(mvar.clone(), value, rest));
                    self.threads.block(tid, BlockedOn::MVarEmpty(mvar.clone()));
                    Stepped::Ok(ThreadAction::BlockedPutMVar(mvar))
                } else {
                    self.buffers.commit_all(&mut self.crefs, tid);
                    self.mvars
                        .get_mut(&mvar)
                        .expect("put to an unknown variable")
                        .value = Some(value);
                    let woken = self.wake_mvar_readers(&mvar);
                    self.continue_with(tid, *rest);
                    Stepped::Ok(ThreadAction::PutMVar(mvar, woken))
                }
            }
            Action::TryPutMVar(mvar, value, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                if self.mvar_full(&mvar) {
                    self.continue_with(tid, k(false));
                    Stepped::Ok(ThreadAction::TryPutMVar(mvar, false, Vec::new()))
                } else {
                    self.mvars
                        .get_mut(&mvar)
                        .expect("put to an unknown variable")
                        .value = Some(value);
                    let woken = self.wake_mvar_readers(&mvar);
                    self.continue_with(tid, k(true));
                    Stepped::Ok(ThreadAction::TryPutMVar(mvar, true, woken))
                }
            }
            Action::ReadMVar(mvar, k) => {
                match self.mvar_value(&mvar) {
                    Some(value) => {
                        self.buffers.commit_all(&mut self.crefs, tid);
                        self.continue_with(tid, k(value));
                        Stepped::Ok(ThreadAction::ReadMVar(mvar))
                    }
                    None => {
                        self.continue_with(tid, Action::ReadMVar(mvar.clone(), k));
                        self.threads.block(tid, BlockedOn::MVarFull(mvar.clone()));
                        Stepped::Ok(ThreadAction::BlockedReadMVar(mvar))
                    }
                }
            }
            Action::TryReadMVar(mvar, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                let value = self.mvar_value(&mvar);
                let succeeded = value.is_some();
                self.continue_with(tid, k(value));
                Stepped::Ok(ThreadAction::TryReadMVar(mvar, succeeded))
            }
            Action::TakeMVar(mvar, k) => {
                match self.mvar_take(&mvar) {
                    Some(value) => {
                        self.buffers.commit_all(&mut self.crefs, tid);
                        let woken = self.wake_mvar_writers(&mvar);
                        self.continue_with(tid, k(value));
                        Stepped::Ok(ThreadAction::TakeMVar(mvar, woken))
                    }
                    None => {
                        self.continue_with(tid, Action::TakeMVar(mvar.clone(), k));
                        self.threads.block(tid, BlockedOn::MVarFull(mvar.clone()));
                        Stepped::Ok(ThreadAction::BlockedTakeMVar(mvar))
                    }
                }
            }
            Action::TryTakeMVar(mvar, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                let value = self.mvar_take(&mvar);
                let succeeded = value.is_some();
                let woken = if succeeded {
                    self.wake_mvar_writers(&mvar)
                } else {
                    Vec::new()
                };
                self.continue_with(tid, k(value));
                Stepped::Ok(ThreadAction::TryTakeMVar(mvar, succeeded, woken))
            }
            Action::Atomically(build, k) => {
                self.buffers.commit_all(&mut self.crefs, tid);
                match run_transaction(build(), &mut self.idsource, &self.tvars) {
                    StmOutcome::Committed { value, writes, trace } => {
                        let written: BTreeSet<_> = writes.keys().cloned().collect();
                        for (tvar, value) in writes {
                            self.tvars.insert(tvar, value);
                        }
                        let woken = self.threads.wake(|on| {
                            matches!(on, BlockedOn::TVars(waiting)
                                     if waiting.iter().any(|tv| written.contains(tv)))
                        });
                        self.continue_with(tid, k(value));
                        Stepped::Ok(ThreadAction::Stm(trace, woken))
                    }
                    StmOutcome::Retry { read, trace } => {
                        self.continue_with(tid, Action::Atomically(build, k));
                        self.threads.block(tid, BlockedOn::TVars(read));
                        Stepped::Ok(ThreadAction::BlockedStm(trace))
                    }
                    StmOutcome::Threw { exception, .. } => self.raise(tid, exception),
                }
            }
            Action::Catching(handler, body) => {
                let thread = self.threads.get_mut(tid).expect("catching in a dead thread");
                let entry = HandlerEntry {
                    handler,
                    masking: thread.masking,
                    masking_depth: thread.masking_stack.len(),
                };
                thread.handlers.push(entry);
                thread.continuation = Some(*body);
                Stepped::Ok(ThreadAction::Catching)
            }
            Action::PopCatching(rest) => {
                let thread = self.threads.get_mut(tid).expect("popping in a dead thread");
                thread
                    .handlers
                    .pop()
                    .expect("popped an empty handler stack");
                thread.continuation = Some(*rest);
                Stepped::Ok(ThreadAction::PopCatching)
            }
            Action::Throw(exception) => self.raise(tid, exception),
            Action::ThrowTo(target, exception, rest) => {
                if !self.threads.alive(&target) {
                    self.continue_with(tid, *rest);
                    Stepped::Ok(ThreadAction::ThrowTo(target))
                } else if target == *tid {
                    self.continue_with(tid, Action::Throw(exception));
                    Stepped::Ok(ThreadAction::ThrowTo(target))
                } else if self.threads.get(&target).expect("checked above").interruptible() {
                    let thread = self.threads.get_mut(&target).expect("checked above");
                    thread.blocked_on = None;
                    thread.continuation = Some(Action::Throw(exception));
                    self.continue_with(tid, *rest);
                    Stepped::Ok(ThreadAction::ThrowTo(target))
                } else {
                    self.continue_with(
                        tid,
                        Action::ThrowTo(target.clone(), exception, rest),
                    );
                    self.threads.block(tid, BlockedOn::Mask(target.clone()));
                    Stepped::Ok(ThreadAction::BlockedThrowTo(target))
                }
            }
            Action::SetMasking(state, rest) => {
                let thread = self.threads.get_mut(tid).expect("masking a dead thread");
                thread.masking_stack.push(thread.masking);
                thread.masking = state;
                thread.continuation = Some(*rest);
                Stepped::Ok(ThreadAction::SetMasking(false, state))
            }
            Action::ResetMasking(rest) => {
                let thread = self.threads.get_mut(tid).expect("unmasking a dead thread");
                let restored = thread
                    .masking_stack
                    .pop()
                    .unwrap_or(MaskingState::Unmasked);
                thread.masking = restored;
                thread.continuation = Some(*rest);
                Stepped::Ok(ThreadAction::ResetMasking(false, restored))
            }
            Action::Lift(thunk) => {
                self.continue_with(tid, thunk());
                Stepped::Ok(ThreadAction::LiftIO)
            }
            Action::Return(rest) => {
                self.continue_with(tid, *rest);
                Stepped::Ok(ThreadAction::Return)
            }
            Action::Stop(finish) => {
                finish();
                match self.sub.take() {
                    Some(sub) if sub.caller == *tid => {
                        self.end_sub(sub, Ok(Rc::new(())));
                    }
                    sub => {
                        self.sub = sub;
                        self.threads.remove(tid);
                    }
                }
                Stepped::Ok(ThreadAction::Stop)
            }
            Action::Subconcurrency(body, resume) => {
                if self.sub.is_some() || self.threads.0.len() > 1 {
                    Stepped::Fatal(
                        ThreadAction::Subconcurrency,
                        Failure::IllegalSubconcurrency,
                    )
                } else {
                    let thread = self
                        .threads
                        .get_mut(tid)
                        .expect("nested execution lost its caller");
                    self.sub = Some(SubState {
                        caller: tid.clone(),
                        resume,
                        handler_depth: thread.handlers.len(),
                        masking: thread.masking,
                        masking_stack_depth: thread.masking_stack.len(),
                    });
                    thread.continuation = Some(*body);
                    Stepped::Ok(ThreadAction::Subconcurrency)
                }
            }
            Action::StopSubconcurrency(rest) => {
                self.continue_with(tid, *rest);
                Stepped::Ok(ThreadAction::StopSubconcurrency)
            }
        };

        self.wake_mask_waiters();
        stepped
    }

    fn committed(&self, cref: &CRefId) -> Value {
        self.crefs
            .get(cref)
            .unwrap_or_else(|| panic!("read of unknown cell {}", cref))
            .committed
            .clone()
    }

    fn mvar_full(&self, mvar: &MVarId) -> bool {
        self.mvars
            .get(mvar)
            .unwrap_or_else(|| panic!("use of unknown variable {}", mvar))
            .value
            .is_some()
    }

    fn mvar_value(&self, mvar: &MVarId) -> Option<Value> {
        self.mvars
            .get(mvar)
            .unwrap_or_else(|| panic!("use of unknown variable {}", mvar))
            .value
            .clone()
    }

    fn mvar_take(&mut self, mvar: &MVarId) -> Option<Value> {
        self.mvars
            .get_mut(mvar)
            .unwrap_or_else(|| panic!("use of unknown variable {}", mvar))
            .value
            .take()
    }

    /// Wakes takers and readers once a variable fills.
    fn wake_mvar_readers(&mut self, mvar: &MVarId) -> Vec<ThreadId> {
        self.threads
            .wake(|on| matches!(on, BlockedOn::MVarFull(m) if m == mvar))
    }

    /// Wakes writers once a variable empties.
    fn wake_mvar_writers(&mut self, mvar: &MVarId) -> Vec<ThreadId> {
        self.threads
            .wake(|on| matches!(on, BlockedOn::MVarEmpty(m) if m == mvar))
    }
}

/// Runs one complete execution of `program` under `scheduler`, producing
/// the result and the trace.
pub(crate) fn run_execution<T: 'static>(
    memtype: MemType,
    scheduler: &mut dyn Scheduler,
    program: Conc<T>,
) -> (Result<T, Failure>, Trace) {
    let slot: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let write_slot = Rc::clone(&slot);
    let root = (program.run)(Box::new(move |value| {
        Action::Stop(Box::new(move || {
            *write_slot.borrow_mut() = Some(value);
        }))
    }));

    let mut execution = Execution::new(root);
    let mut trace: Trace = Vec::new();
    let mut prior: Option<(ThreadId, ThreadAction)> = None;
    let initial = ThreadId::initial();

    let failure = loop {
        if !execution.threads.alive(&initial) {
            break None;
        }
        let runnable = execution.runnable_with_lookaheads(memtype);
        if runnable.is_empty() {
            let kind = execution.classify_deadlock();
            if let Some(sub) = execution.sub.take() {
                log::trace!("nested execution ended: {}", kind);
                execution.end_sub(sub, Err(kind));
                continue;
            }
            break Some(kind);
        }

        let chosen = match scheduler.schedule(&trace, prior.as_ref(), &runnable) {
            Some(tid) => tid,
            None => break Some(Failure::Abort),
        };
        if !runnable.iter().any(|(tid, _)| *tid == chosen) {
            log::debug!("scheduler chose non-runnable thread {}", chosen);
            break Some(Failure::InternalError);
        }

        let runnable_set: BTreeSet<ThreadId> =
            runnable.iter().map(|(tid, _)| tid.clone()).collect();
        let decision = decision_of(
            prior.as_ref().map(|(tid, _)| tid),
            &runnable_set,
            &chosen,
        );
        match execution.step(memtype, &chosen) {
            Stepped::Ok(action) => {
                trace.push((decision, runnable, action.clone()));
                prior = Some((chosen, action));
            }
            Stepped::Fatal(action, failure) => {
                trace.push((decision, runnable, action));
                break Some(failure);
            }
        }
    };

    let result = match failure {
        Some(failure) => Err(failure),
        None => slot
            .borrow_mut()
            .take()
            .map(Ok)
            .unwrap_or(Err(Failure::InternalError)),
    };
    (result, trace)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::program::{
        catch, get_num_capabilities, my_thread_id, new_mvar, set_num_capabilities, throw,
        Conc,
    };
    use crate::sched::RoundRobinScheduler;

    fn run<T: 'static>(program: Conc<T>) -> (Result<T, Failure>, Trace) {
        let _ = env_logger::builder().is_test(true).try_init();
        run_execution(
            MemType::SequentialConsistency,
            &mut RoundRobinScheduler,
            program,
        )
    }

    #[test]
    fn try_variants_never_block() {
        let program = new_mvar::<i32>(Some("m")).and_then(|m| {
            let var = m.clone();
            m.try_take().and_then(move |empty_take| {
                let m = var.clone();
                var.try_put(4).and_then(move |first_put| {
                    let var = m.clone();
                    m.try_put(5).and_then(move |second_put| {
                        let m = var.clone();
                        var.try_read().and_then(move |read| {
                            m.try_take().map(move |taken| {
                                (empty_take, first_put, second_put, read, taken)
                            })
                        })
                    })
                })
            })
        });
        let (result, _) = run(program);
        assert_eq!(result, Ok((None, true, false, Some(4), Some(4))));
    }

    #[test]
    fn capability_counts_are_remembered() {
        let program = get_num_capabilities().and_then(|before| {
            set_num_capabilities(4)
                .then(get_num_capabilities())
                .map(move |after| (before, after))
        });
        let (result, _) = run(program);
        assert_eq!(result, Ok((2, 4)));
    }

    #[test]
    fn the_first_thread_is_main() {
        let (result, _) = run(my_thread_id().map(|tid| tid == ThreadId::initial()));
        assert_eq!(result, Ok(true));
    }

    #[test]
    fn unhandled_exception_types_keep_unwinding() {
        #[derive(Clone, Debug)]
        struct Inner;
        #[derive(Clone, Debug)]
        struct Outer;
        let program = catch(
            catch(throw::<Outer, i32>(Outer), |_: Inner| Conc::pure(1)),
            |_: Outer| Conc::pure(2),
        );
        let (result, _) = run(program);
        assert_eq!(result, Ok(2));
    }

    #[test]
    fn traces_record_one_entry_per_step() {
        let program = new_mvar::<i32>(Some("m"))
            .and_then(|m| {
                let var = m.clone();
                m.put(1).then(var.take())
            });
        let (result, trace) = run(program);
        assert_eq!(result, Ok(1));
        // NewMVar, PutMVar, TakeMVar, Stop.
        assert_eq!(trace.len(), 4);
        assert!(matches!(trace[0].2, ThreadAction::NewMVar(_)));
        assert!(matches!(trace[3].2, ThreadAction::Stop));
    }
}
