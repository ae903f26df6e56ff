//! Private module for selective re-export.
//!
//! Runs one transaction as a single atomic step of the enclosing
//! execution. Reads and writes go to a local overlay; only a successful
//! commit merges the overlay into the shared store and wakes waiters.

use crate::action::{TAction, TTrace};
use crate::id::{IdSource, TVarId};
use crate::program::{StmAction, StmProgram, Value};
use nohash_hasher::IntMap;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// The shared transactional-variable store.
pub(crate) type TVars = IntMap<TVarId, Value>;

/// How a transaction ended.
pub(crate) enum StmOutcome {
    /// The transaction finished; its writes are ready to merge.
    Committed {
        value: Value,
        writes: BTreeMap<TVarId, Value>,
        trace: TTrace,
    },
    /// The transaction retried with no alternative left; the thread should
    /// block until any of the read variables is written.
    Retry { read: BTreeSet<TVarId>, trace: TTrace },
    /// The transaction raised an exception no transaction-level handler
    /// caught; its writes are discarded.
    Threw { exception: Value, trace: TTrace },
}

struct TxnEnv<'a> {
    global: &'a TVars,
    idsource: &'a mut IdSource,
    writes: BTreeMap<TVarId, Value>,
    /// Every variable read, branches included; blocking and dependency use
    /// the union, so rollbacks do not shrink it.
    read: BTreeSet<TVarId>,
}

enum ChainOutcome {
    Done,
    Retry,
    Threw(Value),
}

enum BranchOutcome {
    Done(Value),
    Retry,
    Threw(Value),
}

/// Runs `program` against the store, producing the outcome and the full
/// transaction trace (including rolled-back branches).
pub(crate) fn run_transaction(
    program: StmProgram,
    idsource: &mut IdSource,
    global: &TVars,
) -> StmOutcome {
    let mut env = TxnEnv {
        global,
        idsource,
        writes: BTreeMap::new(),
        read: BTreeSet::new(),
    };
    let mut trace = TTrace::new();
    match run_branch(program, &mut env, &mut trace) {
        BranchOutcome::Done(value) => {
            trace.push(TAction::TStop);
            StmOutcome::Committed { value, writes: env.writes, trace }
        }
        BranchOutcome::Retry => StmOutcome::Retry { read: env.read, trace },
        BranchOutcome::Threw(exception) => StmOutcome::Threw { exception, trace },
    }
}

/// Runs a delimited sub-program (the whole transaction, an `or_else`
/// branch, or a `catch` handler) to its own completion.
fn run_branch(program: StmProgram, env: &mut TxnEnv<'_>, trace: &mut TTrace) -> BranchOutcome {
    let slot: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let write_slot = Rc::clone(&slot);
    let chain = program(Box::new(move |value| {
        StmAction::SStop(Box::new(move || {
            *write_slot.borrow_mut() = Some(value);
        }))
    }));
    match run_chain(chain, env, trace) {
        ChainOutcome::Done => {
            let value = slot
                .borrow_mut()
                .take()
                .expect("transaction finished without a value");
            BranchOutcome::Done(value)
        }
        ChainOutcome::Retry => BranchOutcome::Retry,
        ChainOutcome::Threw(e) => BranchOutcome::Threw(e),
    }
}

fn run_chain(action: StmAction, env: &mut TxnEnv<'_>, trace: &mut TTrace) -> ChainOutcome {
    let mut current = action;
    loop {
        current = match current {
            StmAction::SNew(name, value, k) => {
                let id = env.idsource.next_tvar_id(name.as_deref());
                env.writes.insert(id.clone(), value);
                trace.push(TAction::TNew(id.clone()));
                k(id)
            }
            StmAction::SRead(id, k) => {
                let value = env
                    .writes
                    .get(&id)
                    .cloned()
                    .or_else(|| env.global.get(&id).cloned())
                    .unwrap_or_else(|| panic!("transaction read unknown variable {}", id));
                env.read.insert(id.clone());
                trace.push(TAction::TRead(id));
                k(value)
            }
            StmAction::SWrite(id, value, rest) => {
                env.writes.insert(id.clone(), value);
                trace.push(TAction::TWrite(id));
                *rest
            }
            StmAction::SRetry => {
                trace.push(TAction::TRetry);
                return ChainOutcome::Retry;
            }
            StmAction::SThrow(exception) => {
                trace.push(TAction::TThrow);
                return ChainOutcome::Threw(exception);
            }
            StmAction::SOrElse(left, right, k) => {
                let checkpoint = env.writes.clone();
                let mut left_trace = TTrace::new();
                match run_branch(left, env, &mut left_trace) {
                    BranchOutcome::Done(value) => {
                        trace.push(TAction::TOrElse(left_trace, None));
                        k(value)
                    }
                    BranchOutcome::Threw(e) => {
                        trace.push(TAction::TOrElse(left_trace, None));
                        return ChainOutcome::Threw(e);
                    }
                    BranchOutcome::Retry => {
                        env.writes = checkpoint.clone();
                        let mut right_trace = TTrace::new();
                        match run_branch(right, env, &mut right_trace) {
                            BranchOutcome::Done(value) => {
                                trace.push(TAction::TOrElse(left_trace, Some(right_trace)));
                                k(value)
                            }
                            BranchOutcome::Retry => {
                                env.writes = checkpoint;
                                trace.push(TAction::TOrElse(left_trace, Some(right_trace)));
                                return ChainOutcome::Retry;
                            }
                            BranchOutcome::Threw(e) => {
                                trace.push(TAction::TOrElse(left_trace, Some(right_trace)));
                                return ChainOutcome::Threw(e);
                            }
                        }
                    }
                }
            }
            StmAction::SCatch(body, handler, k) => {
                let checkpoint = env.writes.clone();
                let mut body_trace = TTrace::new();
                match run_branch(body, env, &mut body_trace) {
                    BranchOutcome::Done(value) => {
                        trace.push(TAction::TCatch(body_trace, None));
                        k(value)
                    }
                    BranchOutcome::Retry => {
                        trace.push(TAction::TCatch(body_trace, None));
                        return ChainOutcome::Retry;
                    }
                    BranchOutcome::Threw(exception) => {
                        env.writes = checkpoint.clone();
                        match handler(exception) {
                            Ok(handler_program) => {
                                let mut handler_trace = TTrace::new();
                                match run_branch(handler_program, env, &mut handler_trace) {
                                    BranchOutcome::Done(value) => {
                                        trace.push(TAction::TCatch(
                                            body_trace,
                                            Some(handler_trace),
                                        ));
                                        k(value)
                                    }
                                    BranchOutcome::Retry => {
                                        env.writes = checkpoint;
                                        trace.push(TAction::TCatch(
                                            body_trace,
                                            Some(handler_trace),
                                        ));
                                        return ChainOutcome::Retry;
                                    }
                                    BranchOutcome::Threw(e) => {
                                        trace.push(TAction::TCatch(
                                            body_trace,
                                            Some(handler_trace),
                                        ));
                                        return ChainOutcome::Threw(e);
                                    }
                                }
                            }
                            Err(exception) => {
                                trace.push(TAction::TCatch(body_trace, None));
                                return ChainOutcome::Threw(exception);
                            }
                        }
                    }
                }
            }
            StmAction::SStop(finish) => {
                finish();
                return ChainOutcome::Done;
            }
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::program::{new_tvar, or_else, retry, stm_catch, stm_throw, Stm};

    fn run<T: Clone + 'static>(stm: Stm<T>) -> StmOutcome {
        let mut source = IdSource::new();
        let global = TVars::default();
        let program: StmProgram =
            Box::new(move |fin| (stm.run)(Box::new(move |t| fin(Rc::new(t)))));
        run_transaction(program, &mut source, &global)
    }

    #[test]
    fn reads_observe_local_writes() {
        let stm = new_tvar(None, 1).and_then(|tv| {
            let tv2 = tv.clone();
            tv.write(2).then(tv2.read())
        });
        match run(stm) {
            StmOutcome::Committed { value, writes, trace } => {
                assert_eq!(*value.downcast_ref::<i32>().unwrap(), 2);
                assert_eq!(writes.len(), 1);
                assert_eq!(trace.last(), Some(&TAction::TStop));
            }
            _ => panic!("expected a commit"),
        }
    }

    #[test]
    fn retry_reports_the_read_set() {
        let stm = new_tvar(None, 0).and_then(|tv| tv.read().then(retry::<i32>()));
        match run(stm) {
            StmOutcome::Retry { read, trace } => {
                assert_eq!(read.len(), 1);
                assert_eq!(trace.last(), Some(&TAction::TRetry));
            }
            _ => panic!("expected a retry"),
        }
    }

    #[test]
    fn or_else_rolls_back_the_left_branch() {
        let stm = new_tvar(None, 0).and_then(|tv| {
            let left = {
                let tv = tv.clone();
                tv.write(10).then(retry())
            };
            let right = Stm::pure(99);
            let read_back = tv.clone();
            or_else(left, right).and_then(move |chosen| {
                read_back.read().map(move |stored| (chosen, stored))
            })
        });
        match run(stm) {
            StmOutcome::Committed { value, .. } => {
                // The left write was rolled back, so the variable still
                // holds its initial value.
                let (chosen, stored) = value.downcast_ref::<(i32, i32)>().unwrap().clone();
                assert_eq!(chosen, 99);
                assert_eq!(stored, 0);
            }
            _ => panic!("expected a commit"),
        }
    }

    #[test]
    fn or_else_trace_records_both_branches() {
        let stm = or_else(retry::<i32>(), Stm::pure(1));
        match run(stm) {
            StmOutcome::Committed { trace, .. } => {
                assert_eq!(trace.len(), 2);
                match &trace[0] {
                    TAction::TOrElse(left, Some(right)) => {
                        assert_eq!(left.as_slice(), &[TAction::TRetry]);
                        assert!(right.is_empty());
                    }
                    other => panic!("unexpected first transaction step: {:?}", other),
                }
            }
            _ => panic!("expected a commit"),
        }
    }

    #[test]
    fn catch_rolls_back_and_runs_the_handler() {
        #[derive(Clone, Debug)]
        struct Boom;
        let stm = new_tvar(None, 0).and_then(|tv| {
            let body = {
                let tv = tv.clone();
                tv.write(10).then(stm_throw::<Boom, i32>(Boom))
            };
            let read_back = tv.clone();
            stm_catch(body, |_: Boom| Stm::pure(7))
                .and_then(move |caught| read_back.read().map(move |stored| (caught, stored)))
        });
        match run(stm) {
            StmOutcome::Committed { value, .. } => {
                let (caught, stored) = value.downcast_ref::<(i32, i32)>().unwrap().clone();
                assert_eq!(caught, 7);
                assert_eq!(stored, 0);
            }
            _ => panic!("expected a commit"),
        }
    }

    #[test]
    fn unmatched_exceptions_escape_the_transaction() {
        #[derive(Clone, Debug)]
        struct Boom;
        #[derive(Clone, Debug)]
        struct Other;
        let stm = stm_catch(stm_throw::<Boom, i32>(Boom), |_: Other| Stm::pure(1));
        match run(stm) {
            StmOutcome::Threw { exception, .. } => {
                assert!(exception.downcast_ref::<Boom>().is_some());
            }
            _ => panic!("expected the exception to escape"),
        }
    }
}
