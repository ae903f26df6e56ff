//! The algebra of scheduling-relevant events.
//!
//! Every step a thread takes is recorded as a [`ThreadAction`]. Before the
//! step happens, the same event is visible to the scheduler as a
//! [`Lookahead`], a weaker form that does not commit to outcomes (for
//! example, [`Lookahead::WillPutMVar`] covers both the successful and the
//! blocking put). The explorer works with an even coarser classification,
//! [`ActionType`], which is all the dependency relation needs.

use crate::id::{CRefId, MVarId, ThreadId, TVarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a thread responds to asynchronous exceptions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum MaskingState {
    Unmasked,
    MaskedInterruptible,
    MaskedUninterruptible,
}

/// Every event a thread can emit in one step.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum ThreadAction {
    /// Started a new thread.
    Fork(ThreadId),
    /// Looked up its own thread id.
    MyThreadId,
    /// Read the pretend capability count.
    GetNumCapabilities(usize),
    /// Set the pretend capability count.
    SetNumCapabilities(usize),
    /// Yielded the processor.
    Yield,
    /// Created a mutable cell.
    NewCRef(CRefId),
    /// Read from a cell without synchronising.
    ReadCRef(CRefId),
    /// Read from a cell, obtaining a compare-and-swap ticket.
    ReadCRefCas(CRefId),
    /// Atomically modified a cell, synchronising.
    ModCRef(CRefId),
    /// Modified a cell via a compare-and-swap loop.
    ModCRefCas(CRefId),
    /// Wrote to a cell without synchronising.
    WriteCRef(CRefId),
    /// Attempted a compare-and-swap; the flag records success.
    CasCRef(CRefId, bool),
    /// A commit pseudo-thread published one buffered write by the given
    /// writer to the given cell.
    CommitCRef(ThreadId, CRefId),
    /// Created a blocking variable.
    NewMVar(MVarId),
    /// Filled a blocking variable, waking the recorded threads.
    PutMVar(MVarId, Vec<ThreadId>),
    /// Blocked trying to fill a blocking variable.
    BlockedPutMVar(MVarId),
    /// Attempted to fill a blocking variable without blocking.
    TryPutMVar(MVarId, bool, Vec<ThreadId>),
    /// Read a blocking variable without emptying it.
    ReadMVar(MVarId),
    /// Attempted to read a blocking variable without blocking.
    TryReadMVar(MVarId, bool),
    /// Blocked trying to read a blocking variable.
    BlockedReadMVar(MVarId),
    /// Emptied a blocking variable, waking the recorded threads.
    TakeMVar(MVarId, Vec<ThreadId>),
    /// Blocked trying to empty a blocking variable.
    BlockedTakeMVar(MVarId),
    /// Attempted to empty a blocking variable without blocking.
    TryTakeMVar(MVarId, bool, Vec<ThreadId>),
    /// Committed a transaction, waking the recorded threads.
    Stm(TTrace, Vec<ThreadId>),
    /// A transaction retried with no alternative; the thread blocked.
    BlockedStm(TTrace),
    /// Installed an exception handler.
    Catching,
    /// Uninstalled an exception handler on normal completion.
    PopCatching,
    /// Raised an exception that a handler caught.
    Throw,
    /// Delivered an exception to another thread.
    ThrowTo(ThreadId),
    /// Blocked delivering an exception to a masked thread.
    BlockedThrowTo(ThreadId),
    /// Died from an exception no handler caught.
    Killed,
    /// Entered a masked region.
    SetMasking(bool, MaskingState),
    /// Left a masked region.
    ResetMasking(bool, MaskingState),
    /// Ran a host-environment action.
    LiftIO,
    /// Produced a value at an observable step.
    Return,
    /// Terminated.
    Stop,
    /// Began a nested execution.
    Subconcurrency,
    /// Finished a nested execution.
    StopSubconcurrency,
}

/// What a thread is about to do, without committing to outcomes.
///
/// Every [`ThreadAction`] except [`ThreadAction::Killed`] rewinds to a
/// lookahead; see [`rewind`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum Lookahead {
    WillFork,
    WillMyThreadId,
    WillGetNumCapabilities,
    WillSetNumCapabilities(usize),
    WillYield,
    WillNewCRef,
    WillReadCRef(CRefId),
    WillReadCRefCas(CRefId),
    WillModCRef(CRefId),
    WillModCRefCas(CRefId),
    WillWriteCRef(CRefId),
    WillCasCRef(CRefId),
    WillCommitCRef(ThreadId, CRefId),
    WillNewMVar,
    WillPutMVar(MVarId),
    WillTryPutMVar(MVarId),
    WillReadMVar(MVarId),
    WillTryReadMVar(MVarId),
    WillTakeMVar(MVarId),
    WillTryTakeMVar(MVarId),
    WillStm,
    WillCatching,
    WillPopCatching,
    WillThrow,
    WillThrowTo(ThreadId),
    WillSetMasking(bool, MaskingState),
    WillResetMasking(bool, MaskingState),
    WillLiftIO,
    WillReturn,
    WillStop,
    WillSubconcurrency,
    WillStopSubconcurrency,
}

/// Recovers the lookahead a thread action was observed from. Total except
/// for [`ThreadAction::Killed`], which is never foreseen: the lookahead of
/// a thread about to die from a planted exception is [`Lookahead::WillThrow`].
pub fn rewind(action: &ThreadAction) -> Option<Lookahead> {
    use ThreadAction::*;
    Some(match action {
        Fork(_) => Lookahead::WillFork,
        MyThreadId => Lookahead::WillMyThreadId,
        GetNumCapabilities(_) => Lookahead::WillGetNumCapabilities,
        SetNumCapabilities(n) => Lookahead::WillSetNumCapabilities(*n),
        Yield => Lookahead::WillYield,
        NewCRef(_) => Lookahead::WillNewCRef,
        ReadCRef(c) => Lookahead::WillReadCRef(c.clone()),
        ReadCRefCas(c) => Lookahead::WillReadCRefCas(c.clone()),
        ModCRef(c) => Lookahead::WillModCRef(c.clone()),
        ModCRefCas(c) => Lookahead::WillModCRefCas(c.clone()),
        WriteCRef(c) => Lookahead::WillWriteCRef(c.clone()),
        CasCRef(c, _) => Lookahead::WillCasCRef(c.clone()),
        CommitCRef(t, c) => Lookahead::WillCommitCRef(t.clone(), c.clone()),
        NewMVar(_) => Lookahead::WillNewMVar,
        PutMVar(m, _) | BlockedPutMVar(m) => Lookahead::WillPutMVar(m.clone()),
        TryPutMVar(m, _, _) => Lookahead::WillTryPutMVar(m.clone()),
        ReadMVar(m) | BlockedReadMVar(m) => Lookahead::WillReadMVar(m.clone()),
        TryReadMVar(m, _) => Lookahead::WillTryReadMVar(m.clone()),
        TakeMVar(m, _) | BlockedTakeMVar(m) => Lookahead::WillTakeMVar(m.clone()),
        TryTakeMVar(m, _, _) => Lookahead::WillTryTakeMVar(m.clone()),
        Stm(_, _) | BlockedStm(_) => Lookahead::WillStm,
        Catching => Lookahead::WillCatching,
        PopCatching => Lookahead::WillPopCatching,
        Throw => Lookahead::WillThrow,
        ThrowTo(t) | BlockedThrowTo(t) => Lookahead::WillThrowTo(t.clone()),
        Killed => return None,
        SetMasking(b, m) => Lookahead::WillSetMasking(*b, *m),
        ResetMasking(b, m) => Lookahead::WillResetMasking(*b, *m),
        LiftIO => Lookahead::WillLiftIO,
        Return => Lookahead::WillReturn,
        Stop => Lookahead::WillStop,
        Subconcurrency => Lookahead::WillSubconcurrency,
        StopSubconcurrency => Lookahead::WillStopSubconcurrency,
    })
}

/// The coarse classification the dependency relation works with.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ActionType {
    /// A cell read that does not synchronise.
    UnsynchronisedRead(CRefId),
    /// A cell write that does not synchronise.
    UnsynchronisedWrite(CRefId),
    /// Anything else that does not synchronise.
    UnsynchronisedOther,
    /// A commit pseudo-thread publishing a buffered write.
    PartiallySynchronisedCommit(CRefId),
    /// A compare-and-swap write.
    PartiallySynchronisedWrite(CRefId),
    /// A compare-and-swap modification loop.
    PartiallySynchronisedModify(CRefId),
    /// A fully synchronising cell modification.
    SynchronisedModify(CRefId),
    /// A blocking-variable operation that reads (take or read).
    SynchronisedRead(MVarId),
    /// A blocking-variable operation that writes (put).
    SynchronisedWrite(MVarId),
    /// Anything else that synchronises (transactions, exception delivery).
    SynchronisedOther,
}

impl ActionType {
    /// The cell this classification touches, if any.
    pub fn cref(&self) -> Option<&CRefId> {
        use ActionType::*;
        match self {
            UnsynchronisedRead(c)
            | UnsynchronisedWrite(c)
            | PartiallySynchronisedCommit(c)
            | PartiallySynchronisedWrite(c)
            | PartiallySynchronisedModify(c)
            | SynchronisedModify(c) => Some(c),
            _ => None,
        }
    }

    /// The blocking variable this classification touches, if any.
    pub fn mvar(&self) -> Option<&MVarId> {
        use ActionType::*;
        match self {
            SynchronisedRead(m) | SynchronisedWrite(m) => Some(m),
            _ => None,
        }
    }

    /// Whether the operation imposes ordering on buffered writes.
    pub fn is_synchronised(&self) -> bool {
        use ActionType::*;
        !matches!(
            self,
            UnsynchronisedRead(_) | UnsynchronisedWrite(_) | UnsynchronisedOther
        )
    }
}

/// Classifies an observed action.
pub fn simplify_action(action: &ThreadAction) -> ActionType {
    use ThreadAction::*;
    match action {
        ReadCRef(c) | ReadCRefCas(c) => ActionType::UnsynchronisedRead(c.clone()),
        WriteCRef(c) => ActionType::UnsynchronisedWrite(c.clone()),
        CommitCRef(_, c) => ActionType::PartiallySynchronisedCommit(c.clone()),
        CasCRef(c, _) => ActionType::PartiallySynchronisedWrite(c.clone()),
        ModCRefCas(c) => ActionType::PartiallySynchronisedModify(c.clone()),
        ModCRef(c) => ActionType::SynchronisedModify(c.clone()),
        TakeMVar(m, _) | BlockedTakeMVar(m) | TryTakeMVar(m, _, _) | ReadMVar(m)
        | BlockedReadMVar(m) | TryReadMVar(m, _) => ActionType::SynchronisedRead(m.clone()),
        PutMVar(m, _) | BlockedPutMVar(m) | TryPutMVar(m, _, _) => {
            ActionType::SynchronisedWrite(m.clone())
        }
        Stm(_, _) | BlockedStm(_) | ThrowTo(_) | BlockedThrowTo(_) | Subconcurrency
        | StopSubconcurrency => ActionType::SynchronisedOther,
        _ => ActionType::UnsynchronisedOther,
    }
}

/// Classifies a foreseen action, consistently with [`simplify_action`].
pub fn simplify_lookahead(lookahead: &Lookahead) -> ActionType {
    use Lookahead::*;
    match lookahead {
        WillReadCRef(c) | WillReadCRefCas(c) => ActionType::UnsynchronisedRead(c.clone()),
        WillWriteCRef(c) => ActionType::UnsynchronisedWrite(c.clone()),
        WillCommitCRef(_, c) => ActionType::PartiallySynchronisedCommit(c.clone()),
        WillCasCRef(c) => ActionType::PartiallySynchronisedWrite(c.clone()),
        WillModCRefCas(c) => ActionType::PartiallySynchronisedModify(c.clone()),
        WillModCRef(c) => ActionType::SynchronisedModify(c.clone()),
        WillTakeMVar(m) | WillTryTakeMVar(m) | WillReadMVar(m) | WillTryReadMVar(m) => {
            ActionType::SynchronisedRead(m.clone())
        }
        WillPutMVar(m) | WillTryPutMVar(m) => ActionType::SynchronisedWrite(m.clone()),
        WillStm | WillThrowTo(_) | WillSubconcurrency | WillStopSubconcurrency => {
            ActionType::SynchronisedOther
        }
        _ => ActionType::UnsynchronisedOther,
    }
}

/// One step of a transaction.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[derive(Serialize, Deserialize)]
pub enum TAction {
    /// Created a transactional variable.
    TNew(TVarId),
    /// Read a transactional variable.
    TRead(TVarId),
    /// Wrote a transactional variable.
    TWrite(TVarId),
    /// Aborted, to be retried when a read variable changes.
    TRetry,
    /// Ran the left branch, and the right if the left retried.
    TOrElse(TTrace, Option<TTrace>),
    /// Raised an exception inside the transaction.
    TThrow,
    /// Ran a guarded trace, and the handler if it threw.
    TCatch(TTrace, Option<TTrace>),
    /// Finished.
    TStop,
}

/// The ordered record of a transaction's steps.
pub type TTrace = Vec<TAction>;

/// Every transactional variable a transaction touched, including in branches
/// that were rolled back.
pub fn tvars_of(trace: &[TAction]) -> BTreeSet<TVarId> {
    let mut tvars = BTreeSet::new();
    collect_tvars(trace, &mut tvars);
    tvars
}

fn collect_tvars(trace: &[TAction], tvars: &mut BTreeSet<TVarId>) {
    for taction in trace {
        match taction {
            TAction::TNew(tv) | TAction::TRead(tv) | TAction::TWrite(tv) => {
                tvars.insert(tv.clone());
            }
            TAction::TOrElse(a, b) | TAction::TCatch(a, b) => {
                collect_tvars(a, tvars);
                if let Some(b) = b {
                    collect_tvars(b, tvars);
                }
            }
            TAction::TRetry | TAction::TThrow | TAction::TStop => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;

    fn sample_actions() -> Vec<ThreadAction> {
        let mut source = IdSource::new();
        let t = source.next_thread_id(None);
        let c = source.next_cref_id(None);
        let m = source.next_mvar_id(None);
        vec![
            ThreadAction::Fork(t.clone()),
            ThreadAction::MyThreadId,
            ThreadAction::GetNumCapabilities(2),
            ThreadAction::SetNumCapabilities(4),
            ThreadAction::Yield,
            ThreadAction::NewCRef(c.clone()),
            ThreadAction::ReadCRef(c.clone()),
            ThreadAction::ReadCRefCas(c.clone()),
            ThreadAction::ModCRef(c.clone()),
            ThreadAction::ModCRefCas(c.clone()),
            ThreadAction::WriteCRef(c.clone()),
            ThreadAction::CasCRef(c.clone(), true),
            ThreadAction::CommitCRef(t.clone(), c.clone()),
            ThreadAction::NewMVar(m.clone()),
            ThreadAction::PutMVar(m.clone(), vec![t.clone()]),
            ThreadAction::BlockedPutMVar(m.clone()),
            ThreadAction::TryPutMVar(m.clone(), false, vec![]),
            ThreadAction::ReadMVar(m.clone()),
            ThreadAction::TryReadMVar(m.clone(), true),
            ThreadAction::BlockedReadMVar(m.clone()),
            ThreadAction::TakeMVar(m.clone(), vec![]),
            ThreadAction::BlockedTakeMVar(m.clone()),
            ThreadAction::TryTakeMVar(m.clone(), true, vec![t.clone()]),
            ThreadAction::Stm(vec![TAction::TStop], vec![]),
            ThreadAction::BlockedStm(vec![TAction::TRetry]),
            ThreadAction::Catching,
            ThreadAction::PopCatching,
            ThreadAction::Throw,
            ThreadAction::ThrowTo(t.clone()),
            ThreadAction::BlockedThrowTo(t),
            ThreadAction::SetMasking(false, MaskingState::MaskedInterruptible),
            ThreadAction::ResetMasking(false, MaskingState::Unmasked),
            ThreadAction::LiftIO,
            ThreadAction::Return,
            ThreadAction::Stop,
            ThreadAction::Subconcurrency,
            ThreadAction::StopSubconcurrency,
        ]
    }

    #[test]
    fn rewind_is_total_except_killed() {
        for action in sample_actions() {
            assert!(rewind(&action).is_some(), "no lookahead for {:?}", action);
        }
        assert_eq!(rewind(&ThreadAction::Killed), None);
    }

    #[test]
    fn rewind_preserves_classification() {
        for action in sample_actions() {
            let lookahead = rewind(&action).unwrap();
            assert_eq!(
                simplify_action(&action),
                simplify_lookahead(&lookahead),
                "classification drifted for {:?}",
                action
            );
        }
    }

    #[test]
    fn blocked_variants_rewind_to_the_underlying_operation() {
        let mut source = IdSource::new();
        let m = source.next_mvar_id(None);
        assert_eq!(
            rewind(&ThreadAction::BlockedPutMVar(m.clone())),
            rewind(&ThreadAction::PutMVar(m.clone(), vec![]))
        );
        assert_eq!(
            rewind(&ThreadAction::BlockedTakeMVar(m.clone())),
            rewind(&ThreadAction::TakeMVar(m, vec![]))
        );
    }

    #[test]
    fn tvars_of_includes_rolled_back_branches() {
        let mut source = IdSource::new();
        let a = source.next_tvar_id(None);
        let b = source.next_tvar_id(None);
        let c = source.next_tvar_id(None);
        let trace = vec![
            TAction::TRead(a.clone()),
            TAction::TOrElse(
                vec![TAction::TWrite(b.clone()), TAction::TRetry],
                Some(vec![TAction::TRead(c.clone())]),
            ),
            TAction::TStop,
        ];
        let tvars = tvars_of(&trace);
        assert!(tvars.contains(&a));
        assert!(tvars.contains(&b));
        assert!(tvars.contains(&c));
        assert_eq!(tvars.len(), 3);
    }
}
