//! Private module for selective re-export.

use crate::action::MaskingState;
use crate::id::{MVarId, ThreadId, TVarId};
use crate::program::{Action, Handler};
use std::collections::{BTreeMap, BTreeSet};

/// Why a thread is not runnable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum BlockedOn {
    /// Waiting for a blocking variable to become full (a take or a read).
    MVarFull(MVarId),
    /// Waiting for a blocking variable to become empty (a put).
    MVarEmpty(MVarId),
    /// Waiting, after a retried transaction, for any of these variables to
    /// be written.
    TVars(BTreeSet<TVarId>),
    /// Waiting to deliver an exception to a thread that is masked.
    Mask(ThreadId),
}

/// An installed exception handler, with enough saved state to resume the
/// thread consistently if it fires.
pub(crate) struct HandlerEntry {
    pub handler: Handler,
    pub masking: MaskingState,
    pub masking_depth: usize,
}

/// One logical thread: a suspended continuation plus its scheduling state.
pub(crate) struct Thread {
    pub continuation: Option<Action>,
    pub blocked_on: Option<BlockedOn>,
    pub masking: MaskingState,
    pub masking_stack: Vec<MaskingState>,
    pub handlers: Vec<HandlerEntry>,
}

impl Thread {
    pub fn new(continuation: Action, masking: MaskingState) -> Thread {
        Thread {
            continuation: Some(continuation),
            blocked_on: None,
            masking,
            masking_stack: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Whether an asynchronous exception may be delivered right now.
    /// Unmasked threads always accept; interruptibly-masked threads accept
    /// only while blocked.
    pub fn interruptible(&self) -> bool {
        match self.masking {
            MaskingState::Unmasked => true,
            MaskingState::MaskedInterruptible => self.blocked_on.is_some(),
            MaskingState::MaskedUninterruptible => false,
        }
    }
}

/// The thread table. Ordered so that every scan is in ascending thread
/// order, which keeps executions bit-identical for identical schedules.
#[derive(Default)]
pub(crate) struct Threads(pub BTreeMap<ThreadId, Thread>);

impl Threads {
    pub fn get(&self, tid: &ThreadId) -> Option<&Thread> {
        self.0.get(tid)
    }

    pub fn get_mut(&mut self, tid: &ThreadId) -> Option<&mut Thread> {
        self.0.get_mut(tid)
    }

    pub fn alive(&self, tid: &ThreadId) -> bool {
        self.0.contains_key(tid)
    }

    pub fn create(&mut self, tid: ThreadId, continuation: Action, masking: MaskingState) {
        let already = self.0.insert(tid.clone(), Thread::new(continuation, masking));
        assert!(already.is_none(), "thread {} created twice", tid);
    }

    pub fn remove(&mut self, tid: &ThreadId) {
        self.0.remove(tid);
    }

    /// Marks a thread blocked. Its continuation must already have been put
    /// back so the operation retries when the thread is woken.
    pub fn block(&mut self, tid: &ThreadId, on: BlockedOn) {
        let thread = self.0.get_mut(tid).expect("blocking a dead thread");
        thread.blocked_on = Some(on);
    }

    /// Wakes every thread whose block reason satisfies `matches`, in
    /// ascending thread order, and reports who was woken.
    pub fn wake(&mut self, matches: impl Fn(&BlockedOn) -> bool) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        for (tid, thread) in self.0.iter_mut() {
            if let Some(on) = &thread.blocked_on {
                if matches(on) {
                    thread.blocked_on = None;
                    woken.push(tid.clone());
                }
            }
        }
        woken
    }

    /// Every unblocked thread, in ascending order.
    pub fn runnable(&self) -> impl Iterator<Item = (&ThreadId, &Thread)> {
        self.0.iter().filter(|(_, t)| t.blocked_on.is_none())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;

    fn noop() -> Action {
        Action::Stop(Box::new(|| {}))
    }

    #[test]
    fn waking_clears_block_reasons_in_thread_order() {
        let mut source = IdSource::new();
        let mut threads = Threads::default();
        let main = ThreadId::initial();
        let t1 = source.next_thread_id(None);
        let t2 = source.next_thread_id(None);
        let m = source.next_mvar_id(None);
        threads.create(main, noop(), MaskingState::Unmasked);
        threads.create(t2.clone(), noop(), MaskingState::Unmasked);
        threads.create(t1.clone(), noop(), MaskingState::Unmasked);
        threads.block(&t2, BlockedOn::MVarFull(m.clone()));
        threads.block(&t1, BlockedOn::MVarFull(m.clone()));

        let woken = threads.wake(|on| *on == BlockedOn::MVarFull(m.clone()));
        assert_eq!(woken, vec![t1.clone(), t2.clone()]);
        assert!(threads.get(&t1).unwrap().blocked_on.is_none());
        assert!(threads.get(&t2).unwrap().blocked_on.is_none());
    }

    #[test]
    fn interruptibility_tracks_masking_and_blocking() {
        let mut source = IdSource::new();
        let m = source.next_mvar_id(None);
        let mut thread = Thread::new(noop(), MaskingState::Unmasked);
        assert!(thread.interruptible());

        thread.masking = MaskingState::MaskedInterruptible;
        assert!(!thread.interruptible());
        thread.blocked_on = Some(BlockedOn::MVarEmpty(m));
        assert!(thread.interruptible());

        thread.masking = MaskingState::MaskedUninterruptible;
        assert!(!thread.interruptible());
    }
}
