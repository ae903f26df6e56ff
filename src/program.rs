//! The capability surface simulated programs are written against.
//!
//! A program is a [`Conc`] value: a suspended computation that, given its
//! continuation, reifies into a chain of primitive actions. The runtime
//! interprets one primitive per scheduler step, which is what makes every
//! interleaving of primitives explorable. Nothing here runs host threads;
//! "threads" are continuations owned by the runtime.
//!
//! Cell, blocking-variable, and transactional values are stored behind
//! `Rc<dyn Any>` and recovered by downcast in the typed handles. The
//! downcasts cannot fail for programs built through this module, so a
//! failure panics with a diagnostic rather than surfacing as a result.

use crate::action::MaskingState;
use crate::id::{CRefId, MVarId, ThreadId, TVarId};
use crate::trace::Failure;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

/// An untyped stored value.
pub(crate) type Value = Rc<dyn Any>;

/// A continuation expecting a `T`.
pub(crate) type Cont<T> = Box<dyn FnOnce(T) -> Action>;

/// An exception handler: consumes the exception if its type matches,
/// otherwise passes it back for the next handler down the stack.
pub(crate) type Handler = Box<dyn FnOnce(Value) -> Result<Action, Value>>;

/// A transaction continuation expecting a `T`.
pub(crate) type StmCont<T> = Box<dyn FnOnce(T) -> StmAction>;

/// An unapplied transaction, used where the interpreter must delimit a
/// nested run (`or_else` branches, `catch` handlers, the transaction body).
pub(crate) type StmProgram = Box<dyn FnOnce(StmCont<Value>) -> StmAction>;

/// A transaction-level exception handler.
pub(crate) type StmHandler = Box<dyn FnOnce(Value) -> Result<StmProgram, Value>>;

pub(crate) fn downcast<T: Clone + 'static>(value: &Value, what: &str) -> T {
    value
        .downcast_ref::<T>()
        .unwrap_or_else(|| panic!("{} produced a value of an unexpected type", what))
        .clone()
}

/// The internal compare-and-swap witness: which cell was read, how many
/// writes it had seen, and the value observed.
#[derive(Clone)]
pub(crate) struct CasToken {
    pub(crate) cref: CRefId,
    pub(crate) count: u64,
    pub(crate) value: Value,
}

/// The reified primitives. The runtime consumes exactly one constructor per
/// scheduler step.
pub(crate) enum Action {
    Fork(Option<String>, Box<Action>, Cont<ThreadId>),
    MyThreadId(Cont<ThreadId>),
    GetNumCapabilities(Cont<usize>),
    SetNumCapabilities(usize, Box<Action>),
    Yield(Box<Action>),
    NewCRef(Option<String>, Value, Cont<CRefId>),
    ReadCRef(CRefId, Cont<Value>),
    ReadCRefCas(CRefId, Cont<CasToken>),
    ModCRef(CRefId, Box<dyn FnOnce(&Value) -> Value>, Cont<Value>),
    ModCRefCas(CRefId, Box<dyn FnOnce(&Value) -> Value>, Cont<Value>),
    WriteCRef(CRefId, Value, Box<Action>),
    CasCRef(CRefId, CasToken, Value, Cont<(bool, CasToken)>),
    NewMVar(Option<String>, Cont<MVarId>),
    PutMVar(MVarId, Value, Box<Action>),
    TryPutMVar(MVarId, Value, Cont<bool>),
    ReadMVar(MVarId, Cont<Value>),
    TryReadMVar(MVarId, Cont<Option<Value>>),
    TakeMVar(MVarId, Cont<Value>),
    TryTakeMVar(MVarId, Cont<Option<Value>>),
    Atomically(Box<dyn Fn() -> StmProgram>, Cont<Value>),
    Catching(Handler, Box<Action>),
    PopCatching(Box<Action>),
    Throw(Value),
    ThrowTo(ThreadId, Value, Box<Action>),
    SetMasking(MaskingState, Box<Action>),
    ResetMasking(Box<Action>),
    Lift(Box<dyn FnOnce() -> Action>),
    Return(Box<Action>),
    Stop(Box<dyn FnOnce()>),
    Subconcurrency(Box<Action>, Box<dyn FnOnce(Result<Value, Failure>) -> Action>),
    StopSubconcurrency(Box<Action>),
}

/// The reified transaction primitives.
pub(crate) enum StmAction {
    SNew(Option<String>, Value, StmCont<TVarId>),
    SRead(TVarId, StmCont<Value>),
    SWrite(TVarId, Value, Box<StmAction>),
    SRetry,
    SOrElse(StmProgram, StmProgram, StmCont<Value>),
    SCatch(StmProgram, StmHandler, StmCont<Value>),
    SThrow(Value),
    SStop(Box<dyn FnOnce()>),
}

/// A computation in the simulated concurrent world, producing a `T`.
///
/// Sequencing is explicit: [`Conc::and_then`] chains a dependent step,
/// [`Conc::then`] sequences an independent one. `Conc` values are inert
/// until handed to the exploration entry points.
pub struct Conc<T> {
    pub(crate) run: Box<dyn FnOnce(Cont<T>) -> Action>,
}

impl<T: 'static> Conc<T> {
    pub(crate) fn from_run(run: impl FnOnce(Cont<T>) -> Action + 'static) -> Self {
        Conc { run: Box::new(run) }
    }

    /// A computation that immediately produces `value`, with no observable
    /// step.
    pub fn pure(value: T) -> Self {
        Conc::from_run(move |k| k(value))
    }

    /// Like [`Conc::pure`], but as an observable scheduling point.
    pub fn ret(value: T) -> Self {
        Conc::from_run(move |k| Action::Return(Box::new(k(value))))
    }

    /// The host escape hatch: runs `f` outside the simulation when this
    /// step is scheduled.
    pub fn lift(f: impl FnOnce() -> T + 'static) -> Self {
        Conc::from_run(move |k| Action::Lift(Box::new(move || k(f()))))
    }

    /// Sequences a dependent computation.
    pub fn and_then<U: 'static>(self, f: impl FnOnce(T) -> Conc<U> + 'static) -> Conc<U> {
        Conc::from_run(move |k| (self.run)(Box::new(move |t| (f(t).run)(k))))
    }

    /// Transforms the produced value.
    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Conc<U> {
        self.and_then(move |t| Conc::pure(f(t)))
    }

    /// Sequences an independent computation, discarding this one's value.
    pub fn then<U: 'static>(self, next: Conc<U>) -> Conc<U> {
        self.and_then(move |_| next)
    }

    /// Discards the produced value.
    pub fn void(self) -> Conc<()> {
        self.map(|_| ())
    }
}

/// Starts a new thread running `body`, producing the child's id. The child
/// inherits the parent's masking state.
pub fn fork(name: Option<&str>, body: Conc<()>) -> Conc<ThreadId> {
    let name = name.map(str::to_owned);
    Conc::from_run(move |k| {
        let child = (body.run)(Box::new(|()| Action::Stop(Box::new(|| {}))));
        Action::Fork(name, Box::new(child), k)
    })
}

/// Produces the running thread's own id.
pub fn my_thread_id() -> Conc<ThreadId> {
    Conc::from_run(Action::MyThreadId)
}

/// Cedes the processor so another thread may run.
pub fn yield_thread() -> Conc<()> {
    Conc::from_run(|k| Action::Yield(Box::new(k(()))))
}

/// Waits for a simulated duration. There is no simulated clock, so this is
/// a yield: any other thread may run in the interim.
pub fn thread_delay() -> Conc<()> {
    yield_thread()
}

/// Reads the pretend capability count.
pub fn get_num_capabilities() -> Conc<usize> {
    Conc::from_run(Action::GetNumCapabilities)
}

/// Sets the pretend capability count. Purely cosmetic: scheduling is not
/// affected.
pub fn set_num_capabilities(n: usize) -> Conc<()> {
    Conc::from_run(move |k| Action::SetNumCapabilities(n, Box::new(k(()))))
}

/// A mutable cell with relaxed-memory semantics. Reads and writes do not
/// synchronise; the modify and compare-and-swap operations do.
pub struct CRef<T> {
    id: CRefId,
    _values: PhantomData<fn(T) -> T>,
}

impl<T> Clone for CRef<T> {
    fn clone(&self) -> Self {
        CRef { id: self.id.clone(), _values: PhantomData }
    }
}

/// Creates a cell holding `value`.
pub fn new_cref<T: Clone + 'static>(name: Option<&str>, value: T) -> Conc<CRef<T>> {
    let name = name.map(str::to_owned);
    Conc::from_run(move |k| {
        Action::NewCRef(
            name,
            Rc::new(value),
            Box::new(|id| k(CRef { id, _values: PhantomData })),
        )
    })
}

/// A compare-and-swap witness obtained from [`CRef::read_for_cas`]. The
/// swap succeeds only if no write to the cell has been committed since.
pub struct Ticket<T> {
    token: CasToken,
    _values: PhantomData<fn(T) -> T>,
}

impl<T> Clone for Ticket<T> {
    fn clone(&self) -> Self {
        Ticket { token: self.token.clone(), _values: PhantomData }
    }
}

impl<T: Clone + 'static> Ticket<T> {
    /// The value observed when the ticket was taken.
    pub fn peek(&self) -> T {
        downcast::<T>(&self.token.value, "Ticket::peek")
    }
}

impl<T: Clone + 'static> CRef<T> {
    /// This cell's identifier.
    pub fn id(&self) -> &CRefId {
        &self.id
    }

    /// Reads the cell without synchronising. A thread sees its own buffered
    /// writes; other threads see only committed values.
    pub fn read(&self) -> Conc<T> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::ReadCRef(id, Box::new(move |v| k(downcast::<T>(&v, "CRef::read"))))
        })
    }

    /// Writes the cell without synchronising. Under a relaxed memory model
    /// the write lands in a buffer until a commit step publishes it.
    pub fn write(&self, value: T) -> Conc<()> {
        let id = self.id.clone();
        Conc::from_run(move |k| Action::WriteCRef(id, Rc::new(value), Box::new(k(()))))
    }

    /// Atomically replaces the contents with `f` applied to them,
    /// synchronising, and produces the new value.
    pub fn modify(&self, f: impl FnOnce(&T) -> T + 'static) -> Conc<T> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::ModCRef(
                id,
                Box::new(move |v: &Value| -> Value {
                    Rc::new(f(v.downcast_ref::<T>().unwrap_or_else(|| {
                        panic!("CRef::modify found a value of an unexpected type")
                    })))
                }),
                Box::new(move |v| k(downcast::<T>(&v, "CRef::modify"))),
            )
        })
    }

    /// Like [`CRef::modify`] but implemented as a compare-and-swap loop.
    pub fn modify_cas(&self, f: impl FnOnce(&T) -> T + 'static) -> Conc<T> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::ModCRefCas(
                id,
                Box::new(move |v: &Value| -> Value {
                    Rc::new(f(v.downcast_ref::<T>().unwrap_or_else(|| {
                        panic!("CRef::modify_cas found a value of an unexpected type")
                    })))
                }),
                Box::new(move |v| k(downcast::<T>(&v, "CRef::modify_cas"))),
            )
        })
    }

    /// Reads the cell, producing a [`Ticket`] for a later swap.
    pub fn read_for_cas(&self) -> Conc<Ticket<T>> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::ReadCRefCas(
                id,
                Box::new(|token| k(Ticket { token, _values: PhantomData })),
            )
        })
    }

    /// Attempts to replace the contents with `value`, succeeding only if
    /// the cell has not been written since `ticket` was taken. Produces the
    /// success flag and a fresh ticket either way.
    pub fn cas(&self, ticket: Ticket<T>, value: T) -> Conc<(bool, Ticket<T>)> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::CasCRef(
                id,
                ticket.token,
                Rc::new(value),
                Box::new(|(ok, token)| k((ok, Ticket { token, _values: PhantomData }))),
            )
        })
    }
}

/// A single-slot blocking variable: `put` blocks while full, `take` and
/// `read` block while empty.
pub struct MVar<T> {
    id: MVarId,
    _values: PhantomData<fn(T) -> T>,
}

impl<T> Clone for MVar<T> {
    fn clone(&self) -> Self {
        MVar { id: self.id.clone(), _values: PhantomData }
    }
}

/// Creates an empty blocking variable.
pub fn new_mvar<T: Clone + 'static>(name: Option<&str>) -> Conc<MVar<T>> {
    let name = name.map(str::to_owned);
    Conc::from_run(move |k| {
        Action::NewMVar(name, Box::new(|id| k(MVar { id, _values: PhantomData })))
    })
}

impl<T: Clone + 'static> MVar<T> {
    /// This variable's identifier.
    pub fn id(&self) -> &MVarId {
        &self.id
    }

    /// Fills the variable, blocking while it is full.
    pub fn put(&self, value: T) -> Conc<()> {
        let id = self.id.clone();
        Conc::from_run(move |k| Action::PutMVar(id, Rc::new(value), Box::new(k(()))))
    }

    /// Fills the variable if it is empty; produces whether it did.
    pub fn try_put(&self, value: T) -> Conc<bool> {
        let id = self.id.clone();
        Conc::from_run(move |k| Action::TryPutMVar(id, Rc::new(value), k))
    }

    /// Empties the variable, blocking while it is empty.
    pub fn take(&self) -> Conc<T> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::TakeMVar(id, Box::new(move |v| k(downcast::<T>(&v, "MVar::take"))))
        })
    }

    /// Empties the variable if it is full.
    pub fn try_take(&self) -> Conc<Option<T>> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::TryTakeMVar(
                id,
                Box::new(move |v| k(v.map(|v| downcast::<T>(&v, "MVar::try_take")))),
            )
        })
    }

    /// Reads the variable without emptying it, blocking while it is empty.
    pub fn read(&self) -> Conc<T> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::ReadMVar(id, Box::new(move |v| k(downcast::<T>(&v, "MVar::read"))))
        })
    }

    /// Reads the variable without emptying it, if it is full.
    pub fn try_read(&self) -> Conc<Option<T>> {
        let id = self.id.clone();
        Conc::from_run(move |k| {
            Action::TryReadMVar(
                id,
                Box::new(move |v| k(v.map(|v| downcast::<T>(&v, "MVar::try_read")))),
            )
        })
    }
}

/// The exception thrown by [`kill`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThreadKilled;

/// Raises an exception in the running thread.
pub fn throw<E: Any, T: 'static>(exception: E) -> Conc<T> {
    Conc::from_run(move |_| Action::Throw(Rc::new(exception)))
}

/// Runs `action`; if it raises an exception of type `E`, rolls control back
/// to `handler`. Exceptions of other types keep unwinding.
pub fn catch<E: Any + Clone, T: 'static>(
    action: Conc<T>,
    handler: impl FnOnce(E) -> Conc<T> + 'static,
) -> Conc<T> {
    Conc::from_run(move |k| {
        let k = Rc::new(RefCell::new(Some(k)));
        let handler_k = Rc::clone(&k);
        let installed: Handler = Box::new(move |exception| match exception.downcast::<E>() {
            Ok(e) => {
                let k = handler_k
                    .borrow_mut()
                    .take()
                    .expect("catch continuation already consumed");
                Ok((handler((*e).clone()).run)(k))
            }
            Err(exception) => Err(exception),
        });
        let body = (action.run)(Box::new(move |t| {
            let k = k
                .borrow_mut()
                .take()
                .expect("catch continuation already consumed");
            Action::PopCatching(Box::new(k(t)))
        }));
        Action::Catching(installed, Box::new(body))
    })
}

/// Raises an exception in another thread. Delivery is synchronous: if the
/// target is masked and not interruptibly blocked, the caller blocks until
/// it becomes interruptible or terminates.
pub fn throw_to<E: Any>(target: ThreadId, exception: E) -> Conc<()> {
    Conc::from_run(move |k| Action::ThrowTo(target, Rc::new(exception), Box::new(k(()))))
}

/// Raises [`ThreadKilled`] in another thread.
pub fn kill(target: ThreadId) -> Conc<()> {
    throw_to(target, ThreadKilled)
}

fn mask<T: 'static>(state: MaskingState, inner: Conc<T>) -> Conc<T> {
    Conc::from_run(move |k| {
        let body = (inner.run)(Box::new(move |t| Action::ResetMasking(Box::new(k(t)))));
        Action::SetMasking(state, Box::new(body))
    })
}

/// Runs `inner` with asynchronous exceptions masked. Blocking operations
/// inside remain interruptible.
pub fn mask_interruptible<T: 'static>(inner: Conc<T>) -> Conc<T> {
    mask(MaskingState::MaskedInterruptible, inner)
}

/// Runs `inner` with asynchronous exceptions masked, even at blocking
/// operations.
pub fn mask_uninterruptible<T: 'static>(inner: Conc<T>) -> Conc<T> {
    mask(MaskingState::MaskedUninterruptible, inner)
}

/// Runs `inner` as a self-contained execution, producing its value or its
/// failure. Legal only when no other thread is live and not nested;
/// violations fail the whole execution with
/// [`Failure::IllegalSubconcurrency`].
pub fn subconcurrency<T: 'static>(inner: Conc<T>) -> Conc<Result<T, Failure>> {
    Conc::from_run(move |k| {
        let slot: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let write_slot = Rc::clone(&slot);
        let body = (inner.run)(Box::new(move |t| {
            Action::Stop(Box::new(move || {
                *write_slot.borrow_mut() = Some(Rc::new(t));
            }))
        }));
        Action::Subconcurrency(
            Box::new(body),
            Box::new(move |outcome| {
                k(outcome.map(|_| {
                    let value = slot
                        .borrow_mut()
                        .take()
                        .expect("nested execution finished without a value");
                    let value = value
                        .downcast::<T>()
                        .unwrap_or_else(|_| panic!("nested execution value had an unexpected type"));
                    Rc::try_unwrap(value)
                        .unwrap_or_else(|_| panic!("nested execution value still shared"))
                }))
            }),
        )
    })
}

/// A computation inside a transaction, producing a `T`.
pub struct Stm<T> {
    pub(crate) run: Box<dyn FnOnce(StmCont<T>) -> StmAction>,
}

impl<T: 'static> Stm<T> {
    pub(crate) fn from_run(run: impl FnOnce(StmCont<T>) -> StmAction + 'static) -> Self {
        Stm { run: Box::new(run) }
    }

    /// A transaction step that immediately produces `value`.
    pub fn pure(value: T) -> Self {
        Stm::from_run(move |k| k(value))
    }

    /// Sequences a dependent transaction step.
    pub fn and_then<U: 'static>(self, f: impl FnOnce(T) -> Stm<U> + 'static) -> Stm<U> {
        Stm::from_run(move |k| (self.run)(Box::new(move |t| (f(t).run)(k))))
    }

    /// Transforms the produced value.
    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> Stm<U> {
        self.and_then(move |t| Stm::pure(f(t)))
    }

    /// Sequences an independent transaction step.
    pub fn then<U: 'static>(self, next: Stm<U>) -> Stm<U> {
        self.and_then(move |_| next)
    }
}

/// A transactional variable.
pub struct TVar<T> {
    id: TVarId,
    _values: PhantomData<fn(T) -> T>,
}

impl<T> Clone for TVar<T> {
    fn clone(&self) -> Self {
        TVar { id: self.id.clone(), _values: PhantomData }
    }
}

/// Creates a transactional variable holding `value`.
pub fn new_tvar<T: Clone + 'static>(name: Option<&str>, value: T) -> Stm<TVar<T>> {
    let name = name.map(str::to_owned);
    Stm::from_run(move |k| {
        StmAction::SNew(
            name,
            Rc::new(value),
            Box::new(|id| k(TVar { id, _values: PhantomData })),
        )
    })
}

impl<T: Clone + 'static> TVar<T> {
    /// This variable's identifier.
    pub fn id(&self) -> &TVarId {
        &self.id
    }

    /// Reads the variable. Within a transaction a read observes the
    /// transaction's own earlier writes.
    pub fn read(&self) -> Stm<T> {
        let id = self.id.clone();
        Stm::from_run(move |k| {
            StmAction::SRead(id, Box::new(move |v| k(downcast::<T>(&v, "TVar::read"))))
        })
    }

    /// Writes the variable. The write is visible outside the transaction
    /// only once the transaction commits.
    pub fn write(&self, value: T) -> Stm<()> {
        let id = self.id.clone();
        Stm::from_run(move |k| StmAction::SWrite(id, Rc::new(value), Box::new(k(()))))
    }
}

/// Abandons the transaction. The thread blocks until another transaction
/// writes one of the variables this one had read, then re-runs from the top.
pub fn retry<T: 'static>() -> Stm<T> {
    Stm::from_run(|_| StmAction::SRetry)
}

/// Runs `a`; if it retries, rolls back its writes and runs `b` instead.
/// Exceptions from `a` propagate without trying `b`.
pub fn or_else<T: Clone + 'static>(a: Stm<T>, b: Stm<T>) -> Stm<T> {
    Stm::from_run(move |k| {
        StmAction::SOrElse(
            stm_program(a),
            stm_program(b),
            Box::new(move |v| k(downcast::<T>(&v, "or_else"))),
        )
    })
}

/// Raises an exception inside the transaction, rolling back its writes.
pub fn stm_throw<E: Any, T: 'static>(exception: E) -> Stm<T> {
    Stm::from_run(move |_| StmAction::SThrow(Rc::new(exception)))
}

/// Runs `action` inside the transaction; if it raises an `E`, rolls back
/// its writes and runs `handler`.
pub fn stm_catch<E: Any + Clone, T: Clone + 'static>(
    action: Stm<T>,
    handler: impl FnOnce(E) -> Stm<T> + 'static,
) -> Stm<T> {
    Stm::from_run(move |k| {
        let installed: StmHandler = Box::new(move |exception| match exception.downcast::<E>() {
            Ok(e) => Ok(stm_program(handler((*e).clone()))),
            Err(exception) => Err(exception),
        });
        StmAction::SCatch(
            stm_program(action),
            installed,
            Box::new(move |v| k(downcast::<T>(&v, "stm_catch"))),
        )
    })
}

/// Runs a transaction atomically, producing its value.
///
/// The transaction is given as a builder because a transaction that retries
/// is re-run from the top once one of the variables it read is written, and
/// every re-run needs a fresh copy.
pub fn atomically<T: Clone + 'static>(build: impl Fn() -> Stm<T> + 'static) -> Conc<T> {
    Conc::from_run(move |k| {
        Action::Atomically(
            Box::new(move || stm_program(build())),
            Box::new(move |v| k(downcast::<T>(&v, "atomically"))),
        )
    })
}

fn stm_program<T: Clone + 'static>(stm: Stm<T>) -> StmProgram {
    Box::new(move |fin| (stm.run)(Box::new(move |t| fin(Rc::new(t)))))
}

/// The lookahead for an action chain's head, used by the runtime when
/// presenting runnable threads to a scheduler.
pub(crate) fn lookahead_of(action: &Action) -> crate::action::Lookahead {
    use crate::action::Lookahead::*;
    match action {
        Action::Fork(_, _, _) => WillFork,
        Action::MyThreadId(_) => WillMyThreadId,
        Action::GetNumCapabilities(_) => WillGetNumCapabilities,
        Action::SetNumCapabilities(n, _) => WillSetNumCapabilities(*n),
        Action::Yield(_) => WillYield,
        Action::NewCRef(_, _, _) => WillNewCRef,
        Action::ReadCRef(c, _) => WillReadCRef(c.clone()),
        Action::ReadCRefCas(c, _) => WillReadCRefCas(c.clone()),
        Action::ModCRef(c, _, _) => WillModCRef(c.clone()),
        Action::ModCRefCas(c, _, _) => WillModCRefCas(c.clone()),
        Action::WriteCRef(c, _, _) => WillWriteCRef(c.clone()),
        Action::CasCRef(c, _, _, _) => WillCasCRef(c.clone()),
        Action::NewMVar(_, _) => WillNewMVar,
        Action::PutMVar(m, _, _) => WillPutMVar(m.clone()),
        Action::TryPutMVar(m, _, _) => WillTryPutMVar(m.clone()),
        Action::ReadMVar(m, _) => WillReadMVar(m.clone()),
        Action::TryReadMVar(m, _) => WillTryReadMVar(m.clone()),
        Action::TakeMVar(m, _) => WillTakeMVar(m.clone()),
        Action::TryTakeMVar(m, _) => WillTryTakeMVar(m.clone()),
        Action::Atomically(_, _) => WillStm,
        Action::Catching(_, _) => WillCatching,
        Action::PopCatching(_) => WillPopCatching,
        Action::Throw(_) => WillThrow,
        Action::ThrowTo(t, _, _) => WillThrowTo(t.clone()),
        Action::SetMasking(state, _) => WillSetMasking(false, *state),
        Action::ResetMasking(_) => WillResetMasking(false, MaskingState::Unmasked),
        Action::Lift(_) => WillLiftIO,
        Action::Return(_) => WillReturn,
        Action::Stop(_) => WillStop,
        Action::Subconcurrency(_, _) => WillSubconcurrency,
        Action::StopSubconcurrency(_) => WillStopSubconcurrency,
    }
}
