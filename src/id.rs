//! Identifier families for the simulated world.
//!
//! Threads, mutable cells, blocking variables, and transactional variables
//! each draw identifiers from their own family. An identifier is an optional
//! display name plus a sequence number; equality, ordering, and hashing use
//! the sequence number alone, so two identically-named identifiers from
//! different allocations never collide.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

/// The shared representation of every identifier family.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Id {
    name: Option<String>,
    seq: i64,
}

impl Id {
    pub(crate) fn new(name: Option<String>, seq: i64) -> Self {
        Id { name, seq }
    }

    /// The display name this identifier was allocated under, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The sequence number within the family.
    pub fn seq(&self) -> i64 {
        self.seq
    }
}

impl PartialEq for Id {
    fn eq(&self, rhs: &Self) -> bool {
        self.seq == rhs.seq
    }
}
impl Eq for Id {}

impl PartialOrd for Id {
    fn partial_cmp(&self, rhs: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(rhs))
    }
}
impl Ord for Id {
    fn cmp(&self, rhs: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&rhs.seq)
    }
}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // A single integer write keeps these usable with no-op hashers.
        state.write_i64(self.seq);
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.seq),
        }
    }
}

macro_rules! id_family {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[derive(Serialize, Deserialize)]
        pub struct $name(pub(crate) Id);

        impl $name {
            /// The display name, if one was supplied at allocation.
            pub fn name(&self) -> Option<&str> {
                self.0.name()
            }

            /// The sequence number within this family.
            pub fn seq(&self) -> i64 {
                self.0.seq()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl nohash_hasher::IsEnabled for $name {}
    };
}

id_family! {
    /// Identifies a logical thread.
    ThreadId
}
id_family! {
    /// Identifies a mutable cell with relaxed-memory semantics.
    CRefId
}
id_family! {
    /// Identifies a single-slot blocking variable.
    MVarId
}
id_family! {
    /// Identifies a transactional variable.
    TVarId
}

impl ThreadId {
    /// The first thread of every execution: sequence number 0, named "main".
    pub fn initial() -> ThreadId {
        ThreadId(Id::new(Some("main".to_owned()), 0))
    }

    /// Whether this is a commit pseudo-thread rather than a real thread.
    ///
    /// Commit pseudo-threads have negative sequence numbers so they order
    /// below every real thread.
    pub fn is_commit(&self) -> bool {
        self.0.seq < 0
    }

    /// The pseudo-thread that commits buffered writes for `writer`.
    ///
    /// Under total store order there is one buffer per writer; under partial
    /// store order there is one per (writer, cell). The derived sequence
    /// numbers are negative and injective across both keyings.
    pub(crate) fn commit(writer: &ThreadId, cell: Option<&CRefId>) -> ThreadId {
        let w = writer.0.seq;
        let seq = match cell {
            None => -(w + 1),
            Some(c) => -(w + 1 + 10_000 * (c.0.seq + 1)),
        };
        ThreadId(Id::new(None, seq))
    }
}

/// Allocates identifiers, tracking the next sequence number and the display
/// names already used within each family. The first use of a name keeps it
/// bare; later uses receive a numeric suffix counting from 1.
#[derive(Clone, Debug, Default)]
pub struct IdSource {
    threads: Family,
    crefs: Family,
    mvars: Family,
    tvars: Family,
}

#[derive(Clone, Debug, Default)]
struct Family {
    next: i64,
    used: HashMap<String, usize>,
}

impl Family {
    fn allocate(&mut self, name: Option<&str>) -> Id {
        let seq = self.next;
        self.next += 1;
        let name = name.map(|n| {
            let uses = self.used.entry(n.to_owned()).or_insert(0);
            let display = if *uses == 0 {
                n.to_owned()
            } else {
                format!("{}{}", n, uses)
            };
            *uses += 1;
            display
        });
        Id::new(name, seq)
    }
}

impl IdSource {
    /// An identifier source with the initial thread already allocated.
    pub fn new() -> IdSource {
        let mut source = IdSource::default();
        let initial = source.next_thread_id(Some("main"));
        assert_eq!(initial, ThreadId::initial());
        source
    }

    pub fn next_thread_id(&mut self, name: Option<&str>) -> ThreadId {
        ThreadId(self.threads.allocate(name))
    }

    pub fn next_cref_id(&mut self, name: Option<&str>) -> CRefId {
        CRefId(self.crefs.allocate(name))
    }

    pub fn next_mvar_id(&mut self, name: Option<&str>) -> MVarId {
        MVarId(self.mvars.allocate(name))
    }

    pub fn next_tvar_id(&mut self, name: Option<&str>) -> TVarId {
        TVarId(self.tvars.allocate(name))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initial_thread_is_main_with_seq_zero() {
        let mut source = IdSource::default();
        let tid = source.next_thread_id(Some("main"));
        assert_eq!(tid, ThreadId::initial());
        assert_eq!(tid.seq(), 0);
        assert_eq!(tid.name(), Some("main"));
    }

    #[test]
    fn sequence_numbers_increase_monotonically_per_family() {
        let mut source = IdSource::new();
        let seqs: Vec<_> = (0..5).map(|_| source.next_cref_id(None).seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        // Another family starts over from zero.
        assert_eq!(source.next_mvar_id(None).seq(), 0);
        // The thread family already allocated "main".
        assert_eq!(source.next_thread_id(None).seq(), 1);
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let mut source = IdSource::new();
        let a = source.next_mvar_id(Some("lock"));
        let b = source.next_mvar_id(Some("lock"));
        let c = source.next_mvar_id(Some("lock"));
        assert_eq!(a.name(), Some("lock"));
        assert_eq!(b.name(), Some("lock1"));
        assert_eq!(c.name(), Some("lock2"));
    }

    #[test]
    fn equality_ignores_names() {
        let mut s1 = IdSource::new();
        let mut s2 = IdSource::new();
        let a = s1.next_tvar_id(Some("x"));
        let b = s2.next_tvar_id(Some("y"));
        assert_eq!(a, b);
    }

    #[test]
    fn commit_threads_order_below_real_threads() {
        let mut source = IdSource::new();
        let writer = ThreadId::initial();
        let cell = source.next_cref_id(None);
        let tso = ThreadId::commit(&writer, None);
        let pso = ThreadId::commit(&writer, Some(&cell));
        assert!(tso.is_commit());
        assert!(pso.is_commit());
        assert!(tso < writer);
        assert!(pso < writer);
        assert_ne!(tso, pso);
    }

    #[test]
    fn display_prefers_names() {
        let mut source = IdSource::new();
        let named = source.next_cref_id(Some("counter"));
        let unnamed = source.next_cref_id(None);
        assert_eq!(format!("{}", named), "counter");
        assert_eq!(format!("{}", unnamed), "1");
    }
}
