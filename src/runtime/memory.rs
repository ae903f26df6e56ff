//! Private module for selective re-export.
//!
//! Cells carry a committed value plus, under the relaxed memory models,
//! buffered writes that other threads cannot see yet. Publication is a
//! separate step taken by a commit pseudo-thread, which is how commit
//! timing becomes part of the explored nondeterminism.

use crate::id::{CRefId, ThreadId};
use crate::program::{CasToken, Value};
use crate::trace::MemType;
use nohash_hasher::IntMap;
use std::collections::{BTreeMap, VecDeque};

/// The committed state of one cell.
pub(crate) struct CRefState {
    pub committed: Value,
    /// Bumped on every committed write; compare-and-swap tickets check it.
    pub count: u64,
}

/// The id-keyed cell store. Point lookups only; iteration never feeds
/// scheduling.
pub(crate) type CRefs = IntMap<CRefId, CRefState>;

/// A buffer key: the writing thread, and the written cell under partial
/// store order (total store order keeps one buffer per thread).
pub(crate) type BufferKey = (ThreadId, Option<CRefId>);

/// Pending unsynchronised writes, keyed per thread (TSO) or per thread and
/// cell (PSO). Ordered so commit pseudo-thread enumeration is
/// deterministic.
#[derive(Default)]
pub(crate) struct WriteBuffers {
    buffers: BTreeMap<BufferKey, VecDeque<(CRefId, Value)>>,
}

impl WriteBuffers {
    fn key(memtype: MemType, writer: &ThreadId, cref: &CRefId) -> BufferKey {
        match memtype {
            MemType::TotalStoreOrder => (writer.clone(), None),
            MemType::PartialStoreOrder => (writer.clone(), Some(cref.clone())),
            MemType::SequentialConsistency => {
                unreachable!("sequential consistency does not buffer writes")
            }
        }
    }

    /// Records a write. Under sequential consistency it is published
    /// immediately instead.
    pub fn write(
        &mut self,
        memtype: MemType,
        crefs: &mut CRefs,
        writer: &ThreadId,
        cref: &CRefId,
        value: Value,
    ) {
        match memtype {
            MemType::SequentialConsistency => publish(crefs, cref, value),
            _ => {
                let key = Self::key(memtype, writer, cref);
                self.buffers
                    .entry(key)
                    .or_insert_with(VecDeque::new)
                    .push_back((cref.clone(), value));
            }
        }
    }

    /// The newest value `reader` has buffered for `cref`, if any. Other
    /// threads' buffers are invisible.
    pub fn buffered_value(&self, reader: &ThreadId, cref: &CRefId) -> Option<Value> {
        self.buffers
            .iter()
            .filter(|((writer, _), _)| writer == reader)
            .flat_map(|(_, writes)| writes.iter())
            .filter(|(c, _)| c == cref)
            .last()
            .map(|(_, v)| v.clone())
    }

    /// Publishes the oldest write in the buffer owned by `commit_tid`,
    /// reporting the writer and the cell. The pseudo-thread disappears when
    /// its buffer empties.
    pub fn commit_head(
        &mut self,
        crefs: &mut CRefs,
        commit_tid: &ThreadId,
    ) -> Option<(ThreadId, CRefId)> {
        let key = self
            .buffers
            .keys()
            .find(|(writer, cell)| &ThreadId::commit(writer, cell.as_ref()) == commit_tid)?
            .clone();
        let writes = self.buffers.get_mut(&key)?;
        let (cref, value) = writes.pop_front()?;
        if writes.is_empty() {
            self.buffers.remove(&key);
        }
        publish(crefs, &cref, value);
        Some((key.0, cref))
    }

    /// Publishes every write buffered by `writer`, oldest first. This is
    /// the barrier a synchronised operation performs before acting.
    pub fn commit_all(&mut self, crefs: &mut CRefs, writer: &ThreadId) {
        let keys: Vec<BufferKey> = self
            .buffers
            .keys()
            .filter(|(w, _)| w == writer)
            .cloned()
            .collect();
        for key in keys {
            if let Some(writes) = self.buffers.remove(&key) {
                for (cref, value) in writes {
                    publish(crefs, &cref, value);
                }
            }
        }
    }

    /// The commit pseudo-threads that currently have work: one per
    /// non-empty buffer, each about to publish the buffer's oldest write.
    pub fn commit_threads(&self) -> Vec<(ThreadId, ThreadId, CRefId)> {
        self.buffers
            .iter()
            .filter_map(|((writer, cell), writes)| {
                let (head_cref, _) = writes.front()?;
                Some((
                    ThreadId::commit(writer, cell.as_ref()),
                    writer.clone(),
                    head_cref.clone(),
                ))
            })
            .collect()
    }
}

fn publish(crefs: &mut CRefs, cref: &CRefId, value: Value) {
    let state = crefs.get_mut(cref).expect("write to an unknown cell");
    state.committed = value;
    state.count += 1;
}

/// Attempts a compare-and-swap against the committed state. The executing
/// thread's buffers must already have been drained.
pub(crate) fn cas_committed(
    crefs: &mut CRefs,
    cref: &CRefId,
    token: &CasToken,
    value: Value,
) -> (bool, CasToken) {
    let state = crefs.get_mut(cref).expect("compare-and-swap on an unknown cell");
    if token.count == state.count {
        state.committed = value;
        state.count += 1;
        (
            true,
            CasToken {
                cref: cref.clone(),
                count: state.count,
                value: state.committed.clone(),
            },
        )
    } else {
        (
            false,
            CasToken {
                cref: cref.clone(),
                count: state.count,
                value: state.committed.clone(),
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::IdSource;
    use std::rc::Rc;

    fn read(crefs: &CRefs, cref: &CRefId) -> i32 {
        *crefs
            .get(cref)
            .unwrap()
            .committed
            .downcast_ref::<i32>()
            .unwrap()
    }

    fn setup() -> (IdSource, CRefs, WriteBuffers) {
        (IdSource::new(), CRefs::default(), WriteBuffers::default())
    }

    fn new_cell(source: &mut IdSource, crefs: &mut CRefs, v: i32) -> CRefId {
        let id = source.next_cref_id(None);
        crefs.insert(id.clone(), CRefState { committed: Rc::new(v), count: 0 });
        id
    }

    #[test]
    fn sequential_consistency_publishes_immediately() {
        let (mut source, mut crefs, mut buffers) = setup();
        let writer = ThreadId::initial();
        let cell = new_cell(&mut source, &mut crefs, 0);
        buffers.write(
            MemType::SequentialConsistency,
            &mut crefs,
            &writer,
            &cell,
            Rc::new(1),
        );
        assert_eq!(read(&crefs, &cell), 1);
        assert!(buffers.commit_threads().is_empty());
    }

    #[test]
    fn buffered_writes_are_visible_to_the_writer_only() {
        let (mut source, mut crefs, mut buffers) = setup();
        let writer = ThreadId::initial();
        let other = source.next_thread_id(None);
        let cell = new_cell(&mut source, &mut crefs, 0);
        buffers.write(MemType::TotalStoreOrder, &mut crefs, &writer, &cell, Rc::new(1));

        assert_eq!(read(&crefs, &cell), 0);
        let seen = buffers.buffered_value(&writer, &cell).unwrap();
        assert_eq!(*seen.downcast_ref::<i32>().unwrap(), 1);
        assert!(buffers.buffered_value(&other, &cell).is_none());
    }

    #[test]
    fn tso_commits_drain_one_buffer_in_order() {
        let (mut source, mut crefs, mut buffers) = setup();
        let writer = ThreadId::initial();
        let a = new_cell(&mut source, &mut crefs, 0);
        let b = new_cell(&mut source, &mut crefs, 0);
        buffers.write(MemType::TotalStoreOrder, &mut crefs, &writer, &a, Rc::new(1));
        buffers.write(MemType::TotalStoreOrder, &mut crefs, &writer, &b, Rc::new(2));

        // One pseudo-thread per writer; the head write is to `a`.
        let commits = buffers.commit_threads();
        assert_eq!(commits.len(), 1);
        let (commit_tid, _, head) = commits[0].clone();
        assert_eq!(head, a);

        let (w, c) = buffers.commit_head(&mut crefs, &commit_tid).unwrap();
        assert_eq!((w, c), (writer.clone(), a.clone()));
        assert_eq!(read(&crefs, &a), 1);
        assert_eq!(read(&crefs, &b), 0);

        let (_, c) = buffers.commit_head(&mut crefs, &commit_tid).unwrap();
        assert_eq!(c, b);
        assert_eq!(read(&crefs, &b), 2);
        assert!(buffers.commit_threads().is_empty());
    }

    #[test]
    fn pso_commits_advance_per_cell() {
        let (mut source, mut crefs, mut buffers) = setup();
        let writer = ThreadId::initial();
        let a = new_cell(&mut source, &mut crefs, 0);
        let b = new_cell(&mut source, &mut crefs, 0);
        buffers.write(MemType::PartialStoreOrder, &mut crefs, &writer, &a, Rc::new(1));
        buffers.write(MemType::PartialStoreOrder, &mut crefs, &writer, &b, Rc::new(2));

        // One pseudo-thread per (writer, cell); `b` may commit before `a`.
        let commits = buffers.commit_threads();
        assert_eq!(commits.len(), 2);
        let b_commit = commits
            .iter()
            .find(|(_, _, cref)| *cref == b)
            .map(|(tid, _, _)| tid.clone())
            .unwrap();
        buffers.commit_head(&mut crefs, &b_commit).unwrap();
        assert_eq!(read(&crefs, &a), 0);
        assert_eq!(read(&crefs, &b), 2);
    }

    #[test]
    fn synchronising_drains_every_buffer_of_the_thread() {
        let (mut source, mut crefs, mut buffers) = setup();
        let writer = ThreadId::initial();
        let a = new_cell(&mut source, &mut crefs, 0);
        let b = new_cell(&mut source, &mut crefs, 0);
        buffers.write(MemType::PartialStoreOrder, &mut crefs, &writer, &a, Rc::new(1));
        buffers.write(MemType::PartialStoreOrder, &mut crefs, &writer, &b, Rc::new(2));

        buffers.commit_all(&mut crefs, &writer);
        assert_eq!(read(&crefs, &a), 1);
        assert_eq!(read(&crefs, &b), 2);
        assert!(buffers.commit_threads().is_empty());
    }

    #[test]
    fn cas_fails_after_an_intervening_commit() {
        let (mut source, mut crefs, _) = setup();
        let cell = new_cell(&mut source, &mut crefs, 0);
        let token = CasToken { cref: cell.clone(), count: 0, value: Rc::new(0) };

        publish(&mut crefs, &cell, Rc::new(5));
        let (ok, fresh) = cas_committed(&mut crefs, &cell, &token, Rc::new(7));
        assert!(!ok);
        assert_eq!(read(&crefs, &cell), 5);

        let (ok, _) = cas_committed(&mut crefs, &cell, &fresh, Rc::new(7));
        assert!(ok);
        assert_eq!(read(&crefs, &cell), 7);
    }
}
