//! # Record Arrays
//!
//! A [`RecordArray`] is a live, ordered view over records. The identity map
//! keeps it current: every mutation is pushed into every registered array
//! through the [`RecordObserver`] trait, synchronously, before the mutating
//! call returns.
//!
//! ## Sources
//!
//! | Source | Membership |
//! |--------|------------|
//! | [`ArraySource::All`] | every visible record of a type |
//! | [`ArraySource::Filter`] | visible records of a type passing a predicate |
//! | [`ArraySource::HasMany`] | members of a has-many relationship |
//! | [`ArraySource::Query`] | whatever the last fetch returned |
//!
//! ## Ordering
//!
//! Insertion order. New members are appended, removed members leave no gap,
//! and attribute updates never move a record.
//!
//! Arrays hold weak references; records are owned by the identity map.

use crate::identity::ClientId;
use crate::identity_map::{ChangeKind, RecordChange, RecordObserver};
use crate::record::{Record, WeakRecord};
use parking_lot::RwLock;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Predicate used by filtered arrays.
///
/// Runs inside the store actor on every change to a record of the filtered
/// type, so it must be cheap and must not call back into the store.
pub type RecordPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// What decides membership of an array.
#[derive(Clone)]
pub enum ArraySource {
    All { type_key: String },
    Filter { type_key: String, predicate: RecordPredicate },
    HasMany { owner: ClientId, key: String },
    Query { type_key: String },
}

impl ArraySource {
    /// `Some(true)` if `record` must be a member, `Some(false)` if it must not,
    /// `None` if this change does not affect membership.
    fn admits(&self, record: &Record, kind: ChangeKind) -> Option<bool> {
        if kind == ChangeKind::Deleted || record.is_deleted() {
            return Some(false);
        }
        match self {
            ArraySource::All { type_key } if record.type_key() == type_key => {
                Some(record.state().is_visible())
            }
            ArraySource::Filter { type_key, predicate } if record.type_key() == type_key => {
                Some(record.state().is_visible() && predicate(record))
            }
            _ => None,
        }
    }
}

impl Debug for ArraySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArraySource::All { type_key } => write!(f, "All({type_key})"),
            ArraySource::Filter { type_key, .. } => write!(f, "Filter({type_key})"),
            ArraySource::HasMany { owner, key } => write!(f, "HasMany({owner}.{key})"),
            ArraySource::Query { type_key } => write!(f, "Query({type_key})"),
        }
    }
}

/// A change to an array's contents, as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayChange {
    Inserted { index: usize, count: usize },
    Removed { index: usize, count: usize },
    /// The whole content was swapped (a page load or relationship reset).
    Replaced { len: usize },
}

struct ArrayShared {
    source: ArraySource,
    content: RwLock<Vec<WeakRecord>>,
    loaded: AtomicBool,
    changes: broadcast::Sender<ArrayChange>,
}

/// Live, ordered, observable view over records.
#[derive(Clone)]
pub struct RecordArray {
    shared: Arc<ArrayShared>,
}

impl RecordArray {
    pub(crate) fn new(source: ArraySource, change_buffer: usize) -> Self {
        let loaded = !matches!(source, ArraySource::Query { .. });
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            shared: Arc::new(ArrayShared {
                source,
                content: RwLock::new(Vec::new()),
                loaded: AtomicBool::new(loaded),
                changes,
            }),
        }
    }

    pub fn source(&self) -> &ArraySource {
        &self.shared.source
    }

    pub fn len(&self) -> usize {
        self.shared.content.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The record at `index`, or `None` past the end.
    pub fn object_at(&self, index: usize) -> Option<Record> {
        self.shared
            .content
            .read()
            .get(index)
            .and_then(WeakRecord::upgrade)
    }

    pub fn first_object(&self) -> Option<Record> {
        self.object_at(0)
    }

    pub fn last_object(&self) -> Option<Record> {
        self.shared
            .content
            .read()
            .last()
            .and_then(WeakRecord::upgrade)
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.shared
            .content
            .read()
            .iter()
            .filter_map(WeakRecord::upgrade)
            .collect()
    }

    /// Ids of the members, in order. Unsaved members are skipped.
    pub fn ids(&self) -> Vec<String> {
        self.to_vec().iter().filter_map(Record::id).collect()
    }

    pub fn index_of(&self, record: &Record) -> Option<usize> {
        self.shared.content.read().iter().position(|w| w.is(record))
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.index_of(record).is_some()
    }

    /// False for query arrays until their first fetch completes.
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    /// Subscribes to content changes made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ArrayChange> {
        self.shared.changes.subscribe()
    }

    pub fn ptr_eq(&self, other: &RecordArray) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn observer(&self) -> Arc<dyn RecordObserver> {
        self.shared.clone()
    }

    // --- Store-side mutation ---

    pub(crate) fn mark_loaded(&self) {
        self.shared.loaded.store(true, Ordering::Release);
    }

    /// Appends `record` unless already present.
    pub(crate) fn push(&self, record: &Record) -> bool {
        let index = {
            let mut content = self.shared.content.write();
            if content.iter().any(|w| w.is(record)) {
                return false;
            }
            content.push(record.downgrade());
            content.len() - 1
        };
        self.shared.emit(ArrayChange::Inserted { index, count: 1 });
        true
    }

    /// Appends every record not already present, as one change.
    pub(crate) fn extend(&self, records: &[Record]) {
        let (index, count) = {
            let mut content = self.shared.content.write();
            let index = content.len();
            for record in records {
                if !content.iter().any(|w| w.is(record)) {
                    content.push(record.downgrade());
                }
            }
            (index, content.len() - index)
        };
        if count > 0 {
            self.shared.emit(ArrayChange::Inserted { index, count });
        }
    }

    pub(crate) fn remove(&self, record: &Record) -> bool {
        let index = {
            let mut content = self.shared.content.write();
            match content.iter().position(|w| w.is(record)) {
                Some(index) => {
                    content.remove(index);
                    index
                }
                None => return false,
            }
        };
        self.shared.emit(ArrayChange::Removed { index, count: 1 });
        true
    }

    pub(crate) fn replace(&self, records: &[Record]) {
        let len = {
            let mut content = self.shared.content.write();
            content.clear();
            for record in records {
                if !content.iter().any(|w| w.is(record)) {
                    content.push(record.downgrade());
                }
            }
            content.len()
        };
        self.shared.emit(ArrayChange::Replaced { len });
    }
}

impl Debug for RecordArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordArray")
            .field("source", &self.shared.source)
            .field("len", &self.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ArrayShared {
    fn emit(&self, change: ArrayChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

/// Appends `change` to `events`, merging it into the previous event when the
/// two touch adjacent positions.
fn coalesce(events: &mut Vec<ArrayChange>, change: ArrayChange) {
    match (events.last_mut(), change) {
        (
            Some(ArrayChange::Inserted { index, count }),
            ArrayChange::Inserted { index: next, count: more },
        ) if *index + *count == next => *count += more,
        (
            Some(ArrayChange::Removed { index, count }),
            ArrayChange::Removed { index: next, count: more },
        ) if *index == next => *count += more,
        _ => events.push(change),
    }
}

impl RecordObserver for ArrayShared {
    fn records_changed(&self, changes: &[RecordChange]) {
        // Evaluate predicates before locking the content.
        let decisions: Vec<(&Record, bool)> = changes
            .iter()
            .filter_map(|change| {
                self.source
                    .admits(&change.record, change.kind)
                    .map(|member| (&change.record, member))
            })
            .collect();
        if decisions.is_empty() {
            return;
        }

        let mut events = Vec::new();
        {
            let mut content = self.content.write();
            for (record, member) in decisions {
                let position = content.iter().position(|w| w.is(record));
                match (member, position) {
                    (true, None) => {
                        content.push(record.downgrade());
                        coalesce(
                            &mut events,
                            ArrayChange::Inserted { index: content.len() - 1, count: 1 },
                        );
                    }
                    (false, Some(index)) => {
                        content.remove(index);
                        coalesce(&mut events, ArrayChange::Removed { index, count: 1 });
                    }
                    _ => {}
                }
            }
        }
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordState;
    use std::collections::BTreeMap;

    fn person(n: u64, state: RecordState) -> Record {
        Record::new(ClientId(n), "person", Some(n.to_string()), state, BTreeMap::new())
    }

    fn created(record: &Record) -> RecordChange {
        RecordChange { record: record.clone(), kind: ChangeKind::Created }
    }

    #[test]
    fn object_at_past_the_end_is_none() {
        let array = RecordArray::new(ArraySource::All { type_key: "person".into() }, 8);
        assert!(array.object_at(0).is_none());
        assert!(array.object_at(20).is_none());
        assert!(array.last_object().is_none());
    }

    #[test]
    fn all_array_appends_and_removes_in_place() {
        let array = RecordArray::new(ArraySource::All { type_key: "person".into() }, 8);
        let observer = array.observer();
        let (a, b, c) = (
            person(1, RecordState::Loaded),
            person(2, RecordState::Loaded),
            person(3, RecordState::Loaded),
        );
        observer.records_changed(&[created(&a), created(&b), created(&c)]);
        assert_eq!(array.ids(), vec!["1", "2", "3"]);

        b.set_state(RecordState::Deleted);
        observer.records_changed(&[RecordChange { record: b.clone(), kind: ChangeKind::Deleted }]);
        assert_eq!(array.ids(), vec!["1", "3"]);

        // An update keeps the position.
        observer.records_changed(&[RecordChange { record: a.clone(), kind: ChangeKind::Updated }]);
        assert_eq!(array.ids(), vec!["1", "3"]);
    }

    #[test]
    fn invisible_and_foreign_records_are_ignored() {
        let array = RecordArray::new(ArraySource::All { type_key: "person".into() }, 8);
        let placeholder = person(1, RecordState::Empty);
        let tag = Record::new(ClientId(2), "tag", Some("1".into()), RecordState::Loaded, BTreeMap::new());
        array.observer().records_changed(&[created(&placeholder), created(&tag)]);
        assert!(array.is_empty());
    }

    #[test]
    fn a_slice_of_creations_is_one_insert_event() {
        let array = RecordArray::new(ArraySource::All { type_key: "person".into() }, 8);
        let first = person(1, RecordState::New);
        array.observer().records_changed(&[created(&first)]);

        let mut rx = array.subscribe();
        let batch: Vec<_> = (2..5).map(|n| person(n, RecordState::New)).collect();
        let changes: Vec<_> = batch.iter().map(created).collect();
        array.observer().records_changed(&changes);

        assert_eq!(rx.try_recv().unwrap(), ArrayChange::Inserted { index: 1, count: 3 });
        assert!(rx.try_recv().is_err());
        assert_eq!(array.len(), 4);
    }

    #[test]
    fn filter_arrays_follow_the_predicate() {
        let predicate: RecordPredicate =
            Arc::new(|r: &Record| r.get_str("name").is_some_and(|n| n.starts_with('S')));
        let array = RecordArray::new(
            ArraySource::Filter { type_key: "person".into(), predicate },
            8,
        );
        let dale = person(1, RecordState::Loaded);
        let mut fields = serde_json::Map::new();
        fields.insert("name".into(), "Scumbag Dale".into());
        dale.merge_attributes(fields);
        array.observer().records_changed(&[created(&dale)]);
        assert_eq!(array.len(), 1);

        let mut fields = serde_json::Map::new();
        fields.insert("name".into(), "Dale".into());
        dale.merge_attributes(fields);
        array.observer().records_changed(&[RecordChange { record: dale.clone(), kind: ChangeKind::Updated }]);
        assert!(array.is_empty());
    }

    #[test]
    fn query_arrays_only_lose_deleted_records() {
        let array = RecordArray::new(ArraySource::Query { type_key: "person".into() }, 8);
        assert!(!array.is_loaded());
        let a = person(1, RecordState::Loaded);
        let b = person(2, RecordState::Loaded);
        array.replace(&[a.clone()]);
        array.mark_loaded();

        array.observer().records_changed(&[created(&b)]);
        assert_eq!(array.ids(), vec!["1"]);

        a.set_state(RecordState::Deleted);
        array.observer().records_changed(&[RecordChange { record: a.clone(), kind: ChangeKind::Deleted }]);
        assert!(array.is_empty());
        assert!(array.is_loaded());
    }

    #[test]
    fn coalesce_merges_adjacent_events_only() {
        let mut events = Vec::new();
        coalesce(&mut events, ArrayChange::Inserted { index: 0, count: 1 });
        coalesce(&mut events, ArrayChange::Inserted { index: 1, count: 1 });
        coalesce(&mut events, ArrayChange::Removed { index: 0, count: 1 });
        coalesce(&mut events, ArrayChange::Removed { index: 0, count: 1 });
        coalesce(&mut events, ArrayChange::Inserted { index: 5, count: 1 });
        assert_eq!(
            events,
            vec![
                ArrayChange::Inserted { index: 0, count: 2 },
                ArrayChange::Removed { index: 0, count: 2 },
                ArrayChange::Inserted { index: 5, count: 1 },
            ]
        );
    }
}
