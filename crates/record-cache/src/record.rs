//! # Records
//!
//! A [`Record`] is a cheap, cloneable handle to one canonical record instance.
//! The identity map hands out the same instance for the same identity every
//! time, so a caller holding an old handle sees every later merge.
//!
//! Records are read directly (`get`, `state`, `belongs_to`, ...). All writes go
//! through the store so record arrays stay consistent.

use crate::identity::{ClientId, RecordIdentity};
use crate::record_array::RecordArray;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Weak};

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Placeholder for an identity referenced by a relationship but never loaded.
    Empty,
    /// Created locally, no identity yet.
    New,
    /// A fetch for this identity is in flight.
    Loading,
    Loaded,
    /// Loaded, then changed locally.
    Updated,
    Deleted,
    /// The last save failed; see [`Record::error`].
    Error,
}

impl RecordState {
    /// Whether records in this state show up in type and filter arrays.
    pub fn is_visible(self) -> bool {
        matches!(
            self,
            RecordState::New | RecordState::Loaded | RecordState::Updated | RecordState::Error
        )
    }

    pub fn is_dirty(self) -> bool {
        matches!(self, RecordState::New | RecordState::Updated)
    }
}

#[derive(Debug)]
struct RecordData {
    id: Option<String>,
    state: RecordState,
    attributes: Map<String, Value>,
    belongs_to: BTreeMap<String, WeakRecord>,
    error: Option<String>,
}

struct RecordCell {
    client_id: ClientId,
    type_key: String,
    data: RwLock<RecordData>,
    has_many: BTreeMap<String, RecordArray>,
}

/// Shared handle to a canonical record.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordCell>,
}

impl Record {
    pub(crate) fn new(
        client_id: ClientId,
        type_key: impl Into<String>,
        id: Option<String>,
        state: RecordState,
        has_many: BTreeMap<String, RecordArray>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordCell {
                client_id,
                type_key: type_key.into(),
                data: RwLock::new(RecordData {
                    id,
                    state,
                    attributes: Map::new(),
                    belongs_to: BTreeMap::new(),
                    error: None,
                }),
                has_many,
            }),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id
    }

    pub fn type_key(&self) -> &str {
        &self.inner.type_key
    }

    pub fn id(&self) -> Option<String> {
        self.inner.data.read().id.clone()
    }

    pub fn identity(&self) -> Option<RecordIdentity> {
        self.id()
            .map(|id| RecordIdentity::new(self.type_key(), id))
    }

    pub fn state(&self) -> RecordState {
        self.inner.data.read().state
    }

    pub fn is_new(&self) -> bool {
        self.state() == RecordState::New
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state(), RecordState::Loaded | RecordState::Updated)
    }

    pub fn is_deleted(&self) -> bool {
        self.state() == RecordState::Deleted
    }

    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    /// Reads a field. `"id"` resolves to the record id.
    pub fn get(&self, field: &str) -> Option<Value> {
        let data = self.inner.data.read();
        if field == "id" {
            return data.id.clone().map(Value::String);
        }
        data.attributes.get(field).cloned()
    }

    /// Reads a field as a string, if it holds one.
    pub fn get_str(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.data.read().attributes.clone()
    }

    /// The record a belongs-to relationship points at.
    pub fn belongs_to(&self, key: &str) -> Option<Record> {
        self.inner
            .data
            .read()
            .belongs_to
            .get(key)
            .and_then(WeakRecord::upgrade)
    }

    /// The live array behind a has-many relationship.
    pub fn has_many(&self, key: &str) -> Option<RecordArray> {
        self.inner.has_many.get(key).cloned()
    }

    /// Message of the last failed save.
    pub fn error(&self) -> Option<String> {
        self.inner.data.read().error.clone()
    }

    /// JSON form: id, attributes and belongs-to ids.
    pub fn to_json(&self) -> Value {
        let data = self.inner.data.read();
        let mut out = Map::new();
        if let Some(id) = &data.id {
            out.insert("id".to_string(), Value::String(id.clone()));
        }
        for (k, v) in &data.attributes {
            out.insert(k.clone(), v.clone());
        }
        for (key, link) in &data.belongs_to {
            let target = link.upgrade().and_then(|r| r.id());
            out.insert(key.clone(), target.map(Value::String).unwrap_or(Value::Null));
        }
        Value::Object(out)
    }

    /// Deserializes the JSON form into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord(Arc::downgrade(&self.inner))
    }

    // --- Store-side mutation ---

    pub(crate) fn set_state(&self, state: RecordState) {
        self.inner.data.write().state = state;
    }

    pub(crate) fn set_id(&self, id: String) {
        self.inner.data.write().id = Some(id);
    }

    pub(crate) fn merge_attributes(&self, attributes: Map<String, Value>) {
        let mut data = self.inner.data.write();
        for (k, v) in attributes {
            data.attributes.insert(k, v);
        }
    }

    pub(crate) fn set_error(&self, error: Option<String>) {
        self.inner.data.write().error = error;
    }

    pub(crate) fn link_belongs_to(&self, key: &str, target: Option<&Record>) {
        let mut data = self.inner.data.write();
        match target {
            Some(target) => {
                data.belongs_to.insert(key.to_string(), target.downgrade());
            }
            None => {
                data.belongs_to.remove(key);
            }
        }
    }

    /// Belongs-to keys currently pointing at `target`.
    pub(crate) fn links_to(&self, target: &Record) -> Vec<String> {
        self.inner
            .data
            .read()
            .belongs_to
            .iter()
            .filter(|(_, link)| link.is(target))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub(crate) fn has_many_arrays(&self) -> impl Iterator<Item = &RecordArray> {
        self.inner.has_many.values()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Record {}

impl Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.read();
        f.debug_struct("Record")
            .field("client_id", &self.inner.client_id)
            .field("type_key", &self.inner.type_key)
            .field("id", &data.id)
            .field("state", &data.state)
            .field("attributes", &data.attributes)
            .finish()
    }
}

/// Non-owning record reference, as held by record arrays.
#[derive(Clone)]
pub struct WeakRecord(Weak<RecordCell>);

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        self.0.upgrade().map(|inner| Record { inner })
    }

    /// True if this reference points at `record`.
    pub fn is(&self, record: &Record) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&record.inner))
    }
}

impl Debug for WeakRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.upgrade() {
            Some(record) => write!(f, "WeakRecord({})", record.client_id()),
            None => write!(f, "WeakRecord(<dropped>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn record(id: Option<&str>, state: RecordState) -> Record {
        Record::new(ClientId(1), "person", id.map(str::to_string), state, BTreeMap::new())
    }

    #[test]
    fn merged_attributes_are_visible_through_clones() {
        let a = record(Some("1"), RecordState::Loaded);
        let b = a.clone();
        let mut fields = Map::new();
        fields.insert("name".into(), json!("wycats"));
        a.merge_attributes(fields);

        assert_eq!(b.get_str("name").as_deref(), Some("wycats"));
        assert_eq!(b.get("id"), Some(json!("1")));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn weak_references_track_identity() {
        let a = record(None, RecordState::New);
        let other = record(None, RecordState::New);
        let weak = a.downgrade();
        assert!(weak.is(&a));
        assert!(!weak.is(&other));
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn typed_view() {
        #[derive(Deserialize)]
        struct Person {
            id: String,
            name: String,
        }

        let a = record(Some("7"), RecordState::Loaded);
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Scumbag Dale"));
        a.merge_attributes(fields);

        let person: Person = a.deserialize().unwrap();
        assert_eq!(person.id, "7");
        assert_eq!(person.name, "Scumbag Dale");
    }

    #[test]
    fn visibility_by_state() {
        assert!(RecordState::New.is_visible());
        assert!(RecordState::Loaded.is_visible());
        assert!(!RecordState::Empty.is_visible());
        assert!(!RecordState::Loading.is_visible());
        assert!(!RecordState::Deleted.is_visible());
    }
}
