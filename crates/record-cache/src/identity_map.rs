//! # Identity Map
//!
//! The [`IdentityMap`] owns every record of a store and guarantees at most one
//! in-memory instance per [`RecordIdentity`]. It is synchronous and
//! single-owner: the [`StoreActor`](crate::StoreActor) holds the only instance
//! and applies one request at a time.
//!
//! ## Change propagation
//!
//! Every mutation produces a [`RecordChange`] that is delivered to every
//! registered [`RecordObserver`] (record arrays) before the mutating call
//! returns. There is no polling.
//!
//! ## Batches
//!
//! [`IdentityMap::begin_batch`] returns a guard. While any guard is alive,
//! changes that can add members to arrays are queued; they are delivered as one
//! slice when the outermost guard drops. Deletions are delivered immediately.
//!
//! ```rust
//! use record_cache::identity_map::IdentityMap;
//! use record_cache::schema::{AttrKind, ModelSchema, SchemaRegistry};
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! let schemas = SchemaRegistry::new().with(ModelSchema::new("person").attr("name", AttrKind::String));
//! let mut map = IdentityMap::new(Arc::new(schemas), 16);
//! let people = map.all("person").unwrap();
//!
//! {
//!     let mut batch = map.begin_batch();
//!     for name in ["p1", "p2", "p3"] {
//!         let mut fields = Map::new();
//!         fields.insert("name".into(), json!(name));
//!         batch.create_unsaved("person", fields).unwrap();
//!     }
//!     assert_eq!(people.len(), 0);
//! }
//! assert_eq!(people.len(), 3);
//! ```

use crate::error::{Result, StoreError};
use crate::identity::{ClientId, RecordIdentity};
use crate::record::{Record, RecordState};
use crate::record_array::{ArraySource, RecordArray, RecordPredicate};
use crate::schema::{ModelSchema, RelationshipKind, SchemaRegistry};
use crate::serializer::{coerce_attributes, NormalizedRecord};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Receives record changes from the identity map.
pub trait RecordObserver: Send + Sync {
    /// Called synchronously with one change, or with every change queued by a
    /// batch.
    fn records_changed(&self, changes: &[RecordChange]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    /// A placeholder or loading record received data.
    Loaded,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct RecordChange {
    pub record: Record,
    pub kind: ChangeKind,
}

/// Canonical record storage for one store.
pub struct IdentityMap {
    schemas: Arc<SchemaRegistry>,
    change_buffer: usize,
    records: HashMap<ClientId, Record>,
    index: HashMap<RecordIdentity, ClientId>,
    next_client_id: u64,
    observers: Vec<Weak<dyn RecordObserver>>,
    live_arrays: HashMap<String, RecordArray>,
    batch_depth: usize,
    pending: Vec<RecordChange>,
}

impl IdentityMap {
    pub fn new(schemas: Arc<SchemaRegistry>, change_buffer: usize) -> Self {
        Self {
            schemas,
            change_buffer,
            records: HashMap::new(),
            index: HashMap::new(),
            next_client_id: 1,
            observers: Vec::new(),
            live_arrays: HashMap::new(),
            batch_depth: 0,
            pending: Vec::new(),
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Number of records held, including unsaved ones and placeholders.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, identity: &RecordIdentity) -> Option<Record> {
        self.index
            .get(identity)
            .and_then(|client_id| self.records.get(client_id))
            .cloned()
    }

    /// Like [`lookup`](Self::lookup), but a missing record is an error.
    pub fn get(&self, identity: &RecordIdentity) -> Result<Record> {
        self.lookup(identity)
            .ok_or_else(|| StoreError::not_found(identity))
    }

    /// Records of a type in creation order.
    pub fn records_of(&self, type_key: &str) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .records
            .values()
            .filter(|r| r.type_key() == type_key)
            .cloned()
            .collect();
        records.sort_by_key(Record::client_id);
        records
    }

    /// True if `record` is the instance this map holds for its client id.
    pub fn contains(&self, record: &Record) -> bool {
        self.records
            .get(&record.client_id())
            .is_some_and(|held| held.ptr_eq(record))
    }

    // =========================================================================
    // Insert / update
    // =========================================================================

    /// Merges a normalized record, creating it if its identity is unknown.
    ///
    /// The same identity always yields the same [`Record`] instance.
    pub fn insert_or_update(&mut self, normalized: NormalizedRecord) -> Result<Record> {
        self.validate(&normalized)?;
        let NormalizedRecord {
            type_key,
            id,
            attributes,
            belongs_to,
            has_many,
        } = normalized;
        let identity = RecordIdentity::new(&type_key, &id);

        let (record, kind) = match self.lookup(&identity) {
            Some(record) => {
                let was_visible = record.state().is_visible();
                if matches!(record.state(), RecordState::Empty | RecordState::Loading) {
                    record.set_state(RecordState::Loaded);
                }
                record.merge_attributes(attributes);
                let kind = if was_visible { ChangeKind::Updated } else { ChangeKind::Loaded };
                (record, kind)
            }
            None => {
                let record = self.allocate(&type_key, Some(id), RecordState::Loaded)?;
                record.merge_attributes(attributes);
                (record, ChangeKind::Created)
            }
        };
        trace!(%identity, ?kind, "Merged record");

        for (key, target) in belongs_to {
            let target = match target {
                Some(target_id) => Some(self.resolve(&record, &key, target_id)?),
                None => None,
            };
            self.link(&record, &key, target.as_ref())?;
        }
        for (key, ids) in has_many {
            let members = ids
                .into_iter()
                .map(|target_id| self.resolve(&record, &key, target_id))
                .collect::<Result<Vec<_>>>()?;
            self.reset_has_many(&record, &key, &members)?;
        }

        self.notify(RecordChange { record: record.clone(), kind });
        Ok(record)
    }

    /// Merges several records inside one batch. Every record is validated
    /// before any is applied.
    pub fn insert_many(&mut self, records: Vec<NormalizedRecord>) -> Result<Vec<Record>> {
        for record in &records {
            self.validate(record)?;
        }
        let mut batch = self.begin_batch();
        let merged = records
            .into_iter()
            .map(|record| batch.insert_or_update(record))
            .collect::<Result<Vec<_>>>();
        drop(batch);
        merged
    }

    /// Allocates an unsaved record in state [`RecordState::New`].
    pub fn create_unsaved(&mut self, type_key: &str, fields: Map<String, Value>) -> Result<Record> {
        let schema = self.schemas.get(type_key)?.clone();
        let attributes = coerce_attributes(&schema, &fields)?;
        let record = self.allocate(type_key, None, RecordState::New)?;
        record.merge_attributes(attributes);
        debug!(type_key, client_id = %record.client_id(), "Created unsaved record");
        self.notify(RecordChange { record: record.clone(), kind: ChangeKind::Created });
        Ok(record)
    }

    /// Local edit. A loaded record becomes [`RecordState::Updated`].
    pub fn update_attributes(&mut self, record: &Record, fields: Map<String, Value>) -> Result<()> {
        self.ensure_tracked(record)?;
        let schema = self.schemas.get(record.type_key())?.clone();
        let attributes = coerce_attributes(&schema, &fields)?;
        record.merge_attributes(attributes);
        if record.state() == RecordState::Loaded {
            record.set_state(RecordState::Updated);
        }
        self.notify(RecordChange { record: record.clone(), kind: ChangeKind::Updated });
        Ok(())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes the record with `identity`. Unknown identities are an error.
    pub fn remove(&mut self, identity: &RecordIdentity) -> Result<Record> {
        let record = self.get(identity)?;
        self.remove_record(&record)?;
        Ok(record)
    }

    /// Removes a record (saved or not) and drops it from every array at once,
    /// even inside a batch.
    pub fn remove_record(&mut self, record: &Record) -> Result<()> {
        self.ensure_tracked(record)?;
        self.records.remove(&record.client_id());
        if let Some(identity) = record.identity() {
            self.index.remove(&identity);
        }
        record.set_state(RecordState::Deleted);
        for array in record.has_many_arrays() {
            array.replace(&[]);
        }

        for other in self.records.values() {
            for key in other.links_to(record) {
                other.link_belongs_to(&key, None);
            }
            for array in other.has_many_arrays() {
                array.remove(record);
            }
        }
        debug!(client_id = %record.client_id(), id = ?record.id(), size = self.records.len(), "Removed record");
        self.deliver(&[RecordChange { record: record.clone(), kind: ChangeKind::Deleted }]);
        Ok(())
    }

    // =========================================================================
    // Loading and saving
    // =========================================================================

    /// Returns the record for `identity`, marking it loading if it has no data.
    pub fn begin_load(&mut self, identity: &RecordIdentity) -> Result<Record> {
        match self.lookup(identity) {
            Some(record) => {
                if record.state() == RecordState::Empty {
                    record.set_state(RecordState::Loading);
                }
                Ok(record)
            }
            None => self.allocate(identity.type_key(), Some(identity.id().to_string()), RecordState::Loading),
        }
    }

    /// A fetch failed: the record goes back to being a placeholder.
    pub fn load_failed(&mut self, identity: &RecordIdentity, error: String) {
        if let Some(record) = self.lookup(identity) {
            if record.state() == RecordState::Loading {
                record.set_state(RecordState::Empty);
                record.set_error(Some(error));
            }
        }
    }

    /// Gives an unsaved record its server identity.
    pub fn assign_identity(&mut self, record: &Record, id: String) -> Result<()> {
        self.ensure_tracked(record)?;
        let identity = RecordIdentity::new(record.type_key(), &id);
        if let Some(held) = self.index.get(&identity) {
            if *held != record.client_id() {
                return Err(StoreError::DuplicateIdentity(identity));
            }
            return Ok(());
        }
        if let Some(previous) = record.identity() {
            self.index.remove(&previous);
        }
        record.set_id(id);
        self.index.insert(identity, record.client_id());
        Ok(())
    }

    /// A save succeeded. `response` is whatever the adapter echoed back.
    pub fn did_save(&mut self, record: &Record, response: Option<NormalizedRecord>) -> Result<()> {
        self.ensure_tracked(record)?;
        match response {
            Some(normalized) => {
                self.validate(&normalized)?;
                if record.id().is_none() {
                    self.assign_identity(record, normalized.id.clone())?;
                }
                record.merge_attributes(normalized.attributes);
            }
            None if record.id().is_none() => {
                return Err(StoreError::InvalidPayload(format!(
                    "save of {} returned no id",
                    record.client_id()
                )))
            }
            None => {}
        }
        record.set_error(None);
        record.set_state(RecordState::Loaded);
        self.notify(RecordChange { record: record.clone(), kind: ChangeKind::Updated });
        Ok(())
    }

    pub fn save_failed(&mut self, record: &Record, error: String) {
        if self.contains(record) {
            record.set_error(Some(error));
            record.set_state(RecordState::Error);
            self.notify(RecordChange { record: record.clone(), kind: ChangeKind::Updated });
        }
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Points a belongs-to relationship at `target` (or clears it), keeping the
    /// inverse side in step.
    pub fn set_belongs_to(&mut self, record: &Record, key: &str, target: Option<&Record>) -> Result<()> {
        self.ensure_tracked(record)?;
        if let Some(target) = target {
            self.ensure_tracked(target)?;
        }
        self.link(record, key, target)?;
        self.notify(RecordChange { record: record.clone(), kind: ChangeKind::Updated });
        Ok(())
    }

    /// Adds `member` to `owner.key`, updating the inverse side.
    pub fn add_to_has_many(&mut self, owner: &Record, key: &str, member: &Record) -> Result<()> {
        self.ensure_tracked(owner)?;
        self.ensure_tracked(member)?;
        let schema = self.schemas.get(owner.type_key())?.clone();
        let rel = schema.relationship_of(key, RelationshipKind::HasMany)?.clone();
        check_target(&rel.target, member)?;
        let array = has_many_array(&schema, owner, key)?;
        array.push(member);

        if let Some(inverse) = &rel.inverse {
            match self.inverse_kind(&rel.target, inverse)? {
                RelationshipKind::BelongsTo => {
                    if let Some(previous) = member.belongs_to(inverse) {
                        if !previous.ptr_eq(owner) {
                            if let Some(old) = previous.has_many(key) {
                                old.remove(member);
                            }
                        }
                    }
                    member.link_belongs_to(inverse, Some(owner));
                }
                RelationshipKind::HasMany => {
                    if let Some(back) = member.has_many(inverse) {
                        back.push(owner);
                    }
                }
            }
        }
        self.notify(RecordChange { record: member.clone(), kind: ChangeKind::Updated });
        Ok(())
    }

    pub fn remove_from_has_many(&mut self, owner: &Record, key: &str, member: &Record) -> Result<()> {
        self.ensure_tracked(owner)?;
        let schema = self.schemas.get(owner.type_key())?.clone();
        let rel = schema.relationship_of(key, RelationshipKind::HasMany)?.clone();
        let array = has_many_array(&schema, owner, key)?;
        if !array.remove(member) {
            return Ok(());
        }
        if let Some(inverse) = &rel.inverse {
            match self.inverse_kind(&rel.target, inverse)? {
                RelationshipKind::BelongsTo => {
                    if member.belongs_to(inverse).is_some_and(|r| r.ptr_eq(owner)) {
                        member.link_belongs_to(inverse, None);
                    }
                }
                RelationshipKind::HasMany => {
                    if let Some(back) = member.has_many(inverse) {
                        back.remove(owner);
                    }
                }
            }
        }
        self.notify(RecordChange { record: member.clone(), kind: ChangeKind::Updated });
        Ok(())
    }

    // =========================================================================
    // Arrays
    // =========================================================================

    /// The live array of every visible record of a type. Repeated calls return
    /// the same array.
    pub fn all(&mut self, type_key: &str) -> Result<RecordArray> {
        if let Some(array) = self.live_arrays.get(type_key) {
            return Ok(array.clone());
        }
        self.schemas.get(type_key)?;
        let array = RecordArray::new(ArraySource::All { type_key: type_key.to_string() }, self.change_buffer);
        let members: Vec<Record> = self
            .records_of(type_key)
            .into_iter()
            .filter(|r| r.state().is_visible())
            .collect();
        array.replace(&members);
        self.register(&array);
        self.live_arrays.insert(type_key.to_string(), array.clone());
        Ok(array)
    }

    /// A live array of visible records of a type that pass `predicate`.
    pub fn filter(&mut self, type_key: &str, predicate: RecordPredicate) -> Result<RecordArray> {
        self.schemas.get(type_key)?;
        let members: Vec<Record> = self
            .records_of(type_key)
            .into_iter()
            .filter(|r| r.state().is_visible() && predicate(r))
            .collect();
        let array = RecordArray::new(
            ArraySource::Filter { type_key: type_key.to_string(), predicate },
            self.change_buffer,
        );
        array.replace(&members);
        self.register(&array);
        Ok(array)
    }

    /// An empty array to be filled by fetches.
    pub fn query_array(&mut self, type_key: &str) -> Result<RecordArray> {
        self.schemas.get(type_key)?;
        let array = RecordArray::new(ArraySource::Query { type_key: type_key.to_string() }, self.change_buffer);
        self.register(&array);
        Ok(array)
    }

    /// Merges `records` and makes them the content of `array` (`append` keeps
    /// the current members in front).
    pub fn load_into(
        &mut self,
        array: &RecordArray,
        records: Vec<NormalizedRecord>,
        append: bool,
    ) -> Result<Vec<Record>> {
        let records = self.insert_many(records)?;
        if append {
            array.extend(&records);
        } else {
            array.replace(&records);
        }
        array.mark_loaded();
        Ok(records)
    }

    pub fn register(&mut self, array: &RecordArray) {
        self.observers.push(Arc::downgrade(&array.observer()));
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Opens a batch scope; queued changes flush when the guard drops.
    pub fn begin_batch(&mut self) -> Batch<'_> {
        self.batch_depth += 1;
        Batch { map: self }
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        if self.batch_depth == 0 && !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            trace!(changes = pending.len(), "Flushing batch");
            self.deliver(&pending);
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn notify(&mut self, change: RecordChange) {
        if self.batch_depth > 0 && change.kind != ChangeKind::Deleted {
            self.pending.push(change);
        } else {
            self.deliver(std::slice::from_ref(&change));
        }
    }

    fn deliver(&mut self, changes: &[RecordChange]) {
        self.observers.retain(|observer| observer.strong_count() > 0);
        let observers: Vec<Arc<dyn RecordObserver>> =
            self.observers.iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            observer.records_changed(changes);
        }
    }

    fn allocate(&mut self, type_key: &str, id: Option<String>, state: RecordState) -> Result<Record> {
        let schema = self.schemas.get(type_key)?.clone();
        let client_id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let mut has_many = BTreeMap::new();
        for key in schema.has_many_keys() {
            // Has-many arrays are kept by relationship bookkeeping and
            // `remove_record`, not by observing every change.
            let array = RecordArray::new(
                ArraySource::HasMany { owner: client_id, key: key.to_string() },
                self.change_buffer,
            );
            has_many.insert(key.to_string(), array);
        }

        let record = Record::new(client_id, type_key, id.clone(), state, has_many);
        if let Some(id) = id {
            self.index.insert(RecordIdentity::new(type_key, id), client_id);
        }
        self.records.insert(client_id, record.clone());
        Ok(record)
    }

    fn ensure_tracked(&self, record: &Record) -> Result<()> {
        if self.contains(record) {
            Ok(())
        } else {
            Err(StoreError::NotFound(
                record
                    .identity()
                    .map(|identity| identity.to_string())
                    .unwrap_or_else(|| record.client_id().to_string()),
            ))
        }
    }

    fn validate(&self, normalized: &NormalizedRecord) -> Result<()> {
        let schema = self.schemas.get(&normalized.type_key)?;
        for key in normalized.belongs_to.keys() {
            let rel = schema.relationship_of(key, RelationshipKind::BelongsTo)?;
            self.schemas.get(&rel.target)?;
        }
        for key in normalized.has_many.keys() {
            let rel = schema.relationship_of(key, RelationshipKind::HasMany)?;
            self.schemas.get(&rel.target)?;
        }
        Ok(())
    }

    /// The related record for `record.key = id`, allocating a placeholder if
    /// it has never been loaded.
    fn resolve(&mut self, record: &Record, key: &str, id: String) -> Result<Record> {
        let schema = self.schemas.get(record.type_key())?.clone();
        let target_type = schema
            .relationship(key)
            .map(|rel| rel.target.clone())
            .ok_or_else(|| StoreError::UnknownRelationship {
                type_key: record.type_key().to_string(),
                key: key.to_string(),
            })?;
        let identity = RecordIdentity::new(&target_type, &id);
        match self.lookup(&identity) {
            Some(existing) => Ok(existing),
            None => self.allocate(&target_type, Some(id), RecordState::Empty),
        }
    }

    fn inverse_kind(&self, target_type: &str, inverse: &str) -> Result<RelationshipKind> {
        let target = self.schemas.get(target_type)?;
        target
            .relationship(inverse)
            .map(|rel| rel.kind)
            .ok_or_else(|| StoreError::UnknownRelationship {
                type_key: target_type.to_string(),
                key: inverse.to_string(),
            })
    }

    fn link(&mut self, record: &Record, key: &str, target: Option<&Record>) -> Result<()> {
        let schema = self.schemas.get(record.type_key())?.clone();
        let rel = schema.relationship_of(key, RelationshipKind::BelongsTo)?.clone();
        if let Some(target) = target {
            check_target(&rel.target, target)?;
        }
        let previous = record.belongs_to(key);
        if let (Some(previous), Some(target)) = (&previous, target) {
            if previous.ptr_eq(target) {
                return Ok(());
            }
        }
        record.link_belongs_to(key, target);

        if let Some(inverse) = &rel.inverse {
            match self.inverse_kind(&rel.target, inverse)? {
                RelationshipKind::HasMany => {
                    if let Some(array) = previous.as_ref().and_then(|p| p.has_many(inverse)) {
                        array.remove(record);
                    }
                    if let Some(array) = target.and_then(|t| t.has_many(inverse)) {
                        array.push(record);
                    }
                }
                RelationshipKind::BelongsTo => {
                    if let Some(previous) = &previous {
                        previous.link_belongs_to(inverse, None);
                    }
                    if let Some(target) = target {
                        target.link_belongs_to(inverse, Some(record));
                    }
                }
            }
        }
        Ok(())
    }

    fn reset_has_many(&mut self, owner: &Record, key: &str, members: &[Record]) -> Result<()> {
        let schema = self.schemas.get(owner.type_key())?.clone();
        let rel = schema.relationship_of(key, RelationshipKind::HasMany)?.clone();
        let array = has_many_array(&schema, owner, key)?;
        let previous = array.to_vec();
        array.replace(members);

        let Some(inverse) = &rel.inverse else {
            return Ok(());
        };
        if self.inverse_kind(&rel.target, inverse)? != RelationshipKind::BelongsTo {
            return Ok(());
        }
        for old in previous.iter().filter(|old| !members.contains(old)) {
            if old.belongs_to(inverse).is_some_and(|r| r.ptr_eq(owner)) {
                old.link_belongs_to(inverse, None);
            }
        }
        for member in members {
            if let Some(other) = member.belongs_to(inverse).filter(|r| !r.ptr_eq(owner)) {
                if let Some(old) = other.has_many(key) {
                    old.remove(member);
                }
            }
            member.link_belongs_to(inverse, Some(owner));
        }
        Ok(())
    }
}

fn check_target(expected: &str, record: &Record) -> Result<()> {
    if record.type_key() == expected {
        Ok(())
    } else {
        Err(StoreError::InvalidPayload(format!(
            "expected a '{expected}' record, got '{}'",
            record.type_key()
        )))
    }
}

fn has_many_array(schema: &ModelSchema, owner: &Record, key: &str) -> Result<RecordArray> {
    owner
        .has_many(key)
        .ok_or_else(|| StoreError::UnknownRelationship {
            type_key: schema.type_key().to_string(),
            key: key.to_string(),
        })
}

/// Guard returned by [`IdentityMap::begin_batch`].
pub struct Batch<'a> {
    map: &'a mut IdentityMap,
}

impl Deref for Batch<'_> {
    type Target = IdentityMap;

    fn deref(&self) -> &IdentityMap {
        self.map
    }
}

impl DerefMut for Batch<'_> {
    fn deref_mut(&mut self) -> &mut IdentityMap {
        self.map
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        self.map.end_batch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_array::ArrayChange;
    use crate::schema::AttrKind;
    use serde_json::json;

    fn schemas() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new()
                .with(
                    ModelSchema::new("person")
                        .plural("people")
                        .attr("name", AttrKind::String)
                        .belongs_to("tag", "tag", Some("people")),
                )
                .with(ModelSchema::new("tag").has_many("people", "person", Some("tag"))),
        )
    }

    fn person(id: &str, name: &str) -> NormalizedRecord {
        let mut record = NormalizedRecord::new("person", id);
        record.attributes.insert("name".into(), json!(name));
        record
    }

    fn fields(name: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("name".into(), json!(name));
        fields
    }

    #[test]
    fn same_identity_same_instance() {
        let mut map = IdentityMap::new(schemas(), 8);
        let first = map.insert_or_update(person("1", "Scumbag Dale")).unwrap();
        let second = map.insert_or_update(person("1", "Scumbag Katz")).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.get_str("name").as_deref(), Some("Scumbag Katz"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn repeated_payloads_are_idempotent() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        let payload = vec![person("1", "a"), person("2", "b")];
        map.insert_many(payload.clone()).unwrap();
        map.insert_many(payload).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(people.len(), 2);
    }

    #[test]
    fn all_array_tracks_inserts_and_removals() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        map.insert_or_update(person("1", "wycats")).unwrap();
        assert_eq!(people.last_object().unwrap().get_str("name").as_deref(), Some("wycats"));
        map.insert_or_update(person("2", "brohuda")).unwrap();
        assert_eq!(people.last_object().unwrap().get_str("name").as_deref(), Some("brohuda"));

        map.remove(&RecordIdentity::new("person", "1")).unwrap();
        assert_eq!(people.ids(), vec!["2"]);
        assert!(map.lookup(&RecordIdentity::new("person", "1")).is_none());
    }

    #[test]
    fn removing_unknown_identity_is_an_error() {
        let mut map = IdentityMap::new(schemas(), 8);
        assert!(matches!(
            map.remove(&RecordIdentity::new("person", "9")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn batch_defers_insertions_but_not_deletions() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        let dale = map.create_unsaved("person", fields("Scumbag Dale")).unwrap();
        assert_eq!(people.len(), 1);

        let mut rx = people.subscribe();
        {
            let mut batch = map.begin_batch();
            for name in ["p1", "p2", "p3"] {
                batch.create_unsaved("person", fields(name)).unwrap();
            }
            assert_eq!(batch.all("person").unwrap().len(), 1);

            batch.remove_record(&dale).unwrap();
            assert_eq!(people.len(), 0);
        }
        assert_eq!(people.len(), 3);
        assert_eq!(rx.try_recv().unwrap(), ArrayChange::Removed { index: 0, count: 1 });
        assert_eq!(rx.try_recv().unwrap(), ArrayChange::Inserted { index: 0, count: 3 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn record_created_and_deleted_in_one_batch_never_appears() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        {
            let mut batch = map.begin_batch();
            let temp = batch.create_unsaved("person", fields("temp")).unwrap();
            batch.remove_record(&temp).unwrap();
        }
        assert!(people.is_empty());
    }

    #[test]
    fn has_many_and_inverse_belongs_to() {
        let mut map = IdentityMap::new(schemas(), 8);
        let dale = map.insert_or_update(person("1", "Scumbag Dale")).unwrap();
        let tag = map.insert_or_update(NormalizedRecord::new("tag", "1")).unwrap();

        map.add_to_has_many(&tag, "people", &dale).unwrap();
        assert!(dale.belongs_to("tag").unwrap().ptr_eq(&tag));
        let members = tag.has_many("people").unwrap();
        assert_eq!(members.len(), 1);

        map.remove_record(&dale).unwrap();
        assert_eq!(members.len(), 0);
    }

    #[test]
    fn has_many_arrays_are_not_change_observers() {
        let mut map = IdentityMap::new(schemas(), 8);
        let tags: Vec<NormalizedRecord> = (1..=50).map(|n| NormalizedRecord::new("tag", n.to_string())).collect();
        let tags = map.insert_many(tags).unwrap();
        assert!(map.observers.is_empty());

        let dale = map.insert_or_update(person("1", "Dale")).unwrap();
        map.add_to_has_many(&tags[1], "people", &dale).unwrap();
        let members = tags[1].has_many("people").unwrap();
        assert_eq!(members.len(), 1);
        assert!(map.observers.is_empty());

        map.remove_record(&dale).unwrap();
        assert!(members.is_empty());
    }

    #[test]
    fn payload_relationships_create_placeholders() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        let mut tag = NormalizedRecord::new("tag", "1");
        tag.has_many.insert("people".into(), vec!["1".into(), "2".into()]);
        let tag = map.insert_or_update(tag).unwrap();

        let members = tag.has_many("people").unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members.object_at(0).unwrap().state(), RecordState::Empty);
        // Placeholders are not visible in type arrays until loaded.
        assert!(people.is_empty());

        let loaded = map.insert_or_update(person("1", "Dale")).unwrap();
        assert!(loaded.ptr_eq(&members.object_at(0).unwrap()));
        assert!(loaded.belongs_to("tag").unwrap().ptr_eq(&tag));
        assert_eq!(people.len(), 1);
    }

    #[test]
    fn moving_belongs_to_updates_both_owners() {
        let mut map = IdentityMap::new(schemas(), 8);
        let dale = map.insert_or_update(person("1", "Dale")).unwrap();
        let first = map.insert_or_update(NormalizedRecord::new("tag", "1")).unwrap();
        let second = map.insert_or_update(NormalizedRecord::new("tag", "2")).unwrap();

        map.set_belongs_to(&dale, "tag", Some(&first)).unwrap();
        assert_eq!(first.has_many("people").unwrap().len(), 1);
        map.set_belongs_to(&dale, "tag", Some(&second)).unwrap();
        assert_eq!(first.has_many("people").unwrap().len(), 0);
        assert_eq!(second.has_many("people").unwrap().len(), 1);
    }

    #[test]
    fn save_assigns_identity_once() {
        let mut map = IdentityMap::new(schemas(), 8);
        let existing = map.insert_or_update(person("1", "a")).unwrap();
        let fresh = map.create_unsaved("person", fields("b")).unwrap();

        assert!(matches!(
            map.did_save(&fresh, Some(person("1", "b"))),
            Err(StoreError::DuplicateIdentity(_))
        ));
        map.did_save(&fresh, Some(person("2", "b"))).unwrap();
        assert_eq!(fresh.state(), RecordState::Loaded);
        assert!(map.lookup(&RecordIdentity::new("person", "2")).unwrap().ptr_eq(&fresh));
        assert!(map.lookup(&RecordIdentity::new("person", "1")).unwrap().ptr_eq(&existing));
    }

    #[test]
    fn local_updates_mark_records_dirty_and_keep_order() {
        let mut map = IdentityMap::new(schemas(), 8);
        let people = map.all("person").unwrap();
        let a = map.insert_or_update(person("1", "a")).unwrap();
        map.insert_or_update(person("2", "b")).unwrap();
        map.update_attributes(&a, fields("toto")).unwrap();
        assert_eq!(a.state(), RecordState::Updated);
        assert_eq!(people.ids(), vec!["1", "2"]);
    }

    #[test]
    fn failed_loads_fall_back_to_placeholders() {
        let mut map = IdentityMap::new(schemas(), 8);
        let identity = RecordIdentity::new("person", "5");
        let record = map.begin_load(&identity).unwrap();
        assert_eq!(record.state(), RecordState::Loading);
        map.load_failed(&identity, "timeout".into());
        assert_eq!(record.state(), RecordState::Empty);
        assert_eq!(record.error().as_deref(), Some("timeout"));
    }
}
