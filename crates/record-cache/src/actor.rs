//! # Store Actor
//!
//! This module defines the [`StoreActor`], the task that owns a store's
//! [`IdentityMap`]. It is the "server" half of the store: every mutation of
//! records or record arrays happens here, one request at a time.
//!
//! **Concurrency model**: records and arrays are shared `Arc` handles that
//! callers read directly, but only this task ever writes to them. Requests are
//! processed sequentially, so two fetch completions can never interleave in
//! the middle of a merge.

use crate::client::StoreClient;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::identity_map::IdentityMap;
use crate::message::{BatchOp, Response, StoreRequest};
use crate::paginated::LoadMode;
use crate::record::Record;
use crate::schema::SchemaRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the identity map and applies [`StoreRequest`]s.
///
/// # Usage Pattern
///
/// 1. **Create**: [`StoreActor::new`] returns the actor and a connected client.
/// 2. **Run**: spawn [`StoreActor::run`] on the runtime.
/// 3. **Stop**: send a shutdown request, or drop every client.
///
/// [`StoreBuilder`](crate::StoreBuilder) does all three for you.
pub struct StoreActor {
    receiver: mpsc::Receiver<StoreRequest>,
    map: IdentityMap,
}

impl StoreActor {
    /// Creates an actor and its client.
    ///
    /// `config.buffer_size` bounds the mailbox; callers wait when it is full.
    pub fn new(schemas: Arc<SchemaRegistry>, config: &StoreConfig) -> (Self, StoreClient) {
        let (sender, receiver) = mpsc::channel(config.buffer_size.max(1));
        let actor = Self {
            receiver,
            map: IdentityMap::new(schemas, config.change_buffer),
        };
        (actor, StoreClient::new(sender))
    }

    /// Runs the event loop until shutdown or until every client is gone.
    pub async fn run(mut self) {
        info!("Store started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                StoreRequest::Merge { records, respond_to } => {
                    debug!(count = records.len(), "Merge");
                    let result = self.map.insert_many(records);
                    if let Ok(records) = &result {
                        info!(merged = records.len(), size = self.map.len(), "Merged");
                    }
                    reply(respond_to, result, "merge");
                }
                StoreRequest::LoadPage {
                    array,
                    records,
                    completion,
                    respond_to,
                } => {
                    debug!(source = ?array.source(), count = records.len(), ?completion, "Load page");
                    let result = if completion.is_current() {
                        let append = completion.mode() == LoadMode::Append;
                        self.map.load_into(&array, records, append).map(|loaded| {
                            completion.apply(loaded.len());
                            true
                        })
                    } else {
                        debug!(source = ?array.source(), "Superseded page, merging records only");
                        self.map.insert_many(records).map(|_| false)
                    };
                    reply(respond_to, result, "load_page");
                }
                StoreRequest::Peek { identity, respond_to } => {
                    let record = self.map.lookup(&identity);
                    debug!(%identity, found = record.is_some(), "Peek");
                    let _ = respond_to.send(Ok(record));
                }
                StoreRequest::BeginLoad { identity, respond_to } => {
                    debug!(%identity, "Begin load");
                    let result = self.map.begin_load(&identity);
                    reply(respond_to, result, "begin_load");
                }
                StoreRequest::LoadFailed {
                    identity,
                    error,
                    respond_to,
                } => {
                    warn!(%identity, %error, "Load failed");
                    self.map.load_failed(&identity, error);
                    let _ = respond_to.send(Ok(()));
                }
                StoreRequest::All { type_key, respond_to } => {
                    debug!(%type_key, "All");
                    let result = self.map.all(&type_key);
                    reply(respond_to, result, "all");
                }
                StoreRequest::Filter {
                    type_key,
                    predicate,
                    respond_to,
                } => {
                    debug!(%type_key, "Filter");
                    let result = self.map.filter(&type_key, predicate);
                    reply(respond_to, result, "filter");
                }
                StoreRequest::QueryArray { type_key, respond_to } => {
                    debug!(%type_key, "Query array");
                    let result = self.map.query_array(&type_key);
                    reply(respond_to, result, "query_array");
                }
                StoreRequest::Create {
                    type_key,
                    fields,
                    respond_to,
                } => {
                    debug!(%type_key, ?fields, "Create");
                    let result = self.map.create_unsaved(&type_key, fields);
                    if let Ok(record) = &result {
                        info!(%type_key, client_id = %record.client_id(), size = self.map.len(), "Created");
                    }
                    reply(respond_to, result, "create");
                }
                StoreRequest::Update {
                    record,
                    fields,
                    respond_to,
                } => {
                    debug!(client_id = %record.client_id(), ?fields, "Update");
                    let result = self.map.update_attributes(&record, fields);
                    reply(respond_to, result, "update");
                }
                StoreRequest::Delete { record, respond_to } => {
                    debug!(client_id = %record.client_id(), id = ?record.id(), "Delete");
                    let result = self.map.remove_record(&record);
                    if result.is_ok() {
                        info!(type_key = record.type_key(), size = self.map.len(), "Deleted");
                    }
                    reply(respond_to, result, "delete");
                }
                StoreRequest::DidSave {
                    record,
                    response,
                    respond_to,
                } => {
                    let result = self.map.did_save(&record, response);
                    if result.is_ok() {
                        info!(type_key = record.type_key(), id = ?record.id(), "Saved");
                    }
                    reply(respond_to, result, "did_save");
                }
                StoreRequest::SaveFailed {
                    record,
                    error,
                    respond_to,
                } => {
                    warn!(client_id = %record.client_id(), %error, "Save failed");
                    self.map.save_failed(&record, error);
                    let _ = respond_to.send(Ok(()));
                }
                StoreRequest::SetBelongsTo {
                    record,
                    key,
                    target,
                    respond_to,
                } => {
                    debug!(client_id = %record.client_id(), %key, "Set belongs-to");
                    let result = self.map.set_belongs_to(&record, &key, target.as_ref());
                    reply(respond_to, result, "set_belongs_to");
                }
                StoreRequest::AddToHasMany {
                    owner,
                    key,
                    member,
                    respond_to,
                } => {
                    debug!(owner = %owner.client_id(), %key, member = %member.client_id(), "Add to has-many");
                    let result = self.map.add_to_has_many(&owner, &key, &member);
                    reply(respond_to, result, "add_to_has_many");
                }
                StoreRequest::RemoveFromHasMany {
                    owner,
                    key,
                    member,
                    respond_to,
                } => {
                    debug!(owner = %owner.client_id(), %key, member = %member.client_id(), "Remove from has-many");
                    let result = self.map.remove_from_has_many(&owner, &key, &member);
                    reply(respond_to, result, "remove_from_has_many");
                }
                StoreRequest::Batch { ops, respond_to } => {
                    debug!(ops = ops.len(), "Batch");
                    let result = apply_batch(&mut self.map, ops);
                    if result.is_ok() {
                        info!(size = self.map.len(), "Batch committed");
                    }
                    reply(respond_to, result, "batch");
                }
                StoreRequest::Len { respond_to } => {
                    let _ = respond_to.send(Ok(self.map.len()));
                }
                StoreRequest::Shutdown { respond_to } => {
                    let _ = respond_to.send(Ok(()));
                    break;
                }
            }
        }

        info!(size = self.map.len(), "Shutdown");
    }
}

/// Applies batch ops in order. Insertions reach arrays once, when the batch
/// scope closes; an error stops the remaining ops but keeps the applied ones.
fn apply_batch(map: &mut IdentityMap, ops: Vec<BatchOp>) -> Result<Vec<Record>> {
    let mut batch = map.begin_batch();
    let mut records = Vec::new();
    for op in ops {
        match op {
            BatchOp::Push(normalized) => records.push(batch.insert_or_update(normalized)?),
            BatchOp::Create { type_key, fields } => {
                records.push(batch.create_unsaved(&type_key, fields)?)
            }
            BatchOp::Update { record, fields } => batch.update_attributes(&record, fields)?,
            BatchOp::Delete(record) => batch.remove_record(&record)?,
        }
    }
    Ok(records)
}

fn reply<T>(respond_to: Response<T>, result: Result<T>, op: &'static str) {
    if let Err(e) = &result {
        warn!(op, error = %e, "Request failed");
    }
    let _ = respond_to.send(result);
}

impl std::fmt::Debug for StoreActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreActor")
            .field("records", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::schema::{AttrKind, ModelSchema};
    use crate::serializer::NormalizedRecord;
    use serde_json::{json, Map};

    fn spawn() -> StoreClient {
        let schemas = SchemaRegistry::new().with(ModelSchema::new("person").attr("name", AttrKind::String));
        let (actor, client) = StoreActor::new(Arc::new(schemas), &StoreConfig::default());
        tokio::spawn(actor.run());
        client
    }

    #[tokio::test]
    async fn merges_are_visible_to_later_requests() {
        let client = spawn();
        let mut record = NormalizedRecord::new("person", "1");
        record.attributes.insert("name".into(), json!("wycats"));
        let merged = client.merge(vec![record]).await.unwrap();

        let peeked = client
            .peek(crate::RecordIdentity::new("person", "1"))
            .await
            .unwrap()
            .unwrap();
        assert!(peeked.ptr_eq(&merged[0]));
        assert_eq!(client.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_requests_report_errors() {
        let client = spawn();
        let err = client.create("tag".into(), Map::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownType(_)));
    }

    #[tokio::test]
    async fn shutdown_closes_the_mailbox() {
        let client = spawn();
        client.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        assert!(matches!(
            client.len().await,
            Err(StoreError::StoreClosed | StoreError::StoreDropped)
        ));
    }
}
