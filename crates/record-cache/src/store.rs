//! # Store
//!
//! [`Store`] is the application-facing handle: cloneable, cheap, and safe to
//! share across tasks. It normalizes payloads, runs adapter calls through the
//! [`QueryExecutor`], and forwards every mutation to the store actor.
//!
//! ```rust
//! use record_cache::schema::{AttrKind, ModelSchema};
//! use record_cache::Store;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> record_cache::Result<()> {
//!     let (store, handle) = Store::builder()
//!         .schema(ModelSchema::new("person").plural("people").attr("name", AttrKind::String))
//!         .spawn();
//!
//!     let people = store.all("person").await?;
//!     store.push("person", json!({ "id": 1, "name": "wycats" })).await?;
//!     assert_eq!(people.last_object().and_then(|p| p.get_str("name")).as_deref(), Some("wycats"));
//!
//!     store.shutdown().await?;
//!     handle.await.ok();
//!     Ok(())
//! }
//! ```

use crate::actor::StoreActor;
use crate::adapter::{Adapter, AdapterRegistry};
use crate::client::StoreClient;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::executor::{Query, QueryExecutor, QueryResult};
use crate::identity::RecordIdentity;
use crate::message::BatchOp;
use crate::paginated::PaginatedRecordArray;
use crate::record::Record;
use crate::record_array::RecordArray;
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::serializer::{fields_of, normalize, normalize_all};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Assembles a store from schemas, adapters and configuration.
#[derive(Default)]
pub struct StoreBuilder {
    schemas: SchemaRegistry,
    adapters: AdapterRegistry,
    config: StoreConfig,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(mut self, schema: ModelSchema) -> Self {
        self.schemas.register(schema);
        self
    }

    /// Adapter used for every type without its own.
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.set_default(adapter);
        self
    }

    pub fn type_adapter(mut self, type_key: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.register(type_key, adapter);
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the actor and its store without starting anything.
    pub fn build(self) -> (StoreActor, Store) {
        let schemas = Arc::new(self.schemas);
        let (actor, client) = StoreActor::new(schemas.clone(), &self.config);
        let executor = QueryExecutor::new(client, schemas, Arc::new(self.adapters), Arc::new(self.config));
        (actor, Store { executor })
    }

    /// Builds and spawns the actor on the current runtime.
    pub fn spawn(self) -> (Store, JoinHandle<()>) {
        let (actor, store) = self.build();
        let handle = tokio::spawn(actor.run());
        (store, handle)
    }
}

/// Handle to a running store.
#[derive(Clone)]
pub struct Store {
    executor: QueryExecutor,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    fn client(&self) -> &StoreClient {
        self.executor.client()
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn config(&self) -> &StoreConfig {
        self.executor.config()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        self.executor.schemas()
    }

    pub fn adapter_for(&self, type_key: &str) -> Result<Arc<dyn Adapter>> {
        self.executor.adapter_for(type_key)
    }

    // =========================================================================
    // Loading data
    // =========================================================================

    /// Merges one raw record and returns its canonical instance.
    pub async fn push(&self, type_key: &str, raw: Value) -> Result<Record> {
        let schema = self.executor.schema(type_key)?;
        let normalized = normalize(&schema, &raw)?;
        let mut merged = self.client().merge(vec![normalized]).await?;
        merged
            .pop()
            .ok_or_else(|| StoreError::InvalidPayload(format!("push of '{type_key}' merged nothing")))
    }

    /// Merges raw records in one step; array observers see a single change.
    pub async fn push_many(&self, type_key: &str, raws: Vec<Value>) -> Result<Vec<Record>> {
        let schema = self.executor.schema(type_key)?;
        let normalized = normalize_all(&schema, &raws)?;
        self.client().merge(normalized).await
    }

    /// The record for `(type_key, id)`, fetched through the adapter unless
    /// already loaded.
    pub async fn find(&self, type_key: &str, id: impl ToString) -> Result<Record> {
        self.executor.find(type_key, &id.to_string()).await
    }

    /// Records for `ids`, in order.
    pub async fn find_by_ids<I>(&self, type_key: &str, ids: I) -> Result<Vec<Record>>
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
        self.executor.find_by_ids(type_key, &ids).await
    }

    /// First page of every record of a type.
    pub async fn find_all(&self, type_key: &str) -> Result<PaginatedRecordArray> {
        self.find_query(Query::all(type_key)).await
    }

    pub async fn find_all_page(&self, type_key: &str, page: u32) -> Result<PaginatedRecordArray> {
        if page == 0 {
            return Err(StoreError::InvalidPage(page));
        }
        self.find_query(Query::all(type_key).with_page(page)).await
    }

    /// Runs `query` into a new paginated array.
    #[instrument(skip(self))]
    pub async fn find_query(&self, query: Query) -> Result<PaginatedRecordArray> {
        let page_size = self.executor.page_size_for(query.type_key())?;
        let array = self.client().query_array(query.type_key().to_string()).await?;
        let paginated = PaginatedRecordArray::new(array, query, self.executor.clone(), page_size);
        paginated.load_initial().await?;
        debug!(len = paginated.len(), state = ?paginated.page_state(), "Query loaded");
        Ok(paginated)
    }

    /// Runs `query` once and merges the result without building an array.
    pub async fn execute(&self, query: Query) -> Result<QueryResult> {
        self.executor.execute(query).await
    }

    // =========================================================================
    // Live arrays
    // =========================================================================

    /// Every visible record of a type. Repeated calls share one array.
    pub async fn all(&self, type_key: &str) -> Result<RecordArray> {
        self.client().all(type_key.to_string()).await
    }

    /// Visible records of a type that pass `predicate`, kept current as
    /// records change.
    pub async fn filter<F>(&self, type_key: &str, predicate: F) -> Result<RecordArray>
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.client()
            .filter(type_key.to_string(), Arc::new(predicate))
            .await
    }

    /// The cached record for `(type_key, id)`, without fetching.
    pub async fn peek(&self, type_key: &str, id: impl ToString) -> Result<Option<Record>> {
        self.client()
            .peek(RecordIdentity::new(type_key, id.to_string()))
            .await
    }

    // =========================================================================
    // Local changes
    // =========================================================================

    /// Creates an unsaved record from a JSON object of attributes.
    pub async fn create_record(&self, type_key: &str, fields: Value) -> Result<Record> {
        let fields = fields_of(fields)?;
        self.client().create(type_key.to_string(), fields).await
    }

    pub async fn update_record(&self, record: &Record, fields: Value) -> Result<()> {
        let fields = fields_of(fields)?;
        self.client().update(record.clone(), fields).await
    }

    /// Removes a record locally, from the identity map and from every array.
    pub async fn delete_record(&self, record: &Record) -> Result<()> {
        self.client().delete(record.clone()).await
    }

    pub async fn save(&self, record: &Record) -> Result<()> {
        self.executor.save(record).await
    }

    /// Deletes a record through its adapter, then locally.
    pub async fn destroy_record(&self, record: &Record) -> Result<()> {
        self.executor.destroy(record).await
    }

    /// Starts a batch of changes applied in one step.
    pub fn batch(&self) -> StoreBatch<'_> {
        StoreBatch {
            store: self,
            ops: Vec::new(),
            error: None,
        }
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    pub async fn set_belongs_to(&self, record: &Record, key: &str, target: Option<&Record>) -> Result<()> {
        self.client()
            .set_belongs_to(record.clone(), key.to_string(), target.cloned())
            .await
    }

    pub async fn add_to_has_many(&self, owner: &Record, key: &str, member: &Record) -> Result<()> {
        self.client()
            .add_to_has_many(owner.clone(), key.to_string(), member.clone())
            .await
    }

    pub async fn remove_from_has_many(&self, owner: &Record, key: &str, member: &Record) -> Result<()> {
        self.client()
            .remove_from_has_many(owner.clone(), key.to_string(), member.clone())
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Number of records held, including unsaved ones.
    pub async fn len(&self) -> Result<usize> {
        self.client().len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Stops the store actor. Arrays and records stay readable; further store
    /// calls fail with [`StoreError::StoreClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down store");
        self.client().shutdown().await
    }

    pub fn is_closed(&self) -> bool {
        self.client().is_closed()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("executor", &self.executor)
            .finish()
    }
}

/// Changes collected by [`Store::batch`] and applied by [`StoreBatch::commit`].
///
/// Arrays see every insertion of the batch as one change. Deletions still
/// take effect in order, so a record created and deleted in the same batch
/// never appears.
#[must_use = "a batch does nothing until committed"]
pub struct StoreBatch<'a> {
    store: &'a Store,
    ops: Vec<BatchOp>,
    error: Option<StoreError>,
}

impl StoreBatch<'_> {
    pub fn push(mut self, type_key: &str, raw: Value) -> Self {
        if self.error.is_none() {
            match self
                .store
                .executor
                .schema(type_key)
                .and_then(|schema| normalize(&schema, &raw))
            {
                Ok(normalized) => self.ops.push(BatchOp::Push(normalized)),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn create(mut self, type_key: &str, fields: Value) -> Self {
        if self.error.is_none() {
            match fields_of(fields) {
                Ok(fields) => self.ops.push(BatchOp::Create {
                    type_key: type_key.to_string(),
                    fields,
                }),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn update(mut self, record: &Record, fields: Value) -> Self {
        if self.error.is_none() {
            match fields_of(fields) {
                Ok(fields) => self.ops.push(BatchOp::Update {
                    record: record.clone(),
                    fields,
                }),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn delete(mut self, record: &Record) -> Self {
        self.ops.push(BatchOp::Delete(record.clone()));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies the batch. Returns pushed and created records in order.
    ///
    /// Ops apply in order and are not rolled back: if one fails, the ops
    /// before it stay applied (their insertions still reach arrays as one
    /// change), the rest are skipped, and the error is returned.
    pub async fn commit(self) -> Result<Vec<Record>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.store.client().batch(self.ops).await
    }
}
