//! # Query Executor
//!
//! The [`QueryExecutor`] is the bridge between adapters and the store actor.
//! Every fetch follows the same three steps:
//!
//! 1. **Fetch** on the caller's task. The adapter call is the only suspension
//!    point, and nothing in the store changes while it is pending.
//! 2. **Normalize** the whole payload against the schema. One invalid record
//!    rejects the payload.
//! 3. **Merge** every record in a single actor request.
//!
//! A rejected fetch stops at step 1 and surfaces as
//! [`StoreError::Fetch`](crate::StoreError::Fetch); the identity map and every
//! record array are left exactly as they were.

use crate::adapter::{Adapter, AdapterRegistry, PageRequest};
use crate::client::StoreClient;
use crate::config::StoreConfig;
use crate::error::{FetchError, Result, StoreError};
use crate::identity::RecordIdentity;
use crate::record::{Record, RecordState};
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::serializer::{normalize, normalize_all, NormalizedRecord, PayloadMeta};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What to fetch: every record of a type, or the records matching `params`,
/// optionally starting at a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    type_key: String,
    params: Option<Map<String, Value>>,
    page: Option<u32>,
}

impl Query {
    /// A find-all query.
    pub fn all(type_key: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            params: None,
            page: None,
        }
    }

    /// A query with server-side parameters.
    pub fn matching(type_key: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            type_key: type_key.into(),
            params: Some(params),
            page: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.params.as_ref()
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }

    pub fn is_find_all(&self) -> bool {
        self.params.is_none()
    }

    /// Find-all queries are always paged; parameter queries only when a page
    /// was asked for.
    pub fn is_paged(&self) -> bool {
        self.is_find_all() || self.page.is_some()
    }

    fn operation(&self) -> &'static str {
        if self.is_find_all() {
            "findAll"
        } else {
            "findQuery"
        }
    }
}

/// Records merged by [`QueryExecutor::execute`], in payload order.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub meta: PayloadMeta,
}

/// A normalized payload that has not been merged yet.
#[derive(Debug, Clone)]
pub(crate) struct Fetched {
    pub records: Vec<NormalizedRecord>,
    pub meta: PayloadMeta,
}

/// Runs fetches and saves against the registered adapters.
#[derive(Clone)]
pub struct QueryExecutor {
    client: StoreClient,
    schemas: Arc<SchemaRegistry>,
    adapters: Arc<AdapterRegistry>,
    config: Arc<StoreConfig>,
}

impl QueryExecutor {
    pub fn new(
        client: StoreClient,
        schemas: Arc<SchemaRegistry>,
        adapters: Arc<AdapterRegistry>,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self {
            client,
            schemas,
            adapters,
            config,
        }
    }

    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn schema(&self, type_key: &str) -> Result<Arc<ModelSchema>> {
        self.schemas.get(type_key).cloned()
    }

    pub fn adapter_for(&self, type_key: &str) -> Result<Arc<dyn Adapter>> {
        self.adapters.adapter_for(type_key)
    }

    /// The adapter's page size, else the configured default.
    pub fn page_size_for(&self, type_key: &str) -> Result<u32> {
        let adapter = self.adapter_for(type_key)?;
        Ok(adapter
            .page_size()
            .filter(|size| *size > 0)
            .unwrap_or(self.config.default_page_size)
            .max(1))
    }

    /// Fetches and normalizes without touching the store.
    pub(crate) async fn fetch(&self, query: &Query, page: Option<PageRequest>) -> Result<Fetched> {
        let schema = self.schema(query.type_key())?;
        let adapter = self.adapter_for(query.type_key())?;
        let payload = match query.params() {
            None => adapter.find_all(&schema, page).await,
            Some(params) => adapter.find_query(&schema, params, page).await,
        }
        .map_err(|e| FetchError::new(query.operation(), query.type_key(), e))?;

        let records = normalize_all(&schema, &payload.data)?;
        info!(
            type_key = query.type_key(),
            records = records.len(),
            page = page.map(|p| p.page),
            page_size = page.map(|p| p.page_size),
            "Fetched"
        );
        Ok(Fetched {
            records,
            meta: payload.meta,
        })
    }

    /// Runs `query` once and merges the result.
    #[instrument(skip(self))]
    pub async fn execute(&self, query: Query) -> Result<QueryResult> {
        let page = match query.page() {
            Some(page) => Some(PageRequest::new(page, self.page_size_for(query.type_key())?)),
            None => None,
        };
        let fetched = self.fetch(&query, page).await?;
        let records = self.client.merge(fetched.records).await?;
        Ok(QueryResult {
            records,
            meta: fetched.meta,
        })
    }

    /// The record for `(type_key, id)`, fetched unless already loaded.
    #[instrument(skip(self))]
    pub async fn find(&self, type_key: &str, id: &str) -> Result<Record> {
        let identity = RecordIdentity::new(type_key, id);
        if let Some(record) = self.client.peek(identity.clone()).await? {
            if record.state().is_visible() {
                debug!(%identity, "Cache hit");
                return Ok(record);
            }
        }

        let schema = self.schema(type_key)?;
        let adapter = self.adapter_for(type_key)?;
        let placeholder = self.client.begin_load(identity.clone()).await?;

        let fetched = match adapter.find(&schema, id).await {
            Ok(payload) => normalize_all(&schema, &payload.data),
            Err(e) => Err(FetchError::new("find", type_key, e).into()),
        };
        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                self.client.load_failed(identity, e.to_string()).await?;
                return Err(e);
            }
        };
        if !records.iter().any(|r| r.id == id) {
            let e = StoreError::InvalidPayload(format!("response to find({identity}) does not contain it"));
            self.client.load_failed(identity, e.to_string()).await?;
            return Err(e);
        }

        self.client.merge(records).await?;
        Ok(placeholder)
    }

    /// Records for `ids`, in order. Only the ones not already loaded are
    /// fetched, with one `find_many` call.
    #[instrument(skip(self))]
    pub async fn find_by_ids(&self, type_key: &str, ids: &[String]) -> Result<Vec<Record>> {
        let mut missing = Vec::new();
        for id in ids {
            let cached = self.client.peek(RecordIdentity::new(type_key, id)).await?;
            if !cached.is_some_and(|r| r.state().is_visible()) {
                missing.push(id.clone());
            }
        }

        if !missing.is_empty() {
            let schema = self.schema(type_key)?;
            let adapter = self.adapter_for(type_key)?;
            let payload = adapter
                .find_many(&schema, &missing)
                .await
                .map_err(|e| FetchError::new("findMany", type_key, e))?;
            let records = normalize_all(&schema, &payload.data)?;
            self.client.merge(records).await?;
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let identity = RecordIdentity::new(type_key, id);
            match self.client.peek(identity.clone()).await? {
                Some(record) if record.state().is_visible() => records.push(record),
                _ => return Err(StoreError::not_found(&identity)),
            }
        }
        Ok(records)
    }

    /// Persists a new or changed record.
    ///
    /// On success the record is `loaded` (a new record also receives its
    /// identity). On failure it moves to `error` and the adapter's cause is
    /// returned.
    #[instrument(skip(self, record), fields(client_id = %record.client_id()))]
    pub async fn save(&self, record: &Record) -> Result<()> {
        let type_key = record.type_key().to_string();
        let schema = self.schema(&type_key)?;
        let adapter = self.adapter_for(&type_key)?;
        let body = record.to_json();

        let (operation, outcome) = match (record.state(), record.id()) {
            (RecordState::Deleted, _) => return Err(StoreError::NotFound(record.client_id().to_string())),
            (RecordState::Loaded, Some(_)) => {
                debug!("Nothing to save");
                return Ok(());
            }
            (_, None) => ("createRecord", adapter.create_record(&schema, &body).await),
            (_, Some(id)) => ("updateRecord", adapter.update_record(&schema, &id, &body).await),
        };

        let payload = match outcome {
            Ok(payload) => payload,
            Err(e) => {
                let err = FetchError::new(operation, &type_key, e);
                warn!(error = %err, "Save rejected");
                self.client.save_failed(record.clone(), err.to_string()).await?;
                return Err(err.into());
            }
        };

        let response = match payload.data.first() {
            Some(raw) => Some(normalize(&schema, raw)?),
            None => None,
        };
        self.client.did_save(record.clone(), response).await
    }

    /// Deletes a record on the backend, then locally. Unsaved records are
    /// only removed locally.
    #[instrument(skip(self, record), fields(client_id = %record.client_id()))]
    pub async fn destroy(&self, record: &Record) -> Result<()> {
        if record.is_deleted() {
            return Err(StoreError::NotFound(record.client_id().to_string()));
        }
        if let Some(id) = record.id() {
            let schema = self.schema(record.type_key())?;
            let adapter = self.adapter_for(record.type_key())?;
            adapter
                .delete_record(&schema, &id)
                .await
                .map_err(|e| FetchError::new("deleteRecord", record.type_key(), e))?;
        }
        self.client.delete(record.clone()).await
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_all_queries_are_always_paged() {
        let all = Query::all("person");
        assert!(all.is_find_all());
        assert!(all.is_paged());
        assert_eq!(all.operation(), "findAll");

        let mut params = Map::new();
        params.insert("name".into(), Value::from("Dale"));
        let query = Query::matching("person", params);
        assert!(!query.is_paged());
        assert!(query.clone().with_page(1).is_paged());
        assert_eq!(query.operation(), "findQuery");
    }
}
