//! # Adapters
//!
//! An [`Adapter`] is the store's only path to a backend. The store never
//! speaks HTTP or touches fixtures itself; it hands an adapter a
//! [`ModelSchema`] and gets back an [`AdapterPayload`] of raw JSON records plus
//! optional pagination meta.
//!
//! Implementations in this crate:
//!
//! | Adapter | Backend |
//! |---------|---------|
//! | [`FixtureAdapter`](crate::fixture::FixtureAdapter) | in-memory fixtures, with paging |
//! | [`RestAdapter`](crate::rest::RestAdapter) | REST documents over a pluggable [`Transport`](crate::rest::Transport) |
//! | [`MockAdapter`](crate::mock::MockAdapter) | expectation queue for tests |
//!
//! Adapters are called from the caller's task, outside the store actor, so a
//! slow backend never blocks other store operations.

use crate::error::{AdapterError, Result, StoreError};
use crate::schema::ModelSchema;
use crate::serializer::PayloadMeta;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Result type for adapter calls.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Records and meta returned by an adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterPayload {
    pub data: Vec<Value>,
    pub meta: PayloadMeta,
}

impl AdapterPayload {
    pub fn new(data: Vec<Value>) -> Self {
        Self {
            data,
            meta: PayloadMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: PayloadMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Which page to fetch, and how big pages are. Pages start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Index of the first record of this page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }
}

/// A page size an adapter can be configured with at runtime. Zero means unset.
#[derive(Debug, Default)]
pub struct PageSizeSetting(AtomicU32);

impl PageSizeSetting {
    pub fn get(&self) -> Option<u32> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set(&self, page_size: Option<u32>) {
        self.0.store(page_size.unwrap_or(0), Ordering::Release);
    }
}

/// Backend access for one or more record types.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Fetches one record.
    async fn find(&self, schema: &ModelSchema, id: &str) -> AdapterResult<AdapterPayload>;

    /// Fetches several records. The default issues one `find` per id.
    async fn find_many(&self, schema: &ModelSchema, ids: &[String]) -> AdapterResult<AdapterPayload> {
        let mut data = Vec::with_capacity(ids.len());
        for id in ids {
            data.extend(self.find(schema, id).await?.data);
        }
        Ok(AdapterPayload::new(data))
    }

    /// Fetches every record of a type, or one page of them.
    async fn find_all(&self, schema: &ModelSchema, page: Option<PageRequest>) -> AdapterResult<AdapterPayload>;

    /// Fetches the records matching `params`.
    async fn find_query(
        &self,
        schema: &ModelSchema,
        params: &Map<String, Value>,
        page: Option<PageRequest>,
    ) -> AdapterResult<AdapterPayload>;

    /// Persists a new record. The response should carry the assigned id.
    async fn create_record(&self, schema: &ModelSchema, record: &Value) -> AdapterResult<AdapterPayload>;

    async fn update_record(&self, schema: &ModelSchema, id: &str, record: &Value) -> AdapterResult<AdapterPayload>;

    async fn delete_record(&self, schema: &ModelSchema, id: &str) -> AdapterResult<()>;

    /// Page size sent with paged requests, if configured.
    fn page_size(&self) -> Option<u32> {
        None
    }

    fn set_page_size(&self, _page_size: Option<u32>) {}
}

/// Adapters by record type, with an optional fallback.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    default: Option<Arc<dyn Adapter>>,
    by_type: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, adapter: Arc<dyn Adapter>) {
        self.default = Some(adapter);
    }

    pub fn register(&mut self, type_key: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.by_type.insert(type_key.into(), adapter);
    }

    /// The adapter serving `type_key`.
    pub fn adapter_for(&self, type_key: &str) -> Result<Arc<dyn Adapter>> {
        self.by_type
            .get(type_key)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| StoreError::NoAdapter(type_key.to_string()))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort();
        f.debug_struct("AdapterRegistry")
            .field("has_default", &self.default.is_some())
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureAdapter;

    #[test]
    fn page_offsets_start_at_one() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 1).offset(), 2);
        assert_eq!(PageRequest::new(0, 5).offset(), 0);
    }

    #[test]
    fn page_size_setting_treats_zero_as_unset() {
        let setting = PageSizeSetting::default();
        assert_eq!(setting.get(), None);
        setting.set(Some(1));
        assert_eq!(setting.get(), Some(1));
        setting.set(None);
        assert_eq!(setting.get(), None);
    }

    #[test]
    fn registry_prefers_type_adapters() {
        let fallback: Arc<dyn Adapter> = Arc::new(FixtureAdapter::new());
        let people: Arc<dyn Adapter> = Arc::new(FixtureAdapter::new());
        let mut registry = AdapterRegistry::new();
        assert!(matches!(registry.adapter_for("person"), Err(StoreError::NoAdapter(_))));

        registry.set_default(fallback.clone());
        registry.register("person", people.clone());
        assert!(Arc::ptr_eq(&registry.adapter_for("person").unwrap(), &people));
        assert!(Arc::ptr_eq(&registry.adapter_for("tag").unwrap(), &fallback));
    }
}
