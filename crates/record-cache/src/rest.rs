//! # REST Adapter
//!
//! [`RestAdapter`] maps store operations onto REST conventions and reads the
//! responses as documents:
//!
//! | Operation | Verb | URL | Body |
//! |-----------|------|-----|------|
//! | find | `GET` | `/people/1` | |
//! | find_all | `GET` | `/people` | `{ "page": 2, "pageSize": 10 }` when paged |
//! | find_query | `GET` | `/people` | query params (+ paging) |
//! | create | `POST` | `/people` | `{ "person": {...} }` |
//! | update | `PUT` | `/people/1` | `{ "person": {...} }` |
//! | delete | `DELETE` | `/people/1` | |
//!
//! The wire itself is a [`Transport`], so the adapter works the same over a
//! real HTTP client, an in-process server, or a test double.

use crate::adapter::{Adapter, AdapterPayload, AdapterResult, PageRequest, PageSizeSetting};
use crate::error::AdapterError;
use crate::schema::ModelSchema;
use crate::serializer::extract_document;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Display;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

/// One request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub url: String,
    pub verb: Verb,
    pub data: Option<Value>,
}

/// Sends requests and returns decoded JSON bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn ajax(&self, request: RestRequest) -> AdapterResult<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn ajax(&self, request: RestRequest) -> AdapterResult<Value> {
        (**self).ajax(request).await
    }
}

pub struct RestAdapter<T> {
    transport: T,
    host: Option<String>,
    namespace: Option<String>,
    page_size: PageSizeSetting,
}

impl<T: Transport> RestAdapter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            host: None,
            namespace: None,
            page_size: PageSizeSetting::default(),
        }
    }

    /// Prefix for every URL, e.g. `https://api.example.com`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().trim_end_matches('/').to_string());
        self
    }

    /// Path segment between host and resource, e.g. `api/v1`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into().trim_matches('/').to_string());
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// URL of a collection (`id = None`) or of one record.
    pub fn build_url(&self, schema: &ModelSchema, id: Option<&str>) -> String {
        let mut url = self.host.clone().unwrap_or_default();
        if let Some(namespace) = &self.namespace {
            url.push('/');
            url.push_str(namespace);
        }
        url.push('/');
        url.push_str(&schema.root_plural());
        if let Some(id) = id {
            url.push('/');
            url.push_str(id);
        }
        url
    }

    async fn request(&self, schema: &ModelSchema, request: RestRequest) -> AdapterResult<AdapterPayload> {
        debug!(type_key = schema.type_key(), verb = %request.verb, url = %request.url, "REST request");
        let doc = self.transport.ajax(request).await?;
        extract_document(schema, doc).map_err(|e| AdapterError::Malformed(e.to_string()))
    }
}

fn with_page(mut data: Map<String, Value>, page: Option<PageRequest>) -> Option<Value> {
    if let Some(page) = page {
        data.insert("page".into(), Value::from(page.page));
        data.insert("pageSize".into(), Value::from(page.page_size));
    }
    if data.is_empty() {
        None
    } else {
        Some(Value::Object(data))
    }
}

fn root_body(schema: &ModelSchema, record: &Value) -> Value {
    let mut body = Map::new();
    body.insert(schema.type_key().to_string(), record.clone());
    Value::Object(body)
}

#[async_trait]
impl<T: Transport> Adapter for RestAdapter<T> {
    async fn find(&self, schema: &ModelSchema, id: &str) -> AdapterResult<AdapterPayload> {
        let url = self.build_url(schema, Some(id));
        self.request(schema, RestRequest { url, verb: Verb::Get, data: None })
            .await
    }

    async fn find_all(&self, schema: &ModelSchema, page: Option<PageRequest>) -> AdapterResult<AdapterPayload> {
        let url = self.build_url(schema, None);
        let data = with_page(Map::new(), page);
        self.request(schema, RestRequest { url, verb: Verb::Get, data })
            .await
    }

    async fn find_query(
        &self,
        schema: &ModelSchema,
        params: &Map<String, Value>,
        page: Option<PageRequest>,
    ) -> AdapterResult<AdapterPayload> {
        let url = self.build_url(schema, None);
        let data = with_page(params.clone(), page);
        self.request(schema, RestRequest { url, verb: Verb::Get, data })
            .await
    }

    async fn create_record(&self, schema: &ModelSchema, record: &Value) -> AdapterResult<AdapterPayload> {
        let url = self.build_url(schema, None);
        let data = Some(root_body(schema, record));
        self.request(schema, RestRequest { url, verb: Verb::Post, data })
            .await
    }

    async fn update_record(&self, schema: &ModelSchema, id: &str, record: &Value) -> AdapterResult<AdapterPayload> {
        let url = self.build_url(schema, Some(id));
        let data = Some(root_body(schema, record));
        self.request(schema, RestRequest { url, verb: Verb::Put, data })
            .await
    }

    async fn delete_record(&self, schema: &ModelSchema, id: &str) -> AdapterResult<()> {
        let url = self.build_url(schema, Some(id));
        debug!(type_key = schema.type_key(), %url, "REST delete");
        self.transport
            .ajax(RestRequest { url, verb: Verb::Delete, data: None })
            .await?;
        Ok(())
    }

    fn page_size(&self) -> Option<u32> {
        self.page_size.get()
    }

    fn set_page_size(&self, page_size: Option<u32>) {
        self.page_size.set(page_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Answers every request with a fixed document and remembers the request.
    struct Canned {
        response: Value,
        seen: Mutex<Vec<RestRequest>>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn ajax(&self, request: RestRequest) -> AdapterResult<Value> {
            self.seen.lock().push(request);
            Ok(self.response.clone())
        }
    }

    fn adapter(response: Value) -> RestAdapter<Canned> {
        RestAdapter::new(Canned {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn person() -> ModelSchema {
        ModelSchema::new("person").plural("people")
    }

    #[tokio::test]
    async fn paged_find_all_sends_page_params() {
        let rest = adapter(json!({ "meta": { "pageSize": 10 }, "people": [{ "id": 1 }] }));
        let payload = rest
            .find_all(&person(), Some(PageRequest::new(2, 1)))
            .await
            .unwrap();
        assert_eq!(payload.meta.page_size, Some(10));

        let seen = rest.transport().seen.lock();
        assert_eq!(seen[0].url, "/people");
        assert_eq!(seen[0].verb, Verb::Get);
        assert_eq!(seen[0].data, Some(json!({ "page": 2, "pageSize": 1 })));
    }

    #[tokio::test]
    async fn urls_include_host_and_namespace() {
        let rest = adapter(json!({})).host("https://api.example.com/").namespace("/v1/");
        assert_eq!(
            rest.build_url(&person(), Some("7")),
            "https://api.example.com/v1/people/7"
        );
    }

    #[tokio::test]
    async fn create_wraps_the_record_in_its_root() {
        let rest = adapter(json!({ "person": { "id": 9, "name": "Dale" } }));
        let payload = rest
            .create_record(&person(), &json!({ "name": "Dale" }))
            .await
            .unwrap();
        assert_eq!(payload.data, vec![json!({ "id": 9, "name": "Dale" })]);

        let seen = rest.transport().seen.lock();
        assert_eq!(seen[0].verb, Verb::Post);
        assert_eq!(seen[0].data, Some(json!({ "person": { "name": "Dale" } })));
    }

    #[tokio::test]
    async fn unexpected_documents_are_malformed() {
        let rest = adapter(json!("nope"));
        assert!(matches!(
            rest.find(&person(), "1").await,
            Err(AdapterError::Malformed(_))
        ));
    }
}
