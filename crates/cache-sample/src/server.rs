//! # In-Memory Server
//!
//! A [`Transport`] that answers REST requests from in-process collections, so
//! the sample runs the real [`RestAdapter`](record_cache::RestAdapter) without
//! a network. Paged `GET`s are answered with `pageSize` and `total` meta.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use record_cache::serializer::id_of;
use record_cache::{AdapterError, AdapterResult, RestRequest, Transport, Verb};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

struct Collection {
    root: String,
    records: Vec<Value>,
}

#[derive(Default)]
pub struct InMemoryServer {
    collections: RwLock<HashMap<String, Collection>>,
    log: Mutex<Vec<RestRequest>>,
    offline: AtomicBool,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `records` under `/<plural>`, wrapped in `root` for single-record
    /// responses.
    pub fn with_collection(self, plural: impl Into<String>, root: impl Into<String>, records: Vec<Value>) -> Self {
        self.collections.write().insert(
            plural.into(),
            Collection {
                root: root.into(),
                records,
            },
        );
        self
    }

    /// While offline every request fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<RestRequest> {
        self.log.lock().clone()
    }

    pub fn records(&self, plural: &str) -> Vec<Value> {
        self.collections
            .read()
            .get(plural)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    fn route(&self, url: &str) -> AdapterResult<(String, Option<String>)> {
        let segments: Vec<&str> = url.split('/').filter(|s| !s.is_empty()).collect();
        let collections = self.collections.read();
        match segments.as_slice() {
            [.., plural] if collections.contains_key(*plural) => Ok((plural.to_string(), None)),
            [.., plural, id] if collections.contains_key(*plural) => Ok((plural.to_string(), Some(id.to_string()))),
            _ => Err(not_found(url)),
        }
    }

    fn list(&self, plural: &str, params: Option<Value>) -> AdapterResult<Value> {
        let collections = self.collections.read();
        let collection = collections.get(plural).ok_or_else(|| not_found(plural))?;
        let mut params = match params {
            Some(Value::Object(params)) => params,
            _ => Map::new(),
        };
        let page = params.remove("page").and_then(|v| v.as_u64());
        let page_size = params.remove("pageSize").and_then(|v| v.as_u64());

        let matching: Vec<Value> = collection
            .records
            .iter()
            .filter(|record| params.iter().all(|(key, expected)| record.get(key) == Some(expected)))
            .cloned()
            .collect();

        let mut doc = Map::new();
        let data = match (page, page_size) {
            (Some(page), Some(page_size)) if page_size > 0 => {
                doc.insert("meta".into(), json!({ "pageSize": page_size, "total": matching.len() }));
                let offset = page.saturating_sub(1).saturating_mul(page_size) as usize;
                matching.into_iter().skip(offset).take(page_size as usize).collect()
            }
            _ => matching,
        };
        doc.insert(plural.to_string(), Value::Array(data));
        Ok(Value::Object(doc))
    }

    fn show(&self, plural: &str, id: &str) -> AdapterResult<Value> {
        let collections = self.collections.read();
        let collection = collections.get(plural).ok_or_else(|| not_found(plural))?;
        let record = collection
            .records
            .iter()
            .find(|r| r.get("id").and_then(id_of).as_deref() == Some(id))
            .ok_or_else(|| not_found(&format!("{plural}/{id}")))?;
        Ok(json!({ collection.root.clone(): record }))
    }

    fn create(&self, plural: &str, body: Option<Value>) -> AdapterResult<Value> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(plural).ok_or_else(|| not_found(plural))?;
        let mut fields = unwrap_root(&collection.root, body)?;
        let next = collection
            .records
            .iter()
            .filter_map(|r| r.get("id").and_then(id_of))
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        fields.insert("id".into(), Value::String(next.to_string()));
        let record = Value::Object(fields);
        collection.records.push(record.clone());
        Ok(json!({ collection.root.clone(): record }))
    }

    fn update(&self, plural: &str, id: &str, body: Option<Value>) -> AdapterResult<Value> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(plural).ok_or_else(|| not_found(plural))?;
        let fields = unwrap_root(&collection.root, body)?;
        let record = collection
            .records
            .iter_mut()
            .find(|r| r.get("id").and_then(id_of).as_deref() == Some(id))
            .ok_or_else(|| not_found(&format!("{plural}/{id}")))?;
        if let Value::Object(stored) = &mut *record {
            for (key, value) in fields {
                if key != "id" {
                    stored.insert(key, value);
                }
            }
        }
        Ok(json!({ collection.root.clone(): record.clone() }))
    }

    fn destroy(&self, plural: &str, id: &str) -> AdapterResult<Value> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(plural).ok_or_else(|| not_found(plural))?;
        let before = collection.records.len();
        collection
            .records
            .retain(|r| r.get("id").and_then(id_of).as_deref() != Some(id));
        if collection.records.len() == before {
            return Err(not_found(&format!("{plural}/{id}")));
        }
        Ok(json!({}))
    }
}

fn not_found(what: &str) -> AdapterError {
    AdapterError::Status {
        code: 404,
        message: format!("{what} not found"),
    }
}

fn unwrap_root(root: &str, body: Option<Value>) -> AdapterResult<Map<String, Value>> {
    match body {
        Some(Value::Object(mut doc)) => match doc.remove(root) {
            Some(Value::Object(fields)) => Ok(fields),
            _ => Err(AdapterError::Status {
                code: 422,
                message: format!("body has no '{root}' object"),
            }),
        },
        _ => Err(AdapterError::Status {
            code: 400,
            message: "missing body".into(),
        }),
    }
}

#[async_trait]
impl Transport for InMemoryServer {
    async fn ajax(&self, request: RestRequest) -> AdapterResult<Value> {
        self.log.lock().push(request.clone());
        if self.offline.load(Ordering::Acquire) {
            warn!(url = %request.url, "Server offline");
            return Err(AdapterError::Transport("server offline".into()));
        }

        let (plural, id) = self.route(&request.url)?;
        debug!(verb = %request.verb, %plural, id = id.as_deref(), "Serving request");
        match (request.verb, id) {
            (Verb::Get, None) => self.list(&plural, request.data),
            (Verb::Get, Some(id)) => self.show(&plural, &id),
            (Verb::Post, None) => self.create(&plural, request.data),
            (Verb::Put, Some(id)) => self.update(&plural, &id, request.data),
            (Verb::Delete, Some(id)) => self.destroy(&plural, &id),
            (verb, _) => Err(AdapterError::Status {
                code: 405,
                message: format!("{verb} not allowed on {}", request.url),
            }),
        }
    }
}

impl std::fmt::Debug for InMemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut collections: Vec<String> = self.collections.read().keys().cloned().collect();
        collections.sort();
        f.debug_struct("InMemoryServer")
            .field("collections", &collections)
            .field("offline", &self.offline.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> InMemoryServer {
        InMemoryServer::new().with_collection(
            "people",
            "person",
            vec![json!({ "id": "1", "name": "Dale" }), json!({ "id": "2", "name": "Katz" })],
        )
    }

    fn get(url: &str, data: Option<Value>) -> RestRequest {
        RestRequest {
            url: url.into(),
            verb: Verb::Get,
            data,
        }
    }

    #[tokio::test]
    async fn paged_list_reports_meta() {
        let doc = server()
            .ajax(get("/api/people", Some(json!({ "page": 2, "pageSize": 1 }))))
            .await
            .unwrap();
        assert_eq!(doc["meta"], json!({ "pageSize": 1, "total": 2 }));
        assert_eq!(doc["people"], json!([{ "id": "2", "name": "Katz" }]));
    }

    #[tokio::test]
    async fn unknown_member_is_404() {
        let err = server().ajax(get("/people/9", None)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Status { code: 404, .. }));
    }

    #[tokio::test]
    async fn post_assigns_the_next_id() {
        let server = server();
        let doc = server
            .ajax(RestRequest {
                url: "/people".into(),
                verb: Verb::Post,
                data: Some(json!({ "person": { "name": "Tom" } })),
            })
            .await
            .unwrap();
        assert_eq!(doc["person"]["id"], json!("3"));
        assert_eq!(server.records("people").len(), 3);
    }
}
