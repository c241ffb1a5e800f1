//! # Mock Adapter & Testing Guide
//!
//! [`MockAdapter`] implements [`Adapter`] from a queue of expectations. Each
//! adapter call pops the next expectation, checks that it is the call that was
//! expected, and returns the canned response. It lets tests drive the store
//! through exact backend responses, failures included, without fixtures or a
//! transport.
//!
//! ## When to use which adapter
//!
//! | Feature | MockAdapter | FixtureAdapter | RestAdapter |
//! |---------|-------------|----------------|-------------|
//! | **Responses** | scripted per call | derived from fixtures | whatever the transport returns |
//! | **Call order** | verified | not checked | not checked |
//! | **Error injection** | easy (`return_err`) | none | via a failing transport |
//! | **Use case** | store behaviour around one fetch | paging and query flows | document parsing |
//!
//! ## Example
//!
//! ```rust
//! use record_cache::mock::MockAdapter;
//! use record_cache::schema::{AttrKind, ModelSchema};
//! use record_cache::{AdapterError, Store};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = Arc::new(MockAdapter::new());
//!     mock.expect_find_all().return_ok(vec![json!({ "id": 1, "name": "Tom Dale" })]);
//!     mock.expect_find("2").return_err(AdapterError::NotFound("2".into()));
//!
//!     let (store, _handle) = Store::builder()
//!         .schema(ModelSchema::new("person").plural("people").attr("name", AttrKind::String))
//!         .adapter(mock.clone())
//!         .spawn();
//!
//!     let people = store.find_all("person").await.unwrap();
//!     assert_eq!(people.len(), 1);
//!
//!     // Simulate a backend failure
//!     let result = store.find("person", 2).await;
//!     assert!(result.unwrap_err().is_fetch());
//!
//!     mock.verify();
//! }
//! ```
//!
//! ## Holding a response
//!
//! [`ExpectationBuilder::hold`] keeps a call pending until a
//! [`Notify`] is triggered. Tests use it to interleave overlapping loads
//! deterministically.

use crate::adapter::{Adapter, AdapterPayload, AdapterResult, PageRequest, PageSizeSetting};
use crate::error::AdapterError;
use crate::schema::ModelSchema;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// The kinds of adapter call an expectation can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Find,
    FindMany,
    FindAll,
    FindQuery,
    CreateRecord,
    UpdateRecord,
    DeleteRecord,
}

/// A call received by the mock, recorded for later assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Find { type_key: String, id: String },
    FindMany { type_key: String, ids: Vec<String> },
    FindAll { type_key: String, page: Option<PageRequest> },
    FindQuery { type_key: String, params: Map<String, Value>, page: Option<PageRequest> },
    CreateRecord { type_key: String, record: Value },
    UpdateRecord { type_key: String, id: String, record: Value },
    DeleteRecord { type_key: String, id: String },
}

impl MockCall {
    pub fn kind(&self) -> CallKind {
        match self {
            MockCall::Find { .. } => CallKind::Find,
            MockCall::FindMany { .. } => CallKind::FindMany,
            MockCall::FindAll { .. } => CallKind::FindAll,
            MockCall::FindQuery { .. } => CallKind::FindQuery,
            MockCall::CreateRecord { .. } => CallKind::CreateRecord,
            MockCall::UpdateRecord { .. } => CallKind::UpdateRecord,
            MockCall::DeleteRecord { .. } => CallKind::DeleteRecord,
        }
    }

    /// The page requested, for paged calls.
    pub fn page(&self) -> Option<PageRequest> {
        match self {
            MockCall::FindAll { page, .. } | MockCall::FindQuery { page, .. } => *page,
            _ => None,
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            MockCall::Find { id, .. } | MockCall::UpdateRecord { id, .. } | MockCall::DeleteRecord { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }
}

struct Expectation {
    kind: CallKind,
    id: Option<String>,
    gate: Option<Arc<Notify>>,
    response: AdapterResult<AdapterPayload>,
}

type Expectations = Arc<Mutex<VecDeque<Expectation>>>;

/// An adapter answering from a queue of expectations.
#[derive(Default)]
pub struct MockAdapter {
    expectations: Expectations,
    calls: Mutex<Vec<MockCall>>,
    page_size: PageSizeSetting,
}

impl MockAdapter {
    /// Creates a mock with no expectations.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(self, page_size: u32) -> Self {
        self.page_size.set(Some(page_size));
        self
    }

    pub fn expect_find(&self, id: impl Into<String>) -> ExpectationBuilder {
        self.expect(CallKind::Find, Some(id.into()))
    }

    pub fn expect_find_many(&self) -> ExpectationBuilder {
        self.expect(CallKind::FindMany, None)
    }

    pub fn expect_find_all(&self) -> ExpectationBuilder {
        self.expect(CallKind::FindAll, None)
    }

    pub fn expect_find_query(&self) -> ExpectationBuilder {
        self.expect(CallKind::FindQuery, None)
    }

    pub fn expect_create(&self) -> ExpectationBuilder {
        self.expect(CallKind::CreateRecord, None)
    }

    pub fn expect_update(&self, id: impl Into<String>) -> ExpectationBuilder {
        self.expect(CallKind::UpdateRecord, Some(id.into()))
    }

    pub fn expect_delete(&self, id: impl Into<String>) -> ExpectationBuilder {
        self.expect(CallKind::DeleteRecord, Some(id.into()))
    }

    fn expect(&self, kind: CallKind, id: Option<String>) -> ExpectationBuilder {
        ExpectationBuilder {
            kind,
            id,
            gate: None,
            expectations: self.expectations.clone(),
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of expectations not consumed yet.
    pub fn pending(&self) -> usize {
        self.expectations.lock().len()
    }

    /// Panics unless every expectation was consumed.
    pub fn verify(&self) {
        let remaining = self.pending();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    async fn respond(&self, call: MockCall) -> AdapterResult<AdapterPayload> {
        let kind = call.kind();
        let id = call.id().map(str::to_string);
        self.calls.lock().push(call);

        let next = self.expectations.lock().pop_front();
        let Some(expectation) = next else {
            panic!("Unexpected {kind:?} call: no expectations left");
        };
        if expectation.kind != kind || (expectation.id.is_some() && expectation.id != id) {
            panic!(
                "Expectation mismatch: expected {:?} {:?}, got {:?} {:?}",
                expectation.kind, expectation.id, kind, id
            );
        }
        if let Some(gate) = expectation.gate {
            gate.notified().await;
        }
        expectation.response
    }
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("pending", &self.pending())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn find(&self, schema: &ModelSchema, id: &str) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::Find {
            type_key: schema.type_key().to_string(),
            id: id.to_string(),
        })
        .await
    }

    async fn find_many(&self, schema: &ModelSchema, ids: &[String]) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::FindMany {
            type_key: schema.type_key().to_string(),
            ids: ids.to_vec(),
        })
        .await
    }

    async fn find_all(&self, schema: &ModelSchema, page: Option<PageRequest>) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::FindAll {
            type_key: schema.type_key().to_string(),
            page,
        })
        .await
    }

    async fn find_query(
        &self,
        schema: &ModelSchema,
        params: &Map<String, Value>,
        page: Option<PageRequest>,
    ) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::FindQuery {
            type_key: schema.type_key().to_string(),
            params: params.clone(),
            page,
        })
        .await
    }

    async fn create_record(&self, schema: &ModelSchema, record: &Value) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::CreateRecord {
            type_key: schema.type_key().to_string(),
            record: record.clone(),
        })
        .await
    }

    async fn update_record(&self, schema: &ModelSchema, id: &str, record: &Value) -> AdapterResult<AdapterPayload> {
        self.respond(MockCall::UpdateRecord {
            type_key: schema.type_key().to_string(),
            id: id.to_string(),
            record: record.clone(),
        })
        .await
    }

    async fn delete_record(&self, schema: &ModelSchema, id: &str) -> AdapterResult<()> {
        self.respond(MockCall::DeleteRecord {
            type_key: schema.type_key().to_string(),
            id: id.to_string(),
        })
        .await
        .map(|_| ())
    }

    fn page_size(&self) -> Option<u32> {
        self.page_size.get()
    }

    fn set_page_size(&self, page_size: Option<u32>) {
        self.page_size.set(page_size);
    }
}

/// Builder for one expectation. Nothing is queued until a `return_*` call.
pub struct ExpectationBuilder {
    kind: CallKind,
    id: Option<String>,
    gate: Option<Arc<Notify>>,
    expectations: Expectations,
}

impl ExpectationBuilder {
    /// Keeps the call pending until `gate` is notified.
    pub fn hold(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Answers with these records and no meta.
    pub fn return_ok(self, data: Vec<Value>) {
        self.return_payload(AdapterPayload::new(data));
    }

    pub fn return_payload(self, payload: AdapterPayload) {
        self.push(Ok(payload));
    }

    pub fn return_err(self, error: AdapterError) {
        self.push(Err(error));
    }

    fn push(self, response: AdapterResult<AdapterPayload>) {
        self.expectations.lock().push_back(Expectation {
            kind: self.kind,
            id: self.id,
            gate: self.gate,
            response,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> ModelSchema {
        ModelSchema::new("person")
    }

    #[tokio::test]
    async fn test_answers_in_order() {
        let mock = MockAdapter::new();
        mock.expect_find("1").return_ok(vec![json!({ "id": 1 })]);
        mock.expect_find_all()
            .return_err(AdapterError::Rejected("offline".into()));

        let found = mock.find(&person(), "1").await.unwrap();
        assert_eq!(found.data, vec![json!({ "id": 1 })]);

        let failed = mock.find_all(&person(), Some(PageRequest::new(1, 25))).await;
        assert!(matches!(failed, Err(AdapterError::Rejected(_))));

        assert_eq!(mock.calls()[1].page(), Some(PageRequest::new(1, 25)));
        mock.verify();
    }

    #[tokio::test]
    #[should_panic(expected = "Expectation mismatch")]
    async fn test_wrong_call_panics() {
        let mock = MockAdapter::new();
        mock.expect_delete("1").return_ok(vec![]);
        let _ = mock.find(&person(), "1").await;
    }

    #[tokio::test]
    #[should_panic(expected = "1 remaining")]
    async fn test_verify_reports_leftovers() {
        let mock = MockAdapter::new();
        mock.expect_create().return_ok(vec![json!({ "id": 9 })]);
        mock.verify();
    }

    #[tokio::test]
    async fn test_held_call_waits_for_gate() {
        let mock = Arc::new(MockAdapter::new());
        let gate = Arc::new(Notify::new());
        mock.expect_find("1").hold(gate.clone()).return_ok(vec![json!({ "id": 1 })]);

        let task = tokio::spawn({
            let mock = mock.clone();
            async move { mock.find(&person(), "1").await }
        });
        while mock.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        gate.notify_one();
        let payload = task.await.unwrap().unwrap();
        assert_eq!(payload.data.len(), 1);
    }

    #[test]
    fn test_page_size_is_configurable() {
        let mock = MockAdapter::new().with_page_size(1);
        assert_eq!(mock.page_size(), Some(1));
        mock.set_page_size(None);
        assert_eq!(mock.page_size(), None);
    }
}
