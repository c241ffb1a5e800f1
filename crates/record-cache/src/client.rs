//! # Store Client
//!
//! The low-level, cloneable handle to a running [`StoreActor`](crate::actor::StoreActor).
//! Each method sends one [`StoreRequest`] and waits for the reply. Most code
//! wants the higher-level [`Store`](crate::Store), which adds adapters and
//! normalization on top of this client.

use crate::error::{Result, StoreError};
use crate::identity::RecordIdentity;
use crate::message::{BatchOp, Response, StoreRequest};
use crate::paginated::PageCompletion;
use crate::record::Record;
use crate::record_array::{RecordArray, RecordPredicate};
use crate::serializer::NormalizedRecord;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

/// Type-safe sender for store requests. Cheap to clone.
#[derive(Clone)]
pub struct StoreClient {
    sender: mpsc::Sender<StoreRequest>,
}

impl StoreClient {
    pub fn new(sender: mpsc::Sender<StoreRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(Response<T>) -> StoreRequest) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| StoreError::StoreClosed)?;
        response.await.map_err(|_| StoreError::StoreDropped)?
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn merge(&self, records: Vec<NormalizedRecord>) -> Result<Vec<Record>> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Merge { records, respond_to })
            .await
    }

    #[instrument(skip(self, array, records, completion), fields(count = records.len()))]
    pub async fn load_page(
        &self,
        array: RecordArray,
        records: Vec<NormalizedRecord>,
        completion: PageCompletion,
    ) -> Result<bool> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::LoadPage {
            array,
            records,
            completion,
            respond_to,
        })
        .await
    }

    pub async fn peek(&self, identity: RecordIdentity) -> Result<Option<Record>> {
        self.request(|respond_to| StoreRequest::Peek { identity, respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn begin_load(&self, identity: RecordIdentity) -> Result<Record> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::BeginLoad { identity, respond_to })
            .await
    }

    pub async fn load_failed(&self, identity: RecordIdentity, error: String) -> Result<()> {
        self.request(|respond_to| StoreRequest::LoadFailed {
            identity,
            error,
            respond_to,
        })
        .await
    }

    pub async fn all(&self, type_key: String) -> Result<RecordArray> {
        self.request(|respond_to| StoreRequest::All { type_key, respond_to })
            .await
    }

    pub async fn filter(&self, type_key: String, predicate: RecordPredicate) -> Result<RecordArray> {
        self.request(|respond_to| StoreRequest::Filter {
            type_key,
            predicate,
            respond_to,
        })
        .await
    }

    pub async fn query_array(&self, type_key: String) -> Result<RecordArray> {
        self.request(|respond_to| StoreRequest::QueryArray { type_key, respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn create(&self, type_key: String, fields: Map<String, Value>) -> Result<Record> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Create {
            type_key,
            fields,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self, record), fields(client_id = %record.client_id()))]
    pub async fn update(&self, record: Record, fields: Map<String, Value>) -> Result<()> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Update {
            record,
            fields,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self, record), fields(client_id = %record.client_id()))]
    pub async fn delete(&self, record: Record) -> Result<()> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Delete { record, respond_to })
            .await
    }

    pub async fn did_save(&self, record: Record, response: Option<NormalizedRecord>) -> Result<()> {
        self.request(|respond_to| StoreRequest::DidSave {
            record,
            response,
            respond_to,
        })
        .await
    }

    pub async fn save_failed(&self, record: Record, error: String) -> Result<()> {
        self.request(|respond_to| StoreRequest::SaveFailed {
            record,
            error,
            respond_to,
        })
        .await
    }

    pub async fn set_belongs_to(&self, record: Record, key: String, target: Option<Record>) -> Result<()> {
        self.request(|respond_to| StoreRequest::SetBelongsTo {
            record,
            key,
            target,
            respond_to,
        })
        .await
    }

    pub async fn add_to_has_many(&self, owner: Record, key: String, member: Record) -> Result<()> {
        self.request(|respond_to| StoreRequest::AddToHasMany {
            owner,
            key,
            member,
            respond_to,
        })
        .await
    }

    pub async fn remove_from_has_many(&self, owner: Record, key: String, member: Record) -> Result<()> {
        self.request(|respond_to| StoreRequest::RemoveFromHasMany {
            owner,
            key,
            member,
            respond_to,
        })
        .await
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    pub async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Record>> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Batch { ops, respond_to })
            .await
    }

    pub async fn len(&self) -> Result<usize> {
        self.request(|respond_to| StoreRequest::Len { respond_to })
            .await
    }

    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        debug!("Sending request");
        self.request(|respond_to| StoreRequest::Shutdown { respond_to })
            .await
    }

    /// True once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
