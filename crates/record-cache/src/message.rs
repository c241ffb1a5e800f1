//! # Store Messages
//!
//! Requests sent from a [`StoreClient`](crate::client::StoreClient) to the
//! [`StoreActor`](crate::actor::StoreActor). Each variant is one unit of work
//! the actor applies atomically: no other request runs between its first and
//! last identity map mutation.
//!
//! Adapter round trips never appear here. A fetch is split into the network
//! call (on the caller's task) and one merge request carrying the fully
//! normalized payload, so a rejected fetch sends nothing at all.

use crate::error::StoreError;
use crate::identity::RecordIdentity;
use crate::paginated::PageCompletion;
use crate::record::Record;
use crate::record_array::{RecordArray, RecordPredicate};
use crate::serializer::NormalizedRecord;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// One-shot response channel used by the actor.
pub type Response<T> = oneshot::Sender<Result<T, StoreError>>;

/// One operation inside a batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Push(NormalizedRecord),
    Create { type_key: String, fields: Map<String, Value> },
    Update { record: Record, fields: Map<String, Value> },
    Delete(Record),
}

pub enum StoreRequest {
    /// Merge normalized records into the identity map.
    Merge {
        records: Vec<NormalizedRecord>,
        respond_to: Response<Vec<Record>>,
    },
    /// Merge a fetched page and, unless a newer load was issued meanwhile,
    /// make it the content of the array. Answers whether the page was applied.
    LoadPage {
        array: RecordArray,
        records: Vec<NormalizedRecord>,
        completion: PageCompletion,
        respond_to: Response<bool>,
    },
    Peek {
        identity: RecordIdentity,
        respond_to: Response<Option<Record>>,
    },
    BeginLoad {
        identity: RecordIdentity,
        respond_to: Response<Record>,
    },
    LoadFailed {
        identity: RecordIdentity,
        error: String,
        respond_to: Response<()>,
    },
    All {
        type_key: String,
        respond_to: Response<RecordArray>,
    },
    Filter {
        type_key: String,
        predicate: RecordPredicate,
        respond_to: Response<RecordArray>,
    },
    QueryArray {
        type_key: String,
        respond_to: Response<RecordArray>,
    },
    Create {
        type_key: String,
        fields: Map<String, Value>,
        respond_to: Response<Record>,
    },
    Update {
        record: Record,
        fields: Map<String, Value>,
        respond_to: Response<()>,
    },
    Delete {
        record: Record,
        respond_to: Response<()>,
    },
    DidSave {
        record: Record,
        response: Option<NormalizedRecord>,
        respond_to: Response<()>,
    },
    SaveFailed {
        record: Record,
        error: String,
        respond_to: Response<()>,
    },
    SetBelongsTo {
        record: Record,
        key: String,
        target: Option<Record>,
        respond_to: Response<()>,
    },
    AddToHasMany {
        owner: Record,
        key: String,
        member: Record,
        respond_to: Response<()>,
    },
    RemoveFromHasMany {
        owner: Record,
        key: String,
        member: Record,
        respond_to: Response<()>,
    },
    /// Apply every op inside one batch scope. Returns the pushed and created
    /// records, in op order.
    Batch {
        ops: Vec<BatchOp>,
        respond_to: Response<Vec<Record>>,
    },
    Len {
        respond_to: Response<usize>,
    },
    /// Stop the actor after answering.
    Shutdown {
        respond_to: Response<()>,
    },
}

impl StoreRequest {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            StoreRequest::Merge { .. } => "merge",
            StoreRequest::LoadPage { .. } => "load_page",
            StoreRequest::Peek { .. } => "peek",
            StoreRequest::BeginLoad { .. } => "begin_load",
            StoreRequest::LoadFailed { .. } => "load_failed",
            StoreRequest::All { .. } => "all",
            StoreRequest::Filter { .. } => "filter",
            StoreRequest::QueryArray { .. } => "query_array",
            StoreRequest::Create { .. } => "create",
            StoreRequest::Update { .. } => "update",
            StoreRequest::Delete { .. } => "delete",
            StoreRequest::DidSave { .. } => "did_save",
            StoreRequest::SaveFailed { .. } => "save_failed",
            StoreRequest::SetBelongsTo { .. } => "set_belongs_to",
            StoreRequest::AddToHasMany { .. } => "add_to_has_many",
            StoreRequest::RemoveFromHasMany { .. } => "remove_from_has_many",
            StoreRequest::Batch { .. } => "batch",
            StoreRequest::Len { .. } => "len",
            StoreRequest::Shutdown { .. } => "shutdown",
        }
    }
}

impl std::fmt::Debug for StoreRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreRequest::{}", self.name())
    }
}
