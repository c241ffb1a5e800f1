//! # Store Errors
//!
//! This module defines the error types used throughout the record cache.
//! There are three layers:
//!
//! - [`AdapterError`] - what an adapter (transport, fixtures, mocks) reports.
//! - [`FetchError`] - an adapter rejection, tagged with the operation and type.
//! - [`StoreError`] - everything a [`Store`](crate::Store) call can return.
//!
//! A failed fetch never mutates the identity map or any record array, so a
//! `StoreError::Fetch` always means "nothing changed".

use crate::identity::RecordIdentity;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors reported by an [`Adapter`](crate::adapter::Adapter).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The backend refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The transport could not complete the request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("Server responded with {code}: {message}")]
    Status { code: u16, message: String },

    /// The requested record does not exist on the backend.
    #[error("Record not found on the backend: {0}")]
    NotFound(String),

    /// The response decoded, but not into a document the adapter understands.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The response body could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An adapter rejection, carrying the underlying cause.
#[derive(Debug, thiserror::Error)]
#[error("{operation} for '{type_key}' failed: {source}")]
pub struct FetchError {
    pub operation: &'static str,
    pub type_key: String,
    #[source]
    pub source: AdapterError,
}

impl FetchError {
    pub fn new(operation: &'static str, type_key: impl Into<String>, source: AdapterError) -> Self {
        Self {
            operation,
            type_key: type_key.into(),
            source,
        }
    }
}

/// Errors that can occur within the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store closed")]
    StoreClosed,

    #[error("Store dropped response channel")]
    StoreDropped,

    /// A caller demanded a record that is not in the identity map.
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Two records claimed the same identity. Unreachable through
    /// `insert_or_update`; only a save that returns an id already in use
    /// can trigger it.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(RecordIdentity),

    #[error("Unknown record type: {0}")]
    UnknownType(String),

    #[error("Unknown relationship '{key}' on '{type_key}'")]
    UnknownRelationship { type_key: String, key: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid page: {0}")]
    InvalidPage(u32),

    #[error("No adapter registered for '{0}'")]
    NoAdapter(String),
}

impl StoreError {
    pub(crate) fn not_found(identity: &RecordIdentity) -> Self {
        StoreError::NotFound(identity.to_string())
    }

    /// True when the error came from an adapter rejection.
    pub fn is_fetch(&self) -> bool {
        matches!(self, StoreError::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_keeps_the_cause() {
        let err = FetchError::new("findAll", "person", AdapterError::Rejected("nope".into()));
        assert_eq!(err.to_string(), "findAll for 'person' failed: Request rejected: nope");

        let store_err: StoreError = err.into();
        assert!(store_err.is_fetch());
        assert!(std::error::Error::source(&store_err).is_some());
    }
}
