//! # Record Identity
//!
//! Two keys name a record:
//!
//! - [`RecordIdentity`] - the server-side `(type, id)` pair. A record only has one
//!   once it has been loaded or saved.
//! - [`ClientId`] - a store-local key every record has from birth, including
//!   records created locally and not yet saved.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The `(type, id)` pair that names a persisted record.
///
/// Immutable once built. Two identities are equal iff both parts match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordIdentity {
    type_key: String,
    id: String,
}

impl RecordIdentity {
    pub fn new(type_key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            id: id.into(),
        }
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for RecordIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_key, self.id)
    }
}

/// Store-local record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_compare_by_type_and_id() {
        let a = RecordIdentity::new("person", "1");
        assert_eq!(a, RecordIdentity::new("person", "1"));
        assert_ne!(a, RecordIdentity::new("tag", "1"));
        assert_ne!(a, RecordIdentity::new("person", "2"));
        assert_eq!(a.to_string(), "person:1");
    }
}
