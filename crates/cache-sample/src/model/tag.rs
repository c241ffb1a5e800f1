use record_cache::{AttrKind, ModelSchema, Record};
use serde::{Deserialize, Serialize};

pub const TAG: &str = "tag";

pub fn tag_schema() -> ModelSchema {
    ModelSchema::new(TAG)
        .attr("label", AttrKind::String)
        .has_many("people", "person", Some("tag"))
}

/// Typed view of a `tag` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Option<String>,
    pub label: String,
}

impl Tag {
    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        record.deserialize()
    }
}
