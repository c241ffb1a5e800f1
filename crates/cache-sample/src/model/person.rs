use record_cache::{AttrKind, ModelSchema, Record};
use serde::{Deserialize, Serialize};

pub const PERSON: &str = "person";

pub fn person_schema() -> ModelSchema {
    ModelSchema::new(PERSON)
        .plural("people")
        .attr("name", AttrKind::String)
        .attr("email", AttrKind::String)
        .belongs_to("tag", "tag", Some("people"))
}

/// Typed view of a `person` record.
///
/// `id` is `None` until the record has been saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Id of the person's tag.
    #[serde(default)]
    pub tag: Option<String>,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: None,
            tag: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        record.deserialize()
    }

    /// Attributes to create or update a record with.
    pub fn fields(&self) -> serde_json::Value {
        serde_json::json!({ "name": self.name, "email": self.email })
    }
}
