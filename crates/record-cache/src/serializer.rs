//! # Serializer
//!
//! Turns raw adapter payloads into [`NormalizedRecord`]s the identity map can
//! merge, and extracts records and meta from REST-style documents:
//!
//! ```json
//! { "meta": { "pageSize": 10, "total": 12 }, "people": [{ "id": 1, "name": "Dale" }] }
//! ```
//!
//! Normalization is all-or-nothing: one bad record rejects the whole payload.

use crate::adapter::AdapterPayload;
use crate::error::{Result, StoreError};
use crate::schema::{ModelSchema, RelationshipKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::trace;

/// A raw record checked against its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub type_key: String,
    pub id: String,
    pub attributes: Map<String, Value>,
    pub belongs_to: BTreeMap<String, Option<String>>,
    pub has_many: BTreeMap<String, Vec<String>>,
}

impl NormalizedRecord {
    pub fn new(type_key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            id: id.into(),
            attributes: Map::new(),
            belongs_to: BTreeMap::new(),
            has_many: BTreeMap::new(),
        }
    }
}

/// Pagination meta a server may attach to a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PayloadMeta {
    pub page_size: Option<u32>,
    pub total: Option<u64>,
    pub is_finished: Option<bool>,
}

/// Reads an id from a payload value. Numbers become strings.
pub fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj.get("id").and_then(id_of),
        _ => None,
    }
}

/// Normalizes one raw record. Undeclared fields are dropped.
pub fn normalize(schema: &ModelSchema, raw: &Value) -> Result<NormalizedRecord> {
    let obj = raw.as_object().ok_or_else(|| {
        StoreError::InvalidPayload(format!("{} record is not an object", schema.type_key()))
    })?;
    let id = obj.get("id").and_then(id_of).ok_or_else(|| {
        StoreError::InvalidPayload(format!("{} record has no usable id", schema.type_key()))
    })?;

    let mut record = NormalizedRecord::new(schema.type_key(), id);
    for (key, value) in obj {
        if key == "id" {
            continue;
        }
        if let Some(kind) = schema.attribute(key) {
            let coerced = kind.coerce(value).ok_or_else(|| invalid_field(schema, key, value))?;
            record.attributes.insert(key.clone(), coerced);
            continue;
        }
        match schema.relationship(key).map(|rel| rel.kind) {
            Some(RelationshipKind::BelongsTo) => {
                let target = match value {
                    Value::Null => None,
                    other => Some(id_of(other).ok_or_else(|| invalid_field(schema, key, value))?),
                };
                record.belongs_to.insert(key.clone(), target);
            }
            Some(RelationshipKind::HasMany) => {
                let ids = match value {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items
                        .iter()
                        .map(|item| id_of(item).ok_or_else(|| invalid_field(schema, key, value)))
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(invalid_field(schema, key, value)),
                };
                record.has_many.insert(key.clone(), ids);
            }
            None => trace!(type_key = schema.type_key(), field = %key, "Ignoring undeclared field"),
        }
    }
    Ok(record)
}

pub fn normalize_all(schema: &ModelSchema, raws: &[Value]) -> Result<Vec<NormalizedRecord>> {
    raws.iter().map(|raw| normalize(schema, raw)).collect()
}

/// Coerces locally supplied attributes. Unlike payloads, unknown fields are an
/// error here.
pub fn coerce_attributes(schema: &ModelSchema, fields: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in fields {
        let kind = schema.attribute(key).ok_or_else(|| {
            StoreError::InvalidPayload(format!("'{}' has no attribute '{}'", schema.type_key(), key))
        })?;
        let coerced = kind.coerce(value).ok_or_else(|| invalid_field(schema, key, value))?;
        out.insert(key.clone(), coerced);
    }
    Ok(out)
}

/// Accepts a JSON object of attributes, or `null` for none.
pub fn fields_of(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(StoreError::InvalidPayload(format!("expected an object, got {other}"))),
    }
}

/// Extracts records and meta from a document.
///
/// Accepted shapes: a bare array of records, `{ "<plural>": [...] }`,
/// `{ "<type>": {...} }`, or a bare record. `meta` is read when present.
pub fn extract_document(schema: &ModelSchema, doc: Value) -> Result<AdapterPayload> {
    let mut obj = match doc {
        Value::Array(data) => return Ok(AdapterPayload::new(data)),
        Value::Object(obj) => obj,
        other => {
            return Err(StoreError::InvalidPayload(format!(
                "expected a document for '{}', got {other}",
                schema.type_key()
            )))
        }
    };

    let meta = match obj.remove("meta") {
        Some(meta) => serde_json::from_value::<PayloadMeta>(meta)
            .map_err(|e| StoreError::InvalidPayload(format!("bad meta block: {e}")))?,
        None => PayloadMeta::default(),
    };

    let data = if let Some(many) = obj.remove(&schema.root_plural()) {
        match many {
            Value::Array(items) => items,
            other => {
                return Err(StoreError::InvalidPayload(format!(
                    "'{}' root is not an array: {other}",
                    schema.root_plural()
                )))
            }
        }
    } else if let Some(one) = obj.remove(schema.type_key()) {
        vec![one]
    } else if obj.contains_key("id") {
        vec![Value::Object(obj)]
    } else if obj.is_empty() {
        Vec::new()
    } else {
        return Err(StoreError::InvalidPayload(format!(
            "document has neither '{}' nor '{}' root",
            schema.root_plural(),
            schema.type_key()
        )));
    };

    Ok(AdapterPayload { data, meta })
}

fn invalid_field(schema: &ModelSchema, key: &str, value: &Value) -> StoreError {
    StoreError::InvalidPayload(format!(
        "invalid value for {}.{}: {}",
        schema.type_key(),
        key,
        value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttrKind;
    use serde_json::json;

    fn person() -> ModelSchema {
        ModelSchema::new("person")
            .plural("people")
            .attr("name", AttrKind::String)
            .attr("age", AttrKind::Number)
            .belongs_to("tag", "tag", Some("people"))
    }

    #[test]
    fn numeric_ids_become_strings() {
        let record = normalize(&person(), &json!({ "id": 1, "name": "wycats" })).unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.attributes["name"], json!("wycats"));
    }

    #[test]
    fn relationships_and_undeclared_fields() {
        let record = normalize(
            &person(),
            &json!({ "id": "2", "tag": 1, "nickname": "brohuda", "age": "31" }),
        )
        .unwrap();
        assert_eq!(record.belongs_to["tag"], Some("1".to_string()));
        assert_eq!(record.attributes.get("nickname"), None);
        assert_eq!(record.attributes["age"], json!(31.0));
    }

    #[test]
    fn one_bad_record_rejects_the_payload() {
        let raws = vec![json!({ "id": 1 }), json!({ "name": "no id" })];
        assert!(matches!(
            normalize_all(&person(), &raws),
            Err(StoreError::InvalidPayload(_))
        ));
        assert!(normalize(&person(), &json!({ "id": 3, "age": "old" })).is_err());
    }

    #[test]
    fn documents_with_meta() {
        let doc = json!({
            "meta": { "pageSize": 10, "total": 12 },
            "people": [{ "id": 1, "name": "Dimebag Dale" }]
        });
        let payload = extract_document(&person(), doc).unwrap();
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.meta.page_size, Some(10));
        assert_eq!(payload.meta.total, Some(12));
        assert_eq!(payload.meta.is_finished, None);
    }

    #[test]
    fn document_shapes() {
        let schema = person();
        let single = extract_document(&schema, json!({ "person": { "id": 4 } })).unwrap();
        assert_eq!(single.data, vec![json!({ "id": 4 })]);

        let bare = extract_document(&schema, json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(bare.data.len(), 2);

        let finished = extract_document(&schema, json!({ "meta": { "isFinished": true }, "people": [] })).unwrap();
        assert_eq!(finished.meta.is_finished, Some(true));

        assert!(extract_document(&schema, json!({ "tags": [] })).is_err());
    }

    #[test]
    fn local_attributes_are_strict() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("p1"));
        assert!(coerce_attributes(&person(), &fields).is_ok());
        fields.insert("color".into(), json!("red"));
        assert!(coerce_attributes(&person(), &fields).is_err());
    }
}
