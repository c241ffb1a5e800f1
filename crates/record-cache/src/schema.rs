//! # Schema Descriptors
//!
//! A [`ModelSchema`] describes one record type: its attributes and its
//! relationships. Schemas are plain values passed to the store at build time;
//! there is no model class hierarchy.
//!
//! ```rust
//! use record_cache::schema::{AttrKind, ModelSchema};
//!
//! let person = ModelSchema::new("person")
//!     .plural("people")
//!     .attr("name", AttrKind::String)
//!     .belongs_to("tag", "tag", Some("people"));
//!
//! assert_eq!(person.root_plural(), "people");
//! assert!(person.relationship("tag").is_some());
//! ```

use crate::error::{Result, StoreError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How an attribute value is coerced when a payload is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    String,
    Number,
    Boolean,
    /// Stored as received.
    Any,
}

impl AttrKind {
    /// Coerces a raw payload value. `null` passes through for every kind.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) | (AttrKind::Any, _) => Some(value.clone()),
            (AttrKind::String, Value::String(_)) => Some(value.clone()),
            (AttrKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (AttrKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (AttrKind::Number, Value::Number(_)) => Some(value.clone()),
            (AttrKind::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (AttrKind::Boolean, Value::Bool(_)) => Some(value.clone()),
            (AttrKind::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (AttrKind::Boolean, Value::Number(n)) => Some(Value::Bool(n.as_f64() != Some(0.0))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    BelongsTo,
    HasMany,
}

/// A relationship declared on a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Type key of the related records.
    pub target: String,
    /// Name of the relationship on `target` that points back, if any.
    pub inverse: Option<String>,
}

/// Descriptor for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    type_key: String,
    plural: Option<String>,
    attributes: BTreeMap<String, AttrKind>,
    relationships: BTreeMap<String, Relationship>,
}

impl ModelSchema {
    pub fn new(type_key: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            plural: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Overrides the plural root name used by document-style payloads.
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    pub fn belongs_to(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.relationships.insert(
            name.into(),
            Relationship {
                kind: RelationshipKind::BelongsTo,
                target: target.into(),
                inverse: inverse.map(str::to_string),
            },
        );
        self
    }

    pub fn has_many(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.relationships.insert(
            name.into(),
            Relationship {
                kind: RelationshipKind::HasMany,
                target: target.into(),
                inverse: inverse.map(str::to_string),
            },
        );
        self
    }

    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Root key for collections in a document, e.g. `people`.
    pub fn root_plural(&self) -> String {
        self.plural
            .clone()
            .unwrap_or_else(|| format!("{}s", self.type_key))
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttrKind)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn attribute(&self, name: &str) -> Option<AttrKind> {
        self.attributes.get(name).copied()
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&str, &Relationship)> {
        self.relationships.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.get(name)
    }

    pub(crate) fn relationship_of(&self, name: &str, kind: RelationshipKind) -> Result<&Relationship> {
        self.relationships
            .get(name)
            .filter(|rel| rel.kind == kind)
            .ok_or_else(|| StoreError::UnknownRelationship {
                type_key: self.type_key.clone(),
                key: name.to_string(),
            })
    }

    pub(crate) fn has_many_keys(&self) -> impl Iterator<Item = &str> {
        self.relationships
            .iter()
            .filter(|(_, rel)| rel.kind == RelationshipKind::HasMany)
            .map(|(k, _)| k.as_str())
    }
}

/// The set of schemas a store knows about.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ModelSchema) {
        self.schemas
            .insert(schema.type_key().to_string(), Arc::new(schema));
    }

    pub fn with(mut self, schema: ModelSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, type_key: &str) -> Result<&Arc<ModelSchema>> {
        self.schemas
            .get(type_key)
            .ok_or_else(|| StoreError::UnknownType(type_key.to_string()))
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.schemas.contains_key(type_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_coercion() {
        assert_eq!(AttrKind::String.coerce(&json!(3)), Some(json!("3")));
        assert_eq!(AttrKind::Number.coerce(&json!("4.5")), Some(json!(4.5)));
        assert_eq!(AttrKind::Number.coerce(&json!("many")), None);
        assert_eq!(AttrKind::Boolean.coerce(&json!("true")), Some(json!(true)));
        assert_eq!(AttrKind::Boolean.coerce(&json!(0)), Some(json!(false)));
        assert_eq!(AttrKind::String.coerce(&Value::Null), Some(Value::Null));
        assert_eq!(AttrKind::Any.coerce(&json!({"a": 1})), Some(json!({"a": 1})));
    }

    #[test]
    fn plural_defaults_to_suffix() {
        assert_eq!(ModelSchema::new("tag").root_plural(), "tags");
        assert_eq!(ModelSchema::new("person").plural("people").root_plural(), "people");
    }

    #[test]
    fn relationship_lookup_checks_kind() {
        let tag = ModelSchema::new("tag").has_many("people", "person", Some("tag"));
        assert!(tag.relationship_of("people", RelationshipKind::HasMany).is_ok());
        assert!(matches!(
            tag.relationship_of("people", RelationshipKind::BelongsTo),
            Err(StoreError::UnknownRelationship { .. })
        ));
        assert_eq!(tag.has_many_keys().collect::<Vec<_>>(), vec!["people"]);
    }

    #[test]
    fn registry_rejects_unknown_types() {
        let registry = SchemaRegistry::new().with(ModelSchema::new("person"));
        assert!(registry.contains("person"));
        assert!(matches!(registry.get("tag"), Err(StoreError::UnknownType(_))));
    }
}
