//! In-memory adapter backed by fixture records.
//!
//! Paged requests are sliced out of the fixture list and answered with
//! `total` and `pageSize` meta, the same shape a paging server reports.

use crate::adapter::{Adapter, AdapterPayload, AdapterResult, PageRequest, PageSizeSetting};
use crate::error::AdapterError;
use crate::schema::ModelSchema;
use crate::serializer::{id_of, PayloadMeta};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct FixtureAdapter {
    fixtures: RwLock<HashMap<String, Vec<Value>>>,
    page_size: PageSizeSetting,
}

impl FixtureAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixtures(self, type_key: impl Into<String>, records: Vec<Value>) -> Self {
        self.set_fixtures(type_key, records);
        self
    }

    /// Replaces the fixtures of a type.
    pub fn set_fixtures(&self, type_key: impl Into<String>, records: Vec<Value>) {
        self.fixtures.write().insert(type_key.into(), records);
    }

    pub fn fixtures(&self, type_key: &str) -> Vec<Value> {
        self.fixtures.read().get(type_key).cloned().unwrap_or_default()
    }

    fn next_id(records: &[Value]) -> String {
        let max = records
            .iter()
            .filter_map(id_of)
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }
}

/// Slices `records` to the requested page and reports paging meta.
fn paginate(records: Vec<Value>, page: Option<PageRequest>) -> AdapterPayload {
    let Some(page) = page else {
        return AdapterPayload::new(records);
    };
    let total = records.len() as u64;
    let data = records
        .into_iter()
        .skip(page.offset())
        .take(page.page_size as usize)
        .collect();
    AdapterPayload::new(data).with_meta(PayloadMeta {
        page_size: Some(page.page_size),
        total: Some(total),
        is_finished: None,
    })
}

/// Paging keys a caller may leave in query params; they never filter.
const PAGING_KEYS: [&str; 2] = ["page", "pageSize"];

fn matches(record: &Value, params: &Map<String, Value>) -> bool {
    params
        .iter()
        .filter(|(key, _)| !PAGING_KEYS.contains(&key.as_str()))
        .all(|(key, expected)| match record.get(key) {
            Some(actual) if key == "id" => id_of(actual) == id_of(expected),
            Some(actual) => actual == expected,
            None => false,
        })
}

#[async_trait]
impl Adapter for FixtureAdapter {
    async fn find(&self, schema: &ModelSchema, id: &str) -> AdapterResult<AdapterPayload> {
        let fixtures = self.fixtures.read();
        fixtures
            .get(schema.type_key())
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.get("id").and_then(id_of).as_deref() == Some(id))
            })
            .map(|record| AdapterPayload::new(vec![record.clone()]))
            .ok_or_else(|| AdapterError::NotFound(format!("{}:{}", schema.type_key(), id)))
    }

    async fn find_all(&self, schema: &ModelSchema, page: Option<PageRequest>) -> AdapterResult<AdapterPayload> {
        let records = self.fixtures(schema.type_key());
        debug!(type_key = schema.type_key(), fixtures = records.len(), ?page, "Fixture find_all");
        Ok(paginate(records, page))
    }

    async fn find_query(
        &self,
        schema: &ModelSchema,
        params: &Map<String, Value>,
        page: Option<PageRequest>,
    ) -> AdapterResult<AdapterPayload> {
        let records = self
            .fixtures(schema.type_key())
            .into_iter()
            .filter(|record| matches(record, params))
            .collect();
        Ok(paginate(records, page))
    }

    async fn create_record(&self, schema: &ModelSchema, record: &Value) -> AdapterResult<AdapterPayload> {
        let Value::Object(fields) = record else {
            return Err(AdapterError::Rejected("record is not an object".into()));
        };
        let mut fixtures = self.fixtures.write();
        let records = fixtures.entry(schema.type_key().to_string()).or_default();
        let mut stored = fields.clone();
        if stored.get("id").and_then(id_of).is_none() {
            stored.insert("id".into(), Value::String(Self::next_id(records)));
        }
        let stored = Value::Object(stored);
        records.push(stored.clone());
        Ok(AdapterPayload::new(vec![stored]))
    }

    async fn update_record(&self, schema: &ModelSchema, id: &str, record: &Value) -> AdapterResult<AdapterPayload> {
        let mut fixtures = self.fixtures.write();
        let existing = fixtures
            .get_mut(schema.type_key())
            .and_then(|records| {
                records
                    .iter_mut()
                    .find(|r| r.get("id").and_then(id_of).as_deref() == Some(id))
            })
            .ok_or_else(|| AdapterError::NotFound(format!("{}:{}", schema.type_key(), id)))?;
        if let (Value::Object(target), Value::Object(fields)) = (&mut *existing, record) {
            for (key, value) in fields {
                if key != "id" {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(AdapterPayload::new(vec![existing.clone()]))
    }

    async fn delete_record(&self, schema: &ModelSchema, id: &str) -> AdapterResult<()> {
        let mut fixtures = self.fixtures.write();
        let records = fixtures
            .get_mut(schema.type_key())
            .ok_or_else(|| AdapterError::NotFound(format!("{}:{}", schema.type_key(), id)))?;
        let before = records.len();
        records.retain(|r| r.get("id").and_then(id_of).as_deref() != Some(id));
        if records.len() == before {
            return Err(AdapterError::NotFound(format!("{}:{}", schema.type_key(), id)));
        }
        Ok(())
    }

    fn page_size(&self) -> Option<u32> {
        self.page_size.get()
    }

    fn set_page_size(&self, page_size: Option<u32>) {
        self.page_size.set(page_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> FixtureAdapter {
        FixtureAdapter::new().with_fixtures(
            "person",
            vec![
                json!({ "id": 1, "name": "Dimebag Dale" }),
                json!({ "id": 2, "name": "Yehuda Brynjolffsosysdfon" }),
                json!({ "id": 3, "name": "Brynjolffsosysdfon Katz" }),
            ],
        )
    }

    #[tokio::test]
    async fn pages_are_sliced_with_meta() {
        let schema = ModelSchema::new("person");
        let payload = adapter().find_all(&schema, Some(PageRequest::new(3, 1))).await.unwrap();
        assert_eq!(payload.data, vec![json!({ "id": 3, "name": "Brynjolffsosysdfon Katz" })]);
        assert_eq!(payload.meta.total, Some(3));
        assert_eq!(payload.meta.page_size, Some(1));

        let past_the_end = adapter().find_all(&schema, Some(PageRequest::new(4, 1))).await.unwrap();
        assert!(past_the_end.data.is_empty());
    }

    #[tokio::test]
    async fn find_matches_numeric_ids() {
        let schema = ModelSchema::new("person");
        let payload = adapter().find(&schema, "2").await.unwrap();
        assert_eq!(payload.data.len(), 1);
        assert!(matches!(
            adapter().find(&schema, "9").await,
            Err(AdapterError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn created_records_get_the_next_id() {
        let schema = ModelSchema::new("person");
        let fixtures = adapter();
        let payload = fixtures
            .create_record(&schema, &json!({ "name": "Scumbag Dale" }))
            .await
            .unwrap();
        assert_eq!(payload.data[0]["id"], json!("4"));
        assert_eq!(fixtures.fixtures("person").len(), 4);

        fixtures.delete_record(&schema, "4").await.unwrap();
        assert!(fixtures.delete_record(&schema, "4").await.is_err());
    }

    #[tokio::test]
    async fn queries_filter_on_fields() {
        let schema = ModelSchema::new("person");
        let mut params = Map::new();
        params.insert("name".into(), json!("Dimebag Dale"));
        let payload = adapter().find_query(&schema, &params, None).await.unwrap();
        assert_eq!(payload.data.len(), 1);
        assert_eq!(payload.meta, PayloadMeta::default());
    }

    #[tokio::test]
    async fn paging_keys_in_params_do_not_filter() {
        let schema = ModelSchema::new("person");
        let mut params = Map::new();
        params.insert("page".into(), json!(1));
        params.insert("pageSize".into(), json!(10));
        let payload = adapter().find_query(&schema, &params, None).await.unwrap();
        assert_eq!(payload.data.len(), 3);
    }
}
