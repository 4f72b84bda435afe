//! Repository contract and the in-memory implementation
// Decision: IndexMap keyed by id so findAll returns insertion order

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use tradewind_core::ids::new_id;

use crate::aggregate::{aggregate_rows, AggregateOptions};
use crate::error::StoreError;
use crate::filter::Filter;

/// Typed per-collection view of the store.
///
/// Records are JSON objects carrying a stable string `id` unique within the
/// collection. All operations are atomic per call; multi-record
/// transactions are out of contract.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a record, assigning an `id` when absent. Fails on collision.
    async fn create(&self, input: Value) -> Result<Value, StoreError>;

    /// Fetch by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// List records in insertion order, optionally filtered.
    async fn find_all(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError>;

    /// Replace the record stored under `id`, preserving the id. Returns
    /// `None` when no such record exists.
    async fn update(&self, id: &str, record: Value) -> Result<Option<Value>, StoreError>;

    /// Remove by id. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Grouped aggregation over the (optionally pre-filtered) collection.
    async fn aggregate(&self, options: &AggregateOptions) -> Result<Vec<Value>, StoreError>;
}

/// In-memory repository over an insertion-ordered map.
pub struct MemoryRepository {
    collection: String,
    records: RwLock<IndexMap<String, Value>>,
}

impl MemoryRepository {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: RwLock::new(IndexMap::new()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn require_object(&self, record: &Value) -> Result<(), StoreError> {
        if record.is_object() {
            Ok(())
        } else {
            Err(StoreError::InvalidRecord {
                collection: self.collection.clone(),
                reason: "record must be a JSON object".to_string(),
            })
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create(&self, mut input: Value) -> Result<Value, StoreError> {
        self.require_object(&input)?;
        let id = match input.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => new_id(),
        };
        let mut records = self.records.write();
        if records.contains_key(&id) {
            return Err(StoreError::DuplicateId {
                collection: self.collection.clone(),
                id,
            });
        }
        if let Some(map) = input.as_object_mut() {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        records.insert(id, input.clone());
        Ok(input)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn find_all(&self, filter: Option<&Filter>) -> Result<Vec<Value>, StoreError> {
        let records = self.records.read();
        Ok(match filter {
            Some(filter) => records.values().filter(|r| filter.matches(r)).cloned().collect(),
            None => records.values().cloned().collect(),
        })
    }

    async fn update(&self, id: &str, mut record: Value) -> Result<Option<Value>, StoreError> {
        self.require_object(&record)?;
        let mut records = self.records.write();
        if !records.contains_key(id) {
            return Ok(None);
        }
        if let Some(map) = record.as_object_mut() {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        records.insert(id.to_string(), record.clone());
        Ok(Some(record))
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        // shift_remove keeps the insertion order of the survivors
        Ok(self.records.write().shift_remove(id).is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }

    async fn aggregate(&self, options: &AggregateOptions) -> Result<Vec<Value>, StoreError> {
        let rows = self.find_all(None).await?;
        Ok(aggregate_rows(&rows, options))
    }
}
