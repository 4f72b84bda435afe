//! Collection registry
//!
//! `Storage` hands out per-collection repositories. Registration is
//! idempotent; engines create the collections they need lazily on first
//! use via [`Storage::ensure_collection`]. Schemas are held opaquely for a
//! future validating store.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::repository::{MemoryRepository, Repository};

/// The collection registry the engines consume.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Register a collection. Idempotent: an existing collection keeps its
    /// records; a newly supplied schema replaces the stored one.
    async fn register_collection(&self, name: &str, schema: Option<Value>);

    /// Whether a collection has been registered.
    async fn has_collection(&self, name: &str) -> bool;

    /// Repository for a registered collection.
    async fn repository(&self, name: &str) -> Result<Arc<dyn Repository>, StoreError>;

    /// Repository for a collection, registering it first when needed.
    async fn ensure_collection(&self, name: &str) -> Arc<dyn Repository>;

    /// Registered collection names, in registration order.
    async fn collections(&self) -> Vec<String>;

    /// Drop a collection and its records. Returns whether it existed.
    async fn drop_collection(&self, name: &str) -> bool;
}

struct CollectionEntry {
    repository: Arc<MemoryRepository>,
    schema: Option<Value>,
}

/// In-memory storage backend.
#[derive(Default, Clone)]
pub struct MemoryStorage {
    collections: Arc<RwLock<IndexMap<String, CollectionEntry>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema registered for a collection, when any.
    pub fn schema(&self, name: &str) -> Option<Value> {
        self.collections
            .read()
            .get(name)
            .and_then(|entry| entry.schema.clone())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn register_collection(&self, name: &str, schema: Option<Value>) {
        let mut collections = self.collections.write();
        match collections.get_mut(name) {
            Some(entry) => {
                if schema.is_some() {
                    entry.schema = schema;
                }
            }
            None => {
                debug!(collection = name, "registering collection");
                collections.insert(
                    name.to_string(),
                    CollectionEntry {
                        repository: Arc::new(MemoryRepository::new(name)),
                        schema,
                    },
                );
            }
        }
    }

    async fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    async fn repository(&self, name: &str) -> Result<Arc<dyn Repository>, StoreError> {
        self.collections
            .read()
            .get(name)
            .map(|entry| entry.repository.clone() as Arc<dyn Repository>)
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn ensure_collection(&self, name: &str) -> Arc<dyn Repository> {
        if let Some(entry) = self.collections.read().get(name) {
            return entry.repository.clone();
        }
        self.register_collection(name, None).await;
        match self.repository(name).await {
            Ok(repository) => repository,
            // register_collection above makes this unreachable
            Err(_) => Arc::new(MemoryRepository::new(name)),
        }
    }

    async fn collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    async fn drop_collection(&self, name: &str) -> bool {
        self.collections.write().shift_remove(name).is_some()
    }
}
