//! Object-store client trait and in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::OrchestratorError;

/// Result of a bulk delete against the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The objects were removed.
    Deleted,

    /// None of the objects existed. Counts as compensation success: the
    /// work being undone evidently never happened or was already undone.
    NotFound,
}

/// Trait for the content-addressed object store.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Stores one chunk, keyed by its content hash. Returns the physical
    /// storage location.
    async fn store_chunk(&self, hash: &str, data: Vec<u8>)
    -> Result<String, OrchestratorError>;

    /// Bulk-deletes objects, keyed by content hash.
    async fn delete(
        &self,
        locations_by_hash: &BTreeMap<String, String>,
    ) -> Result<DeleteOutcome, OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryObjectStoreState {
    objects: BTreeMap<String, Vec<u8>>,
    store_count: u32,
    delete_count: u32,
    fail_on_store: bool,
    fail_on_delete: bool,
}

/// In-memory object store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<InMemoryObjectStoreState>>,
}

impl InMemoryObjectStore {
    /// Creates a new in-memory object store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail chunk writes.
    pub fn set_fail_on_store(&self, fail: bool) {
        self.state.write().unwrap().fail_on_store = fail;
    }

    /// Configures the store to fail deletes.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().unwrap().fail_on_delete = fail;
    }

    /// Number of delete calls issued, for idempotency assertions.
    pub fn delete_count(&self) -> u32 {
        self.state.read().unwrap().delete_count
    }

    /// Number of stored objects currently held.
    pub fn object_count(&self) -> usize {
        self.state.read().unwrap().objects.len()
    }

    /// Number of store calls issued.
    pub fn store_count(&self) -> u32 {
        self.state.read().unwrap().store_count
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn store_chunk(
        &self,
        hash: &str,
        data: Vec<u8>,
    ) -> Result<String, OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.store_count += 1;

        if state.fail_on_store {
            return Err(OrchestratorError::ObjectStore(
                "storage backend unavailable".to_string(),
            ));
        }

        let location = format!("bucket/{hash}");
        state.objects.insert(location.clone(), data);
        Ok(location)
    }

    async fn delete(
        &self,
        locations_by_hash: &BTreeMap<String, String>,
    ) -> Result<DeleteOutcome, OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.delete_count += 1;

        if state.fail_on_delete {
            return Err(OrchestratorError::ObjectStore(
                "storage backend unavailable".to_string(),
            ));
        }

        let mut removed = 0;
        for location in locations_by_hash.values() {
            if state.objects.remove(location).is_some() {
                removed += 1;
            }
        }

        if removed == 0 {
            Ok(DeleteOutcome::NotFound)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_delete() {
        let store = InMemoryObjectStore::new();
        let location = store.store_chunk("h1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(location, "bucket/h1");
        assert_eq!(store.object_count(), 1);

        let mut paths = BTreeMap::new();
        paths.insert("h1".to_string(), location);
        let outcome = store.delete(&paths).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(store.object_count(), 0);

        // Deleting again reports not-found rather than erroring.
        let outcome = store.delete(&paths).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
        assert_eq!(store.delete_count(), 2);
    }

    #[tokio::test]
    async fn fail_on_delete() {
        let store = InMemoryObjectStore::new();
        store.set_fail_on_delete(true);

        let mut paths = BTreeMap::new();
        paths.insert("h1".to_string(), "bucket/h1".to_string());
        assert!(store.delete(&paths).await.is_err());
    }
}
