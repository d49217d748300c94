//! Relational resource store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::ResourceId;

use crate::error::OrchestratorError;

/// Trait for the relational row behind a stored resource.
///
/// Compensation uses this to mark the business row rolled back when the
/// saga cannot complete; the row itself is owned by the wider platform.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Marks the resource row rolled back. Returns rows affected; zero
    /// means the row was already gone, which is not an error.
    async fn mark_rolled_back(&self, resource_id: ResourceId) -> Result<u64, OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryResourceState {
    rolled_back: HashMap<ResourceId, u32>,
    rollback_count: u32,
    fail_on_rollback: bool,
}

/// In-memory resource store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceStore {
    state: Arc<RwLock<InMemoryResourceState>>,
}

impl InMemoryResourceStore {
    /// Creates a new in-memory resource store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail rollbacks.
    pub fn set_fail_on_rollback(&self, fail: bool) {
        self.state.write().unwrap().fail_on_rollback = fail;
    }

    /// Number of rollback calls issued.
    pub fn rollback_count(&self) -> u32 {
        self.state.read().unwrap().rollback_count
    }

    /// Returns true if the resource was marked rolled back.
    pub fn is_rolled_back(&self, resource_id: ResourceId) -> bool {
        self.state
            .read()
            .unwrap()
            .rolled_back
            .contains_key(&resource_id)
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn mark_rolled_back(&self, resource_id: ResourceId) -> Result<u64, OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.rollback_count += 1;

        if state.fail_on_rollback {
            return Err(OrchestratorError::Resource(
                "database unavailable".to_string(),
            ));
        }

        *state.rolled_back.entry(resource_id).or_insert(0) += 1;
        Ok(1)
    }
}
