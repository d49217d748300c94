//! Event sink trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use saga_store::OutboxEvent;

use crate::error::OrchestratorError;

/// Trait for the broker the outbox publisher hands events to.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one event. Returning `Ok` means the broker acknowledged
    /// the message; the publisher marks the row sent only after that.
    async fn publish(&self, event: &OutboxEvent) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryEventSinkState {
    published: Vec<Uuid>,
    fail_on_publish: bool,
}

/// In-memory event sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    state: Arc<RwLock<InMemoryEventSinkState>>,
}

impl InMemoryEventSink {
    /// Creates a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sink to reject publishes.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// IDs of events published so far, in order.
    pub fn published(&self) -> Vec<Uuid> {
        self.state.read().unwrap().published.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_publish {
            return Err(OrchestratorError::Publish(
                "broker unreachable".to_string(),
            ));
        }
        state.published.push(event.id);
        Ok(())
    }
}
