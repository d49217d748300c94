//! Outbox events for reliable, at-least-once publication.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Aggregate type used for stored-file events.
pub const AGGREGATE_FILE: &str = "FILE";

/// Aggregate type used for compensation dead letters.
pub const AGGREGATE_SAGA_DEAD_LETTER: &str = "SAGA_DEAD_LETTER";

/// Event type appended when a saga's store completed successfully.
pub const EVENT_FILE_STORED: &str = "file.stored";

/// Event type appended when compensation retries are exhausted.
pub const EVENT_COMPENSATION_FAILED: &str = "saga.compensation.failed";

/// Publication state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    /// Not yet handed to the broker.
    #[default]
    Pending,

    /// Acknowledged by the broker (terminal).
    Sent,

    /// Publish retries exhausted (terminal, operator attention).
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<OutboxStatus> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "SENT" => Some(OutboxStatus::Sent),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event waiting to be appended, before the store assigns identity.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

/// One row per at-least-once delivery obligation.
///
/// Appended in the same transaction as the state change it describes, so
/// the event is never observed without its cause nor vice versa. Drained
/// by the outbox publisher; consumers deduplicate through the
/// processed-message ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Materializes a pending row from its append request.
    pub fn from_new(new: NewOutboxEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            event_type: new.event_type,
            payload: new.payload,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Append and drain operations on the outbox table.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Appends one pending event. Implementations commit this write on its
    /// own; callers that need the event to share fate with another write
    /// use the bookkeeping boundary instead.
    async fn append_event(&self, event: NewOutboxEvent) -> Result<Uuid>;

    /// Fetches pending events whose next attempt is due, oldest first.
    async fn fetch_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>>;

    /// Marks an event as acknowledged by the broker.
    async fn mark_sent(&self, id: Uuid) -> Result<()>;

    /// Records a failed publish attempt and schedules the next one.
    async fn mark_attempt_failed(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()>;

    /// Marks an event as permanently failed after exhausting retries.
    async fn mark_exhausted(&self, id: Uuid) -> Result<()>;

    /// Deletes sent events created before `cutoff`. Returns rows removed.
    async fn prune_sent_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_new_starts_pending_with_zero_attempts() {
        let event = OutboxEvent::from_new(NewOutboxEvent::new(
            "FILE",
            "abc",
            EVENT_FILE_STORED,
            serde_json::json!({"k": "v"}),
        ));
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.attempt_count, 0);
        assert!(event.next_attempt_at.is_none());
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [OutboxStatus::Pending, OutboxStatus::Sent, OutboxStatus::Failed] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("nope"), None);
    }
}
