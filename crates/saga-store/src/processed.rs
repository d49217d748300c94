//! Idempotency ledger for consumers of at-least-once deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;

/// Records which message identities have already been applied.
///
/// Presence of a row means "already applied, skip". The ledger is pruned
/// by a retention job and is not consistency-critical beyond its
/// retention window: a redelivery older than the window would be applied
/// twice, which the window is sized to make practically impossible.
#[async_trait]
pub trait ProcessedMessageLedger: Send + Sync {
    /// Records the message as applied. Returns `true` if this was the
    /// first time the identity was seen, `false` on a duplicate.
    async fn mark_processed(&self, message_id: Uuid) -> Result<bool>;

    /// Returns true if the message identity has already been applied.
    async fn is_processed(&self, message_id: Uuid) -> Result<bool>;

    /// Deletes ledger rows older than `cutoff`. Returns rows removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64>;
}
