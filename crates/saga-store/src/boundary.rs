//! The transactional boundary for saga bookkeeping.

use async_trait::async_trait;

use common::SagaId;

use crate::error::Result;
use crate::outbox::NewOutboxEvent;
use crate::payload::SagaPayload;
use crate::record::SagaRecord;

/// Bookkeeping writes that must survive the caller's own rollback.
///
/// Every method opens a **fresh unit of work** and commits or fails on its
/// own, independent of any transaction the calling code is inside. The
/// compensation orchestrator is frequently invoked from a request handler
/// that is itself about to roll back (the very failure that triggered
/// compensation may be a database error), and if these writes shared that
/// transaction the system would lose all memory that compensation is owed.
///
/// A failure here propagates to the caller and is never swallowed: losing
/// a status write is equivalent to losing the saga.
#[async_trait]
pub trait BookkeepingStore: Send + Sync {
    /// Inserts a new saga row.
    async fn insert_saga(&self, saga: &SagaRecord) -> Result<()>;

    /// Persists the full saga row (step, status, retry bookkeeping,
    /// payload, error context).
    async fn update_saga(&self, saga: &SagaRecord) -> Result<()>;

    /// Persists only the payload document. Called after each successful
    /// compensating action so a crash cannot lose partial progress.
    async fn persist_payload(&self, saga_id: SagaId, payload: &SagaPayload) -> Result<()>;

    /// Persists the saga row and appends an outbox event in the **same**
    /// unit of work, so the event shares fate with the state change it
    /// describes. Used for the success event and for dead letters.
    async fn update_saga_with_event(&self, saga: &SagaRecord, event: NewOutboxEvent)
    -> Result<()>;
}
