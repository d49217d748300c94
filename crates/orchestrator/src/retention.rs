//! Retention pruning for the outbox and the processed-message ledger.

use chrono::Utc;
use tracing::info;

use saga_store::{OutboxRepository, ProcessedMessageLedger};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::lock::{LOCK_RETENTION, LockProvider, with_lock};
use crate::metrics::RETENTION_PRUNED_TOTAL;

/// Tally of one retention cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub outbox_pruned: u64,
    pub processed_pruned: u64,
}

/// Deletes rows the system no longer needs: sent outbox events past their
/// retention window and idempotency claims old enough that no redelivery
/// can still arrive. Saga rows are never touched; terminal sagas are the
/// audit trail.
pub struct RetentionJob<S, P> {
    store: S,
    locks: P,
    config: OrchestratorConfig,
}

impl<S, P> RetentionJob<S, P>
where
    S: OutboxRepository + ProcessedMessageLedger,
    P: LockProvider,
{
    pub fn new(store: S, locks: P, config: OrchestratorConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Runs one pruning cycle under the retention lock. Returns `None`
    /// when another instance holds the lock.
    pub async fn run(&self) -> Result<Option<RetentionReport>> {
        let ran = with_lock(
            &self.locks,
            LOCK_RETENTION,
            self.config.sweep_lock_lease,
            || self.prune(),
        )
        .await?;
        ran.transpose()
    }

    async fn prune(&self) -> Result<RetentionReport> {
        let now = Utc::now();

        let outbox_pruned = self
            .store
            .prune_sent_before(now - self.config.outbox_retention, self.config.retention_batch_size)
            .await?;
        let processed_pruned = self
            .store
            .prune_before(
                now - self.config.processed_retention,
                self.config.retention_batch_size,
            )
            .await?;

        metrics::counter!(RETENTION_PRUNED_TOTAL, "table" => "outbox_events")
            .increment(outbox_pruned);
        metrics::counter!(RETENTION_PRUNED_TOTAL, "table" => "processed_messages")
            .increment(processed_pruned);

        if outbox_pruned + processed_pruned > 0 {
            info!(outbox_pruned, processed_pruned, "retention cycle finished");
        }
        Ok(RetentionReport {
            outbox_pruned,
            processed_pruned,
        })
    }
}
