//! Metric names and gauge refresh.

use saga_store::{SagaRepository, SagaStatus};

use crate::error::Result;

pub const SAGA_STARTED_TOTAL: &str = "saga_started_total";
pub const SAGA_COMPLETED_TOTAL: &str = "saga_completed_total";
pub const SAGA_COMPENSATED_TOTAL: &str = "saga_compensated_total";
pub const SAGA_FAILED_TOTAL: &str = "saga_failed_total";
pub const SAGA_DURATION_SECONDS: &str = "saga_duration_seconds";
pub const COMPENSATION_DURATION_SECONDS: &str = "saga_compensation_duration_seconds";

pub const SAGA_RUNNING: &str = "saga_running";
pub const SAGA_PENDING_COMPENSATION: &str = "saga_pending_compensation";

pub const OUTBOX_PUBLISHED_TOTAL: &str = "outbox_published_total";
pub const OUTBOX_PUBLISH_FAILED_TOTAL: &str = "outbox_publish_failed_total";
pub const OUTBOX_PUBLISH_DURATION_SECONDS: &str = "outbox_publish_duration_seconds";

pub const SWEEP_DURATION_SECONDS: &str = "sweep_duration_seconds";
pub const RETENTION_PRUNED_TOTAL: &str = "retention_pruned_total";

/// Refreshes the status gauges from the saga table. Intended to be called
/// periodically, not on every mutation.
pub async fn refresh_status_gauges<R: SagaRepository>(repo: &R) -> Result<()> {
    let running = repo.count_by_status(SagaStatus::Running).await?;
    let pending = repo.count_by_status(SagaStatus::PendingCompensation).await?;

    metrics::gauge!(SAGA_RUNNING).set(running as f64);
    metrics::gauge!(SAGA_PENDING_COMPENSATION).set(pending as f64);
    Ok(())
}
