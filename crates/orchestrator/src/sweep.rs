//! The scheduled compensation sweep.

use chrono::Utc;
use tracing::{info, warn};

use saga_store::{BookkeepingStore, SagaRepository};

use crate::compensation::{CompensationOrchestrator, CompensationOutcome};
use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::lock::{LOCK_COMPENSATION_SWEEP, LockProvider, with_lock};
use crate::metrics::SWEEP_DURATION_SECONDS;
use crate::services::{LedgerClient, ObjectStoreClient, ResourceStore, TenantDirectory};

/// Tally of one completed sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tenants_swept: usize,
    pub tenants_failed: usize,
    pub compensated: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    pub saga_errors: usize,
}

/// Whether the cycle ran or yielded to another instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    Skipped,
}

/// Walks every tenant partition and retries the sagas that owe
/// compensation.
///
/// One instance runs at a time, fenced by a distributed lock. Failures
/// are contained at two levels: a tenant whose selection query fails is
/// skipped for the cycle, and a saga whose bookkeeping fails is skipped
/// for the tenant. Neither aborts the sweep.
pub struct CompensationSweep<S, O, L, R, T, P> {
    store: S,
    tenants: T,
    locks: P,
    orchestrator: CompensationOrchestrator<S, O, L, R>,
    config: OrchestratorConfig,
}

impl<S, O, L, R, T, P> CompensationSweep<S, O, L, R, T, P>
where
    S: SagaRepository + BookkeepingStore + Clone,
    O: ObjectStoreClient,
    L: LedgerClient,
    R: ResourceStore,
    T: TenantDirectory,
    P: LockProvider,
{
    pub fn new(
        store: S,
        object_store: O,
        ledger: L,
        resources: R,
        tenants: T,
        locks: P,
        config: OrchestratorConfig,
    ) -> Self {
        let orchestrator = CompensationOrchestrator::new(
            store.clone(),
            object_store,
            ledger,
            resources,
            config.clone(),
        );
        Self {
            store,
            tenants,
            locks,
            orchestrator,
            config,
        }
    }

    /// Runs one sweep cycle under the distributed lock.
    ///
    /// Returns [`SweepOutcome::Skipped`] when another instance holds the
    /// lock. Only lock and tenant-directory errors propagate; everything
    /// downstream is contained and tallied.
    pub async fn run(&self) -> Result<SweepOutcome> {
        let ran = with_lock(
            &self.locks,
            LOCK_COMPENSATION_SWEEP,
            self.config.sweep_lock_lease,
            || self.sweep_all_tenants(),
        )
        .await?;

        match ran {
            Some(report) => Ok(SweepOutcome::Completed(report?)),
            None => {
                info!("compensation sweep skipped; lock held by another instance");
                Ok(SweepOutcome::Skipped)
            }
        }
    }

    async fn sweep_all_tenants(&self) -> Result<SweepReport> {
        let started = std::time::Instant::now();
        let tenant_ids = self.tenants.list_active_tenant_ids().await?;
        let mut report = SweepReport::default();

        for tenant_id in tenant_ids {
            let now = Utc::now();
            let stale_before = now - self.config.compensating_stale_after;

            let due = match self
                .store
                .select_pending_compensation(tenant_id, self.config.batch_size, stale_before)
                .await
            {
                Ok(due) => due,
                Err(error) => {
                    // One tenant's partition being unreachable must not
                    // starve the rest of the cycle.
                    warn!(%tenant_id, %error, "tenant sweep failed; continuing");
                    report.tenants_failed += 1;
                    continue;
                }
            };

            for mut saga in due {
                if !saga.is_retry_due(now) {
                    continue;
                }
                match self.orchestrator.retry_compensation(&mut saga).await {
                    Ok(CompensationOutcome::Compensated) => report.compensated += 1,
                    Ok(CompensationOutcome::Rescheduled) => report.rescheduled += 1,
                    Ok(CompensationOutcome::DeadLettered) => report.dead_lettered += 1,
                    Ok(CompensationOutcome::AlreadySettled) => {}
                    Err(error) => {
                        warn!(saga_id = %saga.id, %tenant_id, %error, "saga retry failed; continuing");
                        report.saga_errors += 1;
                    }
                }
            }
            report.tenants_swept += 1;
        }

        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            tenants_swept = report.tenants_swept,
            tenants_failed = report.tenants_failed,
            compensated = report.compensated,
            rescheduled = report.rescheduled,
            dead_lettered = report.dead_lettered,
            saga_errors = report.saga_errors,
            "compensation sweep finished"
        );
        Ok(report)
    }
}
