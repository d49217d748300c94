//! Compensation of partially completed sagas.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use saga_store::{
    AGGREGATE_SAGA_DEAD_LETTER, BookkeepingStore, COMP_STEP_DB_ROLLBACK, COMP_STEP_LEDGER,
    COMP_STEP_OBJECT_STORE, EVENT_COMPENSATION_FAILED, NewOutboxEvent, SagaRecord, SagaStatus,
    SagaStep,
};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::metrics::{COMPENSATION_DURATION_SECONDS, SAGA_COMPENSATED_TOTAL, SAGA_FAILED_TOTAL};
use crate::services::{LedgerClient, ObjectStoreClient, ResourceStore};

/// What a compensation attempt did with the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// The saga was already terminal; nothing was done.
    AlreadySettled,

    /// Every required undo action is applied; the saga is `COMPENSATED`.
    Compensated,

    /// An undo action failed; the saga is back in `PENDING_COMPENSATION`
    /// with a later `next_retry_at`.
    Rescheduled,

    /// The retry ceiling was hit; the saga is `FAILED` and (when enabled)
    /// a dead-letter event was appended in the same unit of work.
    DeadLettered,
}

/// Drives a saga that owes compensation toward a terminal state.
///
/// Undo actions run newest-first relative to the forward path: object
/// store, then ledger, then the relational row. Each applied action is
/// tagged in the payload and the payload persisted before the next action
/// runs, so a crash mid-compensation never repeats applied work.
pub struct CompensationOrchestrator<B, O, L, R> {
    store: B,
    object_store: O,
    ledger: L,
    resources: R,
    config: OrchestratorConfig,
}

impl<B, O, L, R> CompensationOrchestrator<B, O, L, R>
where
    B: BookkeepingStore,
    O: ObjectStoreClient,
    L: LedgerClient,
    R: ResourceStore,
{
    pub fn new(
        store: B,
        object_store: O,
        ledger: L,
        resources: R,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            object_store,
            ledger,
            resources,
            config,
        }
    }

    /// Attempts one full compensation pass over the saga.
    ///
    /// Remote failures never escape: they reschedule the saga or, at the
    /// retry ceiling, fail it. Only bookkeeping errors propagate, because
    /// a lost status write is a lost saga.
    pub async fn retry_compensation(&self, saga: &mut SagaRecord) -> Result<CompensationOutcome> {
        if saga.status.is_terminal() {
            return Ok(CompensationOutcome::AlreadySettled);
        }

        let started = std::time::Instant::now();

        // Everything already tagged: converge the status without touching
        // any remote system. The hop through Compensating keeps the write
        // inside the transition table; only the final state is persisted.
        if self.required_tags(saga).iter().all(|t| saga.payload.is_step_done(t)) {
            saga.transition_to(SagaStatus::Compensating)?;
            saga.transition_to(SagaStatus::Compensated)?;
            self.store.update_saga(saga).await?;
            metrics::counter!(SAGA_COMPENSATED_TOTAL).increment(1);
            info!(saga_id = %saga.id, "all undo actions already applied; saga compensated");
            return Ok(CompensationOutcome::Compensated);
        }

        // Claim the saga before doing anything remote. The claim is what a
        // concurrent sweep observes; a stale claim is re-adoptable because
        // Compensating -> Compensating is a legal transition.
        saga.transition_to(SagaStatus::Compensating)?;
        self.store.update_saga(saga).await?;

        match self.run_undo_actions(saga).await {
            Ok(()) => {
                saga.transition_to(SagaStatus::Compensated)?;
                self.store.update_saga(saga).await?;
                metrics::counter!(SAGA_COMPENSATED_TOTAL).increment(1);
                metrics::histogram!(COMPENSATION_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                info!(saga_id = %saga.id, retry_count = saga.retry_count, "saga compensated");
                Ok(CompensationOutcome::Compensated)
            }
            Err(OrchestratorError::Store(e)) => Err(e.into()),
            Err(error) => {
                saga.record_error(&error);
                metrics::histogram!(COMPENSATION_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());

                if saga.is_max_retries_exceeded(self.config.max_retries) {
                    self.fail_saga(saga).await?;
                    Ok(CompensationOutcome::DeadLettered)
                } else {
                    saga.schedule_next_retry(self.config.backoff_base, Utc::now());
                    saga.transition_to(SagaStatus::PendingCompensation)?;
                    self.store.update_saga(saga).await?;
                    warn!(
                        saga_id = %saga.id,
                        retry_count = saga.retry_count,
                        %error,
                        "compensation attempt failed; rescheduled"
                    );
                    Ok(CompensationOutcome::Rescheduled)
                }
            }
        }
    }

    /// The tags this saga must carry before it can be `COMPENSATED`,
    /// derived from how far the forward path got. Status is deliberately
    /// not consulted: reachedness is monotonic, status is not.
    fn required_tags(&self, saga: &SagaRecord) -> Vec<&'static str> {
        let mut tags = Vec::with_capacity(3);
        if saga.reached_step(SagaStep::ObjectStoreUploaded) {
            tags.push(COMP_STEP_OBJECT_STORE);
        }
        if saga.reached_step(SagaStep::LedgerStoring) {
            tags.push(COMP_STEP_LEDGER);
        }
        tags.push(COMP_STEP_DB_ROLLBACK);
        tags
    }

    async fn run_undo_actions(&self, saga: &mut SagaRecord) -> Result<()> {
        if saga.reached_step(SagaStep::ObjectStoreUploaded)
            && !saga.payload.is_step_done(COMP_STEP_OBJECT_STORE)
        {
            self.undo_object_store(saga).await?;
        }

        if saga.reached_step(SagaStep::LedgerStoring)
            && !saga.payload.is_step_done(COMP_STEP_LEDGER)
        {
            self.undo_ledger(saga).await?;
        }

        if !saga.payload.is_step_done(COMP_STEP_DB_ROLLBACK) {
            self.undo_relational(saga).await?;
        }

        Ok(())
    }

    /// Deletes the saga's stored objects. Not-found counts as success:
    /// the write being undone evidently never landed or was already undone.
    async fn undo_object_store(&self, saga: &mut SagaRecord) -> Result<()> {
        if !saga.payload.stored_paths.is_empty() {
            let outcome = self.object_store.delete(&saga.payload.stored_paths).await?;
            info!(saga_id = %saga.id, ?outcome, "object store compensation applied");
        }
        saga.payload.mark_step_done(COMP_STEP_OBJECT_STORE);
        self.store.persist_payload(saga.id, &saga.payload).await?;
        Ok(())
    }

    /// Deletes the ledger records written for this saga's content hashes.
    async fn undo_ledger(&self, saga: &mut SagaRecord) -> Result<()> {
        if !saga.payload.stored_paths.is_empty() {
            let hashes: Vec<String> = saga.payload.stored_paths.keys().cloned().collect();
            self.ledger.delete(saga.user_id, &hashes).await?;
            info!(saga_id = %saga.id, hashes = hashes.len(), "ledger compensation applied");
        }
        saga.payload.mark_step_done(COMP_STEP_LEDGER);
        self.store.persist_payload(saga.id, &saga.payload).await?;
        Ok(())
    }

    /// Marks the relational resource row rolled back. A saga that failed
    /// before any row existed has nothing to roll back and the action is
    /// trivially done.
    async fn undo_relational(&self, saga: &mut SagaRecord) -> Result<()> {
        if let Some(resource_id) = saga.resource_id {
            let affected = self.resources.mark_rolled_back(resource_id).await?;
            info!(saga_id = %saga.id, %resource_id, affected, "relational compensation applied");
        }
        saga.payload.mark_step_done(COMP_STEP_DB_ROLLBACK);
        self.store.persist_payload(saga.id, &saga.payload).await?;
        Ok(())
    }

    async fn fail_saga(&self, saga: &mut SagaRecord) -> Result<()> {
        saga.transition_to(SagaStatus::Failed)?;

        if self.config.dead_letter_enabled {
            let event = NewOutboxEvent::new(
                AGGREGATE_SAGA_DEAD_LETTER,
                saga.id.to_string(),
                EVENT_COMPENSATION_FAILED,
                json!({
                    "sagaId": saga.id,
                    "requestId": saga.request_id,
                    "tenantId": saga.tenant_id,
                    "userId": saga.user_id,
                    "resourceName": saga.resource_name,
                    "currentStep": saga.current_step.as_str(),
                    "retryCount": saga.retry_count,
                    "lastError": saga.last_error,
                    "payload": saga.payload,
                    "failedAt": Utc::now(),
                }),
            );
            self.store.update_saga_with_event(saga, event).await?;
        } else {
            self.store.update_saga(saga).await?;
        }

        metrics::counter!(SAGA_FAILED_TOTAL).increment(1);
        warn!(
            saga_id = %saga.id,
            retry_count = saga.retry_count,
            last_error = saga.last_error.as_deref().unwrap_or(""),
            "compensation retries exhausted; saga failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{RequestId, ResourceId, TenantId, UserId};
    use saga_store::InMemorySagaStore;

    use crate::services::{InMemoryLedger, InMemoryObjectStore, InMemoryResourceStore};

    struct Fixture {
        store: InMemorySagaStore,
        object_store: InMemoryObjectStore,
        ledger: InMemoryLedger,
        resources: InMemoryResourceStore,
        orchestrator: CompensationOrchestrator<
            InMemorySagaStore,
            InMemoryObjectStore,
            InMemoryLedger,
            InMemoryResourceStore,
        >,
    }

    fn fixture(config: OrchestratorConfig) -> Fixture {
        let store = InMemorySagaStore::new();
        let object_store = InMemoryObjectStore::new();
        let ledger = InMemoryLedger::new();
        let resources = InMemoryResourceStore::new();
        let orchestrator = CompensationOrchestrator::new(
            store.clone(),
            object_store.clone(),
            ledger.clone(),
            resources.clone(),
            config,
        );
        Fixture {
            store,
            object_store,
            ledger,
            resources,
            orchestrator,
        }
    }

    fn pending_saga() -> SagaRecord {
        let mut saga = SagaRecord::new(
            RequestId::new("req-1"),
            TenantId::new(1),
            UserId::new(7),
            Some(ResourceId::new()),
            "report.pdf",
        );
        saga.advance_to(SagaStep::LedgerStoring);
        saga.payload
            .stored_paths
            .insert("h1".to_string(), "bucket/h1".to_string());
        saga.transition_to(SagaStatus::PendingCompensation).unwrap();
        saga
    }

    #[tokio::test]
    async fn compensates_all_reached_steps() {
        let f = fixture(OrchestratorConfig::default());
        let mut saga = pending_saga();
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Compensated);
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert!(saga.payload.is_step_done(COMP_STEP_OBJECT_STORE));
        assert!(saga.payload.is_step_done(COMP_STEP_LEDGER));
        assert!(saga.payload.is_step_done(COMP_STEP_DB_ROLLBACK));
        assert_eq!(f.object_store.delete_count(), 1);
        assert_eq!(f.ledger.delete_count(), 1);
        assert_eq!(f.resources.rollback_count(), 1);

        // The converged status is durable.
        let stored = f.store.saga(saga.id).await.unwrap();
        assert_eq!(stored.status, SagaStatus::Compensated);
    }

    #[tokio::test]
    async fn saga_that_never_uploaded_skips_remote_deletes() {
        let f = fixture(OrchestratorConfig::default());
        let mut saga = SagaRecord::new(
            RequestId::new("req-1"),
            TenantId::new(1),
            UserId::new(7),
            Some(ResourceId::new()),
            "report.pdf",
        );
        saga.advance_to(SagaStep::ObjectStoreUploading);
        saga.transition_to(SagaStatus::PendingCompensation).unwrap();
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Compensated);
        assert_eq!(f.object_store.delete_count(), 0);
        assert_eq!(f.ledger.delete_count(), 0);
        assert_eq!(f.resources.rollback_count(), 1);
    }

    #[tokio::test]
    async fn applied_tags_are_not_repeated() {
        let f = fixture(OrchestratorConfig::default());
        let mut saga = pending_saga();
        saga.payload.mark_step_done(COMP_STEP_OBJECT_STORE);
        saga.payload.mark_step_done(COMP_STEP_LEDGER);
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Compensated);
        assert_eq!(f.object_store.delete_count(), 0, "tagged step must not rerun");
        assert_eq!(f.ledger.delete_count(), 0, "tagged step must not rerun");
        assert_eq!(f.resources.rollback_count(), 1);
    }

    #[tokio::test]
    async fn fully_tagged_saga_converges_without_remote_calls() {
        let f = fixture(OrchestratorConfig::default());
        let mut saga = pending_saga();
        saga.payload.mark_step_done(COMP_STEP_OBJECT_STORE);
        saga.payload.mark_step_done(COMP_STEP_LEDGER);
        saga.payload.mark_step_done(COMP_STEP_DB_ROLLBACK);
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Compensated);
        assert_eq!(f.object_store.delete_count(), 0);
        assert_eq!(f.resources.rollback_count(), 0);
    }

    #[tokio::test]
    async fn failure_reschedules_with_backoff() {
        let f = fixture(OrchestratorConfig::default());
        f.object_store.set_fail_on_delete(true);
        let mut saga = pending_saga();
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Rescheduled);
        assert_eq!(saga.status, SagaStatus::PendingCompensation);
        assert_eq!(saga.retry_count, 1);
        assert!(saga.next_retry_at.is_some());
        assert!(saga.last_error.is_some());
        // No tag was recorded for the failed action.
        assert!(!saga.payload.is_step_done(COMP_STEP_OBJECT_STORE));
    }

    #[tokio::test]
    async fn partial_progress_survives_a_failed_attempt() {
        let f = fixture(OrchestratorConfig::default());
        f.ledger.set_fail_on_delete(true);
        let mut saga = pending_saga();
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Rescheduled);
        assert!(saga.payload.is_step_done(COMP_STEP_OBJECT_STORE));
        assert!(!saga.payload.is_step_done(COMP_STEP_LEDGER));

        // The persisted payload carries the applied tag.
        let stored = f.store.saga(saga.id).await.unwrap();
        assert!(stored.payload.is_step_done(COMP_STEP_OBJECT_STORE));

        // Next attempt skips the applied action and finishes.
        f.ledger.set_fail_on_delete(false);
        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::Compensated);
        assert_eq!(f.object_store.delete_count(), 1);
    }

    #[tokio::test]
    async fn ceiling_fails_saga_and_emits_dead_letter() {
        let f = fixture(OrchestratorConfig::default());
        f.object_store.set_fail_on_delete(true);
        let mut saga = pending_saga();
        saga.retry_count = 5;
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::DeadLettered);
        assert_eq!(saga.status, SagaStatus::Failed);

        let dead_letters = f.store.events_of_type(EVENT_COMPENSATION_FAILED).await;
        assert_eq!(dead_letters.len(), 1);
        let payload = &dead_letters[0].payload;
        assert_eq!(payload["requestId"], json!(saga.request_id));
        assert_eq!(payload["retryCount"], json!(5));
        assert_eq!(payload["currentStep"], json!("LEDGER_STORING"));
        assert!(payload["lastError"].is_string());
    }

    #[tokio::test]
    async fn dead_letter_can_be_disabled() {
        let config = OrchestratorConfig {
            dead_letter_enabled: false,
            ..OrchestratorConfig::default()
        };
        let f = fixture(config);
        f.object_store.set_fail_on_delete(true);
        let mut saga = pending_saga();
        saga.retry_count = 5;
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::DeadLettered);
        assert_eq!(saga.status, SagaStatus::Failed);
        assert!(f.store.events().await.is_empty());
    }

    #[tokio::test]
    async fn terminal_saga_is_left_alone() {
        let f = fixture(OrchestratorConfig::default());
        let mut saga = pending_saga();
        saga.transition_to(SagaStatus::Compensating).unwrap();
        saga.transition_to(SagaStatus::Compensated).unwrap();
        f.store.seed_saga(saga.clone()).await;

        let outcome = f.orchestrator.retry_compensation(&mut saga).await.unwrap();
        assert_eq!(outcome, CompensationOutcome::AlreadySettled);
        assert_eq!(f.object_store.delete_count(), 0);
    }

    #[tokio::test]
    async fn bookkeeping_failure_propagates() {
        let f = fixture(OrchestratorConfig::default());
        f.store.set_fail_bookkeeping(true).await;
        let mut saga = pending_saga();

        let result = f.orchestrator.retry_compensation(&mut saga).await;
        assert!(matches!(result, Err(OrchestratorError::Store(_))));
    }
}
