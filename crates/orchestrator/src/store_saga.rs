//! The forward path: store a file's chunks, then anchor them in the ledger.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use common::{RequestId, ResourceId, SagaId, TenantId, UserId};
use saga_store::{
    AGGREGATE_FILE, BookkeepingStore, EVENT_FILE_STORED, NewOutboxEvent, SagaRecord,
    SagaRepository, SagaStatus, SagaStep,
};

use crate::compensation::CompensationOrchestrator;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::metrics::{SAGA_COMPLETED_TOTAL, SAGA_DURATION_SECONDS, SAGA_STARTED_TOTAL};
use crate::services::{LedgerClient, LedgerRecord, ObjectStoreClient, ResourceStore};

/// One content-addressed chunk of the file being stored.
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub hash: String,
    pub data: Vec<u8>,
}

/// Everything needed to run (or resume) one store operation.
#[derive(Debug, Clone)]
pub struct StoreFileCommand {
    /// Caller-supplied idempotency key, unique per tenant.
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// The relational row backing this file, once the caller has created
    /// it. `None` for sagas triggered before the row exists.
    pub resource_id: Option<ResourceId>,
    pub resource_name: String,
    pub chunks: Vec<FileChunk>,
}

/// What a completed store hands back to the caller.
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub saga_id: SagaId,
    pub transaction_hash: String,
    pub content_hash: String,
}

/// Orchestrates the two-step store saga.
///
/// Step one writes every chunk to the object store; step two anchors the
/// stored-path manifest in the ledger. Progress is journaled through the
/// bookkeeping boundary before and after each physical write, so a crash
/// at any point leaves a record the sweep can finish or undo.
pub struct FileStoreSaga<S, O, L, R> {
    store: S,
    object_store: O,
    ledger: L,
    compensator: CompensationOrchestrator<S, O, L, R>,
    config: OrchestratorConfig,
}

impl<S, O, L, R> FileStoreSaga<S, O, L, R>
where
    S: SagaRepository + BookkeepingStore + Clone,
    O: ObjectStoreClient + Clone,
    L: LedgerClient + Clone,
    R: ResourceStore,
{
    pub fn new(
        store: S,
        object_store: O,
        ledger: L,
        resources: R,
        config: OrchestratorConfig,
    ) -> Self {
        let compensator = CompensationOrchestrator::new(
            store.clone(),
            object_store.clone(),
            ledger.clone(),
            resources,
            config.clone(),
        );
        Self {
            store,
            object_store,
            ledger,
            compensator,
            config,
        }
    }

    /// Runs the saga to completion, or leaves it owing compensation.
    ///
    /// Replaying the same `request_id` resumes a still-`RUNNING` saga from
    /// the step it reached; replaying one that already settled is rejected
    /// with [`OrchestratorError::DuplicateRequest`].
    pub async fn execute_store(&self, cmd: StoreFileCommand) -> Result<StoreReceipt> {
        let started = std::time::Instant::now();
        let mut saga = self.start_or_resume(&cmd).await?;

        match self.run_forward(&mut saga, &cmd).await {
            Ok(receipt) => {
                saga.advance_to(SagaStep::Completed);
                saga.transition_to(SagaStatus::Succeeded)?;
                let event = NewOutboxEvent::new(
                    AGGREGATE_FILE,
                    saga.id.to_string(),
                    EVENT_FILE_STORED,
                    json!({
                        "sagaId": saga.id,
                        "requestId": saga.request_id,
                        "tenantId": saga.tenant_id,
                        "userId": saga.user_id,
                        "resourceName": saga.resource_name,
                        "transactionHash": receipt.transaction_hash,
                        "contentHash": receipt.content_hash,
                    }),
                );
                self.store.update_saga_with_event(&saga, event).await?;
                metrics::counter!(SAGA_COMPLETED_TOTAL).increment(1);
                metrics::histogram!(SAGA_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
                info!(saga_id = %saga.id, request_id = %saga.request_id, "store saga succeeded");
                Ok(receipt)
            }
            Err(OrchestratorError::Store(e)) => Err(e.into()),
            Err(error) => {
                saga.record_error(&error);
                saga.transition_to(SagaStatus::PendingCompensation)?;
                self.store.update_saga(&saga).await?;
                warn!(
                    saga_id = %saga.id,
                    step = %saga.current_step,
                    %error,
                    "store saga failed; compensation owed"
                );

                if self.config.compensate_inline {
                    // Best effort: a failed inline attempt leaves the saga
                    // to the sweep, it never masks the original error.
                    if let Err(comp_error) =
                        self.compensator.retry_compensation(&mut saga).await
                    {
                        warn!(saga_id = %saga.id, %comp_error, "inline compensation failed");
                    }
                }

                Err(error)
            }
        }
    }

    async fn start_or_resume(&self, cmd: &StoreFileCommand) -> Result<SagaRecord> {
        match self
            .store
            .find_by_request_id(cmd.tenant_id, &cmd.request_id)
            .await?
        {
            None => {
                let saga = SagaRecord::new(
                    cmd.request_id.clone(),
                    cmd.tenant_id,
                    cmd.user_id,
                    cmd.resource_id,
                    cmd.resource_name.clone(),
                );
                self.store.insert_saga(&saga).await?;
                metrics::counter!(SAGA_STARTED_TOTAL).increment(1);
                info!(saga_id = %saga.id, request_id = %saga.request_id, "store saga started");
                Ok(saga)
            }
            Some(mut existing) if existing.status == SagaStatus::Running => {
                // The relational row may only exist by the time of the
                // retry; adopt its id so compensation can reach it.
                if existing.resource_id.is_none() && cmd.resource_id.is_some() {
                    existing.resource_id = cmd.resource_id;
                }
                info!(
                    saga_id = %existing.id,
                    step = %existing.current_step,
                    "resuming running saga for replayed request"
                );
                Ok(existing)
            }
            Some(existing) => {
                warn!(
                    saga_id = %existing.id,
                    status = %existing.status,
                    "request id replayed for a settled saga"
                );
                Err(OrchestratorError::DuplicateRequest(cmd.request_id.clone()))
            }
        }
    }

    async fn run_forward(
        &self,
        saga: &mut SagaRecord,
        cmd: &StoreFileCommand,
    ) -> Result<StoreReceipt> {
        self.store_chunks(saga, cmd).await?;

        saga.advance_to(SagaStep::LedgerStoring);
        self.store.update_saga(saga).await?;

        let receipt = self
            .ledger
            .store(LedgerRecord {
                uploader: saga.user_id,
                resource_name: saga.resource_name.clone(),
                content: json!(saga.payload.stored_paths),
            })
            .await?;

        if receipt.transaction_hash.is_empty() || receipt.content_hash.is_empty() {
            return Err(OrchestratorError::InvalidLedgerReceipt(
                "ledger returned empty hashes".to_string(),
            ));
        }

        Ok(StoreReceipt {
            saga_id: saga.id,
            transaction_hash: receipt.transaction_hash,
            content_hash: receipt.content_hash,
        })
    }

    async fn store_chunks(&self, saga: &mut SagaRecord, cmd: &StoreFileCommand) -> Result<()> {
        // A resumed saga that already uploaded keeps its recorded paths.
        if saga.reached_step(SagaStep::ObjectStoreUploaded)
            && !saga.payload.stored_paths.is_empty()
        {
            return Ok(());
        }

        saga.advance_to(SagaStep::ObjectStoreUploading);
        self.store.update_saga(saga).await?;

        for chunk in &cmd.chunks {
            let location = self
                .object_store
                .store_chunk(&chunk.hash, chunk.data.clone())
                .await?;
            saga.payload
                .stored_paths
                .insert(chunk.hash.clone(), location);
        }

        // Fresh physical writes invalidate any earlier undo bookkeeping.
        saga.payload.reset_compensated_steps();
        saga.advance_to(SagaStep::ObjectStoreUploaded);
        self.store.update_saga(saga).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_store::{InMemorySagaStore, OutboxStatus};

    use crate::services::{InMemoryLedger, InMemoryObjectStore, InMemoryResourceStore};

    struct Fixture {
        store: InMemorySagaStore,
        object_store: InMemoryObjectStore,
        ledger: InMemoryLedger,
        resources: InMemoryResourceStore,
        saga: FileStoreSaga<
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
        let saga = FileStoreSaga::new(
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
            saga,
        }
    }

    fn command() -> StoreFileCommand {
        StoreFileCommand {
            request_id: RequestId::new("req-1"),
            tenant_id: TenantId::new(1),
            user_id: UserId::new(7),
            resource_id: Some(ResourceId::new()),
            resource_name: "report.pdf".to_string(),
            chunks: vec![
                FileChunk {
                    hash: "h1".to_string(),
                    data: vec![1, 2],
                },
                FileChunk {
                    hash: "h2".to_string(),
                    data: vec![3, 4],
                },
            ],
        }
    }

    #[tokio::test]
    async fn happy_path_succeeds_and_emits_event() {
        let f = fixture(OrchestratorConfig::default());
        let receipt = f.saga.execute_store(command()).await.unwrap();
        assert!(!receipt.transaction_hash.is_empty());

        let stored = f.store.saga(receipt.saga_id).await.unwrap();
        assert_eq!(stored.status, SagaStatus::Succeeded);
        assert_eq!(stored.current_step, SagaStep::Completed);
        assert_eq!(stored.payload.stored_paths.len(), 2);

        let events = f.store.events_of_type(EVENT_FILE_STORED).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, OutboxStatus::Pending);
        assert_eq!(events[0].payload["transactionHash"], receipt.transaction_hash);
        assert_eq!(f.object_store.object_count(), 2);
        assert_eq!(f.ledger.record_count(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_leaves_saga_pending_compensation() {
        let f = fixture(OrchestratorConfig::default());
        f.ledger.set_fail_on_store(true);

        let error = f.saga.execute_store(command()).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::Ledger(_)));

        let stored = f
            .store
            .find_by_request_id(TenantId::new(1), &RequestId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SagaStatus::PendingCompensation);
        assert_eq!(stored.current_step, SagaStep::LedgerStoring);
        assert!(stored.last_error.is_some());
        // Uploaded chunks are recorded for the undo path.
        assert_eq!(stored.payload.stored_paths.len(), 2);
        assert!(f.store.events().await.is_empty(), "no success event on failure");
    }

    #[tokio::test]
    async fn upload_failure_records_pending_compensation_before_any_path() {
        let f = fixture(OrchestratorConfig::default());
        f.object_store.set_fail_on_store(true);

        let error = f.saga.execute_store(command()).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::ObjectStore(_)));

        let stored = f
            .store
            .find_by_request_id(TenantId::new(1), &RequestId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SagaStatus::PendingCompensation);
        assert_eq!(stored.current_step, SagaStep::ObjectStoreUploading);
        assert!(stored.payload.stored_paths.is_empty());
    }

    #[tokio::test]
    async fn replay_of_settled_request_is_rejected() {
        let f = fixture(OrchestratorConfig::default());
        f.saga.execute_store(command()).await.unwrap();

        let error = f.saga.execute_store(command()).await.unwrap_err();
        assert!(matches!(error, OrchestratorError::DuplicateRequest(_)));
        // No duplicate physical work happened.
        assert_eq!(f.ledger.store_count(), 1);
    }

    #[tokio::test]
    async fn replay_resumes_running_saga_without_reuploading() {
        let f = fixture(OrchestratorConfig::default());
        f.ledger.set_fail_on_store(true);
        f.saga.execute_store(command()).await.unwrap_err();

        // Pretend the sweep has not run and the saga is still RUNNING at
        // the uploaded step, as after a crash before the failure write.
        let mut stored = f
            .store
            .find_by_request_id(TenantId::new(1), &RequestId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        stored.status = SagaStatus::Running;
        f.store.seed_saga(stored).await;

        f.ledger.set_fail_on_store(false);
        let receipt = f.saga.execute_store(command()).await.unwrap();
        assert!(!receipt.content_hash.is_empty());
        assert_eq!(f.object_store.store_count(), 2, "chunks were not re-uploaded");
    }

    #[tokio::test]
    async fn inline_compensation_runs_when_enabled() {
        let config = OrchestratorConfig {
            compensate_inline: true,
            ..OrchestratorConfig::default()
        };
        let f = fixture(config);
        f.ledger.set_fail_on_store(true);

        f.saga.execute_store(command()).await.unwrap_err();

        let stored = f
            .store
            .find_by_request_id(TenantId::new(1), &RequestId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SagaStatus::Compensated);
        assert_eq!(f.object_store.object_count(), 0, "chunks were deleted inline");
        assert!(f.resources.rollback_count() >= 1);
    }

    #[tokio::test]
    async fn resumed_saga_adopts_late_resource_id() {
        let f = fixture(OrchestratorConfig::default());
        let mut cmd = command();
        cmd.resource_id = None;
        f.ledger.set_fail_on_store(true);
        f.saga.execute_store(cmd.clone()).await.unwrap_err();

        let mut stored = f
            .store
            .find_by_request_id(TenantId::new(1), &RequestId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        stored.status = SagaStatus::Running;
        f.store.seed_saga(stored).await;

        f.ledger.set_fail_on_store(false);
        let late_id = ResourceId::new();
        cmd.resource_id = Some(late_id);
        let receipt = f.saga.execute_store(cmd).await.unwrap();

        let stored = f.store.saga(receipt.saga_id).await.unwrap();
        assert_eq!(stored.resource_id, Some(late_id));
    }
}
