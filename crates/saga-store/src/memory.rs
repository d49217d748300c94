//! In-memory saga store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use common::{RequestId, SagaId, TenantId};

use crate::boundary::BookkeepingStore;
use crate::error::{Result, StoreError};
use crate::outbox::{NewOutboxEvent, OutboxEvent, OutboxRepository, OutboxStatus};
use crate::payload::SagaPayload;
use crate::processed::ProcessedMessageLedger;
use crate::record::SagaRecord;
use crate::repository::SagaRepository;
use crate::status::SagaStatus;

#[derive(Default)]
struct State {
    sagas: HashMap<SagaId, SagaRecord>,
    events: Vec<OutboxEvent>,
    processed: HashSet<Uuid>,
    processed_at: HashMap<Uuid, DateTime<Utc>>,
    fail_pending_query_for: HashSet<TenantId>,
    fail_bookkeeping: bool,
}

/// In-memory implementation of every store trait.
///
/// Provides the same surface as the PostgreSQL implementation. Each
/// bookkeeping method applies atomically under one lock, mirroring the
/// independent-transaction contract.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures `select_pending_compensation` to fail for one tenant.
    pub async fn set_fail_pending_query_for(&self, tenant_id: TenantId) {
        self.state
            .write()
            .await
            .fail_pending_query_for
            .insert(tenant_id);
    }

    /// Configures all bookkeeping writes to fail.
    pub async fn set_fail_bookkeeping(&self, fail: bool) {
        self.state.write().await.fail_bookkeeping = fail;
    }

    /// Returns a saga by ID, for assertions.
    pub async fn saga(&self, id: SagaId) -> Option<SagaRecord> {
        self.state.read().await.sagas.get(&id).cloned()
    }

    /// Returns all outbox events, for assertions.
    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.state.read().await.events.clone()
    }

    /// Returns outbox events of one type, for assertions.
    pub async fn events_of_type(&self, event_type: &str) -> Vec<OutboxEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Seeds a saga row directly, for tests that start mid-lifecycle.
    pub async fn seed_saga(&self, saga: SagaRecord) {
        self.state.write().await.sagas.insert(saga.id, saga);
    }

    /// Seeds an outbox event directly.
    pub async fn seed_event(&self, event: OutboxEvent) {
        self.state.write().await.events.push(event);
    }

    fn bookkeeping_guard(state: &State) -> Result<()> {
        if state.fail_bookkeeping {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaStore {
    async fn find_by_id(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        Ok(self.state.read().await.sagas.get(&id).cloned())
    }

    async fn find_by_request_id(
        &self,
        tenant_id: TenantId,
        request_id: &RequestId,
    ) -> Result<Option<SagaRecord>> {
        Ok(self
            .state
            .read()
            .await
            .sagas
            .values()
            .find(|s| s.tenant_id == tenant_id && &s.request_id == request_id)
            .cloned())
    }

    async fn select_pending_compensation(
        &self,
        tenant_id: TenantId,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>> {
        let state = self.state.read().await;
        if state.fail_pending_query_for.contains(&tenant_id) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut due: Vec<SagaRecord> = state
            .sagas
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .filter(|s| {
                s.status == SagaStatus::PendingCompensation
                    || (s.status == SagaStatus::Compensating && s.updated_at < stale_before)
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .sagas
            .values()
            .filter(|s| s.status == status)
            .count() as i64)
    }
}

#[async_trait]
impl BookkeepingStore for InMemorySagaStore {
    async fn insert_saga(&self, saga: &SagaRecord) -> Result<()> {
        let mut state = self.state.write().await;
        Self::bookkeeping_guard(&state)?;
        state.sagas.insert(saga.id, saga.clone());
        Ok(())
    }

    async fn update_saga(&self, saga: &SagaRecord) -> Result<()> {
        let mut state = self.state.write().await;
        Self::bookkeeping_guard(&state)?;
        if !state.sagas.contains_key(&saga.id) {
            return Err(StoreError::SagaNotFound(saga.id));
        }
        state.sagas.insert(saga.id, saga.clone());
        Ok(())
    }

    async fn persist_payload(&self, saga_id: SagaId, payload: &SagaPayload) -> Result<()> {
        let mut state = self.state.write().await;
        Self::bookkeeping_guard(&state)?;
        let saga = state
            .sagas
            .get_mut(&saga_id)
            .ok_or(StoreError::SagaNotFound(saga_id))?;
        saga.payload = payload.clone();
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn update_saga_with_event(
        &self,
        saga: &SagaRecord,
        event: NewOutboxEvent,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        Self::bookkeeping_guard(&state)?;
        if !state.sagas.contains_key(&saga.id) {
            return Err(StoreError::SagaNotFound(saga.id));
        }
        // Single lock scope stands in for the single transaction.
        state.sagas.insert(saga.id, saga.clone());
        state.events.push(OutboxEvent::from_new(event));
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for InMemorySagaStore {
    async fn append_event(&self, event: NewOutboxEvent) -> Result<Uuid> {
        let row = OutboxEvent::from_new(event);
        let id = row.id;
        self.state.write().await.events.push(row);
        Ok(id)
    }

    async fn fetch_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>> {
        let state = self.state.read().await;
        let mut due: Vec<OutboxEvent> = state
            .events
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .filter(|e| e.next_attempt_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.status = OutboxStatus::Sent;
        }
        Ok(())
    }

    async fn mark_attempt_failed(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.attempt_count += 1;
            event.next_attempt_at = Some(next_attempt_at);
        }
        Ok(())
    }

    async fn mark_exhausted(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.attempt_count += 1;
            event.status = OutboxStatus::Failed;
        }
        Ok(())
    }

    async fn prune_sent_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut removed = 0u64;
        state.events.retain(|e| {
            let prune =
                e.status == OutboxStatus::Sent && e.created_at < cutoff && removed < limit as u64;
            if prune {
                removed += 1;
            }
            !prune
        });
        Ok(removed)
    }
}

#[async_trait]
impl ProcessedMessageLedger for InMemorySagaStore {
    async fn mark_processed(&self, message_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let inserted = state.processed.insert(message_id);
        if inserted {
            state.processed_at.insert(message_id, Utc::now());
        }
        Ok(inserted)
    }

    async fn is_processed(&self, message_id: Uuid) -> Result<bool> {
        Ok(self.state.read().await.processed.contains(&message_id))
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let mut state = self.state.write().await;
        let expired: Vec<Uuid> = state
            .processed_at
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(id, _)| *id)
            .take(limit as usize)
            .collect();
        for id in &expired {
            state.processed.remove(id);
            state.processed_at.remove(id);
        }
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ResourceId, UserId};

    fn saga(tenant: i64) -> SagaRecord {
        SagaRecord::new(
            RequestId::new(format!("req-{}", Uuid::new_v4())),
            TenantId::new(tenant),
            UserId::new(1),
            Some(ResourceId::new()),
            "f.bin",
        )
    }

    #[tokio::test]
    async fn insert_and_find_by_request_id() {
        let store = InMemorySagaStore::new();
        let record = saga(1);
        store.insert_saga(&record).await.unwrap();

        let found = store
            .find_by_request_id(record.tenant_id, &record.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);

        let other_tenant = store
            .find_by_request_id(TenantId::new(2), &record.request_id)
            .await
            .unwrap();
        assert!(other_tenant.is_none());
    }

    #[tokio::test]
    async fn pending_compensation_selection_includes_stale_compensating() {
        let store = InMemorySagaStore::new();

        let mut pending = saga(1);
        pending.status = SagaStatus::PendingCompensation;
        store.seed_saga(pending.clone()).await;

        let mut stale = saga(1);
        stale.status = SagaStatus::Compensating;
        stale.updated_at = Utc::now() - chrono::Duration::hours(1);
        store.seed_saga(stale.clone()).await;

        let mut live = saga(1);
        live.status = SagaStatus::Compensating;
        store.seed_saga(live.clone()).await;

        let stale_before = Utc::now() - chrono::Duration::minutes(15);
        let due = store
            .select_pending_compensation(TenantId::new(1), 10, stale_before)
            .await
            .unwrap();

        let ids: Vec<SagaId> = due.iter().map(|s| s.id).collect();
        assert!(ids.contains(&pending.id));
        assert!(ids.contains(&stale.id), "stale COMPENSATING is re-eligible");
        assert!(!ids.contains(&live.id), "live COMPENSATING is not");
    }

    #[tokio::test]
    async fn update_saga_with_event_is_atomic() {
        let store = InMemorySagaStore::new();
        let mut record = saga(1);
        store.insert_saga(&record).await.unwrap();

        record.transition_to(SagaStatus::Succeeded).unwrap();
        store
            .update_saga_with_event(
                &record,
                NewOutboxEvent::new("FILE", "r1", "file.stored", serde_json::json!({})),
            )
            .await
            .unwrap();

        assert_eq!(
            store.saga(record.id).await.unwrap().status,
            SagaStatus::Succeeded
        );
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn processed_ledger_dedups() {
        let store = InMemorySagaStore::new();
        let id = Uuid::new_v4();
        assert!(store.mark_processed(id).await.unwrap());
        assert!(!store.mark_processed(id).await.unwrap());
        assert!(store.is_processed(id).await.unwrap());
    }

    #[tokio::test]
    async fn bookkeeping_failure_propagates() {
        let store = InMemorySagaStore::new();
        let record = saga(1);
        store.set_fail_bookkeeping(true).await;
        assert!(store.insert_saga(&record).await.is_err());
    }
}
