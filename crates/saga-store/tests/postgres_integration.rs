//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Each test gets a fresh pool and truncated tables, serialized with
//! `#[serial]` since they share one database.

use std::sync::Arc;

use serial_test::serial;

use chrono::{Duration, Utc};
use common::{RequestId, ResourceId, TenantId, UserId};
use saga_store::{
    BookkeepingStore, NewOutboxEvent, OutboxRepository, OutboxStatus, PostgresSagaStore,
    ProcessedMessageLedger, SagaRecord, SagaRepository, SagaStatus, SagaStep,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE sagas, outbox_events, processed_messages, scheduler_locks")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn new_saga(tenant: i64) -> SagaRecord {
    SagaRecord::new(
        RequestId::new(format!("req-{}", Uuid::new_v4())),
        TenantId::new(tenant),
        UserId::new(11),
        Some(ResourceId::new()),
        "archive.tar",
    )
}

#[tokio::test]
#[serial]
async fn insert_and_load_roundtrip() {
    let store = get_test_store().await;

    let mut saga = new_saga(1);
    saga.payload.stored_paths.insert("h1".into(), "p1".into());
    saga.advance_to(SagaStep::ObjectStoreUploaded);
    store.insert_saga(&saga).await.unwrap();

    let loaded = store.find_by_id(saga.id).await.unwrap().unwrap();
    assert_eq!(loaded.request_id, saga.request_id);
    assert_eq!(loaded.current_step, SagaStep::ObjectStoreUploaded);
    assert_eq!(loaded.status, SagaStatus::Running);
    assert_eq!(loaded.payload, saga.payload);
}

#[tokio::test]
#[serial]
async fn find_by_request_id_scopes_to_tenant() {
    let store = get_test_store().await;

    let saga = new_saga(1);
    store.insert_saga(&saga).await.unwrap();

    let found = store
        .find_by_request_id(saga.tenant_id, &saga.request_id)
        .await
        .unwrap();
    assert!(found.is_some());

    let other = store
        .find_by_request_id(TenantId::new(2), &saga.request_id)
        .await
        .unwrap();
    assert!(other.is_none());
}

#[tokio::test]
#[serial]
async fn bookkeeping_write_survives_callers_rollback() {
    let store = get_test_store().await;

    let mut saga = new_saga(1);
    store.insert_saga(&saga).await.unwrap();

    // Simulate a business transaction that will roll back after the
    // bookkeeping write has happened through its own connection.
    let mut business_tx = store.pool().begin().await.unwrap();
    sqlx::query("UPDATE sagas SET resource_name = 'doomed' WHERE id = $1")
        .bind(saga.id.as_uuid())
        .execute(&mut *business_tx)
        .await
        .unwrap();

    saga.transition_to(SagaStatus::PendingCompensation).unwrap();
    store.update_saga(&saga).await.unwrap();

    business_tx.rollback().await.unwrap();

    let loaded = store.find_by_id(saga.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SagaStatus::PendingCompensation);
    assert_eq!(loaded.resource_name, "archive.tar");
}

#[tokio::test]
#[serial]
async fn update_saga_with_event_commits_both_or_neither() {
    let store = get_test_store().await;

    let mut saga = new_saga(1);
    store.insert_saga(&saga).await.unwrap();

    saga.transition_to(SagaStatus::PendingCompensation).unwrap();
    saga.transition_to(SagaStatus::Failed).unwrap();
    store
        .update_saga_with_event(
            &saga,
            NewOutboxEvent::new(
                "SAGA_DEAD_LETTER",
                saga.id.to_string(),
                "saga.compensation.failed",
                serde_json::json!({"requestId": saga.request_id}),
            ),
        )
        .await
        .unwrap();

    let loaded = store.find_by_id(saga.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SagaStatus::Failed);

    let events = store.fetch_pending(Utc::now(), 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "saga.compensation.failed");

    // And the failing case: a saga that was never inserted writes nothing.
    let ghost = new_saga(1);
    let result = store
        .update_saga_with_event(
            &ghost,
            NewOutboxEvent::new("SAGA_DEAD_LETTER", "x", "saga.compensation.failed", serde_json::json!({})),
        )
        .await;
    assert!(result.is_err());
    let events = store.fetch_pending(Utc::now(), 10).await.unwrap();
    assert_eq!(events.len(), 1, "no event without its cause");
}

#[tokio::test]
#[serial]
async fn pending_compensation_selection() {
    let store = get_test_store().await;

    let mut due = new_saga(1);
    due.transition_to(SagaStatus::PendingCompensation).unwrap();
    store.insert_saga(&due).await.unwrap();

    let mut stale = new_saga(1);
    stale.transition_to(SagaStatus::PendingCompensation).unwrap();
    stale.transition_to(SagaStatus::Compensating).unwrap();
    stale.updated_at = Utc::now() - Duration::hours(2);
    store.insert_saga(&stale).await.unwrap();

    let mut live = new_saga(1);
    live.transition_to(SagaStatus::PendingCompensation).unwrap();
    live.transition_to(SagaStatus::Compensating).unwrap();
    store.insert_saga(&live).await.unwrap();

    let mut other_tenant = new_saga(2);
    other_tenant
        .transition_to(SagaStatus::PendingCompensation)
        .unwrap();
    store.insert_saga(&other_tenant).await.unwrap();

    let stale_before = Utc::now() - Duration::minutes(15);
    let selected = store
        .select_pending_compensation(TenantId::new(1), 50, stale_before)
        .await
        .unwrap();

    let ids: Vec<_> = selected.iter().map(|s| s.id).collect();
    assert!(ids.contains(&due.id));
    assert!(ids.contains(&stale.id));
    assert!(!ids.contains(&live.id));
    assert!(!ids.contains(&other_tenant.id));
}

#[tokio::test]
#[serial]
async fn outbox_lifecycle() {
    let store = get_test_store().await;

    let id = store
        .append_event(NewOutboxEvent::new(
            "FILE",
            "r1",
            "file.stored",
            serde_json::json!({"hash": "h1"}),
        ))
        .await
        .unwrap();

    let pending = store.fetch_pending(Utc::now(), 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);

    // A failed attempt pushes the event into the future.
    store
        .mark_attempt_failed(id, Utc::now() + Duration::seconds(30))
        .await
        .unwrap();
    assert!(store.fetch_pending(Utc::now(), 10).await.unwrap().is_empty());
    let later = store
        .fetch_pending(Utc::now() + Duration::seconds(31), 10)
        .await
        .unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].attempt_count, 1);

    store.mark_sent(id).await.unwrap();
    assert!(store.fetch_pending(Utc::now() + Duration::hours(1), 10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn outbox_retention_prunes_only_old_sent() {
    let store = get_test_store().await;

    let sent_old = store
        .append_event(NewOutboxEvent::new("FILE", "a", "file.stored", serde_json::json!({})))
        .await
        .unwrap();
    store.mark_sent(sent_old).await.unwrap();
    sqlx::query("UPDATE outbox_events SET created_at = $2 WHERE id = $1")
        .bind(sent_old)
        .bind(Utc::now() - Duration::days(30))
        .execute(store.pool())
        .await
        .unwrap();

    let sent_recent = store
        .append_event(NewOutboxEvent::new("FILE", "b", "file.stored", serde_json::json!({})))
        .await
        .unwrap();
    store.mark_sent(sent_recent).await.unwrap();

    let pending_old = store
        .append_event(NewOutboxEvent::new("FILE", "c", "file.stored", serde_json::json!({})))
        .await
        .unwrap();
    sqlx::query("UPDATE outbox_events SET created_at = $2 WHERE id = $1")
        .bind(pending_old)
        .bind(Utc::now() - Duration::days(30))
        .execute(store.pool())
        .await
        .unwrap();

    let removed = store
        .prune_sent_before(Utc::now() - Duration::days(7), 100)
        .await
        .unwrap();
    assert_eq!(removed, 1);

    // Pending rows are never pruned, regardless of age.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE status = 'PENDING'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn processed_ledger_dedup_and_prune() {
    let store = get_test_store().await;
    let message = Uuid::new_v4();

    assert!(store.mark_processed(message).await.unwrap());
    assert!(!store.mark_processed(message).await.unwrap());
    assert!(store.is_processed(message).await.unwrap());

    sqlx::query("UPDATE processed_messages SET processed_at = $2 WHERE message_id = $1")
        .bind(message)
        .bind(Utc::now() - Duration::days(30))
        .execute(store.pool())
        .await
        .unwrap();

    let removed = store
        .prune_before(Utc::now() - Duration::days(14), 100)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(!store.is_processed(message).await.unwrap());
}

#[tokio::test]
#[serial]
async fn exhausted_event_leaves_pending_queue() {
    let store = get_test_store().await;

    let id = store
        .append_event(NewOutboxEvent::new("FILE", "r1", "file.stored", serde_json::json!({})))
        .await
        .unwrap();
    store.mark_exhausted(id).await.unwrap();

    assert!(store.fetch_pending(Utc::now(), 10).await.unwrap().is_empty());
    let status: String = sqlx::query_scalar("SELECT status FROM outbox_events WHERE id = $1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(status, OutboxStatus::Failed.as_str());
}
