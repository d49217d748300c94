//! PostgreSQL-backed saga store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use common::{RequestId, ResourceId, SagaId, TenantId, UserId};

use crate::boundary::BookkeepingStore;
use crate::error::{Result, StoreError};
use crate::outbox::{NewOutboxEvent, OutboxEvent, OutboxRepository, OutboxStatus};
use crate::payload::SagaPayload;
use crate::processed::ProcessedMessageLedger;
use crate::record::SagaRecord;
use crate::repository::SagaRepository;
use crate::status::SagaStatus;
use crate::step::SagaStep;

/// PostgreSQL implementation of the saga repositories and the
/// bookkeeping boundary.
///
/// Every [`BookkeepingStore`] method begins its own transaction on the
/// pool and commits before returning, so bookkeeping never shares fate
/// with whatever transaction the caller may be inside.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<SagaRecord> {
        let step_raw: String = row.try_get("current_step")?;
        let current_step =
            SagaStep::parse(&step_raw).ok_or_else(|| StoreError::UnrecognizedValue {
                column: "current_step",
                value: step_raw.clone(),
            })?;

        let status_raw: String = row.try_get("status")?;
        let status =
            SagaStatus::parse(&status_raw).ok_or_else(|| StoreError::UnrecognizedValue {
                column: "status",
                value: status_raw.clone(),
            })?;

        let payload_json: serde_json::Value = row.try_get("payload")?;
        let payload = SagaPayload::from_json(Some(&payload_json))?;

        Ok(SagaRecord {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            request_id: RequestId::new(row.try_get::<String, _>("request_id")?),
            tenant_id: TenantId::new(row.try_get("tenant_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            resource_id: row
                .try_get::<Option<Uuid>, _>("resource_id")?
                .map(ResourceId::from_uuid),
            resource_name: row.try_get("resource_name")?,
            current_step,
            status,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            payload,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let status_raw: String = row.try_get("status")?;
        let status =
            OutboxStatus::parse(&status_raw).ok_or_else(|| StoreError::UnrecognizedValue {
                column: "status",
                value: status_raw.clone(),
            })?;

        Ok(OutboxEvent {
            id: row.try_get("id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status,
            attempt_count: row.try_get("attempt_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_saga_tx(tx: &mut Transaction<'_, Postgres>, saga: &SagaRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sagas (id, request_id, tenant_id, user_id, resource_id, resource_name,
                               current_step, status, retry_count, next_retry_at, payload,
                               last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.request_id.as_str())
        .bind(saga.tenant_id.as_i64())
        .bind(saga.user_id.as_i64())
        .bind(saga.resource_id.map(|r| r.as_uuid()))
        .bind(&saga.resource_name)
        .bind(saga.current_step.as_str())
        .bind(saga.status.as_str())
        .bind(saga.retry_count)
        .bind(saga.next_retry_at)
        .bind(saga.payload.to_json()?)
        .bind(&saga.last_error)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn update_saga_tx(tx: &mut Transaction<'_, Postgres>, saga: &SagaRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET resource_id = $2, current_step = $3, status = $4, retry_count = $5,
                next_retry_at = $6, payload = $7, last_error = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(saga.resource_id.map(|r| r.as_uuid()))
        .bind(saga.current_step.as_str())
        .bind(saga.status.as_str())
        .bind(saga.retry_count)
        .bind(saga.next_retry_at)
        .bind(saga.payload.to_json()?)
        .bind(&saga.last_error)
        .bind(saga.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SagaNotFound(saga.id));
        }
        Ok(())
    }

    async fn append_event_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: NewOutboxEvent,
    ) -> Result<Uuid> {
        let row = OutboxEvent::from_new(event);
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, payload,
                                       status, attempt_count, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(row.id)
        .bind(&row.aggregate_type)
        .bind(&row.aggregate_id)
        .bind(&row.event_type)
        .bind(&row.payload)
        .bind(row.status.as_str())
        .bind(row.attempt_count)
        .bind(row.next_attempt_at)
        .bind(row.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(row.id)
    }
}

#[async_trait]
impl SagaRepository for PostgresSagaStore {
    async fn find_by_id(&self, id: SagaId) -> Result<Option<SagaRecord>> {
        let row = sqlx::query("SELECT * FROM sagas WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn find_by_request_id(
        &self,
        tenant_id: TenantId,
        request_id: &RequestId,
    ) -> Result<Option<SagaRecord>> {
        let row = sqlx::query("SELECT * FROM sagas WHERE tenant_id = $1 AND request_id = $2")
            .bind(tenant_id.as_i64())
            .bind(request_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_saga).transpose()
    }

    async fn select_pending_compensation(
        &self,
        tenant_id: TenantId,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sagas
            WHERE tenant_id = $1
              AND (status = 'PENDING_COMPENSATION'
                   OR (status = 'COMPENSATING' AND updated_at < $2))
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(tenant_id.as_i64())
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sagas WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl BookkeepingStore for PostgresSagaStore {
    async fn insert_saga(&self, saga: &SagaRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_saga_tx(&mut tx, saga).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_saga(&self, saga: &SagaRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::update_saga_tx(&mut tx, saga).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn persist_payload(&self, saga_id: SagaId, payload: &SagaPayload) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE sagas SET payload = $2, updated_at = $3 WHERE id = $1")
            .bind(saga_id.as_uuid())
            .bind(payload.to_json()?)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SagaNotFound(saga_id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_saga_with_event(
        &self,
        saga: &SagaRecord,
        event: NewOutboxEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::update_saga_tx(&mut tx, saga).await?;
        Self::append_event_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PostgresSagaStore {
    async fn append_event(&self, event: NewOutboxEvent) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        let id = Self::append_event_tx(&mut tx, event).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn fetch_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_events
            WHERE status = 'PENDING'
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn mark_sent(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE outbox_events SET status = 'SENT' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_attempt_failed(&self, id: Uuid, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempt_count = attempt_count + 1, next_attempt_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_exhausted(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempt_count = attempt_count + 1, status = 'FAILED'
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune_sent_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'SENT' AND created_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProcessedMessageLedger for PostgresSagaStore {
    async fn mark_processed(&self, message_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (message_id, processed_at)
            VALUES ($1, $2)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&self, message_id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM processed_messages WHERE message_id = $1)")
                .bind(message_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_messages
            WHERE message_id IN (
                SELECT message_id FROM processed_messages
                WHERE processed_at < $1
                LIMIT $2
            )
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
