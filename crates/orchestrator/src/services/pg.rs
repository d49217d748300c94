//! Postgres-backed implementations of the platform-owned collaborators.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row;

use common::{ResourceId, TenantId};

use crate::error::OrchestratorError;
use crate::services::resource::ResourceStore;
use crate::services::tenants::TenantDirectory;

/// Resource store over the platform's `resources` table.
#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn mark_rolled_back(&self, resource_id: ResourceId) -> Result<u64, OrchestratorError> {
        let result = sqlx::query(
            r#"
            UPDATE resources
            SET status = 'ROLLED_BACK', updated_at = NOW()
            WHERE id = $1 AND status <> 'ROLLED_BACK'
            "#,
        )
        .bind(resource_id.as_uuid())
        .execute(&self.pool)
        .await
        // A resource variant, not a store one: this failure is retriable
        // and must reschedule the saga instead of aborting the attempt.
        .map_err(|e| OrchestratorError::Resource(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// Tenant directory over the platform's `tenants` table.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn list_active_tenant_ids(&self) -> Result<Vec<TenantId>, OrchestratorError> {
        let rows = sqlx::query("SELECT id FROM tenants WHERE active ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrchestratorError::TenantDirectory(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| TenantId::new(row.get::<i64, _>("id")))
            .collect())
    }
}
