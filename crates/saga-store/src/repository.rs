//! Saga row queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{RequestId, SagaId, TenantId};

use crate::error::Result;
use crate::record::SagaRecord;
use crate::status::SagaStatus;

/// Read-side queries over saga rows.
///
/// Mutation does not live here: all writes go through
/// [`crate::boundary::BookkeepingStore`] so they always run in their own
/// transaction.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Loads a saga by its identity.
    async fn find_by_id(&self, id: SagaId) -> Result<Option<SagaRecord>>;

    /// Loads the saga created for a caller request, if any. Used by the
    /// forward driver to resume or reject duplicate requests.
    async fn find_by_request_id(
        &self,
        tenant_id: TenantId,
        request_id: &RequestId,
    ) -> Result<Option<SagaRecord>>;

    /// Selects sagas owing compensation for one tenant, batch-limited.
    ///
    /// Returns rows in `PENDING_COMPENSATION`, plus `COMPENSATING` rows
    /// not touched since `stale_before`. The latter belonged to a worker
    /// that crashed mid-compensation and are safe to adopt.
    async fn select_pending_compensation(
        &self,
        tenant_id: TenantId,
        limit: i64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>>;

    /// Counts sagas currently in `status`, across tenants. Feeds gauges.
    async fn count_by_status(&self, status: SagaStatus) -> Result<i64>;
}
