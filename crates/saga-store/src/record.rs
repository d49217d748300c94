//! The durable saga record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{RequestId, ResourceId, SagaId, TenantId, UserId};

use crate::error::{Result, StoreError};
use crate::payload::SagaPayload;
use crate::status::{SagaStatus, can_transition};
use crate::step::SagaStep;

/// Exponent cap for retry backoff. With the default 30s base this bounds
/// the delay at roughly 8.5 hours.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

/// One row per logical multi-step operation.
///
/// The row is the single source of truth for the operation's progress:
/// `current_step` records how far the forward path got (monotonic,
/// independent of `status`), `status` records where the saga is in its
/// lifecycle, and `payload` carries what compensation needs to undo the
/// work. Terminal rows are never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub resource_id: Option<ResourceId>,
    pub resource_name: String,
    pub current_step: SagaStep,
    pub status: SagaStatus,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub payload: SagaPayload,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    /// Creates a fresh record for a newly triggered operation.
    pub fn new(
        request_id: RequestId,
        tenant_id: TenantId,
        user_id: UserId,
        resource_id: Option<ResourceId>,
        resource_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SagaId::new(),
            request_id,
            tenant_id,
            user_id,
            resource_id,
            resource_name: resource_name.into(),
            current_step: SagaStep::Pending,
            status: SagaStatus::Running,
            retry_count: 0,
            next_retry_at: None,
            payload: SagaPayload::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the saga has reached `step` (ordinal comparison).
    pub fn reached_step(&self, step: SagaStep) -> bool {
        self.current_step.reached(step)
    }

    /// Advances `current_step` to `step`. Monotonic: a step at or below
    /// the current one is ignored, so resumed sagas never move backward.
    pub fn advance_to(&mut self, step: SagaStep) -> &mut Self {
        if step.ordinal() > self.current_step.ordinal() {
            self.current_step = step;
            self.updated_at = Utc::now();
        }
        self
    }

    /// Moves the saga to `status`, rejecting transitions outside the
    /// table. The rejection is what stops a concurrent duplicate sweep
    /// from re-driving a saga another worker already converged.
    pub fn transition_to(&mut self, status: SagaStatus) -> Result<&mut Self> {
        if !can_transition(self.status, status) {
            return Err(StoreError::IllegalTransition {
                saga_id: self.id,
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// Returns true if the saga is eligible for a compensation attempt now.
    /// A missing `next_retry_at` means "eligible immediately".
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_retry_at {
            None => true,
            Some(at) => at <= now,
        }
    }

    /// Records the failure that put this saga on the compensation path.
    pub fn record_error(&mut self, error: &dyn std::fmt::Display) -> &mut Self {
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
        self
    }

    /// Increments the retry counter and computes the next attempt time
    /// using exponential backoff: `base * 2^min(retry_count, cap)`.
    pub fn schedule_next_retry(&mut self, base: Duration, now: DateTime<Utc>) -> &mut Self {
        self.retry_count += 1;
        let exponent = (self.retry_count as u32).min(MAX_BACKOFF_EXPONENT);
        self.next_retry_at = Some(now + base * 2i32.pow(exponent));
        self.updated_at = Utc::now();
        self
    }

    /// Returns true once the retry counter has hit the configured ceiling.
    pub fn is_max_retries_exceeded(&self, max_retries: i32) -> bool {
        self.retry_count >= max_retries
    }
}
