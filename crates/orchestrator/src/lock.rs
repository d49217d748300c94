//! Distributed, lease-based mutual exclusion for scheduled jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Lock key guarding the compensation sweep.
pub const LOCK_COMPENSATION_SWEEP: &str = "saga:compensation:retry";

/// Lock key guarding the retention jobs.
pub const LOCK_RETENTION: &str = "platform:retention";

/// A lease-based lock shared across process instances.
///
/// Acquisition failure means another instance holds the lease; the local
/// attempt must skip its cycle, never block. The lease expiring on its own
/// is the backstop against a holder that crashed without releasing.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// RAII guard; the lock is released when the guard is dropped.
    type Guard: Send + Sync;

    /// Tries to take the lease. Returns `None` when it is already held.
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<Self::Guard>>;
}

/// Runs `f` under the named lock, releasing on every exit path.
///
/// Returns `Ok(None)` when the lock is held elsewhere and the closure was
/// not run. The guard is dropped (and so the lock released) even when the
/// closure's future panics, because the guard lives on this stack frame.
pub async fn with_lock<P, F, Fut, T>(
    provider: &P,
    key: &str,
    lease: Duration,
    f: F,
) -> Result<Option<T>>
where
    P: LockProvider,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    match provider.try_acquire(key, lease).await? {
        Some(guard) => {
            let out = f().await;
            drop(guard);
            Ok(Some(out))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
struct InMemoryLockState {
    held: HashMap<String, (Uuid, DateTime<Utc>)>,
}

/// In-memory lock provider for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockProvider {
    state: Arc<Mutex<InMemoryLockState>>,
}

impl InMemoryLockProvider {
    /// Creates a new in-memory lock provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the key is currently leased.
    pub fn is_held(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .held
            .get(key)
            .is_some_and(|(_, expires)| *expires > Utc::now())
    }
}

/// Guard for [`InMemoryLockProvider`]; releases the lease on drop.
pub struct InMemoryLockGuard {
    state: Arc<Mutex<InMemoryLockState>>,
    key: String,
    holder: Uuid,
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        // Only release a lease we still own; an expired lease may have
        // been re-acquired by someone else.
        if state
            .held
            .get(&self.key)
            .is_some_and(|(holder, _)| *holder == self.holder)
        {
            state.held.remove(&self.key);
        }
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    type Guard = InMemoryLockGuard;

    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<Self::Guard>> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some((_, expires)) = state.held.get(key)
            && *expires > now
        {
            return Ok(None);
        }

        let holder = Uuid::new_v4();
        state.held.insert(key.to_string(), (holder, now + lease));
        Ok(Some(InMemoryLockGuard {
            state: Arc::clone(&self.state),
            key: key.to_string(),
            holder,
        }))
    }
}

/// Lock provider backed by the `scheduler_locks` table.
///
/// The lease is taken with a single conflict-aware upsert, so exactly one
/// instance wins per lease window regardless of how many race.
#[derive(Clone)]
pub struct PostgresLockProvider {
    pool: PgPool,
}

impl PostgresLockProvider {
    /// Creates a new Postgres-backed lock provider.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Guard for [`PostgresLockProvider`].
///
/// Dropping the guard releases the row best-effort from a spawned task;
/// if the process dies before that runs, the lease expiry releases it.
pub struct PostgresLockGuard {
    pool: PgPool,
    key: String,
    holder: Uuid,
}

impl PostgresLockGuard {
    /// Releases the lease explicitly, reporting errors to the caller.
    pub async fn release(self) -> Result<()> {
        let result = sqlx::query("DELETE FROM scheduler_locks WHERE lock_key = $1 AND holder = $2")
            .bind(&self.key)
            .bind(self.holder)
            .execute(&self.pool)
            .await;
        std::mem::forget(self);
        result
            .map(|_| ())
            .map_err(|e| OrchestratorError::Store(saga_store::StoreError::Database(e)))
    }
}

impl Drop for PostgresLockGuard {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let key = std::mem::take(&mut self.key);
        let holder = self.holder;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) =
                    sqlx::query("DELETE FROM scheduler_locks WHERE lock_key = $1 AND holder = $2")
                        .bind(&key)
                        .bind(holder)
                        .execute(&pool)
                        .await
                {
                    tracing::warn!(%key, %error, "failed to release scheduler lock; lease will expire");
                }
            });
        }
    }
}

#[async_trait]
impl LockProvider for PostgresLockProvider {
    type Guard = PostgresLockGuard;

    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<Self::Guard>> {
        let holder = Uuid::new_v4();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_locks (lock_key, holder, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO UPDATE
            SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
            WHERE scheduler_locks.expires_at <= $4
            "#,
        )
        .bind(key)
        .bind(holder)
        .bind(now + lease)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::Store(saga_store::StoreError::Database(e)))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(PostgresLockGuard {
            pool: self.pool.clone(),
            key: key.to_string(),
            holder,
        }))
    }
}
