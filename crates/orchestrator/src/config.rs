//! Orchestrator configuration loaded from environment variables.

use chrono::Duration;

/// Tunables for compensation, the sweep, the publisher and retention.
///
/// Reads from environment variables, falling back to defaults:
/// - `SAGA_COMPENSATION_MAX_RETRIES` — retry ceiling (default: `5`)
/// - `SAGA_COMPENSATION_BATCH_SIZE` — sagas per tenant per sweep (default: `50`)
/// - `SAGA_COMPENSATION_BACKOFF_BASE_SECS` — backoff base (default: `30`)
/// - `SAGA_COMPENSATION_STALE_AFTER_SECS` — how long a `COMPENSATING` row
///   may sit untouched before the sweep re-adopts it (default: `900`)
/// - `SAGA_COMPENSATE_INLINE` — compensate synchronously on step failure
///   instead of waiting for the sweep (default: `false`)
/// - `SAGA_DEAD_LETTER_ENABLED` — emit dead letters at the ceiling (default: `true`)
/// - `SAGA_SWEEP_LOCK_LEASE_SECS` — sweep lock lease (default: `300`)
/// - `OUTBOX_PUBLISH_BATCH_SIZE` — events per publisher cycle (default: `100`)
/// - `OUTBOX_PUBLISH_MAX_RETRIES` — publish attempts per event (default: `5`)
/// - `OUTBOX_RETENTION_DAYS` — sent-event retention (default: `7`)
/// - `PROCESSED_RETENTION_DAYS` — idempotency-ledger retention (default: `14`)
/// - `RETENTION_BATCH_SIZE` — rows pruned per retention cycle (default: `500`)
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_retries: i32,
    pub batch_size: i64,
    pub backoff_base: Duration,
    pub compensating_stale_after: Duration,
    pub compensate_inline: bool,
    pub dead_letter_enabled: bool,
    pub sweep_lock_lease: Duration,
    pub publish_batch_size: i64,
    pub publish_max_retries: i32,
    pub outbox_retention: Duration,
    pub processed_retention: Duration,
    pub retention_batch_size: i64,
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl OrchestratorConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            max_retries: env_i64("SAGA_COMPENSATION_MAX_RETRIES", 5) as i32,
            batch_size: env_i64("SAGA_COMPENSATION_BATCH_SIZE", 50),
            backoff_base: Duration::seconds(env_i64("SAGA_COMPENSATION_BACKOFF_BASE_SECS", 30)),
            compensating_stale_after: Duration::seconds(env_i64(
                "SAGA_COMPENSATION_STALE_AFTER_SECS",
                900,
            )),
            compensate_inline: env_bool("SAGA_COMPENSATE_INLINE", false),
            dead_letter_enabled: env_bool("SAGA_DEAD_LETTER_ENABLED", true),
            sweep_lock_lease: Duration::seconds(env_i64("SAGA_SWEEP_LOCK_LEASE_SECS", 300)),
            publish_batch_size: env_i64("OUTBOX_PUBLISH_BATCH_SIZE", 100),
            publish_max_retries: env_i64("OUTBOX_PUBLISH_MAX_RETRIES", 5) as i32,
            outbox_retention: Duration::days(env_i64("OUTBOX_RETENTION_DAYS", 7)),
            processed_retention: Duration::days(env_i64("PROCESSED_RETENTION_DAYS", 14)),
            retention_batch_size: env_i64("RETENTION_BATCH_SIZE", 500),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            batch_size: 50,
            backoff_base: Duration::seconds(30),
            compensating_stale_after: Duration::seconds(900),
            compensate_inline: false,
            dead_letter_enabled: true,
            sweep_lock_lease: Duration::seconds(300),
            publish_batch_size: 100,
            publish_max_retries: 5,
            outbox_retention: Duration::days(7),
            processed_retention: Duration::days(14),
            retention_batch_size: 500,
        }
    }
}
