//! Saga orchestration for the multi-tenant storage platform.
//!
//! The forward path ([`FileStoreSaga`]) stores a file's chunks in the
//! object store and anchors them in the ledger, journaling progress
//! through the bookkeeping boundary. When a step fails the saga is left
//! owing compensation, and the scheduled sweep ([`CompensationSweep`])
//! drives it to `COMPENSATED` or, past the retry ceiling, to `FAILED`
//! with a dead-letter event. Outbox events are drained by the
//! [`OutboxPublisher`] and consumed effectively-once via [`apply_once`].

pub mod compensation;
pub mod config;
pub mod consumer;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod publisher;
pub mod retention;
pub mod services;
pub mod store_saga;
pub mod sweep;

pub use compensation::{CompensationOrchestrator, CompensationOutcome};
pub use config::OrchestratorConfig;
pub use consumer::apply_once;
pub use error::{OrchestratorError, Result};
pub use lock::{
    InMemoryLockProvider, LOCK_COMPENSATION_SWEEP, LOCK_RETENTION, LockProvider,
    PostgresLockProvider, with_lock,
};
pub use publisher::{OutboxPublisher, PublishReport};
pub use retention::{RetentionJob, RetentionReport};
pub use store_saga::{FileChunk, FileStoreSaga, StoreFileCommand, StoreReceipt};
pub use sweep::{CompensationSweep, SweepOutcome, SweepReport};
