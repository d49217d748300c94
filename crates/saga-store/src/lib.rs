//! Durable state for the saga orchestration engine.
//!
//! This crate owns everything that must survive a process crash: the saga
//! record itself, the outbox of not-yet-published events, and the
//! processed-message ledger used for idempotent consumption. All mutation
//! goes through the [`BookkeepingStore`] boundary, which runs each write in
//! a transaction independent of whatever the caller is doing.

pub mod boundary;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod payload;
pub mod postgres;
pub mod processed;
pub mod record;
pub mod repository;
pub mod status;
pub mod step;

pub use boundary::BookkeepingStore;
pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use outbox::{
    AGGREGATE_FILE, AGGREGATE_SAGA_DEAD_LETTER, EVENT_COMPENSATION_FAILED, EVENT_FILE_STORED,
    NewOutboxEvent, OutboxEvent, OutboxRepository, OutboxStatus,
};
pub use payload::{COMP_STEP_DB_ROLLBACK, COMP_STEP_LEDGER, COMP_STEP_OBJECT_STORE, SagaPayload};
pub use postgres::PostgresSagaStore;
pub use processed::ProcessedMessageLedger;
pub use record::SagaRecord;
pub use repository::SagaRepository;
pub use status::SagaStatus;
pub use step::SagaStep;
