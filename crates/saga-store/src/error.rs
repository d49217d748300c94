use thiserror::Error;

use common::SagaId;

use crate::status::SagaStatus;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested status change is not in the transition table.
    #[error("Illegal saga status transition for {saga_id}: {from} -> {to}")]
    IllegalTransition {
        saga_id: SagaId,
        from: SagaStatus,
        to: SagaStatus,
    },

    /// The saga row was not found.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A stored enum column held a value this build does not know.
    #[error("Unrecognized stored value in column {column}: {value}")]
    UnrecognizedValue { column: &'static str, value: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
