//! Orchestrator error types.

use common::RequestId;
use saga_store::StoreError;
use thiserror::Error;

/// Errors that can occur while driving or compensating a saga.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Object-store client error.
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Ledger client error.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// The ledger accepted the write but returned an unusable receipt.
    #[error("Invalid ledger receipt: {0}")]
    InvalidLedgerReceipt(String),

    /// Relational resource store error.
    #[error("Resource store error: {0}")]
    Resource(String),

    /// Tenant directory error.
    #[error("Tenant directory error: {0}")]
    TenantDirectory(String),

    /// Event sink (broker) error.
    #[error("Event publish error: {0}")]
    Publish(String),

    /// A request id was replayed for an operation that already settled.
    #[error("Duplicate request: {0}")]
    DuplicateRequest(RequestId),

    /// Saga bookkeeping error. This is the one class that must reach the
    /// caller: a lost status write is equivalent to losing the saga.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
