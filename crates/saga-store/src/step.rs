//! Ordered saga steps.

use serde::{Deserialize, Serialize};

/// The steps of the file-store saga, in execution order.
///
/// Steps only ever advance; "has this saga reached step X" is answered by
/// comparing ordinals, never by equality, because a saga that moved past a
/// step still remembers having reached it. Compensation reads this to know
/// which side effects exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStep {
    /// Saga row created, no physical write attempted yet.
    #[default]
    Pending,

    /// Object-store uploads in flight.
    ObjectStoreUploading,

    /// All chunks durably written to the object store.
    ObjectStoreUploaded,

    /// Ledger write in flight.
    LedgerStoring,

    /// All steps done.
    Completed,
}

impl SagaStep {
    /// Position of the step in the execution order.
    pub fn ordinal(&self) -> u8 {
        match self {
            SagaStep::Pending => 0,
            SagaStep::ObjectStoreUploading => 1,
            SagaStep::ObjectStoreUploaded => 2,
            SagaStep::LedgerStoring => 3,
            SagaStep::Completed => 4,
        }
    }

    /// Returns true if this step is at or past `other` in execution order.
    pub fn reached(&self, other: SagaStep) -> bool {
        self.ordinal() >= other.ordinal()
    }

    /// Returns the step name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Pending => "PENDING",
            SagaStep::ObjectStoreUploading => "OBJECT_STORE_UPLOADING",
            SagaStep::ObjectStoreUploaded => "OBJECT_STORE_UPLOADED",
            SagaStep::LedgerStoring => "LEDGER_STORING",
            SagaStep::Completed => "COMPLETED",
        }
    }

    /// Parses a step from its stored string form.
    pub fn parse(s: &str) -> Option<SagaStep> {
        match s {
            "PENDING" => Some(SagaStep::Pending),
            "OBJECT_STORE_UPLOADING" => Some(SagaStep::ObjectStoreUploading),
            "OBJECT_STORE_UPLOADED" => Some(SagaStep::ObjectStoreUploaded),
            "LEDGER_STORING" => Some(SagaStep::LedgerStoring),
            "COMPLETED" => Some(SagaStep::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
