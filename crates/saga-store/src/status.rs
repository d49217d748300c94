//! Saga status state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Running ──┬──► Succeeded
///           └──► PendingCompensation ──► Compensating ──┬──► Compensated
///                        ▲    │                ▲  │     │
///                        └────┼────────────────┘  └─────┤ (stale re-pickup)
///                             └──► Failed ◄─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Forward steps are being executed.
    #[default]
    Running,

    /// All steps completed without error (terminal).
    Succeeded,

    /// A step failed; compensation is owed but not currently running.
    PendingCompensation,

    /// A worker is actively undoing partially-applied work.
    Compensating,

    /// All required compensating actions applied (terminal).
    Compensated,

    /// Compensation retries exhausted (terminal, operator attention).
    Failed,
}

/// The legal status transitions, as data.
///
/// `Running → Compensating` covers the inline-compensation policy where the
/// failing caller compensates synchronously instead of leaving the row for
/// the sweep. `Compensating → Compensating` lets a sweep re-adopt a row whose
/// previous worker crashed mid-compensation (staleness pickup).
const TRANSITIONS: &[(SagaStatus, SagaStatus)] = &[
    (SagaStatus::Running, SagaStatus::Succeeded),
    (SagaStatus::Running, SagaStatus::PendingCompensation),
    (SagaStatus::Running, SagaStatus::Compensating),
    (SagaStatus::PendingCompensation, SagaStatus::Compensating),
    (SagaStatus::PendingCompensation, SagaStatus::Failed),
    (SagaStatus::Compensating, SagaStatus::Compensated),
    (SagaStatus::Compensating, SagaStatus::PendingCompensation),
    (SagaStatus::Compensating, SagaStatus::Compensating),
    (SagaStatus::Compensating, SagaStatus::Failed),
];

/// Returns true if moving from `from` to `to` is a legal transition.
///
/// Checked on every status write, not merely assumed unreachable: a
/// concurrent duplicate sweep that loaded the same row must be rejected
/// here when it tries to move an already-terminal saga.
pub fn can_transition(from: SagaStatus, to: SagaStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

impl SagaStatus {
    /// Returns true if no further transition is allowed out of this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Succeeded | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "RUNNING",
            SagaStatus::Succeeded => "SUCCEEDED",
            SagaStatus::PendingCompensation => "PENDING_COMPENSATION",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }

    /// Parses a status from its stored string form.
    pub fn parse(s: &str) -> Option<SagaStatus> {
        match s {
            "RUNNING" => Some(SagaStatus::Running),
            "SUCCEEDED" => Some(SagaStatus::Succeeded),
            "PENDING_COMPENSATION" => Some(SagaStatus::PendingCompensation),
            "COMPENSATING" => Some(SagaStatus::Compensating),
            "COMPENSATED" => Some(SagaStatus::Compensated),
            "FAILED" => Some(SagaStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
