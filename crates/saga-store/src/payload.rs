//! The saga's JSON side-channel payload.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Tag recorded once the object-store delete has been applied.
pub const COMP_STEP_OBJECT_STORE: &str = "OBJECT_STORE_DELETED";

/// Tag recorded once the ledger record has been deleted.
pub const COMP_STEP_LEDGER: &str = "LEDGER_DELETED";

/// Tag recorded once the relational resource row has been rolled back.
pub const COMP_STEP_DB_ROLLBACK: &str = "DB_ROLLBACK";

/// Structured payload carried by every saga row.
///
/// `stored_paths` maps content hash to physical storage location and is
/// appended to as each physical write succeeds; compensation reads it to
/// know what to delete. `compensated_steps` is the idempotency ledger for
/// compensation itself: a tag present here means that undo action has
/// already been applied and must not be repeated, even across crashes.
///
/// The only external contract is round-trip fidelity: what is written must
/// be read back unchanged in shape. Unknown fields are tolerated on read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaPayload {
    #[serde(default)]
    pub stored_paths: BTreeMap<String, String>,

    #[serde(default)]
    pub compensated_steps: BTreeSet<String>,
}

impl SagaPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a payload from its stored JSON form. `None` and empty
    /// strings decode to an empty payload, matching rows created before
    /// the first physical write.
    pub fn from_json(json: Option<&serde_json::Value>) -> Result<Self> {
        match json {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(value) => {
                serde_json::from_value(value.clone()).map_err(StoreError::Serialization)
            }
        }
    }

    /// Encodes the payload to its stored JSON form.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(StoreError::Serialization)
    }

    /// Returns true if the given compensation tag has been recorded.
    pub fn is_step_done(&self, tag: &str) -> bool {
        self.compensated_steps.contains(tag)
    }

    /// Records a compensation tag as applied.
    pub fn mark_step_done(&mut self, tag: &str) {
        self.compensated_steps.insert(tag.to_string());
    }

    /// Clears the compensation ledger. Called when the forward path
    /// re-records stored paths, so a resumed saga starts undo from scratch.
    pub fn reset_compensated_steps(&mut self) {
        self.compensated_steps.clear();
    }
}
