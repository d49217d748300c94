//! Ledger client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::UserId;

use crate::error::OrchestratorError;

/// A record to append to the distributed ledger.
#[derive(Debug, Clone)]
pub struct LedgerRecord {
    /// The uploading user.
    pub uploader: UserId,
    /// Display name of the resource.
    pub resource_name: String,
    /// The record body, typically the stored-path manifest.
    pub content: serde_json::Value,
}

/// Receipt returned by a successful ledger write.
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    /// The ledger transaction hash.
    pub transaction_hash: String,
    /// Content hash of the stored record.
    pub content_hash: String,
}

/// Trait for the append-only distributed ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Appends a record and returns its receipt.
    async fn store(&self, record: LedgerRecord) -> Result<LedgerReceipt, OrchestratorError>;

    /// Deletes records for the owner, keyed by content hash.
    async fn delete(
        &self,
        owner: UserId,
        content_hashes: &[String],
    ) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
struct InMemoryLedgerState {
    records: HashMap<String, LedgerRecord>,
    next_tx: u32,
    store_count: u32,
    delete_count: u32,
    fail_on_store: bool,
    fail_on_delete: bool,
}

/// In-memory ledger for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<InMemoryLedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the ledger to fail writes.
    pub fn set_fail_on_store(&self, fail: bool) {
        self.state.write().unwrap().fail_on_store = fail;
    }

    /// Configures the ledger to fail deletes.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.state.write().unwrap().fail_on_delete = fail;
    }

    /// Number of live ledger records.
    pub fn record_count(&self) -> usize {
        self.state.read().unwrap().records.len()
    }

    /// Number of delete calls issued.
    pub fn delete_count(&self) -> u32 {
        self.state.read().unwrap().delete_count
    }

    /// Number of store calls issued.
    pub fn store_count(&self) -> u32 {
        self.state.read().unwrap().store_count
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn store(&self, record: LedgerRecord) -> Result<LedgerReceipt, OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.store_count += 1;

        if state.fail_on_store {
            return Err(OrchestratorError::Ledger(
                "ledger node unreachable".to_string(),
            ));
        }

        state.next_tx += 1;
        let receipt = LedgerReceipt {
            transaction_hash: format!("0xtx{:04}", state.next_tx),
            content_hash: format!("0xc{:04}", state.next_tx),
        };
        state.records.insert(receipt.content_hash.clone(), record);
        Ok(receipt)
    }

    async fn delete(
        &self,
        _owner: UserId,
        content_hashes: &[String],
    ) -> Result<(), OrchestratorError> {
        let mut state = self.state.write().unwrap();
        state.delete_count += 1;

        if state.fail_on_delete {
            return Err(OrchestratorError::Ledger(
                "ledger node unreachable".to_string(),
            ));
        }

        for hash in content_hashes {
            state.records.remove(hash);
        }
        Ok(())
    }
}
