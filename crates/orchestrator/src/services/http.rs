//! HTTP implementations of the remote collaborator traits.
//!
//! The platform fronts its object store, ledger node and event broker
//! with small REST gateways; these clients speak to them. Construction
//! fails fast on a bad base URL or client configuration, everything at
//! call time maps to the corresponding [`OrchestratorError`] variant.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use common::UserId;
use saga_store::OutboxEvent;

use crate::error::OrchestratorError;
use crate::services::ledger::{LedgerClient, LedgerReceipt, LedgerRecord};
use crate::services::object_store::{DeleteOutcome, ObjectStoreClient};
use crate::services::sink::EventSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_client(error: fn(String) -> OrchestratorError) -> Result<reqwest::Client, OrchestratorError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| error(format!("failed to build HTTP client: {e}")))
}

/// Client for the object-store gateway.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StoreChunkResponse {
    location: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            client: build_client(OrchestratorError::ObjectStore)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ObjectStoreClient for HttpObjectStore {
    async fn store_chunk(&self, hash: &str, data: Vec<u8>) -> Result<String, OrchestratorError> {
        let response = self
            .client
            .put(format!("{}/objects/{hash}", self.base_url))
            .body(data)
            .send()
            .await
            .map_err(|e| OrchestratorError::ObjectStore(format!("store request failed: {e}")))?
            .error_for_status()
            .map_err(|e| OrchestratorError::ObjectStore(format!("store rejected: {e}")))?;

        let body: StoreChunkResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::ObjectStore(format!("malformed store response: {e}")))?;
        Ok(body.location)
    }

    async fn delete(
        &self,
        locations_by_hash: &BTreeMap<String, String>,
    ) -> Result<DeleteOutcome, OrchestratorError> {
        let locations: Vec<&String> = locations_by_hash.values().collect();
        let response = self
            .client
            .post(format!("{}/objects/delete", self.base_url))
            .json(&json!({ "locations": locations }))
            .send()
            .await
            .map_err(|e| OrchestratorError::ObjectStore(format!("delete request failed: {e}")))?;

        // The gateway reports 404 when none of the objects exist, which
        // counts as compensation success.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        response
            .error_for_status()
            .map_err(|e| OrchestratorError::ObjectStore(format!("delete rejected: {e}")))?;
        Ok(DeleteOutcome::Deleted)
    }
}

/// Client for the ledger node gateway.
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StoreRecordResponse {
    transaction_hash: String,
    content_hash: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            client: build_client(OrchestratorError::Ledger)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn store(&self, record: LedgerRecord) -> Result<LedgerReceipt, OrchestratorError> {
        let response = self
            .client
            .post(format!("{}/records", self.base_url))
            .json(&json!({
                "uploader": record.uploader,
                "resourceName": record.resource_name,
                "content": record.content,
            }))
            .send()
            .await
            .map_err(|e| OrchestratorError::Ledger(format!("store request failed: {e}")))?
            .error_for_status()
            .map_err(|e| OrchestratorError::Ledger(format!("store rejected: {e}")))?;

        let body: StoreRecordResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Ledger(format!("malformed store response: {e}")))?;
        Ok(LedgerReceipt {
            transaction_hash: body.transaction_hash,
            content_hash: body.content_hash,
        })
    }

    async fn delete(
        &self,
        owner: UserId,
        content_hashes: &[String],
    ) -> Result<(), OrchestratorError> {
        self.client
            .post(format!("{}/records/delete", self.base_url))
            .json(&json!({ "owner": owner, "contentHashes": content_hashes }))
            .send()
            .await
            .map_err(|e| OrchestratorError::Ledger(format!("delete request failed: {e}")))?
            .error_for_status()
            .map_err(|e| OrchestratorError::Ledger(format!("delete rejected: {e}")))?;
        Ok(())
    }
}

/// Event sink that POSTs outbox events to the broker's ingest endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    ingest_url: String,
}

impl HttpEventSink {
    pub fn new(ingest_url: impl Into<String>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            client: build_client(OrchestratorError::Publish)?,
            ingest_url: ingest_url.into(),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), OrchestratorError> {
        self.client
            .post(&self.ingest_url)
            .json(&json!({
                "messageId": event.id,
                "aggregateType": event.aggregate_type,
                "aggregateId": event.aggregate_id,
                "eventType": event.event_type,
                "payload": event.payload,
                "occurredAt": event.created_at,
            }))
            .send()
            .await
            .map_err(|e| OrchestratorError::Publish(format!("publish request failed: {e}")))?
            .error_for_status()
            .map_err(|e| OrchestratorError::Publish(format!("publish rejected: {e}")))?;
        Ok(())
    }
}
