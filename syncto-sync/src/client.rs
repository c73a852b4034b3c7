//! Per-collection remote client.
//!
//! Wraps a [`SyncTransport`] and turns raw responses into typed results.
//! Every collection, control collections included, goes through the same
//! classification:
//!
//! | status | result |
//! |---|---|
//! | 200, 201 | body parsed; malformed → `Unrecoverable` |
//! | 401, 403 | `Unauthorized` |
//! | anything else (0, 404, 408, 429, 5xx, ...) | `TryLater` |
//!
//! A conditional write answered with 412 is not an error: it reports
//! [`WriteOutcome::Stale`] so the caller can pull and resolve.

use crate::error::{SyncError, SyncResult};
use crate::transport::{SyncTransport, TransportResponse, STATUS_PRECONDITION_FAILED};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use syncto_types::{EncryptedRecord, ServerTimestamp, WireRecord};
use tracing::{debug, warn};

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Maps a non-success status to its error.
pub fn classify_status(status: u16) -> SyncResult<()> {
    match status {
        200 | 201 => Ok(()),
        401 | 403 => Err(SyncError::unauthorized(format!(
            "server rejected credentials (status {status})"
        ))),
        _ => Err(SyncError::TryLater { status }),
    }
}

/// Result of a write to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied; the server assigned this timestamp.
    Stored(ServerTimestamp),
    /// The record changed remotely since the timestamp the write was
    /// conditioned on. Nothing was written.
    Stale,
}

/// Typed access to one remote collection.
#[derive(Clone)]
pub struct RemoteCollectionClient {
    collection: String,
    transport: Arc<dyn SyncTransport>,
}

impl RemoteCollectionClient {
    /// Creates a client for `collection`.
    pub fn new(collection: impl Into<String>, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            collection: collection.into(),
            transport,
        }
    }

    /// The collection this client talks to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Lists records modified after `since` (all live records when `None`),
    /// oldest first.
    pub async fn fetch(&self, since: Option<ServerTimestamp>) -> SyncResult<Vec<WireRecord>> {
        let response = self.transport.get_records(&self.collection, since).await;
        let mut records: Vec<WireRecord> = self.parse(response)?;
        records.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));
        debug!("Fetched {} records from {}", records.len(), self.collection);
        Ok(records)
    }

    /// Uploads an encrypted record. With `if_match`, only overwrites the
    /// remote version carrying that timestamp.
    pub async fn push(
        &self,
        record: &EncryptedRecord,
        if_match: Option<ServerTimestamp>,
    ) -> SyncResult<WriteOutcome> {
        let wire = record.to_wire()?;
        let response = self
            .transport
            .put_record(&self.collection, &wire, if_match)
            .await;
        if self.is_stale(&response, &record.id, if_match) {
            return Ok(WriteOutcome::Stale);
        }
        let stored: WireRecord = self.parse(response)?;
        if stored.id != record.id {
            return Err(SyncError::unrecoverable(format!(
                "{}: server stored {} for upload of {}",
                self.collection, stored.id, record.id
            )));
        }
        Ok(WriteOutcome::Stored(stored.last_modified))
    }

    /// Deletes a record, reporting the tombstone's timestamp. `if_match` as
    /// for [`RemoteCollectionClient::push`].
    pub async fn delete(
        &self,
        id: &str,
        if_match: Option<ServerTimestamp>,
    ) -> SyncResult<WriteOutcome> {
        let response = self
            .transport
            .delete_record(&self.collection, id, if_match)
            .await;
        if self.is_stale(&response, id, if_match) {
            return Ok(WriteOutcome::Stale);
        }
        let tombstone: WireRecord = self.parse(response)?;
        Ok(WriteOutcome::Stored(tombstone.last_modified))
    }

    fn is_stale(
        &self,
        response: &TransportResponse,
        id: &str,
        if_match: Option<ServerTimestamp>,
    ) -> bool {
        let stale = if_match.is_some() && response.status == STATUS_PRECONDITION_FAILED;
        if stale {
            debug!("{}/{} changed remotely since {:?}", self.collection, id, if_match);
        }
        stale
    }

    fn parse<T: DeserializeOwned>(&self, response: TransportResponse) -> SyncResult<T> {
        if let Err(e) = classify_status(response.status) {
            warn!(
                "Request to {} failed with status {}",
                self.collection, response.status
            );
            return Err(e);
        }
        serde_json::from_str::<DataEnvelope<T>>(&response.body)
            .map(|envelope| envelope.data)
            .map_err(|e| {
                SyncError::unrecoverable(format!("{}: malformed response: {e}", self.collection))
            })
    }
}
