//! Transport layer abstraction.
//!
//! The engine talks to the server only through [`SyncTransport`]: three
//! record-level calls that return the raw status and body. Classification
//! into [`SyncError`](crate::SyncError)s happens one layer up, in
//! [`RemoteCollectionClient`](crate::RemoteCollectionClient), so every
//! transport gets the same semantics.

use async_trait::async_trait;
use syncto_types::{ServerTimestamp, WireRecord};

/// Status used when the server could not be reached at all.
pub const STATUS_UNREACHABLE: u16 = 0;

/// Raw response from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status, or [`STATUS_UNREACHABLE`].
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// The response reported for connection failures.
    pub fn unreachable() -> Self {
        Self::new(STATUS_UNREACHABLE, "")
    }
}

/// Status of a conditional write whose precondition no longer holds.
pub const STATUS_PRECONDITION_FAILED: u16 = 412;

/// A record-level connection to the sync server.
///
/// Network failures are reported as [`TransportResponse::unreachable`], never
/// as panics or errors.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Lists records in `collection`, only those modified after `since` when
    /// given. Body: `{"data": [record, ...]}`.
    async fn get_records(
        &self,
        collection: &str,
        since: Option<ServerTimestamp>,
    ) -> TransportResponse;

    /// Creates or replaces a record. Body: `{"data": stored_record}`.
    ///
    /// With `if_match`, the write only happens if the record's current
    /// `last_modified` is exactly that value; otherwise the server answers
    /// [`STATUS_PRECONDITION_FAILED`].
    async fn put_record(
        &self,
        collection: &str,
        record: &WireRecord,
        if_match: Option<ServerTimestamp>,
    ) -> TransportResponse;

    /// Deletes a record. Body: `{"data": tombstone}`. `if_match` as for
    /// [`SyncTransport::put_record`].
    async fn delete_record(
        &self,
        collection: &str,
        id: &str,
        if_match: Option<ServerTimestamp>,
    ) -> TransportResponse;
}

/// A mock transport for testing.
pub mod mock {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex, MutexGuard};
    use tokio::sync::Notify;

    /// First timestamp the mock server assigns.
    pub const MOCK_EPOCH: u64 = 1_444_990_000_000;

    /// A request the mock server received.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum MockRequest {
        Get {
            collection: String,
            since: Option<ServerTimestamp>,
        },
        Put {
            collection: String,
            id: String,
            if_match: Option<ServerTimestamp>,
        },
        Delete {
            collection: String,
            id: String,
            if_match: Option<ServerTimestamp>,
        },
    }

    impl MockRequest {
        /// The collection the request targeted.
        pub fn collection(&self) -> &str {
            match self {
                Self::Get { collection, .. }
                | Self::Put { collection, .. }
                | Self::Delete { collection, .. } => collection,
            }
        }
    }

    #[derive(Default)]
    struct ServerState {
        clock: u64,
        collections: HashMap<String, BTreeMap<String, WireRecord>>,
        overrides: HashMap<String, TransportResponse>,
        requests: Vec<MockRequest>,
        hold: Option<Arc<Notify>>,
        races: HashMap<String, WireRecord>,
    }

    impl ServerState {
        fn tick(&mut self) -> ServerTimestamp {
            self.clock = self.clock.max(MOCK_EPOCH) + 1;
            ServerTimestamp::from_millis(self.clock)
        }

        fn current(&self, collection: &str, id: &str) -> Option<&WireRecord> {
            self.collections
                .get(collection)
                .and_then(|records| records.get(id))
        }

        /// Lands a racing write queued for `collection`, if any.
        fn land_race(&mut self, collection: &str) {
            if let Some(mut record) = self.races.remove(collection) {
                record.last_modified = self.tick();
                self.store(collection, record);
            }
        }

        /// Whether a write conditioned on `if_match` may proceed. A deleted
        /// record never matches.
        fn precondition_holds(
            &self,
            collection: &str,
            id: &str,
            if_match: Option<ServerTimestamp>,
        ) -> bool {
            match if_match {
                None => true,
                Some(expected) => self
                    .current(collection, id)
                    .is_some_and(|r| !r.deleted && r.last_modified == expected),
            }
        }

        fn store(&mut self, collection: &str, record: WireRecord) {
            self.clock = self.clock.max(record.last_modified.as_millis());
            self.collections
                .entry(collection.to_string())
                .or_default()
                .insert(record.id.clone(), record);
        }
    }

    /// An in-memory sync server.
    ///
    /// Assigns strictly increasing timestamps, keeps tombstones for deleted
    /// records so `_since` queries report them, and logs every request.
    /// Conditional writes are refused with 412 unless the record is live at
    /// exactly the expected timestamp. A status/body override per collection
    /// replaces every response for that collection until cleared.
    #[derive(Default)]
    pub struct MockTransport {
        state: Mutex<ServerState>,
    }

    impl MockTransport {
        /// Creates an empty server.
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, ServerState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Stores a record as if another client had uploaded it, assigning a
        /// fresh timestamp. Returns the timestamp.
        pub fn insert(&self, collection: &str, mut record: WireRecord) -> ServerTimestamp {
            let mut state = self.lock();
            let ts = state.tick();
            record.last_modified = ts;
            state.store(collection, record);
            ts
        }

        /// Stores a record keeping its `last_modified` as given.
        pub fn insert_raw(&self, collection: &str, record: WireRecord) {
            self.lock().store(collection, record);
        }

        /// Deletes a record as if another client had, leaving a tombstone.
        /// Returns the tombstone timestamp.
        pub fn remove(&self, collection: &str, id: &str) -> ServerTimestamp {
            let mut state = self.lock();
            let ts = state.tick();
            state.store(collection, WireRecord::tombstone(id, ts));
            ts
        }

        /// Live (non-deleted) records in `collection`, ordered by id.
        pub fn records(&self, collection: &str) -> Vec<WireRecord> {
            self.lock()
                .collections
                .get(collection)
                .map(|records| records.values().filter(|r| !r.deleted).cloned().collect())
                .unwrap_or_default()
        }

        /// Looks up one record, tombstones included.
        pub fn record(&self, collection: &str, id: &str) -> Option<WireRecord> {
            self.lock().current(collection, id).cloned()
        }

        /// Stores `record` as another client's write, landing just before the
        /// next PUT or DELETE to `collection` is applied. A tombstone lands as
        /// a remote deletion.
        pub fn race_next_write(&self, collection: &str, record: WireRecord) {
            self.lock().races.insert(collection.to_string(), record);
        }

        /// Replaces every response for `collection` with `response`.
        pub fn set_response(&self, collection: &str, response: TransportResponse) {
            self.lock()
                .overrides
                .insert(collection.to_string(), response);
        }

        /// Removes an override installed with [`MockTransport::set_response`].
        pub fn clear_response(&self, collection: &str) {
            self.lock().overrides.remove(collection);
        }

        /// Every request received so far, in order.
        pub fn requests(&self) -> Vec<MockRequest> {
            self.lock().requests.clone()
        }

        /// Number of PUTs received for `collection`.
        pub fn put_count(&self, collection: &str) -> usize {
            self.lock()
                .requests
                .iter()
                .filter(|r| matches!(r, MockRequest::Put { collection: c, .. } if c == collection))
                .count()
        }

        /// Forgets the request log.
        pub fn clear_requests(&self) {
            self.lock().requests.clear();
        }

        /// Makes requests wait until [`MockTransport::release`] is called.
        /// Each request is logged before it waits.
        pub fn hold(&self) {
            self.lock().hold = Some(Arc::new(Notify::new()));
        }

        /// Lets a held request through and stops holding new ones.
        pub fn release(&self) {
            if let Some(gate) = self.lock().hold.take() {
                gate.notify_one();
            }
        }

        async fn begin(&self, request: MockRequest) -> Option<TransportResponse> {
            let (gate, response) = {
                let mut state = self.lock();
                let response = state.overrides.get(request.collection()).cloned();
                state.requests.push(request);
                (state.hold.clone(), response)
            };
            if let Some(gate) = gate {
                gate.notified().await;
            }
            response
        }
    }

    fn precondition_failed() -> TransportResponse {
        TransportResponse::new(
            STATUS_PRECONDITION_FAILED,
            r#"{"code":412,"message":"Resource was modified meanwhile"}"#,
        )
    }

    fn data(value: serde_json::Value) -> TransportResponse {
        TransportResponse::ok(json!({ "data": value }).to_string())
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn get_records(
            &self,
            collection: &str,
            since: Option<ServerTimestamp>,
        ) -> TransportResponse {
            let request = MockRequest::Get {
                collection: collection.to_string(),
                since,
            };
            if let Some(response) = self.begin(request).await {
                return response;
            }

            let state = self.lock();
            let mut records: Vec<&WireRecord> = state
                .collections
                .get(collection)
                .map(|records| {
                    records
                        .values()
                        .filter(|r| match since {
                            Some(since) => r.last_modified > since,
                            None => !r.deleted,
                        })
                        .collect()
                })
                .unwrap_or_default();
            // Newest first, like the real server's default ordering.
            records.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
            data(json!(records))
        }

        async fn put_record(
            &self,
            collection: &str,
            record: &WireRecord,
            if_match: Option<ServerTimestamp>,
        ) -> TransportResponse {
            let request = MockRequest::Put {
                collection: collection.to_string(),
                id: record.id.clone(),
                if_match,
            };
            if let Some(response) = self.begin(request).await {
                return response;
            }

            let mut state = self.lock();
            state.land_race(collection);
            if !state.precondition_holds(collection, &record.id, if_match) {
                return precondition_failed();
            }
            let stored = WireRecord {
                last_modified: state.tick(),
                deleted: false,
                ..record.clone()
            };
            state.store(collection, stored.clone());
            data(json!(stored))
        }

        async fn delete_record(
            &self,
            collection: &str,
            id: &str,
            if_match: Option<ServerTimestamp>,
        ) -> TransportResponse {
            let request = MockRequest::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
                if_match,
            };
            if let Some(response) = self.begin(request).await {
                return response;
            }

            let mut state = self.lock();
            state.land_race(collection);
            let exists = state.current(collection, id).is_some_and(|r| !r.deleted);
            if !exists && if_match.is_none() {
                return TransportResponse::new(404, r#"{"code":404,"message":"not found"}"#);
            }
            if !state.precondition_holds(collection, id, if_match) {
                return precondition_failed();
            }
            let tombstone = WireRecord::tombstone(id, state.tick());
            state.store(collection, tombstone.clone());
            data(json!(tombstone))
        }
    }
}
