//! The adapter contract.
//!
//! An adapter owns the application-side copy of one collection. The engine
//! asks it for local changes, hands it the merged collection after every pull,
//! and defers to it whenever a local and a remote edit collide.

use async_trait::async_trait;
use syncto_types::{AdapterChangeSet, PlainRecord};
use thiserror::Error;

/// Failure reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

impl AdapterError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Application-side handler for one collection.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    /// Receives the full merged contents of the collection after a pull.
    /// Returns true if the adapter wrote anything to its own storage.
    async fn update(&self, snapshot: &[PlainRecord]) -> AdapterResult<bool>;

    /// Resolves a collision between a pending local record and a newer remote
    /// one. The result must keep the same id and is pushed as an update.
    async fn handle_conflict(
        &self,
        local: &PlainRecord,
        remote: &PlainRecord,
    ) -> AdapterResult<PlainRecord>;

    /// Local changes not yet acknowledged. Reading them must not consume
    /// them: the same changes are returned until [`ack_changes`] covers them.
    ///
    /// [`ack_changes`]: DataAdapter::ack_changes
    async fn changes(&self) -> AdapterResult<AdapterChangeSet> {
        Ok(AdapterChangeSet::default())
    }

    /// Called once `changes` has passed validation and is staged in the local
    /// store. The adapter may forget exactly these changes.
    async fn ack_changes(&self, _changes: &AdapterChangeSet) -> AdapterResult<()> {
        Ok(())
    }

    /// Forgets all per-account state.
    async fn reset(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// A scriptable adapter for testing.
pub mod mock {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// How [`MockAdapter`] answers `handle_conflict`.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub enum ConflictStrategy {
        /// Keep the local record.
        #[default]
        KeepLocal,
        /// Keep the remote record.
        KeepRemote,
        /// Remote fields overlaid with local fields.
        Merge,
        /// Return a record with a different id (a contract violation).
        ChangeId(String),
        /// Fail with the given message.
        Fail(String),
    }

    /// One recorded `handle_conflict` call.
    #[derive(Debug, Clone, PartialEq)]
    pub struct ConflictCall {
        pub local: PlainRecord,
        pub remote: PlainRecord,
    }

    #[derive(Default)]
    struct MockState {
        pending: AdapterChangeSet,
        strategy: ConflictStrategy,
        snapshots: Vec<Vec<PlainRecord>>,
        conflicts: Vec<ConflictCall>,
        resets: usize,
        acks: usize,
        writes: bool,
        update_failure: Option<String>,
    }

    /// Records every call and replays injected local changes.
    #[derive(Default)]
    pub struct MockAdapter {
        state: Mutex<MockState>,
    }

    impl MockAdapter {
        /// Creates an adapter with no pending changes that keeps local
        /// records on conflict.
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Queues a locally created record.
        pub fn inject_create(&self, record: PlainRecord) {
            self.lock().pending.created.push(record);
        }

        /// Queues a locally updated record.
        pub fn inject_update(&self, record: PlainRecord) {
            self.lock().pending.updated.push(record);
        }

        /// Queues a local deletion.
        pub fn inject_delete(&self, id: impl Into<String>) {
            self.lock().pending.deleted.push(id.into());
        }

        /// Changes how conflicts are resolved.
        pub fn set_conflict_strategy(&self, strategy: ConflictStrategy) {
            self.lock().strategy = strategy;
        }

        /// Sets the value `update` returns.
        pub fn set_writes(&self, writes: bool) {
            self.lock().writes = writes;
        }

        /// Makes every `update` call fail.
        pub fn fail_updates(&self, message: impl Into<String>) {
            self.lock().update_failure = Some(message.into());
        }

        /// Every snapshot passed to `update`, in order.
        pub fn snapshots(&self) -> Vec<Vec<PlainRecord>> {
            self.lock().snapshots.clone()
        }

        /// The most recent snapshot passed to `update`.
        pub fn last_snapshot(&self) -> Option<Vec<PlainRecord>> {
            self.lock().snapshots.last().cloned()
        }

        /// Every `handle_conflict` call, in order.
        pub fn conflicts(&self) -> Vec<ConflictCall> {
            self.lock().conflicts.clone()
        }

        /// Number of `reset` calls.
        pub fn reset_count(&self) -> usize {
            self.lock().resets
        }

        /// Withdraws every queued change to `id`.
        pub fn discard(&self, id: &str) {
            let mut state = self.lock();
            state.pending.created.retain(|r| r.id != id);
            state.pending.updated.retain(|r| r.id != id);
            state.pending.deleted.retain(|d| d != id);
        }

        /// Number of `ack_changes` calls.
        pub fn ack_count(&self) -> usize {
            self.lock().acks
        }

        /// True if injected changes are still waiting to be acknowledged.
        pub fn has_pending(&self) -> bool {
            !self.lock().pending.is_empty()
        }
    }

    #[async_trait]
    impl DataAdapter for MockAdapter {
        async fn update(&self, snapshot: &[PlainRecord]) -> AdapterResult<bool> {
            let mut state = self.lock();
            if let Some(message) = &state.update_failure {
                return Err(AdapterError::new(message.clone()));
            }
            state.snapshots.push(snapshot.to_vec());
            Ok(state.writes)
        }

        async fn handle_conflict(
            &self,
            local: &PlainRecord,
            remote: &PlainRecord,
        ) -> AdapterResult<PlainRecord> {
            let mut state = self.lock();
            state.conflicts.push(ConflictCall {
                local: local.clone(),
                remote: remote.clone(),
            });
            match &state.strategy {
                ConflictStrategy::KeepLocal => Ok(local.clone()),
                ConflictStrategy::KeepRemote => Ok(remote.clone()),
                ConflictStrategy::Merge => {
                    let mut merged = remote.clone();
                    merged
                        .fields
                        .extend(local.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(merged)
                }
                ConflictStrategy::ChangeId(id) => {
                    let mut changed = local.clone();
                    changed.id = id.clone();
                    Ok(changed)
                }
                ConflictStrategy::Fail(message) => Err(AdapterError::new(message.clone())),
            }
        }

        async fn changes(&self) -> AdapterResult<AdapterChangeSet> {
            Ok(self.lock().pending.clone())
        }

        async fn ack_changes(&self, changes: &AdapterChangeSet) -> AdapterResult<()> {
            let mut state = self.lock();
            state.acks += 1;
            // Anything queued after `changes` was read stays pending.
            let pending = &mut state.pending;
            pending.created.retain(|r| !changes.created.contains(r));
            pending.updated.retain(|r| !changes.updated.contains(r));
            pending.deleted.retain(|d| !changes.deleted.contains(d));
            Ok(())
        }

        async fn reset(&self) -> AdapterResult<()> {
            let mut state = self.lock();
            state.resets += 1;
            state.pending = AdapterChangeSet::default();
            Ok(())
        }
    }
}
