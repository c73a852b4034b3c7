//! Conflict resolution.
//!
//! A conflict exists when a pulled remote record is newer than what the local
//! store last saw and the local copy has a change that has not been pushed
//! yet. The adapter decides the outcome; there is no automatic
//! last-writer-wins.

use crate::adapter::DataAdapter;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use syncto_storage::{StoredRecord, SyncStatus};
use syncto_types::{PlainRecord, ServerTimestamp};
use tracing::debug;

/// Resolves conflicts for one collection through its adapter.
pub struct ConflictResolver {
    collection: String,
    adapter: Arc<dyn DataAdapter>,
}

impl ConflictResolver {
    /// Creates a resolver for `collection`.
    pub fn new(collection: impl Into<String>, adapter: Arc<dyn DataAdapter>) -> Self {
        Self {
            collection: collection.into(),
            adapter,
        }
    }

    /// True if a remote record modified at `remote_modified` conflicts with
    /// the local copy.
    pub fn is_conflict(local: &StoredRecord, remote_modified: ServerTimestamp) -> bool {
        local.status.is_pending() && remote_modified > local.modified
    }

    /// Asks the adapter for a resolution and returns it as a pending update
    /// based on the remote version.
    pub async fn resolve(
        &self,
        local: &StoredRecord,
        remote: &PlainRecord,
        remote_modified: ServerTimestamp,
    ) -> SyncResult<StoredRecord> {
        let resolved = self
            .adapter
            .handle_conflict(&local.record, remote)
            .await
            .map_err(|e| SyncError::Adapter(e.to_string()))?;

        if resolved.id != remote.id {
            return Err(SyncError::Adapter(format!(
                "conflict resolution for {}/{} returned id {}",
                self.collection, remote.id, resolved.id
            )));
        }

        debug!(
            "Resolved conflict on {}/{} (local was {})",
            self.collection, remote.id, local.status
        );
        Ok(StoredRecord::pending(
            resolved,
            SyncStatus::Updated,
            remote_modified,
        ))
    }
}
