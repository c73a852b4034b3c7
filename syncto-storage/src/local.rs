//! The local store capability and its record shape.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use syncto_types::{PlainRecord, ServerTimestamp};

/// Where a local record stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Identical to the last version seen on (or pushed to) the server.
    Synced,
    /// Created locally, never pushed.
    Created,
    /// Changed locally since the last push.
    Updated,
    /// Deleted locally; the deletion still has to reach the server.
    Deleted,
}

impl SyncStatus {
    /// Whether the record still has to be pushed.
    pub fn is_pending(self) -> bool {
        self != SyncStatus::Synced
    }

    fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Created => "created",
            SyncStatus::Updated => "updated",
            SyncStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "created" => Ok(SyncStatus::Created),
            "updated" => Ok(SyncStatus::Updated),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(StorageError::InvalidData(format!("unknown sync status: {other}"))),
        }
    }
}

/// A record as kept in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// The decrypted record.
    pub record: PlainRecord,
    /// Push state.
    pub status: SyncStatus,
    /// Server timestamp of the last version seen or pushed;
    /// `ServerTimestamp::ZERO` for records that never reached the server.
    pub modified: ServerTimestamp,
}

impl StoredRecord {
    /// A record exactly as the server holds it.
    pub fn synced(record: PlainRecord, modified: ServerTimestamp) -> Self {
        Self {
            record,
            status: SyncStatus::Synced,
            modified,
        }
    }

    /// A local change waiting to be pushed.
    pub fn pending(record: PlainRecord, status: SyncStatus, modified: ServerTimestamp) -> Self {
        Self {
            record,
            status,
            modified,
        }
    }

    /// The record id.
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Per-collection local storage.
///
/// One store has exactly one writer: the engine that owns it.
pub trait LocalStore: Send + Sync {
    /// Name of the collection this store mirrors.
    fn collection(&self) -> &str;

    /// Every record, including pending deletions, ordered by id.
    fn list(&self) -> StorageResult<Vec<StoredRecord>>;

    /// Looks up one record.
    fn get(&self, id: &str) -> StorageResult<Option<StoredRecord>>;

    /// Inserts or replaces a record.
    fn put(&self, record: StoredRecord) -> StorageResult<()>;

    /// Removes a record. Returns whether it existed.
    fn delete(&self, id: &str) -> StorageResult<bool>;

    /// The newest server timestamp merged into this store.
    fn last_modified(&self) -> StorageResult<ServerTimestamp>;

    /// Advances the high-water mark. Older values are ignored.
    fn set_last_modified(&self, timestamp: ServerTimestamp) -> StorageResult<()>;

    /// Drops every record and resets the high-water mark.
    fn clear(&self) -> StorageResult<()>;

    /// Records that still have to be pushed.
    fn pending(&self) -> StorageResult<Vec<StoredRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status.is_pending())
            .collect())
    }

    /// Push journal entry: the server accepted `id` at `modified`.
    fn mark_synced(&self, id: &str, modified: ServerTimestamp) -> StorageResult<()> {
        let mut stored = self
            .get(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        stored.status = SyncStatus::Synced;
        stored.modified = modified;
        self.put(stored)
    }

    /// Live records (everything not pending deletion), ordered by id.
    fn snapshot(&self) -> StorageResult<Vec<PlainRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status != SyncStatus::Deleted)
            .map(|r| r.record)
            .collect())
    }
}

/// Opens one store per collection.
pub trait StoreFactory: Send + Sync {
    /// Opens (or creates) the store for `collection`.
    fn open(&self, collection: &str) -> StorageResult<Arc<dyn LocalStore>>;
}
