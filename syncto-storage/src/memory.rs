//! In-process store.

use crate::error::{StorageError, StorageResult};
use crate::local::{LocalStore, StoreFactory, StoredRecord};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use syncto_types::ServerTimestamp;

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, StoredRecord>,
    last_modified: ServerTimestamp,
}

/// A [`LocalStore`] held entirely in memory.
pub struct MemoryStore {
    collection: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl LocalStore for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn list(&self) -> StorageResult<Vec<StoredRecord>> {
        Ok(self.lock()?.records.values().cloned().collect())
    }

    fn get(&self, id: &str) -> StorageResult<Option<StoredRecord>> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    fn put(&self, record: StoredRecord) -> StorageResult<()> {
        self.lock()?
            .records
            .insert(record.record.id.clone(), record);
        Ok(())
    }

    fn delete(&self, id: &str) -> StorageResult<bool> {
        Ok(self.lock()?.records.remove(id).is_some())
    }

    fn last_modified(&self) -> StorageResult<ServerTimestamp> {
        Ok(self.lock()?.last_modified)
    }

    fn set_last_modified(&self, timestamp: ServerTimestamp) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if timestamp > inner.last_modified {
            inner.last_modified = timestamp;
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.records.clear();
        inner.last_modified = ServerTimestamp::ZERO;
        Ok(())
    }
}

/// Hands out one shared [`MemoryStore`] per collection name. Opening the
/// same name twice returns the same store.
#[derive(Default)]
pub struct MemoryStoreFactory {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryStoreFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn open(&self, collection: &str) -> StorageResult<Arc<dyn LocalStore>> {
        let mut stores = self.stores.lock().map_err(|_| StorageError::LockPoisoned)?;
        let store = stores
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(collection)))
            .clone();
        Ok(store)
    }
}
