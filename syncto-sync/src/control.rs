//! Control collections: "meta" and "crypto".
//!
//! "meta" holds the `global` record describing the storage format and the
//! engines in use. "crypto" holds the `keys` record, encrypted under the
//! bundle derived from kB, which wraps the collection keys.

use crate::client::RemoteCollectionClient;
use crate::config::{SyncConfig, CRYPTO_COLLECTION, META_COLLECTION};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use syncto_crypto::{derive_key_bundle, CollectionKeys, KeyBundle, RootKey, CRYPTO_KEYS_ID};
use syncto_types::{EncryptedRecord, ServerTimestamp, WireRecord};
use tracing::{debug, info};

/// Id of the metadata record in the "meta" collection.
pub const META_GLOBAL_ID: &str = "global";

/// Per-engine entry in meta/global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Engine format version.
    pub version: u64,
    /// Engine sync id.
    #[serde(rename = "syncID")]
    pub sync_id: String,
}

/// The decoded meta/global record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaGlobal {
    /// Account-wide sync id.
    #[serde(rename = "syncID")]
    pub sync_id: String,
    /// Storage format version.
    #[serde(rename = "storageVersion")]
    pub storage_version: u64,
    /// Engines in use, by collection name.
    #[serde(default)]
    pub engines: BTreeMap<String, EngineMeta>,
    /// Engines the user opted out of.
    #[serde(default)]
    pub declined: Vec<String>,
}

impl MetaGlobal {
    /// Creates metadata with no engines.
    pub fn new(sync_id: impl Into<String>, storage_version: u64) -> Self {
        Self {
            sync_id: sync_id.into(),
            storage_version,
            engines: BTreeMap::new(),
            declined: Vec::new(),
        }
    }

    /// Adds an engine.
    #[must_use]
    pub fn with_engine(
        mut self,
        name: impl Into<String>,
        version: u64,
        sync_id: impl Into<String>,
    ) -> Self {
        self.engines.insert(
            name.into(),
            EngineMeta {
                version,
                sync_id: sync_id.into(),
            },
        );
        self
    }

    /// Marks an engine as declined.
    #[must_use]
    pub fn with_declined(mut self, name: impl Into<String>) -> Self {
        self.declined.push(name.into());
        self
    }

    /// Fails unless `collection` is an engine in use.
    pub fn check_engine(&self, collection: &str) -> SyncResult<()> {
        if self.declined.iter().any(|d| d == collection) {
            return Err(SyncError::unrecoverable(format!(
                "meta/global declines engine {collection}"
            )));
        }
        if !self.engines.contains_key(collection) {
            return Err(SyncError::unrecoverable(format!(
                "meta/global has no engine {collection}"
            )));
        }
        Ok(())
    }

    /// Encodes the record the way it is stored on the server. The payload is
    /// plaintext JSON.
    pub fn to_wire(&self, last_modified: ServerTimestamp) -> SyncResult<WireRecord> {
        let payload = serde_json::to_string(self)
            .map_err(|e| SyncError::unrecoverable(format!("meta/global: {e}")))?;
        Ok(WireRecord {
            id: META_GLOBAL_ID.to_string(),
            last_modified,
            payload,
            deleted: false,
        })
    }
}

/// Control data loaded once per engine.
#[derive(Debug, Clone)]
pub struct ControlData {
    /// meta/global.
    pub meta: MetaGlobal,
    /// The encrypted crypto/keys record, already verified to decrypt.
    pub keys_record: EncryptedRecord,
}

impl ControlData {
    /// Derives the key bundle for `collection`.
    pub fn bundle_for(&self, root: &RootKey, collection: &str) -> SyncResult<KeyBundle> {
        Ok(derive_key_bundle(root, &self.keys_record, collection)?)
    }
}

/// Fetches and validates both control collections.
pub struct ControlCollectionLoader {
    meta: RemoteCollectionClient,
    crypto: RemoteCollectionClient,
    storage_version: u64,
}

impl ControlCollectionLoader {
    /// Creates a loader over `transport`.
    pub fn new(transport: Arc<dyn SyncTransport>, config: &SyncConfig) -> Self {
        Self {
            meta: RemoteCollectionClient::new(META_COLLECTION, transport.clone()),
            crypto: RemoteCollectionClient::new(CRYPTO_COLLECTION, transport),
            storage_version: config.storage_version,
        }
    }

    /// Loads meta/global and crypto/keys. Fails on the first problem; nothing
    /// is returned partially.
    pub async fn load(&self, root: &RootKey) -> SyncResult<ControlData> {
        let meta = self.load_meta().await?;
        let keys_record = self.load_keys(root).await?;
        info!(
            "Loaded control collections (storage version {}, {} engines)",
            meta.storage_version,
            meta.engines.len()
        );
        Ok(ControlData { meta, keys_record })
    }

    async fn load_meta(&self) -> SyncResult<MetaGlobal> {
        let records = self.meta.fetch(None).await?;
        let global = find(records, META_COLLECTION, META_GLOBAL_ID)?;
        let meta: MetaGlobal = serde_json::from_str(&global.payload)
            .map_err(|e| SyncError::unrecoverable(format!("meta/global: {e}")))?;

        if meta.storage_version != self.storage_version {
            return Err(SyncError::unrecoverable(format!(
                "meta/global storage version {} (expected {})",
                meta.storage_version, self.storage_version
            )));
        }
        debug!("meta/global syncID {}", meta.sync_id);
        Ok(meta)
    }

    async fn load_keys(&self, root: &RootKey) -> SyncResult<EncryptedRecord> {
        let records = self.crypto.fetch(None).await?;
        let wire = find(records, CRYPTO_COLLECTION, CRYPTO_KEYS_ID)?;
        let record = EncryptedRecord::from_wire(&wire)?;
        CollectionKeys::open(&record, root)?;
        Ok(record)
    }
}

fn find(records: Vec<WireRecord>, collection: &str, id: &str) -> SyncResult<WireRecord> {
    records
        .into_iter()
        .find(|r| r.id == id && !r.deleted)
        .ok_or_else(|| SyncError::unrecoverable(format!("{collection}/{id} is missing")))
}
