//! Sync engine: orchestrates one credential set across its collections.
//!
//! Per `sync_now` call the engine loads the control collections (once per
//! engine), then for each requested collection in order: pulls and decrypts
//! remote changes, collects and stages the adapter's local changes, merges,
//! hands the merged collection to the adapter, and pushes what is pending.
//! The first failure aborts the call; collections already finished are not
//! rolled back.
//!
//! Updates and deletions of records the server already has are conditioned on
//! the last known `last_modified`. A write that loses to a concurrent remote
//! edit is left pending; the engine pulls again, which routes the record to
//! the adapter's conflict handling, and retries.

use crate::adapter::DataAdapter;
use crate::client::{RemoteCollectionClient, WriteOutcome};
use crate::config::{check_collection_name, SyncConfig, SyncOptions};
use crate::conflict::ConflictResolver;
use crate::control::{ControlCollectionLoader, ControlData};
use crate::error::{ConfigError, SyncError, SyncResult};
use crate::http::{HttpTransport, HttpTransportConfig};
use crate::transport::SyncTransport;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use syncto_crypto::{decrypt_record, encrypt_record, KeyBundle, RootKey};
use syncto_storage::{LocalStore, MemoryStoreFactory, StoreFactory, StoredRecord, SyncStatus};
use syncto_types::{AdapterChangeSet, EncryptedRecord, PlainRecord, ServerTimestamp};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pull/merge/push rounds per collection while writes keep losing to
/// concurrent remote edits. Whatever is still stale waits for the next sync.
const MAX_ROUNDS: usize = 3;

/// Outcome of syncing one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Collection name.
    pub collection: String,
    /// Remote changes applied locally (records and deletions).
    pub pulled: usize,
    /// Records uploaded.
    pub pushed: usize,
    /// Deletions uploaded.
    pub deleted: usize,
    /// Conflicts resolved by the adapter.
    pub conflicts: usize,
    /// Writes the server refused because the record changed remotely since
    /// the last pull.
    pub stale_writes: usize,
    /// Whether any of the adapter's `update` calls wrote locally.
    pub adapter_wrote: bool,
}

impl CollectionReport {
    fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            ..Default::default()
        }
    }
}

/// A pulled remote change, decrypted.
enum RemoteChange {
    Record {
        record: PlainRecord,
        modified: ServerTimestamp,
    },
    Tombstone {
        id: String,
    },
}

struct CollectionState {
    client: RemoteCollectionClient,
    store: Arc<dyn LocalStore>,
    bundle: KeyBundle,
}

#[derive(Default)]
struct EngineState {
    control: Option<ControlData>,
    collections: HashMap<String, CollectionState>,
}

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    options: SyncOptions,
    config: SyncConfig,
    adapters: BTreeMap<String, Arc<dyn DataAdapter>>,
    transport: Option<Arc<dyn SyncTransport>>,
    stores: Option<Arc<dyn StoreFactory>>,
}

impl SyncEngineBuilder {
    /// Sets the tuning config.
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the adapter for `collection`. A later registration under the
    /// same name replaces the earlier one.
    #[must_use]
    pub fn adapter(
        mut self,
        collection: impl Into<String>,
        adapter: Arc<dyn DataAdapter>,
    ) -> Self {
        self.adapters.insert(collection.into(), adapter);
        self
    }

    /// Uses `transport` instead of HTTP.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `stores` for local collections instead of in-memory stores.
    #[must_use]
    pub fn store_factory(mut self, stores: Arc<dyn StoreFactory>) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Validates everything and builds the engine. Performs no I/O.
    pub fn build(self) -> Result<SyncEngine, ConfigError> {
        let root = self.options.validate()?;
        for name in self.adapters.keys() {
            check_collection_name(name)?;
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(HttpTransportConfig::from_options(
                &self.options,
                &self.config,
            ))?),
        };
        let stores = self
            .stores
            .unwrap_or_else(|| Arc::new(MemoryStoreFactory::new()));

        debug!(
            "Built sync engine for {} with {} adapters",
            self.options.url,
            self.adapters.len()
        );

        Ok(SyncEngine {
            options: self.options,
            root,
            config: self.config,
            adapters: self.adapters,
            transport,
            stores,
            state: Mutex::new(EngineState::default()),
        })
    }
}

/// Syncs the registered collections of one account.
///
/// Calls are serialized: a `sync_now` issued while another is running is
/// rejected with [`SyncError::SyncInProgress`] rather than queued.
pub struct SyncEngine {
    options: SyncOptions,
    root: RootKey,
    config: SyncConfig,
    adapters: BTreeMap<String, Arc<dyn DataAdapter>>,
    transport: Arc<dyn SyncTransport>,
    stores: Arc<dyn StoreFactory>,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    /// Starts building an engine for one credential set.
    pub fn builder(options: SyncOptions) -> SyncEngineBuilder {
        SyncEngineBuilder {
            options,
            config: SyncConfig::default(),
            adapters: BTreeMap::new(),
            transport: None,
            stores: None,
        }
    }

    /// The credentials this engine is bound to.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// The tuning config.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Names of the collections with a registered adapter.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    /// True while a `sync_now` or `reset` call is running.
    pub fn is_syncing(&self) -> bool {
        self.state.try_lock().is_err()
    }

    /// Syncs `names` in order, returning one report per name.
    ///
    /// Unknown names and a `xClientState` that does not match `kB` are
    /// rejected before any request is made.
    pub async fn sync_now(&self, names: &[&str]) -> SyncResult<Vec<CollectionReport>> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;

        if let Some(unknown) = names.iter().find(|n| !self.adapters.contains_key(**n)) {
            return Err(SyncError::UnknownCollection((*unknown).to_string()));
        }
        if self.root.client_state() != self.options.x_client_state {
            return Err(SyncError::unauthorized("xClientState does not match kB"));
        }

        if state.control.is_none() {
            let loader = ControlCollectionLoader::new(self.transport.clone(), &self.config);
            let control = loader.load(&self.root).await.inspect_err(|e| {
                warn!("Loading control collections failed: {} ({:?})", e, e.reason());
            })?;
            state.control = Some(control);
        }

        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            info!("Syncing collection {}", name);
            match self.sync_collection(&mut state, name).await {
                Ok(report) => {
                    info!(
                        "Synced {}: pulled {}, pushed {}, deleted {}, conflicts {}",
                        name, report.pulled, report.pushed, report.deleted, report.conflicts
                    );
                    reports.push(report);
                }
                Err(e) => {
                    warn!("Sync of {} failed: {} ({:?})", name, e, e.reason());
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    /// Forgets all account state: clears every local collection, resets every
    /// adapter and drops the cached control data and keys.
    pub async fn reset(&self) -> SyncResult<()> {
        let mut state = self
            .state
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;

        for (name, adapter) in &self.adapters {
            let store = match state.collections.get(name) {
                Some(collection) => collection.store.clone(),
                None => self.stores.open(name)?,
            };
            store.clear()?;
            adapter
                .reset()
                .await
                .map_err(|e| SyncError::Adapter(e.to_string()))?;
        }

        state.control = None;
        state.collections.clear();
        info!("Reset {} collections", self.adapters.len());
        Ok(())
    }

    async fn sync_collection(
        &self,
        state: &mut EngineState,
        name: &str,
    ) -> SyncResult<CollectionReport> {
        let adapter = self
            .adapters
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownCollection(name.to_string()))?;
        let control = state
            .control
            .as_ref()
            .ok_or_else(|| SyncError::unrecoverable("control collections not loaded"))?;
        control.meta.check_engine(name)?;

        let collection: &CollectionState = match state.collections.entry(name.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open_collection(control, name)?),
        };

        let mut report = CollectionReport::new(name);
        let store = collection.store.as_ref();
        let resolver = ConflictResolver::new(name, adapter.clone());

        let (remote, high_water) = self.pull(collection).await?;

        let changes = adapter
            .changes()
            .await
            .map_err(|e| SyncError::Adapter(e.to_string()))?;
        if let Some(id) = changes.first_invalid_id() {
            return Err(SyncError::InvalidId(id.to_string()));
        }
        stage_changes(store, &changes)?;
        adapter
            .ack_changes(&changes)
            .await
            .map_err(|e| SyncError::Adapter(e.to_string()))?;

        apply_remote(store, &resolver, remote, high_water, &mut report).await?;

        for round in 1..=MAX_ROUNDS {
            let snapshot = store.snapshot()?;
            report.adapter_wrote |= adapter
                .update(&snapshot)
                .await
                .map_err(|e| SyncError::Adapter(e.to_string()))?;

            let stale = self.push(collection, &mut report).await?;
            if stale == 0 {
                break;
            }
            if round == MAX_ROUNDS {
                warn!(
                    "{} writes to {} still stale after {} rounds; leaving them pending",
                    stale, name, MAX_ROUNDS
                );
                break;
            }
            debug!("Pulling {} again after {} stale writes", name, stale);
            let (remote, high_water) = self.pull(collection).await?;
            apply_remote(store, &resolver, remote, high_water, &mut report).await?;
        }
        Ok(report)
    }

    fn open_collection(&self, control: &ControlData, name: &str) -> SyncResult<CollectionState> {
        Ok(CollectionState {
            client: RemoteCollectionClient::new(name, self.transport.clone()),
            store: self.stores.open(name)?,
            bundle: control.bundle_for(&self.root, name)?,
        })
    }

    /// Fetches everything newer than the high-water mark and decrypts it.
    /// Returns the changes oldest first and the newest timestamp seen.
    async fn pull(
        &self,
        collection: &CollectionState,
    ) -> SyncResult<(Vec<RemoteChange>, ServerTimestamp)> {
        let mark = collection.store.last_modified()?;
        // `_since` is sent even at zero so tombstones are included.
        let fetched = collection.client.fetch(Some(mark)).await?;

        let mut high_water = mark;
        let mut changes = Vec::with_capacity(fetched.len());
        for wire in fetched {
            high_water = high_water.max(wire.last_modified);
            if wire.deleted {
                changes.push(RemoteChange::Tombstone { id: wire.id });
                continue;
            }
            let encrypted = EncryptedRecord::from_wire(&wire)?;
            let record = decrypt_record(&encrypted, &collection.bundle)?;
            changes.push(RemoteChange::Record {
                record,
                modified: wire.last_modified,
            });
        }
        Ok((changes, high_water))
    }

    /// Uploads pending writes, then pending deletions. Returns how many were
    /// refused as stale; those stay pending.
    async fn push(
        &self,
        collection: &CollectionState,
        report: &mut CollectionReport,
    ) -> SyncResult<usize> {
        let pending = collection.store.pending()?;
        let mut stale = 0;

        let writes = pending
            .iter()
            .filter(|r| matches!(r.status, SyncStatus::Created | SyncStatus::Updated));
        for stored in writes {
            let encrypted = encrypt_record(&stored.record, &collection.bundle, stored.modified)?;
            match collection.client.push(&encrypted, if_match(stored)).await? {
                WriteOutcome::Stored(modified) => {
                    collection.store.mark_synced(stored.id(), modified)?;
                    report.pushed += 1;
                }
                WriteOutcome::Stale => stale += 1,
            }
        }

        for stored in pending.iter().filter(|r| r.status == SyncStatus::Deleted) {
            match collection.client.delete(stored.id(), if_match(stored)).await? {
                WriteOutcome::Stored(_) => {
                    collection.store.delete(stored.id())?;
                    report.deleted += 1;
                }
                WriteOutcome::Stale => stale += 1,
            }
        }

        report.stale_writes += stale;
        Ok(stale)
    }
}

/// The version a pending write expects to replace. Records that never
/// reached the server are written unconditionally.
fn if_match(stored: &StoredRecord) -> Option<ServerTimestamp> {
    match stored.status {
        SyncStatus::Created => None,
        _ if stored.modified == ServerTimestamp::ZERO => None,
        _ => Some(stored.modified),
    }
}

/// Merges pulled changes, oldest first, then advances the high-water mark.
async fn apply_remote(
    store: &dyn LocalStore,
    resolver: &ConflictResolver,
    remote: Vec<RemoteChange>,
    high_water: ServerTimestamp,
    report: &mut CollectionReport,
) -> SyncResult<()> {
    for change in remote {
        merge(store, resolver, change, report).await?;
    }
    store.set_last_modified(high_water)?;
    Ok(())
}

/// Records the adapter's changes in the store as pending.
fn stage_changes(store: &dyn LocalStore, changes: &AdapterChangeSet) -> SyncResult<()> {
    for record in changes.created.iter().chain(&changes.updated) {
        let (status, modified) = match store.get(&record.id)? {
            Some(existing) if existing.status == SyncStatus::Created => {
                (SyncStatus::Created, existing.modified)
            }
            Some(existing) => (SyncStatus::Updated, existing.modified),
            None => (SyncStatus::Created, ServerTimestamp::ZERO),
        };
        store.put(StoredRecord::pending(record.clone(), status, modified))?;
    }

    for id in &changes.deleted {
        match store.get(id)? {
            // Never reached the server; nothing to delete remotely.
            Some(existing) if existing.status == SyncStatus::Created => {
                store.delete(id)?;
            }
            Some(existing) => {
                store.put(StoredRecord::pending(
                    existing.record,
                    SyncStatus::Deleted,
                    existing.modified,
                ))?;
            }
            None => debug!("Ignoring deletion of unknown record {}", id),
        }
    }
    Ok(())
}

/// Applies one remote change to the store.
async fn merge(
    store: &dyn LocalStore,
    resolver: &ConflictResolver,
    change: RemoteChange,
    report: &mut CollectionReport,
) -> SyncResult<()> {
    match change {
        RemoteChange::Record { record, modified } => match store.get(&record.id)? {
            None => {
                debug!("Inserting remote record {}", record.id);
                store.put(StoredRecord::synced(record, modified))?;
                report.pulled += 1;
            }
            Some(local) if local.modified == modified => {
                debug!("Ignoring echo of {}", record.id);
            }
            Some(local) if ConflictResolver::is_conflict(&local, modified) => {
                let resolved = resolver.resolve(&local, &record, modified).await?;
                store.put(resolved)?;
                report.conflicts += 1;
            }
            Some(local) if local.status == SyncStatus::Synced && modified > local.modified => {
                debug!("Replacing {} with newer remote version", record.id);
                store.put(StoredRecord::synced(record, modified))?;
                report.pulled += 1;
            }
            Some(_) => debug!("Ignoring stale remote version of {}", record.id),
        },
        RemoteChange::Tombstone { id } => match store.get(&id)? {
            Some(local) if matches!(local.status, SyncStatus::Synced | SyncStatus::Deleted) => {
                debug!("Removing {} deleted remotely", id);
                store.delete(&id)?;
                report.pulled += 1;
            }
            Some(local) => {
                debug!("Keeping pending local change to {} over remote deletion", id);
                // The server copy is gone, so the record is recreated.
                if local.status == SyncStatus::Updated {
                    store.put(StoredRecord::pending(
                        local.record,
                        SyncStatus::Created,
                        ServerTimestamp::ZERO,
                    ))?;
                }
            }
            None => {}
        },
    }
    Ok(())
}
