//! Encrypted collection sync for Syncto.
//!
//! Keeps named collections (history, bookmarks, passwords, ...) in sync
//! between a local store and a Kinto-style record server. Every record is
//! encrypted client-side under keys derived from the account's kB.
//!
//! # Architecture
//!
//! - **Config**: credentials ([`SyncOptions`]) and tuning ([`SyncConfig`])
//! - **Transport**: raw record requests ([`SyncTransport`], [`HttpTransport`])
//! - **Client**: classifies responses into typed errors ([`RemoteCollectionClient`])
//! - **Control**: loads meta/global and crypto/keys ([`ControlCollectionLoader`])
//! - **Adapter**: the application side of a collection ([`DataAdapter`])
//! - **Conflict**: defers collisions to the adapter ([`ConflictResolver`])
//! - **Engine**: orchestrates all of the above ([`SyncEngine`])
//!
//! ## Sync Process
//!
//! 1. **Control**: fetch meta/global and crypto/keys once per engine
//! 2. **Pull**: fetch records newer than the local high-water mark and decrypt them
//! 3. **Stage**: collect the adapter's local changes and mark them pending
//! 4. **Merge**: apply remote changes; pending local edits go to the adapter
//! 5. **Update**: hand the merged collection to the adapter
//! 6. **Push**: encrypt and upload pending writes, then deletions. Writes to
//!    records the server already has carry `If-Match`; if one is refused the
//!    collection is pulled and merged again before retrying
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use syncto_sync::adapter::mock::MockAdapter;
//! use syncto_sync::{SyncEngine, SyncOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SyncOptions::new(
//!     "https://syncto.example.com/v1/",
//!     "assertion",
//!     "6ae94683571c7a7c54dab4700aa3995f",
//!     "fd5c747806c07ce0b9d69dcfea144663e630b65ec4963596a22f24910d7dd15d",
//! );
//! let engine = SyncEngine::builder(options)
//!     .adapter("history", Arc::new(MockAdapter::new()))
//!     .build()?;
//!
//! let reports = engine.sync_now(&["history"]).await?;
//! println!("pulled {} history records", reports[0].pulled);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
mod client;
mod config;
mod conflict;
mod control;
mod engine;
mod error;
mod http;
pub mod transport;

pub use adapter::{AdapterError, AdapterResult, DataAdapter};
pub use client::{classify_status, RemoteCollectionClient, WriteOutcome};
pub use config::{
    is_control_collection, SyncConfig, SyncOptions, CRYPTO_COLLECTION, META_COLLECTION,
    STORAGE_VERSION,
};
pub use conflict::ConflictResolver;
pub use control::{ControlCollectionLoader, ControlData, EngineMeta, MetaGlobal, META_GLOBAL_ID};
pub use engine::{CollectionReport, SyncEngine, SyncEngineBuilder};
pub use error::{ConfigError, ErrorKind, SyncError, SyncResult};
pub use http::{HttpTransport, HttpTransportConfig};
pub use transport::{
    SyncTransport, TransportResponse, STATUS_PRECONDITION_FAILED, STATUS_UNREACHABLE,
};
