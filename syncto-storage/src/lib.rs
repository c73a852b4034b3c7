//! Local collection storage for the Syncto sync engine.
//!
//! Each synced collection gets one [`LocalStore`]: an id-keyed set of
//! decrypted records, each tagged with a [`SyncStatus`], plus a high-water
//! mark recording the newest server timestamp already merged.
//!
//! # Architecture
//!
//! - [`LocalStore`] is the narrow capability the engine consumes
//!   (`list`/`get`/`put`/`delete` plus the changeset helpers)
//! - [`MemoryStore`] keeps everything in process; the default for tests
//! - [`SqliteStore`] persists every collection in one SQLite database
//! - [`StoreFactory`] hands the engine one store per collection name

mod error;
mod local;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStore, StoreFactory, StoredRecord, SyncStatus};
pub use memory::{MemoryStore, MemoryStoreFactory};
pub use sqlite::{SqliteStore, SqliteStoreFactory};
