//! Core type definitions for the Syncto sync engine.
//!
//! This crate defines the collection-agnostic types shared by every layer:
//! - Record identifiers and the id schema every synced record must satisfy
//! - Server timestamps (`last_modified`)
//! - Plain and encrypted record shapes, and the JSON wire form
//! - The change set an adapter reports for the push phase
//!
//! Collection-specific record layouts (history visits, bookmark trees, ...)
//! belong to the adapters that own them, not here.

mod ids;
mod record;
mod timestamp;

pub use ids::{RecordId, RECORD_ID_LEN};
pub use record::{AdapterChangeSet, EncryptedRecord, Payload, PlainRecord, WireRecord};
pub use timestamp::ServerTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
