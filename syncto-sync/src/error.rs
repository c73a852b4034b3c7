//! Error types for the sync layer.
//!
//! Two channels stay separate: [`ConfigError`] is only ever returned while
//! building an engine, [`SyncError`] from everything that happens during
//! `sync_now`.

use syncto_crypto::CryptoError;
use syncto_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Invalid construction options. Messages name the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The options value is not a JSON object.
    #[error("options should be an Object")]
    NotAnObject,

    /// A required credential is missing or not a string.
    #[error("options.{0} should be a String")]
    NotAString(&'static str),

    /// `adapters` was given but is not an object.
    #[error("options.adapters should be an Object")]
    AdaptersNotAnObject,

    /// `kB` is not 64 hex characters.
    #[error("options.kB should be a hex String")]
    InvalidRootKey,

    /// `URL` is not an absolute http(s) URL.
    #[error("options.URL should be a valid URL")]
    InvalidUrl,

    /// An adapter was registered under "meta" or "crypto".
    #[error("options.adapters.{0} is a reserved collection")]
    ReservedCollection(String),

    /// An adapter name is not a usable collection name.
    #[error("options.adapters.{0} is not a valid collection name")]
    InvalidCollectionName(String),

    /// The HTTP client could not be constructed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Coarse classification of a [`SyncError`], for callers deciding what to
/// tell the user and whether to schedule a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials were rejected. Re-authenticate before retrying.
    Auth,
    /// Transient failure. Retrying later may succeed.
    Recoverable,
    /// Remote data is unusable. Retrying will not help.
    Unrecoverable,
    /// The call itself was invalid.
    Validation,
    /// Another sync is already running on this engine.
    Busy,
    /// An adapter reported a failure.
    Adapter,
    /// The local store failed.
    Storage,
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server rejected the credentials, or `xClientState` does not match `kB`.
    #[error("unauthorized")]
    Unauthorized { reason: String },

    /// Transient failure (network, 404, throttling, 5xx).
    #[error("try later")]
    TryLater { status: u16 },

    /// Malformed payload, hmac or ciphertext mismatch, bad id, bad control data.
    #[error("unrecoverable")]
    Unrecoverable { reason: String },

    /// An adapter reported a record whose id violates the id schema.
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// No adapter is registered for the requested collection.
    #[error("no adapter registered for collection: {0}")]
    UnknownCollection(String),

    /// `sync_now` was called while another call was still running.
    #[error("sync already in progress")]
    SyncInProgress,

    /// An adapter returned an error.
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Shorthand for [`SyncError::Unrecoverable`].
    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self::Unrecoverable {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`SyncError::Unauthorized`].
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Returns the error's classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Auth,
            Self::TryLater { .. } => ErrorKind::Recoverable,
            Self::Unrecoverable { .. } => ErrorKind::Unrecoverable,
            Self::InvalidId(_) | Self::UnknownCollection(_) => ErrorKind::Validation,
            Self::SyncInProgress => ErrorKind::Busy,
            Self::Adapter(_) => ErrorKind::Adapter,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True only for transient failures.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Recoverable
    }

    /// The detail carried by auth and unrecoverable errors, for logs.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { reason } | Self::Unrecoverable { reason } => Some(reason),
            _ => None,
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        Self::unrecoverable(err.to_string())
    }
}

impl From<syncto_types::Error> for SyncError {
    fn from(err: syncto_types::Error) -> Self {
        Self::unrecoverable(err.to_string())
    }
}
