//! Engine construction options.
//!
//! [`SyncOptions`] carries one credential set and serializes with the field
//! names the server-side tooling uses (`URL`, `assertion`, `xClientState`,
//! `kB`). [`SyncConfig`] holds tuning knobs with sensible defaults.

use crate::error::ConfigError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use syncto_crypto::RootKey;

/// Name of the metadata control collection.
pub const META_COLLECTION: &str = "meta";

/// Name of the key control collection.
pub const CRYPTO_COLLECTION: &str = "crypto";

/// Storage format version this engine understands.
pub const STORAGE_VERSION: u64 = 5;

/// Credentials for one account on one sync server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Base URL of the server, e.g. `https://syncto.example.com/v1/`.
    #[serde(rename = "URL")]
    pub url: String,
    /// BrowserID assertion sent in the `Authorization` header.
    pub assertion: String,
    /// Lowercase hex of the first 16 bytes of SHA-256(kB).
    #[serde(rename = "xClientState")]
    pub x_client_state: String,
    /// Root secret, 32 bytes as hex.
    #[serde(rename = "kB")]
    pub kb: String,
}

impl SyncOptions {
    /// Creates options from already-typed fields.
    pub fn new(
        url: impl Into<String>,
        assertion: impl Into<String>,
        x_client_state: impl Into<String>,
        kb: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            assertion: assertion.into(),
            x_client_state: x_client_state.into(),
            kb: kb.into(),
        }
    }

    /// Parses options out of an untyped JSON value, reporting the first
    /// offending field.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;

        let field = |name: &'static str| -> Result<String, ConfigError> {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(ConfigError::NotAString(name))
        };

        let url = field("URL")?;
        let assertion = field("assertion")?;
        let x_client_state = field("xClientState")?;
        let kb = field("kB")?;

        if let Some(adapters) = object.get("adapters") {
            if !adapters.is_object() {
                return Err(ConfigError::AdaptersNotAnObject);
            }
        }

        Ok(Self {
            url,
            assertion,
            x_client_state,
            kb,
        })
    }

    /// Checks the URL and the root key, returning the parsed key.
    pub fn validate(&self) -> Result<RootKey, ConfigError> {
        let url = Url::parse(&self.url).map_err(|_| ConfigError::InvalidUrl)?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl);
        }
        RootKey::from_hex(&self.kb).map_err(|_| ConfigError::InvalidRootKey)
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("url", &self.url)
            .field("assertion", &"[REDACTED]")
            .field("x_client_state", &self.x_client_state)
            .field("kb", &"[REDACTED]")
            .finish()
    }
}

/// Tuning for a sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Timeout for each HTTP request (ms).
    pub request_timeout_ms: u64,
    /// Required `storageVersion` in meta/global.
    pub storage_version: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            storage_version: STORAGE_VERSION,
        }
    }
}

/// Returns true for the names of the control collections.
pub fn is_control_collection(name: &str) -> bool {
    name == META_COLLECTION || name == CRYPTO_COLLECTION
}

pub(crate) fn check_collection_name(name: &str) -> Result<(), ConfigError> {
    if is_control_collection(name) {
        return Err(ConfigError::ReservedCollection(name.to_string()));
    }
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ConfigError::InvalidCollectionName(name.to_string()));
    }
    Ok(())
}
