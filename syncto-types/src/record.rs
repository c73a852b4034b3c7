//! Record shapes: plaintext records, encrypted envelopes and the wire form.

use crate::{Error, RecordId, Result, ServerTimestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decrypted record: an id plus arbitrary collection-specific fields.
///
/// Serializes as a single flat JSON object (`{"id": ..., "title": ...}`).
/// The id is not validated on construction; call [`PlainRecord::record_id`]
/// at the boundaries where the schema must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainRecord {
    /// Record id.
    pub id: String,
    /// Every other field of the record.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PlainRecord {
    /// Creates a record with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Creates a record from a JSON object value. Any `id` key inside
    /// `fields` is ignored in favour of `id`.
    pub fn from_fields(id: impl Into<String>, fields: Value) -> Result<Self> {
        match fields {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(Self {
                    id: id.into(),
                    fields: map,
                })
            }
            other => Err(Error::InvalidRecord(format!(
                "record fields must be an object, got {other}"
            ))),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Validates the id against the record id schema.
    pub fn record_id(&self) -> Result<RecordId> {
        RecordId::parse(&self.id)
    }

    /// Serializes the record to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a record from JSON bytes. The top-level value must be an object
    /// with a string `id`.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The encryption envelope carried in a record's `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Base64 initialisation vector (nonce).
    #[serde(rename = "IV")]
    pub iv: String,
    /// Lowercase hex HMAC-SHA256 over the base64 ciphertext.
    pub hmac: String,
}

/// An encrypted record as stored on the remote server.
///
/// Never mutated in place: decrypt, modify, re-encrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRecord {
    /// Record id (plaintext, for indexing).
    pub id: String,
    /// Server modification time.
    pub modified: ServerTimestamp,
    /// Encrypted body.
    pub payload: Payload,
}

impl EncryptedRecord {
    /// Parses the envelope out of a wire record. The wire payload must be a
    /// JSON string holding `{ciphertext, IV, hmac}`.
    pub fn from_wire(wire: &WireRecord) -> Result<Self> {
        let payload: Payload = serde_json::from_str(&wire.payload)
            .map_err(|e| Error::MalformedPayload(format!("record {}: {e}", wire.id)))?;
        Ok(Self {
            id: wire.id.clone(),
            modified: wire.last_modified,
            payload,
        })
    }

    /// Converts to the wire form.
    pub fn to_wire(&self) -> Result<WireRecord> {
        Ok(WireRecord {
            id: self.id.clone(),
            last_modified: self.modified,
            payload: serde_json::to_string(&self.payload)?,
            deleted: false,
        })
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A record exactly as exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Record id.
    pub id: String,
    /// Server modification time.
    pub last_modified: ServerTimestamp,
    /// JSON-serialized payload. Empty for tombstones.
    #[serde(default)]
    pub payload: String,
    /// Set on tombstones for records deleted remotely.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl WireRecord {
    /// Creates a tombstone.
    pub fn tombstone(id: impl Into<String>, last_modified: ServerTimestamp) -> Self {
        Self {
            id: id.into(),
            last_modified,
            payload: String::new(),
            deleted: true,
        }
    }
}

/// Local changes an adapter reports since the last sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterChangeSet {
    /// Records created locally.
    pub created: Vec<PlainRecord>,
    /// Records updated locally.
    pub updated: Vec<PlainRecord>,
    /// Ids deleted locally.
    pub deleted: Vec<String>,
}

impl AdapterChangeSet {
    /// Returns true if there is nothing to push.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns the first created or updated id that violates the id schema.
    pub fn first_invalid_id(&self) -> Option<&str> {
        self.created
            .iter()
            .chain(self.updated.iter())
            .map(|r| r.id.as_str())
            .find(|id| !RecordId::is_valid(id))
    }
}
