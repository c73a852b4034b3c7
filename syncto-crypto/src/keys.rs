//! The "crypto/keys" descriptor.
//!
//! The descriptor is stored remotely as record `keys` of the "crypto" control
//! collection, encrypted under the sync key bundle derived from kB. Once
//! opened it yields a default key pair and optional per-collection pairs:
//!
//! ```json
//! {"id": "keys", "collection": "crypto",
//!  "default": ["<enc b64>", "<hmac b64>"],
//!  "collections": {"history": ["<enc b64>", "<hmac b64>"]}}
//! ```

use crate::cipher::{decrypt_payload, encrypt_payload};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KeyBundle, RootKey, KEY_SIZE};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syncto_types::{EncryptedRecord, ServerTimestamp};
use zeroize::Zeroize;

/// Record id of the key descriptor inside the "crypto" collection.
pub const CRYPTO_KEYS_ID: &str = "keys";

#[derive(Serialize, Deserialize)]
struct KeysDocument {
    id: String,
    #[serde(default)]
    collection: Option<String>,
    default: [String; 2],
    #[serde(default)]
    collections: BTreeMap<String, [String; 2]>,
}

/// Opened key descriptor.
#[derive(Clone, Debug)]
pub struct CollectionKeys {
    default: KeyBundle,
    collections: BTreeMap<String, KeyBundle>,
}

impl CollectionKeys {
    /// Generates a descriptor with a random default key pair.
    pub fn generate() -> Self {
        Self {
            default: KeyBundle::random("default"),
            collections: BTreeMap::new(),
        }
    }

    /// Builds a descriptor from an explicit default bundle.
    pub fn new(default: KeyBundle) -> Self {
        Self {
            default,
            collections: BTreeMap::new(),
        }
    }

    /// Adds an explicit key pair for one collection.
    #[must_use]
    pub fn with_collection(mut self, bundle: KeyBundle) -> Self {
        self.collections
            .insert(bundle.collection().to_string(), bundle);
        self
    }

    /// Returns the key bundle for `collection`.
    ///
    /// An explicit pair is used as-is. Otherwise the default pair is expanded
    /// with the collection name, so no two collections share key material.
    pub fn bundle_for(&self, collection: &str) -> CryptoResult<KeyBundle> {
        match self.collections.get(collection) {
            Some(bundle) => Ok(bundle.clone()),
            None => self.default.scoped_to(collection),
        }
    }

    /// Decrypts a descriptor record with the sync key bundle of `root`.
    pub fn open(record: &EncryptedRecord, root: &RootKey) -> CryptoResult<Self> {
        if record.id != CRYPTO_KEYS_ID {
            return Err(CryptoError::MalformedKeys(format!(
                "expected record id {CRYPTO_KEYS_ID}, got {}",
                record.id
            )));
        }
        let sync_bundle = root.sync_key_bundle()?;
        let mut plaintext = decrypt_payload(&sync_bundle, &record.payload)?;
        let parsed: Result<KeysDocument, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let mut doc = parsed.map_err(|e| CryptoError::MalformedKeys(e.to_string()))?;

        let default = decode_pair("default", &doc.default)?;
        let mut collections = BTreeMap::new();
        for (name, pair) in &doc.collections {
            collections.insert(name.clone(), decode_pair(name, pair)?);
        }
        doc.default.iter_mut().for_each(|k| k.zeroize());

        Ok(Self {
            default,
            collections,
        })
    }

    /// Encrypts the descriptor for upload, for bootstrapping a new account.
    pub fn seal(&self, root: &RootKey, modified: ServerTimestamp) -> CryptoResult<EncryptedRecord> {
        let doc = KeysDocument {
            id: CRYPTO_KEYS_ID.to_string(),
            collection: Some("crypto".to_string()),
            default: encode_pair(&self.default),
            collections: self
                .collections
                .iter()
                .map(|(name, bundle)| (name.clone(), encode_pair(bundle)))
                .collect(),
        };
        let mut plaintext = serde_json::to_vec(&doc)?;
        let sync_bundle = root.sync_key_bundle()?;
        let payload = encrypt_payload(&sync_bundle, &plaintext);
        plaintext.zeroize();

        Ok(EncryptedRecord {
            id: CRYPTO_KEYS_ID.to_string(),
            modified,
            payload: payload?,
        })
    }
}

/// Derives the key bundle for `collection` from the root secret and the
/// encrypted "crypto/keys" descriptor. Pure and deterministic.
pub fn derive_key_bundle(
    root: &RootKey,
    descriptor: &EncryptedRecord,
    collection: &str,
) -> CryptoResult<KeyBundle> {
    CollectionKeys::open(descriptor, root)?.bundle_for(collection)
}

fn decode_pair(collection: &str, pair: &[String; 2]) -> CryptoResult<KeyBundle> {
    let enc = decode_key(&pair[0])?;
    let hmac = decode_key(&pair[1])?;
    Ok(KeyBundle::new(collection, enc, hmac))
}

fn decode_key(encoded: &str) -> CryptoResult<[u8; KEY_SIZE]> {
    let mut bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::MalformedKeys(format!("invalid key encoding: {e}")))?;
    if bytes.len() != KEY_SIZE {
        let actual = bytes.len();
        bytes.zeroize();
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual,
        });
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(key)
}

fn encode_pair(bundle: &KeyBundle) -> [String; 2] {
    [
        STANDARD.encode(bundle.encryption_key()),
        STANDARD.encode(bundle.hmac_key()),
    ]
}
