//! Key material: the account root secret and per-collection key bundles.
//!
//! Derivation uses HKDF-SHA256 throughout, so it is pure and deterministic:
//! two clients holding the same kB derive identical bundles.

use crate::error::{CryptoError, CryptoResult};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption and HMAC keys in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// HKDF info string for the bundle that unwraps "crypto/keys".
pub const SYNC_KEY_INFO: &[u8] = b"identity.mozilla.com/picl/v1/oldsync";

/// HKDF info prefix used to scope a default key pair to one collection.
const COLLECTION_KEY_INFO_PREFIX: &str = "syncto/v1/collection/";

/// Length of the X-Client-State token in bytes (before hex encoding).
const CLIENT_STATE_LEN: usize = 16;

/// The account root secret (kB) with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    /// Creates a root key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parses a root key from its 64-character hex form.
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let mut decoded = hex::decode(encoded)
            .map_err(|e| CryptoError::InvalidRootKey(format!("not hex: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual,
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// The X-Client-State token for this key: hex of the first 16 bytes of
    /// SHA-256(kB).
    pub fn client_state(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..CLIENT_STATE_LEN])
    }

    /// Derives the bundle that encrypts the "crypto/keys" descriptor.
    pub fn sync_key_bundle(&self) -> CryptoResult<KeyBundle> {
        KeyBundle::expand(&self.bytes, SYNC_KEY_INFO, "crypto")
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encryption and HMAC keys scoped to a single collection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    encryption_key: [u8; KEY_SIZE],
    hmac_key: [u8; KEY_SIZE],
    collection: String,
}

impl KeyBundle {
    /// Creates a bundle from raw key bytes.
    pub fn new(
        collection: impl Into<String>,
        encryption_key: [u8; KEY_SIZE],
        hmac_key: [u8; KEY_SIZE],
    ) -> Self {
        Self {
            encryption_key,
            hmac_key,
            collection: collection.into(),
        }
    }

    /// Generates a random bundle.
    pub fn random(collection: impl Into<String>) -> Self {
        let mut encryption_key = [0u8; KEY_SIZE];
        let mut hmac_key = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut encryption_key);
        rand::rngs::OsRng.fill_bytes(&mut hmac_key);
        Self::new(collection, encryption_key, hmac_key)
    }

    /// Returns the encryption key bytes.
    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    /// Returns the HMAC key bytes.
    pub fn hmac_key(&self) -> &[u8; KEY_SIZE] {
        &self.hmac_key
    }

    /// The collection this bundle is scoped to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Derives a bundle for `collection` from this one, used when the
    /// descriptor only carries a default key pair.
    pub fn scoped_to(&self, collection: &str) -> CryptoResult<KeyBundle> {
        let mut ikm = [0u8; KEY_SIZE * 2];
        ikm[..KEY_SIZE].copy_from_slice(&self.encryption_key);
        ikm[KEY_SIZE..].copy_from_slice(&self.hmac_key);
        let info = format!("{COLLECTION_KEY_INFO_PREFIX}{collection}");
        let bundle = Self::expand(&ikm, info.as_bytes(), collection);
        ikm.zeroize();
        bundle
    }

    /// HKDF-SHA256 expansion into 64 bytes: encryption key then HMAC key.
    pub(crate) fn expand(ikm: &[u8], info: &[u8], collection: &str) -> CryptoResult<Self> {
        let hkdf = Hkdf::<Sha256>::new(None, ikm);
        let mut okm = [0u8; KEY_SIZE * 2];
        hkdf.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let mut encryption_key = [0u8; KEY_SIZE];
        let mut hmac_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&okm[..KEY_SIZE]);
        hmac_key.copy_from_slice(&okm[KEY_SIZE..]);
        okm.zeroize();

        Ok(Self::new(collection, encryption_key, hmac_key))
    }
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle")
            .field("collection", &self.collection)
            .field("encryption_key", &"[REDACTED]")
            .field("hmac_key", &"[REDACTED]")
            .finish()
    }
}
