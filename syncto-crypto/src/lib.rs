//! Encryption layer for the Syncto sync engine.
//!
//! - [`key`]: the root secret (kB), per-collection key bundles and HKDF derivation
//! - [`cipher`]: the `{ciphertext, IV, hmac}` envelope (encrypt-then-MAC)
//! - [`keys`]: the "crypto/keys" descriptor that wraps collection keys
//! - [`record`]: whole-record encryption and decryption
//!
//! Every decryption failure is fail-closed: a record that does not verify is
//! never partially trusted.

pub mod cipher;
mod error;
pub mod key;
pub mod keys;
pub mod record;

pub use cipher::{decrypt_payload, encrypt_payload, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{KeyBundle, RootKey, KEY_SIZE, SYNC_KEY_INFO};
pub use keys::{derive_key_bundle, CollectionKeys, CRYPTO_KEYS_ID};
pub use record::{decrypt_record, encrypt_record};
