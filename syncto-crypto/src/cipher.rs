//! The `{ciphertext, IV, hmac}` envelope.
//!
//! Bodies are sealed with ChaCha20-Poly1305 under the bundle's encryption key
//! and a fresh random IV. The base64 ciphertext is then authenticated with
//! HMAC-SHA256 under the bundle's HMAC key. Decryption checks the HMAC first
//! and refuses to touch the ciphertext if it does not verify.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyBundle;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use syncto_types::Payload;

type HmacSha256 = Hmac<Sha256>;

/// Size of the IV in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the AEAD authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts `plaintext` into an envelope.
pub fn encrypt_payload(bundle: &KeyBundle, plaintext: &[u8]) -> CryptoResult<Payload> {
    let cipher = ChaCha20Poly1305::new(bundle.encryption_key().into());

    let mut iv = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = STANDARD.encode(ciphertext);
    let hmac = hex::encode(compute_hmac(bundle, &ciphertext)?);

    Ok(Payload {
        ciphertext,
        iv: STANDARD.encode(iv),
        hmac,
    })
}

/// Verifies and decrypts an envelope.
pub fn decrypt_payload(bundle: &KeyBundle, payload: &Payload) -> CryptoResult<Vec<u8>> {
    verify_hmac(bundle, payload)?;

    let iv = STANDARD
        .decode(&payload.iv)
        .map_err(|e| CryptoError::Decryption(format!("invalid IV encoding: {e}")))?;
    if iv.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: iv.len(),
        });
    }

    let ciphertext = STANDARD
        .decode(&payload.ciphertext)
        .map_err(|e| CryptoError::Decryption(format!("invalid ciphertext encoding: {e}")))?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption("data too short".to_string()));
    }

    let cipher = ChaCha20Poly1305::new(bundle.encryption_key().into());
    cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| {
            CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
        })
}

fn compute_hmac(bundle: &KeyBundle, ciphertext_b64: &str) -> CryptoResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(bundle.hmac_key())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    mac.update(ciphertext_b64.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_hmac(bundle: &KeyBundle, payload: &Payload) -> CryptoResult<()> {
    // An undecodable tag is indistinguishable from a wrong one.
    let expected = hex::decode(&payload.hmac).map_err(|_| CryptoError::HmacMismatch)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(bundle.hmac_key())
        .map_err(|_| CryptoError::HmacMismatch)?;
    mac.update(payload.ciphertext.as_bytes());
    mac.verify_slice(&expected).map_err(|_| CryptoError::HmacMismatch)
}
