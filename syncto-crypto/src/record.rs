//! Whole-record encryption.

use crate::cipher::{decrypt_payload, encrypt_payload};
use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyBundle;
use syncto_types::{EncryptedRecord, PlainRecord, RecordId, ServerTimestamp};

/// Serializes and encrypts a record. The id must satisfy the record id
/// schema; `modified` is carried on the envelope and is replaced by the
/// server on upload.
pub fn encrypt_record(
    record: &PlainRecord,
    bundle: &KeyBundle,
    modified: ServerTimestamp,
) -> CryptoResult<EncryptedRecord> {
    record
        .record_id()
        .map_err(|e| CryptoError::InvalidRecord(e.to_string()))?;
    let plaintext = record
        .to_json_bytes()
        .map_err(|e| CryptoError::InvalidRecord(e.to_string()))?;
    let payload = encrypt_payload(bundle, &plaintext)?;
    Ok(EncryptedRecord {
        id: record.id.clone(),
        modified,
        payload,
    })
}

/// Verifies, decrypts and parses a record.
///
/// The decrypted body must be a JSON object whose `id` equals the envelope id
/// and satisfies the record id schema.
pub fn decrypt_record(record: &EncryptedRecord, bundle: &KeyBundle) -> CryptoResult<PlainRecord> {
    let plaintext = decrypt_payload(bundle, &record.payload)?;
    let plain = PlainRecord::from_json_bytes(&plaintext)
        .map_err(|e| CryptoError::InvalidRecord(format!("record {}: {e}", record.id)))?;

    if plain.id != record.id {
        return Err(CryptoError::InvalidRecord(format!(
            "id mismatch: envelope {}, body {}",
            record.id, plain.id
        )));
    }
    RecordId::parse(&plain.id).map_err(|e| CryptoError::InvalidRecord(e.to_string()))?;

    Ok(plain)
}
