use pretty_assertions::assert_eq;
use serde_json::json;
use syncto_types::{
    AdapterChangeSet, EncryptedRecord, Payload, PlainRecord, ServerTimestamp, WireRecord,
};

fn sample_payload() -> Payload {
    Payload {
        ciphertext: "PP5yNUYwJJoLcsL5o85i6RZf".into(),
        iv: "FmosM+XBNy81/9oEAgI4Uw==".into(),
        hmac: "01a816e4577c6cf3f97b66b4382d0a3e".into(),
    }
}

// ── PlainRecord ───────────────────────────────────────────────────

#[test]
fn plain_record_serializes_flat() {
    let record = PlainRecord::new("_9sCUbahs0ay")
        .with_field("histUri", "https://example.com/")
        .with_field("title", "Example");
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(
        value,
        json!({"id": "_9sCUbahs0ay", "histUri": "https://example.com/", "title": "Example"})
    );
}

#[test]
fn plain_record_parses_flat_object() {
    let bytes = br#"{"id":"_9sCUbahs0ay","visits":[{"date":1,"type":1}]}"#;
    let record = PlainRecord::from_json_bytes(bytes).unwrap();
    assert_eq!(record.id, "_9sCUbahs0ay");
    assert_eq!(record.get("visits"), Some(&json!([{"date": 1, "type": 1}])));
    assert!(record.get("id").is_none());
}

#[test]
fn plain_record_json_bytes_are_flat_and_reversible() {
    let record = PlainRecord::new("_9sCUbahs0ay").with_field("title", "Example");
    let bytes = record.to_json_bytes().unwrap();
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(),
        json!({"id": "_9sCUbahs0ay", "title": "Example"})
    );
    assert_eq!(PlainRecord::from_json_bytes(&bytes).unwrap(), record);
}

#[test]
fn plain_record_requires_string_id() {
    assert!(PlainRecord::from_json_bytes(br#"{"id":{},"title":"x"}"#).is_err());
    assert!(PlainRecord::from_json_bytes(br#"{"title":"x"}"#).is_err());
    assert!(PlainRecord::from_json_bytes(b"[1,2,3]").is_err());
}

#[test]
fn plain_record_from_fields_drops_inner_id() {
    let record = PlainRecord::from_fields("AGyc2XZiNuVL", json!({"id": "other", "a": 1})).unwrap();
    assert_eq!(record.id, "AGyc2XZiNuVL");
    assert_eq!(record.fields.len(), 1);
}

#[test]
fn plain_record_from_fields_rejects_non_object() {
    assert!(PlainRecord::from_fields("AGyc2XZiNuVL", json!(42)).is_err());
}

#[test]
fn record_id_validation_is_explicit() {
    assert!(PlainRecord::new("wrong").record_id().is_err());
    assert!(PlainRecord::new("AGyc2XZiNuVL").record_id().is_ok());
}

// ── Envelope / wire ───────────────────────────────────────────────

#[test]
fn payload_uses_uppercase_iv_key() {
    let value = serde_json::to_value(sample_payload()).unwrap();
    assert!(value.get("IV").is_some());
    assert!(value.get("iv").is_none());
}

#[test]
fn encrypted_record_wire_roundtrip() {
    let record = EncryptedRecord {
        id: "_9sCUbahs0ay".into(),
        modified: ServerTimestamp::from_millis(1_234_567_890_123),
        payload: sample_payload(),
    };
    let wire = record.to_wire().unwrap();
    assert!(!wire.deleted);
    assert_eq!(EncryptedRecord::from_wire(&wire).unwrap(), record);
}

#[test]
fn malformed_wire_payload_is_rejected() {
    let wire = WireRecord {
        id: "global".into(),
        last_modified: ServerTimestamp::from_millis(1),
        payload: "whoopsie!".into(),
        deleted: false,
    };
    let err = EncryptedRecord::from_wire(&wire).unwrap_err();
    assert!(err.to_string().contains("malformed payload"));
}

#[test]
fn wire_record_rejects_non_string_id() {
    let raw = json!({"id": {}, "last_modified": 1, "payload": "{}"});
    assert!(serde_json::from_value::<WireRecord>(raw).is_err());
}

#[test]
fn tombstone_serializes_deleted_flag() {
    let wire = WireRecord::tombstone("_9sCUbahs0ay", ServerTimestamp::from_millis(5));
    let value = serde_json::to_value(&wire).unwrap();
    assert_eq!(value["deleted"], json!(true));

    let parsed: WireRecord =
        serde_json::from_value(json!({"id": "_9sCUbahs0ay", "last_modified": 5, "deleted": true}))
            .unwrap();
    assert_eq!(parsed, wire);
}

// ── ServerTimestamp ───────────────────────────────────────────────

#[test]
fn timestamps_order_by_millis() {
    let a = ServerTimestamp::from_millis(10);
    let b = ServerTimestamp::from_millis(20);
    assert!(a < b);
    assert_eq!(a.max(b), b);
    assert_eq!(ServerTimestamp::ZERO, ServerTimestamp::default());
}

// ── AdapterChangeSet ──────────────────────────────────────────────

#[test]
fn change_set_reports_first_invalid_id() {
    let changes = AdapterChangeSet {
        created: vec![PlainRecord::new("AGyc2XZiNuVL"), PlainRecord::new("wrong")],
        updated: vec![],
        deleted: vec!["msopyVa0ckP_".into()],
    };
    assert_eq!(changes.first_invalid_id(), Some("wrong"));
    assert_eq!(changes.len(), 3);
    assert!(!changes.is_empty());
}

#[test]
fn empty_change_set() {
    let changes = AdapterChangeSet::default();
    assert!(changes.is_empty());
    assert_eq!(changes.first_invalid_id(), None);
}
