mod common;

use common::raw;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use syncto_sync::transport::mock::{MockRequest, MockTransport, MOCK_EPOCH};
use syncto_sync::{
    ErrorKind, RemoteCollectionClient, SyncError, SyncTransport, TransportResponse, WriteOutcome,
    STATUS_PRECONDITION_FAILED,
};
use syncto_types::{EncryptedRecord, Payload, ServerTimestamp, WireRecord};

fn body_ids(response: &TransportResponse) -> Vec<String> {
    let value: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    value["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

fn encrypted(id: &str) -> EncryptedRecord {
    EncryptedRecord {
        id: id.to_string(),
        modified: ServerTimestamp::ZERO,
        payload: Payload {
            ciphertext: "Y2lwaGVydGV4dA==".into(),
            iv: "AAAAAAAAAAAAAAAA".into(),
            hmac: "00".into(),
        },
    }
}

// ── MockTransport ───────────────────────────────────────────────

#[tokio::test]
async fn timestamps_increase_strictly() {
    let transport = MockTransport::new();
    let a = transport.insert("history", raw("a", "{}"));
    let b = transport.insert("history", raw("b", "{}"));
    assert!(a.as_millis() > MOCK_EPOCH);
    assert!(b > a);

    let response = transport.put_record("history", &raw("c", "{}"), None).await;
    let stored: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert!(stored["data"]["last_modified"].as_u64().unwrap() > b.as_millis());
}

#[tokio::test]
async fn get_filters_by_since_and_sorts_newest_first() {
    let transport = MockTransport::new();
    transport.insert("history", raw("a", "{}"));
    let b = transport.insert("history", raw("b", "{}"));
    transport.insert("history", raw("c", "{}"));

    let all = transport.get_records("history", None).await;
    assert_eq!(all.status, 200);
    assert_eq!(body_ids(&all), vec!["c", "b", "a"]);

    let newer = transport.get_records("history", Some(b)).await;
    assert_eq!(body_ids(&newer), vec!["c"]);
}

#[tokio::test]
async fn unknown_collection_is_empty() {
    let transport = MockTransport::new();
    let response = transport.get_records("tabs", None).await;
    assert_eq!(response.status, 200);
    assert!(body_ids(&response).is_empty());
}

#[tokio::test]
async fn deletes_leave_tombstones_for_since_queries() {
    let transport = MockTransport::new();
    let created = transport.insert("history", raw("a", "{}"));

    let response = transport.delete_record("history", "a", None).await;
    assert_eq!(response.status, 200);
    assert!(transport.records("history").is_empty());
    assert!(transport.record("history", "a").unwrap().deleted);

    let full = transport.get_records("history", None).await;
    assert!(body_ids(&full).is_empty());
    let since = transport.get_records("history", Some(created)).await;
    assert_eq!(body_ids(&since), vec!["a"]);
}

#[tokio::test]
async fn deleting_a_missing_record_is_404() {
    let transport = MockTransport::new();
    assert_eq!(transport.delete_record("history", "nope", None).await.status, 404);
}

#[tokio::test]
async fn overrides_replace_responses_until_cleared() {
    let transport = MockTransport::new();
    transport.set_response("meta", TransportResponse::new(503, ""));
    assert_eq!(transport.get_records("meta", None).await.status, 503);
    assert_eq!(transport.get_records("crypto", None).await.status, 200);

    transport.clear_response("meta");
    assert_eq!(transport.get_records("meta", None).await.status, 200);
}

#[tokio::test]
async fn requests_are_logged_in_order() {
    let transport = MockTransport::new();
    transport.get_records("history", None).await;
    transport.put_record("history", &raw("a", "{}"), None).await;
    transport.delete_record("history", "a", None).await;

    assert_eq!(
        transport.requests(),
        vec![
            MockRequest::Get {
                collection: "history".into(),
                since: None
            },
            MockRequest::Put {
                collection: "history".into(),
                id: "a".into(),
                if_match: None,
            },
            MockRequest::Delete {
                collection: "history".into(),
                id: "a".into(),
                if_match: None,
            },
        ]
    );
    assert_eq!(transport.put_count("history"), 1);
    assert_eq!(transport.put_count("bookmarks"), 0);
}

#[tokio::test]
async fn conditional_writes_need_the_current_timestamp() {
    let transport = MockTransport::new();
    let created = transport.insert("history", raw("a", "{}"));
    let stale = ServerTimestamp::from_millis(created.as_millis() - 1);

    let refused = transport.put_record("history", &raw("a", "{}"), Some(stale)).await;
    assert_eq!(refused.status, STATUS_PRECONDITION_FAILED);
    assert_eq!(transport.record("history", "a").unwrap().last_modified, created);

    let accepted = transport.put_record("history", &raw("a", "{}"), Some(created)).await;
    assert_eq!(accepted.status, 200);

    let current = transport.record("history", "a").unwrap().last_modified;
    let refused = transport.delete_record("history", "a", Some(created)).await;
    assert_eq!(refused.status, STATUS_PRECONDITION_FAILED);
    let accepted = transport.delete_record("history", "a", Some(current)).await;
    assert_eq!(accepted.status, 200);
}

#[tokio::test]
async fn conditional_writes_to_deleted_records_are_refused() {
    let transport = MockTransport::new();
    let created = transport.insert("history", raw("a", "{}"));
    transport.remove("history", "a");

    let put = transport.put_record("history", &raw("a", "{}"), Some(created)).await;
    assert_eq!(put.status, STATUS_PRECONDITION_FAILED);
    let delete = transport.delete_record("history", "a", Some(created)).await;
    assert_eq!(delete.status, STATUS_PRECONDITION_FAILED);
    let missing = transport.delete_record("history", "b", Some(created)).await;
    assert_eq!(missing.status, STATUS_PRECONDITION_FAILED);
}

#[tokio::test]
async fn racing_write_lands_before_the_next_write_only() {
    let transport = MockTransport::new();
    let created = transport.insert("history", raw("a", "{}"));
    transport.race_next_write("history", raw("a", r#"{"other":"device"}"#));

    let first = transport.put_record("history", &raw("a", "{}"), Some(created)).await;
    assert_eq!(first.status, STATUS_PRECONDITION_FAILED);
    let raced = transport.record("history", "a").unwrap();
    assert!(raced.last_modified > created);
    assert_eq!(raced.payload, r#"{"other":"device"}"#);

    let second = transport
        .put_record("history", &raw("a", "{}"), Some(raced.last_modified))
        .await;
    assert_eq!(second.status, 200);
}

// ── RemoteCollectionClient ──────────────────────────────────────

#[tokio::test]
async fn fetch_returns_oldest_first() {
    let transport = Arc::new(MockTransport::new());
    transport.insert("history", raw("a", "{}"));
    transport.insert("history", raw("b", "{}"));
    let client = RemoteCollectionClient::new("history", transport);

    let records = client.fetch(None).await.unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(records[0].last_modified < records[1].last_modified);
}

#[tokio::test]
async fn push_returns_server_timestamp() {
    let transport = Arc::new(MockTransport::new());
    let client = RemoteCollectionClient::new("history", transport.clone());

    let outcome = client.push(&encrypted("rec000000001"), None).await.unwrap();
    let stored = transport.record("history", "rec000000001").unwrap();
    assert_eq!(outcome, WriteOutcome::Stored(stored.last_modified));
    assert_eq!(EncryptedRecord::from_wire(&stored).unwrap().payload, encrypted("x").payload);
}

#[tokio::test]
async fn delete_returns_tombstone_timestamp() {
    let transport = Arc::new(MockTransport::new());
    let created = transport.insert("history", raw("a", "{}"));
    let client = RemoteCollectionClient::new("history", transport);

    let WriteOutcome::Stored(deleted) = client.delete("a", None).await.unwrap() else {
        panic!("unconditional delete reported stale");
    };
    assert!(deleted > created);
}

#[tokio::test]
async fn client_reports_stale_conditional_writes() {
    let transport = Arc::new(MockTransport::new());
    let created = transport.insert("history", raw("rec000000001", "{}"));
    transport.insert("history", raw("a", "{}"));
    let client = RemoteCollectionClient::new("history", transport.clone());
    let old = ServerTimestamp::from_millis(created.as_millis() - 1);

    assert_eq!(
        client.push(&encrypted("rec000000001"), Some(old)).await.unwrap(),
        WriteOutcome::Stale
    );
    assert_eq!(client.delete("a", Some(old)).await.unwrap(), WriteOutcome::Stale);
    assert_eq!(
        transport.requests().last(),
        Some(&MockRequest::Delete {
            collection: "history".into(),
            id: "a".into(),
            if_match: Some(old),
        })
    );
}

#[tokio::test]
async fn unconditional_412_is_an_error() {
    let transport = Arc::new(MockTransport::new());
    let client = RemoteCollectionClient::new("history", transport.clone());
    transport.set_response(
        "history",
        TransportResponse::new(STATUS_PRECONDITION_FAILED, "{}"),
    );

    let err = client.push(&encrypted("rec000000001"), None).await.unwrap_err();
    assert!(matches!(err, SyncError::TryLater { status: 412 }));
}

#[tokio::test]
async fn client_classifies_statuses() {
    let transport = Arc::new(MockTransport::new());
    let client = RemoteCollectionClient::new("history", transport.clone());

    let cases = [
        (401, ErrorKind::Auth),
        (403, ErrorKind::Auth),
        (0, ErrorKind::Recoverable),
        (404, ErrorKind::Recoverable),
        (429, ErrorKind::Recoverable),
        (500, ErrorKind::Recoverable),
        (503, ErrorKind::Recoverable),
    ];
    for (status, kind) in cases {
        transport.set_response("history", TransportResponse::new(status, "{}"));
        assert_eq!(client.fetch(None).await.unwrap_err().kind(), kind, "fetch {status}");
        assert_eq!(
            client.push(&encrypted("rec000000001"), None).await.unwrap_err().kind(),
            kind,
            "push {status}"
        );
        assert_eq!(client.delete("a", None).await.unwrap_err().kind(), kind, "delete {status}");
    }
}

#[tokio::test]
async fn malformed_bodies_are_unrecoverable() {
    let transport = Arc::new(MockTransport::new());
    let client = RemoteCollectionClient::new("history", transport.clone());

    for body in [
        "not json",
        r#"{"records": []}"#,
        r#"{"data": [{"id": {}, "last_modified": 1, "payload": "{}"}]}"#,
        r#"{"data": [{"id": "a", "last_modified": "yesterday"}]}"#,
    ] {
        transport.set_response("history", TransportResponse::ok(body));
        let err = client.fetch(None).await.unwrap_err();
        assert!(matches!(err, SyncError::Unrecoverable { .. }), "body {body}");
    }
}

#[tokio::test]
async fn fetch_passes_since_through() {
    let transport = Arc::new(MockTransport::new());
    let client = RemoteCollectionClient::new("history", transport.clone());
    let since = ServerTimestamp::from_millis(42);

    client.fetch(Some(since)).await.unwrap();
    assert_eq!(
        transport.requests(),
        vec![MockRequest::Get {
            collection: "history".into(),
            since: Some(since)
        }]
    );
}

#[tokio::test]
async fn tombstones_parse_without_payload() {
    let transport = Arc::new(MockTransport::new());
    transport.insert_raw(
        "history",
        WireRecord::tombstone("a", ServerTimestamp::from_millis(MOCK_EPOCH + 10)),
    );
    let client = RemoteCollectionClient::new("history", transport);

    let records = client.fetch(Some(ServerTimestamp::ZERO)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].deleted);
    assert!(records[0].payload.is_empty());
}
