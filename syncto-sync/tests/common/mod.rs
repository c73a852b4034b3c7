//! Shared fixtures: one account, one in-memory server seeded with valid
//! control collections.

#![allow(dead_code)]

use std::sync::Arc;
use syncto_crypto::{decrypt_record, encrypt_record, CollectionKeys, KeyBundle, RootKey};
use syncto_sync::adapter::mock::MockAdapter;
use syncto_sync::transport::mock::MockTransport;
use syncto_sync::{MetaGlobal, SyncEngine, SyncOptions, STORAGE_VERSION};
use syncto_types::{EncryptedRecord, PlainRecord, ServerTimestamp, WireRecord};

pub const KB: &str = "fd5c747806c07ce0b9d69dcfea144663e630b65ec4963596a22f24910d7dd15d";
pub const CLIENT_STATE: &str = "6ae94683571c7a7c54dab4700aa3995f";
pub const URL: &str = "http://localhost:8000/v1/";
pub const ASSERTION: &str = "test-assertion";

/// Routes engine logs to the test output; `RUST_LOG=debug` shows record decisions.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options() -> SyncOptions {
    SyncOptions::new(URL, ASSERTION, CLIENT_STATE, KB)
}

pub fn root() -> RootKey {
    RootKey::from_hex(KB).unwrap()
}

pub fn default_meta() -> MetaGlobal {
    MetaGlobal::new("NOuEmrGN4sbl", STORAGE_VERSION)
        .with_engine("history", 1, "ll6aNb3CqdS5")
        .with_engine("bookmarks", 2, "fQVBu6wVsvBY")
        .with_engine("passwords", 1, "O3AGrWXZM8D5")
}

/// A 12-character id that satisfies the record id schema.
pub fn id(n: u32) -> String {
    format!("rec{n:09}")
}

pub fn history_record(id: &str, title: &str) -> PlainRecord {
    PlainRecord::new(id)
        .with_field("title", title)
        .with_field("histUri", format!("https://example.com/{id}"))
}

/// A wire record carrying an arbitrary payload.
pub fn raw(id: &str, payload: &str) -> WireRecord {
    WireRecord {
        id: id.to_string(),
        last_modified: ServerTimestamp::ZERO,
        payload: payload.to_string(),
        deleted: false,
    }
}

pub struct Server {
    pub transport: Arc<MockTransport>,
    pub keys: CollectionKeys,
}

impl Server {
    /// A server with meta/global listing history, bookmarks and passwords.
    pub fn new() -> Self {
        Self::with_meta(default_meta())
    }

    pub fn with_meta(meta: MetaGlobal) -> Self {
        let server = Self::without_control();
        server
            .transport
            .insert("meta", meta.to_wire(ServerTimestamp::ZERO).unwrap());
        server.seal_keys();
        server
    }

    /// A server with nothing on it; control collections must be added by hand.
    pub fn without_control() -> Self {
        init_tracing();
        Self {
            transport: Arc::new(MockTransport::new()),
            keys: CollectionKeys::generate(),
        }
    }

    pub fn seal_keys(&self) {
        let sealed = self.keys.seal(&root(), ServerTimestamp::ZERO).unwrap();
        self.transport.insert("crypto", sealed.to_wire().unwrap());
    }

    pub fn bundle(&self, collection: &str) -> KeyBundle {
        self.keys.bundle_for(collection).unwrap()
    }

    /// Encrypts a record the way another device would before uploading it.
    pub fn sealed(&self, collection: &str, record: &PlainRecord) -> WireRecord {
        encrypt_record(record, &self.bundle(collection), ServerTimestamp::ZERO)
            .unwrap()
            .to_wire()
            .unwrap()
    }

    /// Uploads a record as another device would.
    pub fn upload(&self, collection: &str, record: &PlainRecord) -> ServerTimestamp {
        self.transport
            .insert(collection, self.sealed(collection, record))
    }

    /// Decrypts every live record in `collection`.
    pub fn download(&self, collection: &str) -> Vec<PlainRecord> {
        let bundle = self.bundle(collection);
        self.transport
            .records(collection)
            .iter()
            .map(|wire| {
                decrypt_record(&EncryptedRecord::from_wire(wire).unwrap(), &bundle).unwrap()
            })
            .collect()
    }

    pub fn engine(&self, adapters: &[(&str, &Arc<MockAdapter>)]) -> SyncEngine {
        let mut builder = SyncEngine::builder(options()).transport(self.transport.clone());
        for (name, adapter) in adapters {
            builder = builder.adapter(*name, (*adapter).clone());
        }
        builder.build().unwrap()
    }
}
