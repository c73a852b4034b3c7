//! SQLite-backed store.
//!
//! All collections share one database file. Records are stored as JSON
//! bodies keyed by `(collection, id)`; high-water marks live in a separate
//! table.

use crate::error::{StorageError, StorageResult};
use crate::local::{LocalStore, StoreFactory, StoredRecord, SyncStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use syncto_types::{PlainRecord, ServerTimestamp};
use tracing::debug;

type SharedConnection = Arc<Mutex<Connection>>;

fn init_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL,
            modified INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        );

        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            last_modified INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// A [`LocalStore`] for one collection inside a shared SQLite database.
pub struct SqliteStore {
    collection: String,
    conn: SharedConnection,
}

impl SqliteStore {
    /// Opens (or creates) the store for `collection` in the database at `path`.
    pub fn open(path: impl AsRef<Path>, collection: impl Into<String>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            collection: collection.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(collection: impl Into<String>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            collection: collection.into(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn row_to_record(body: String, status: String, modified: i64) -> StorageResult<StoredRecord> {
    let record: PlainRecord = serde_json::from_str(&body)?;
    let modified = u64::try_from(modified)
        .map_err(|_| StorageError::InvalidData(format!("negative timestamp {modified}")))?;
    Ok(StoredRecord {
        record,
        status: status.parse::<SyncStatus>()?,
        modified: ServerTimestamp::from_millis(modified),
    })
}

fn to_sql_timestamp(ts: ServerTimestamp) -> StorageResult<i64> {
    i64::try_from(ts.as_millis())
        .map_err(|_| StorageError::InvalidData(format!("timestamp out of range: {ts}")))
}

impl LocalStore for SqliteStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn list(&self) -> StorageResult<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT body, status, modified FROM records WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (body, status, modified) = row?;
            records.push(row_to_record(body, status, modified)?);
        }
        Ok(records)
    }

    fn get(&self, id: &str) -> StorageResult<Option<StoredRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT body, status, modified FROM records WHERE collection = ?1 AND id = ?2",
                params![self.collection, id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(body, status, modified)| row_to_record(body, status, modified))
            .transpose()
    }

    fn put(&self, record: StoredRecord) -> StorageResult<()> {
        let body = serde_json::to_string(&record.record)?;
        let modified = to_sql_timestamp(record.modified)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO records (collection, id, body, status, modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.collection,
                record.record.id,
                body,
                record.status.to_string(),
                modified
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![self.collection, id],
        )?;
        Ok(removed > 0)
    }

    fn last_modified(&self) -> StorageResult<ServerTimestamp> {
        let conn = self.conn()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT last_modified FROM collections WHERE name = ?1",
                params![self.collection],
                |row| row.get(0),
            )
            .optional()?;
        let millis = value.unwrap_or(0);
        let millis = u64::try_from(millis)
            .map_err(|_| StorageError::InvalidData(format!("negative timestamp {millis}")))?;
        Ok(ServerTimestamp::from_millis(millis))
    }

    fn set_last_modified(&self, timestamp: ServerTimestamp) -> StorageResult<()> {
        let value = to_sql_timestamp(timestamp)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO collections (name, last_modified) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET last_modified = MAX(last_modified, excluded.last_modified)",
            params![self.collection, value],
        )?;
        debug!("{}: high-water mark now >= {}", self.collection, timestamp);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![self.collection],
        )?;
        conn.execute(
            "DELETE FROM collections WHERE name = ?1",
            params![self.collection],
        )?;
        Ok(())
    }
}

/// Opens per-collection [`SqliteStore`]s that share one connection.
pub struct SqliteStoreFactory {
    conn: SharedConnection,
}

impl SqliteStoreFactory {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn open(&self, collection: &str) -> StorageResult<Arc<dyn LocalStore>> {
        Ok(Arc::new(SqliteStore {
            collection: collection.to_string(),
            conn: self.conn.clone(),
        }))
    }
}
