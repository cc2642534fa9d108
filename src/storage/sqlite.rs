//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the cache and record store
//! traits. One connection is shared behind a mutex by every job in the process.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CacheStore, RecordStore, RecordStoreProvider, StorageError, StorageResult,
};
use crate::storage::{CacheEntry, SchoolRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite storage backend
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Lists every cache entry, ordered by division code
    pub fn list_cache_entries(&self) -> StorageResult<Vec<CacheEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT division_code, fingerprint, updated_at, data
             FROM cache_entries ORDER BY division_code",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(code, fingerprint, updated_at, data)| {
                decode_entry(code, fingerprint, &updated_at, &data)
            })
            .collect()
    }
}

fn decode_entry(
    division_code: u32,
    fingerprint: String,
    updated_at: &str,
    data: &str,
) -> StorageResult<CacheEntry> {
    let timestamp = DateTime::parse_from_rfc3339(updated_at)
        .map_err(|e| StorageError::Database(format!("Bad timestamp '{}': {}", updated_at, e)))?
        .with_timezone(&Utc);

    Ok(CacheEntry {
        division_code,
        fingerprint,
        timestamp,
        data: serde_json::from_str(data)?,
    })
}

impl CacheStore for SqliteStorage {
    fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT division_code, fingerprint, updated_at, data
                 FROM cache_entries WHERE cache_key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        match row {
            Some((code, fingerprint, updated_at, data)) => {
                decode_entry(code, fingerprint, &updated_at, &data).map(Some)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> StorageResult<()> {
        let data = serde_json::to_string(&entry.data)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cache_entries (cache_key, division_code, fingerprint, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(cache_key) DO UPDATE SET
                division_code = excluded.division_code,
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at,
                data = excluded.data",
            params![
                key,
                entry.division_code,
                entry.fingerprint,
                entry.timestamp.to_rfc3339(),
                data
            ],
        )?;
        Ok(())
    }
}

impl RecordStoreProvider for SqliteStorage {
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RecordStore>> {
        {
            let conn = self.lock()?;
            let leftover = conn.execute(
                "DELETE FROM job_records WHERE store_name = ?1",
                params![name],
            )?;
            if leftover > 0 {
                tracing::debug!("Discarded {} leftover records from store {}", leftover, name);
            }
        }

        Ok(Arc::new(SqliteRecordStore {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
            dropped: AtomicBool::new(false),
        }))
    }
}

/// A named slice of the `job_records` table
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    name: String,
    dropped: AtomicBool,
}

impl SqliteRecordStore {
    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(StorageError::StoreDropped(self.name.clone()));
        }
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, record: &SchoolRecord) -> StorageResult<()> {
        let json = serde_json::to_string(record)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO job_records (store_name, record) VALUES (?1, ?2)",
            params![self.name, json],
        )?;
        Ok(())
    }

    fn get_all(&self) -> StorageResult<Vec<SchoolRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT record FROM job_records WHERE store_name = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![self.name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .collect()
    }

    fn drop_store(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM job_records WHERE store_name = ?1",
            params![self.name],
        )?;
        self.dropped.store(true, Ordering::SeqCst);
        Ok(())
    }
}
