//! Storage traits and error types
//!
//! This module defines the trait interfaces for the two persistence contracts the
//! crawler consumes: a key/value cache and an append-only record store.

use crate::storage::{CacheEntry, SchoolRecord};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record store '{0}' has been dropped")]
    StoreDropped(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value persistence for cache entries, one key per division
///
/// Implementations must be safe to share between jobs.
pub trait CacheStore: Send + Sync {
    /// Gets the entry stored under `key`, if any
    fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous entry
    fn set(&self, key: &str, entry: &CacheEntry) -> StorageResult<()>;
}

/// Append-only record store scoped to one job's lifetime
///
/// `push` may be called concurrently from every in-flight detail completion of a job;
/// implementations serialize appends so none are lost.
pub trait RecordStore: Send + Sync {
    /// Name the store was opened under
    fn name(&self) -> &str;

    /// Appends a record
    fn push(&self, record: &SchoolRecord) -> StorageResult<()>;

    /// Returns every record appended so far, in append order
    fn get_all(&self) -> StorageResult<Vec<SchoolRecord>>;

    /// Deletes the store's contents; later calls fail with `StoreDropped`
    fn drop_store(&self) -> StorageResult<()>;
}

/// Opens record stores by name
pub trait RecordStoreProvider: Send + Sync {
    /// Opens an empty store named `name`, discarding anything a previous holder left behind
    fn open(&self, name: &str) -> StorageResult<Arc<dyn RecordStore>>;
}
