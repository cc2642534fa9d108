//! Storage module for persisting crawl data
//!
//! This module handles everything that outlives a single request:
//! - The per-division cache entry (fingerprint, timestamp, last record set)
//! - The append-only record store a job fills while it runs
//! - SQLite schema management for both

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{SqliteRecordStore, SqliteStorage};
pub use traits::{CacheStore, RecordStore, RecordStoreProvider, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Address value used when a detail page has no address field
pub const ADDRESS_NOT_FOUND: &str = "Address not found";

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Cache key for a division's entry
pub fn cache_key(division_code: u32) -> String {
    format!("schools-{}", division_code)
}

/// Summary fields parsed from one list-page row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolStub {
    pub name: String,
    pub division: String,
    pub grade_span: String,
}

impl SchoolStub {
    /// Completes the stub with the address from its detail page
    ///
    /// A blank address becomes [`ADDRESS_NOT_FOUND`] so the field is never empty.
    pub fn into_record(self, address: String, division_code: u32) -> SchoolRecord {
        let address = if address.trim().is_empty() {
            ADDRESS_NOT_FOUND.to_string()
        } else {
            address
        };

        SchoolRecord {
            name: self.name,
            division: self.division,
            grade_span: self.grade_span,
            address,
            division_code,
        }
    }
}

/// A finished school entry, as persisted and emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRecord {
    pub name: String,
    pub division: String,
    pub grade_span: String,
    #[serde(default = "default_address")]
    pub address: String,
    pub division_code: u32,
}

fn default_address() -> String {
    ADDRESS_NOT_FOUND.to_string()
}

/// The single most recent crawl result for a division
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub division_code: u32,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<SchoolRecord>,
}

impl CacheEntry {
    pub fn new(division_code: u32, fingerprint: String, data: Vec<SchoolRecord>) -> Self {
        Self {
            division_code,
            fingerprint,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Returns a copy with the timestamp advanced to now; fingerprint and data are kept
    pub fn touched(&self) -> Self {
        Self {
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub() -> SchoolStub {
        SchoolStub {
            name: "Oak Elementary".to_string(),
            division: "Fairfax County".to_string(),
            grade_span: "PK-5".to_string(),
        }
    }

    #[test]
    fn test_into_record_keeps_address() {
        let record = stub().into_record("1 Oak Way".to_string(), 29);
        assert_eq!(record.address, "1 Oak Way");
        assert_eq!(record.division_code, 29);
        assert_eq!(record.name, "Oak Elementary");
    }

    #[test]
    fn test_into_record_blank_address_uses_sentinel() {
        let record = stub().into_record("   ".to_string(), 29);
        assert_eq!(record.address, ADDRESS_NOT_FOUND);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = stub().into_record("1 Oak Way".to_string(), 29);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["gradeSpan"], "PK-5");
        assert_eq!(json["divisionCode"], 29);
    }

    #[test]
    fn test_missing_address_deserializes_to_sentinel() {
        let json = r#"{"name":"A","division":"B","gradeSpan":"K-5","divisionCode":1}"#;
        let record: SchoolRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.address, ADDRESS_NOT_FOUND);
    }

    #[test]
    fn test_touched_advances_timestamp_only() {
        let mut entry = CacheEntry::new(3, "abc".to_string(), vec![]);
        entry.timestamp = Utc::now() - chrono::Duration::hours(1);

        let touched = entry.touched();
        assert!(touched.timestamp > entry.timestamp);
        assert_eq!(touched.fingerprint, entry.fingerprint);
        assert_eq!(touched.data, entry.data);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key(118), "schools-118");
    }
}
