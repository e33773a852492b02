//! ChatDigest Storage - Low-level persistence layer
//!
//! This crate provides the persistence layer for ChatDigest, using redb as the
//! embedded database. It exposes byte-level APIs so the record shapes stay
//! owned by the crates that serialize them.
//!
//! # Tables
//!
//! - `conversation_preferences` - Preference set per conversation
//! - `conversation_events` - Append-only raw event log
//! - `daily_digests` - Append-only dated digest records
//! - `append_sequences` - Insertion counters for the two append-only logs

pub mod daily_digest;
pub mod event_log;
pub mod paths;
pub mod preferences;
pub mod range_utils;
mod sequence;

use anyhow::Result;
use redb::Database;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub use daily_digest::DailyDigestStorage;
pub use event_log::EventLogStorage;
pub use preferences::PreferenceStorage;

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub preferences: PreferenceStorage,
    pub events: EventLogStorage,
    pub digests: DailyDigestStorage,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and initialize
    /// all required tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Arc::new(Database::create(path)?);

        let preferences = PreferenceStorage::new(db.clone())?;
        let events = EventLogStorage::new(db.clone())?;
        let digests = DailyDigestStorage::new(db.clone())?;

        debug!(path = %path.display(), "Storage opened");

        Ok(Self {
            db,
            preferences,
            events,
            digests,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_storage_initializes_all_tables() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(temp_dir.path().join("digest.db")).unwrap();

        storage.preferences.save_raw("chat-1", b"{}").unwrap();
        storage.events.append_raw("chat-1", 1_000, b"event").unwrap();
        storage
            .digests
            .append_raw("chat-1", "2026-10-16", b"digest")
            .unwrap();

        assert!(storage.preferences.load_raw("chat-1").unwrap().is_some());
        assert_eq!(storage.events.count("chat-1").unwrap(), 1);
        assert_eq!(storage.digests.list_raw("chat-1").unwrap().len(), 1);
    }

    #[test]
    fn test_storage_reopens_existing_database() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("digest.db");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.preferences.save_raw("chat-1", b"prefs").unwrap();
        }

        let storage = Storage::new(&db_path).unwrap();
        assert_eq!(
            storage.preferences.load_raw("chat-1").unwrap(),
            Some(b"prefs".to_vec())
        );
    }
}
