//! Preference storage - one serialized preference set per conversation.

use anyhow::Result;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::sync::Arc;

const CONVERSATION_PREFERENCES_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("conversation_preferences");

/// Preference storage with byte-level API, keyed by conversation id.
#[derive(Debug, Clone)]
pub struct PreferenceStorage {
    db: Arc<Database>,
}

impl PreferenceStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONVERSATION_PREFERENCES_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store a conversation's preference set, replacing the previous one.
    pub fn save_raw(&self, conversation_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONVERSATION_PREFERENCES_TABLE)?;
            table.insert(conversation_id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_raw(&self, conversation_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATION_PREFERENCES_TABLE)?;
        Ok(table.get(conversation_id)?.map(|value| value.value().to_vec()))
    }
}
