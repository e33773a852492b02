//! Daily digest storage - append-only dated digest records.
//!
//! Records are never replaced: a second flush on the same calendar date adds
//! another record under that date. Keys are
//! `{conversation_prefix}{date}:{sequence}`, so records list by date and then
//! in append order.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::{conversation_prefix, prefix_range};
use crate::sequence;

const DAILY_DIGEST_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("daily_digests");

/// Low-level daily digest storage with byte-level API
#[derive(Debug, Clone)]
pub struct DailyDigestStorage {
    db: Arc<Database>,
}

impl DailyDigestStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(DAILY_DIGEST_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a digest record for `date` (formatted `YYYY-MM-DD`).
    pub fn append_raw(&self, conversation_id: &str, date: &str, data: &[u8]) -> Result<String> {
        let write_txn = self.db.begin_write()?;
        let seq = sequence::reserve(&write_txn, "daily_digests", 1)?;
        let key = format!("{}{}:{:020}", conversation_prefix(conversation_id), date, seq);
        {
            let mut table = write_txn.open_table(DAILY_DIGEST_TABLE)?;
            table.insert(key.as_str(), data)?;
        }
        write_txn.commit()?;
        Ok(key)
    }

    /// List every digest record of a conversation, oldest date first.
    pub fn list_raw(&self, conversation_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.scan(&conversation_prefix(conversation_id))
    }

    /// List the digest records of a conversation for one date.
    pub fn list_for_date_raw(&self, conversation_id: &str, date: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.scan(&format!("{}{}:", conversation_prefix(conversation_id), date))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DAILY_DIGEST_TABLE)?;

        let (start, end) = prefix_range(prefix);
        let mut records = Vec::new();
        for item in table.range(start.as_str()..end.as_str())? {
            let (key, value) = item?;
            records.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(records)
    }
}
