//! Monotonic append counters, one per log table.
//!
//! Keys built from a reserved sequence number keep insertion order among
//! entries whose other key parts are equal.

use anyhow::Result;
use redb::{ReadableTable, TableDefinition, WriteTransaction};

const APPEND_SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("append_sequences");

/// Reserve `count` consecutive numbers for `log` inside `txn`. Returns the
/// first one. Nothing is reserved unless the transaction commits.
pub(crate) fn reserve(txn: &WriteTransaction, log: &str, count: u64) -> Result<u64> {
    let mut table = txn.open_table(APPEND_SEQUENCE_TABLE)?;
    let first = table.get(log)?.map(|next| next.value()).unwrap_or(0);
    table.insert(log, first + count)?;
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use tempfile::tempdir;

    #[test]
    fn test_reservations_are_consecutive_per_log() {
        let temp_dir = tempdir().unwrap();
        let db = Database::create(temp_dir.path().join("test.db")).unwrap();

        let txn = db.begin_write().unwrap();
        assert_eq!(reserve(&txn, "events", 3).unwrap(), 0);
        assert_eq!(reserve(&txn, "events", 1).unwrap(), 3);
        assert_eq!(reserve(&txn, "digests", 1).unwrap(), 0);
        txn.commit().unwrap();

        let txn = db.begin_write().unwrap();
        assert_eq!(reserve(&txn, "events", 1).unwrap(), 4);
        txn.abort().unwrap();

        let txn = db.begin_write().unwrap();
        assert_eq!(reserve(&txn, "events", 1).unwrap(), 4);
    }
}
