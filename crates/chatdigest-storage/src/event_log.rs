//! Event log storage - append-only raw conversation events.
//!
//! Keys are `{conversation_prefix}{timestamp_ms}:{sequence}` with both
//! numbers zero-padded, so a prefix range scan returns a conversation's
//! events by timestamp and, within one timestamp, in append order.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::{conversation_prefix, prefix_range};
use crate::sequence;

const CONVERSATION_EVENTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("conversation_events");

/// Low-level append-only event storage
#[derive(Debug, Clone)]
pub struct EventLogStorage {
    db: Arc<Database>,
}

impl EventLogStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONVERSATION_EVENTS_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn event_key(conversation_id: &str, timestamp_ms: i64, sequence: u64) -> String {
        format!(
            "{}{:020}:{:020}",
            conversation_prefix(conversation_id),
            timestamp_ms.max(0),
            sequence
        )
    }

    /// Append one serialized event. Returns the generated key.
    pub fn append_raw(&self, conversation_id: &str, timestamp_ms: i64, data: &[u8]) -> Result<String> {
        let write_txn = self.db.begin_write()?;
        let seq = sequence::reserve(&write_txn, "conversation_events", 1)?;
        let key = Self::event_key(conversation_id, timestamp_ms, seq);
        {
            let mut table = write_txn.open_table(CONVERSATION_EVENTS_TABLE)?;
            table.insert(key.as_str(), data)?;
        }
        write_txn.commit()?;
        Ok(key)
    }

    /// Append a batch of serialized events in a single transaction.
    pub fn append_batch_raw(&self, conversation_id: &str, events: &[(i64, Vec<u8>)]) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let first = sequence::reserve(&write_txn, "conversation_events", events.len() as u64)?;
        {
            let mut table = write_txn.open_table(CONVERSATION_EVENTS_TABLE)?;
            for (seq, (timestamp_ms, data)) in (first..).zip(events) {
                let key = Self::event_key(conversation_id, *timestamp_ms, seq);
                table.insert(key.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(events.len())
    }

    /// List all events of a conversation in timestamp order.
    pub fn list_raw(&self, conversation_id: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATION_EVENTS_TABLE)?;

        let (start, end) = prefix_range(&conversation_prefix(conversation_id));
        let mut events = Vec::new();

        for item in table.range(start.as_str()..end.as_str())? {
            let (key, value) = item?;
            events.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(events)
    }

    /// Count the events stored for a conversation.
    pub fn count(&self, conversation_id: &str) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATION_EVENTS_TABLE)?;

        let (start, end) = prefix_range(&conversation_prefix(conversation_id));
        let mut count = 0;
        for item in table.range(start.as_str()..end.as_str())? {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_storage() -> (EventLogStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        (EventLogStorage::new(db).unwrap(), temp_dir)
    }

    #[test]
    fn test_events_listed_in_timestamp_order() {
        let (storage, _dir) = create_storage();

        storage.append_raw("chat-1", 3_000, b"third").unwrap();
        storage.append_raw("chat-1", 1_000, b"first").unwrap();
        storage.append_raw("chat-1", 2_000, b"second").unwrap();

        let events: Vec<Vec<u8>> = storage
            .list_raw("chat-1")
            .unwrap()
            .into_iter()
            .map(|(_, data)| data)
            .collect();
        assert_eq!(
            events,
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
        );
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let (storage, _dir) = create_storage();

        storage.append_raw("chat-1", 1_000, b"a").unwrap();
        storage.append_raw("chat-1", 1_000, b"b").unwrap();

        assert_eq!(storage.count("chat-1").unwrap(), 2);
    }

    #[test]
    fn test_conversations_are_isolated() {
        let (storage, _dir) = create_storage();

        storage
            .append_batch_raw("chat-1", &[(1, b"x".to_vec()), (2, b"y".to_vec())])
            .unwrap();
        storage.append_raw("chat-2", 1, b"z").unwrap();

        assert_eq!(storage.count("chat-1").unwrap(), 2);
        assert_eq!(storage.count("chat-2").unwrap(), 1);
        assert!(storage.list_raw("chat-3").unwrap().is_empty());
    }

    fn payloads(storage: &EventLogStorage, conversation_id: &str) -> Vec<Vec<u8>> {
        storage
            .list_raw(conversation_id)
            .unwrap()
            .into_iter()
            .map(|(_, data)| data)
            .collect()
    }

    #[test]
    fn test_same_timestamp_keeps_append_order() {
        let (storage, _dir) = create_storage();

        for i in 0..10 {
            storage.append_raw("team", 1_000, format!("{i}").as_bytes()).unwrap();
        }
        let batch: Vec<(i64, Vec<u8>)> = (10..20).map(|i| (1_000, format!("{i}").into_bytes())).collect();
        storage.append_batch_raw("team", &batch).unwrap();

        let expected: Vec<Vec<u8>> = (0..20).map(|i| format!("{i}").into_bytes()).collect();
        assert_eq!(payloads(&storage, "team"), expected);
    }

    #[test]
    fn test_ids_sharing_a_prefix_do_not_mix() {
        let (storage, _dir) = create_storage();

        storage.append_raw("team", 1_000, b"outer").unwrap();
        storage.append_raw("team:b", 1_000, b"nested").unwrap();
        storage.append_raw("tea", 1_000, b"shorter").unwrap();

        assert_eq!(payloads(&storage, "team"), vec![b"outer".to_vec()]);
        assert_eq!(payloads(&storage, "team:b"), vec![b"nested".to_vec()]);
        assert_eq!(storage.count("team").unwrap(), 1);
        assert_eq!(storage.count("tea").unwrap(), 1);
    }
}
