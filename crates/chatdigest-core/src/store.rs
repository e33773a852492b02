//! Storage collaborator for sessions.
//!
//! Sessions only ever load and save preferences and append events and
//! digests. [`RedbDigestStore`] maps those calls onto the typed tables of
//! `chatdigest-storage`.

use anyhow::Result;
use async_trait::async_trait;
use chatdigest_storage::Storage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::ConversationEvent;
use crate::preferences::PreferenceSet;

#[async_trait]
pub trait DigestStore: Send + Sync {
    async fn load_preferences(&self, conversation_id: &str) -> Result<Option<PreferenceSet>>;

    async fn save_preferences(&self, conversation_id: &str, preferences: &PreferenceSet)
    -> Result<()>;

    async fn append_event(&self, conversation_id: &str, event: &ConversationEvent) -> Result<()>;

    /// Append several events. Stores with transactions should override this
    /// to write the batch atomically.
    async fn append_events(&self, conversation_id: &str, events: &[ConversationEvent]) -> Result<()> {
        for event in events {
            self.append_event(conversation_id, event).await?;
        }
        Ok(())
    }

    async fn append_daily_digest(&self, conversation_id: &str, date: NaiveDate, text: &str)
    -> Result<()>;
}

/// One persisted end-of-day digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDigestRecord {
    pub conversation_id: String,
    pub date: NaiveDate,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// [`DigestStore`] backed by redb.
#[derive(Clone)]
pub struct RedbDigestStore {
    storage: Arc<Storage>,
}

impl RedbDigestStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Every persisted event of a conversation, oldest first.
    pub fn list_events(&self, conversation_id: &str) -> Result<Vec<ConversationEvent>> {
        self.storage
            .events
            .list_raw(conversation_id)?
            .into_iter()
            .map(|(_, data)| serde_json::from_slice(&data).map_err(anyhow::Error::from))
            .collect()
    }

    /// Every daily digest of a conversation, oldest date first.
    pub fn list_daily_digests(&self, conversation_id: &str) -> Result<Vec<DailyDigestRecord>> {
        self.storage
            .digests
            .list_raw(conversation_id)?
            .into_iter()
            .map(|(_, data)| serde_json::from_slice(&data).map_err(anyhow::Error::from))
            .collect()
    }
}

#[async_trait]
impl DigestStore for RedbDigestStore {
    async fn load_preferences(&self, conversation_id: &str) -> Result<Option<PreferenceSet>> {
        match self.storage.preferences.load_raw(conversation_id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn save_preferences(
        &self,
        conversation_id: &str,
        preferences: &PreferenceSet,
    ) -> Result<()> {
        let data = serde_json::to_vec(preferences)?;
        self.storage.preferences.save_raw(conversation_id, &data)
    }

    async fn append_event(&self, conversation_id: &str, event: &ConversationEvent) -> Result<()> {
        let data = serde_json::to_vec(event)?;
        self.storage
            .events
            .append_raw(conversation_id, event.timestamp.timestamp_millis(), &data)?;
        Ok(())
    }

    async fn append_events(&self, conversation_id: &str, events: &[ConversationEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let batch = events
            .iter()
            .map(|event| Ok((event.timestamp.timestamp_millis(), serde_json::to_vec(event)?)))
            .collect::<Result<Vec<_>>>()?;
        self.storage.events.append_batch_raw(conversation_id, &batch)?;
        Ok(())
    }

    async fn append_daily_digest(
        &self,
        conversation_id: &str,
        date: NaiveDate,
        text: &str,
    ) -> Result<()> {
        let record = DailyDigestRecord {
            conversation_id: conversation_id.to_string(),
            date,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let data = serde_json::to_vec(&record)?;
        self.storage.digests.append_raw(
            conversation_id,
            &date.format("%Y-%m-%d").to_string(),
            &data,
        )?;
        Ok(())
    }
}
