//! Conversation id to session table.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::config::DigestConfig;
use crate::preferences::PreferenceSet;
use crate::scheduler::DigestNotifier;
use crate::session::{ConversationSession, SessionServices};

type SessionSlot = Arc<OnceCell<Arc<ConversationSession>>>;

/// Outcome of one [`SessionRegistry::run_daily_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DailyCycleReport {
    pub sessions: usize,
    pub delivered: usize,
    pub flushed: usize,
    pub failed: usize,
    pub evicted: usize,
}

/// Owns every live [`ConversationSession`].
///
/// Sessions are created on first access. Concurrent first accesses for one
/// id share a single slot, so exactly one session is built and exactly one
/// preference load runs.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionSlot>,
    services: SessionServices,
    timezone: Option<Tz>,
    idle_ttl: Option<Duration>,
}

impl SessionRegistry {
    pub fn new(services: SessionServices) -> Self {
        Self {
            sessions: DashMap::new(),
            services,
            timezone: None,
            idle_ttl: None,
        }
    }

    pub fn from_config(services: SessionServices, config: &DigestConfig) -> Result<Self> {
        Ok(Self::new(services)
            .with_timezone(config.timezone()?)
            .with_idle_ttl(config.session_idle_ttl()))
    }

    /// Timezone used to date daily digest records (local time when unset).
    pub fn with_timezone(mut self, timezone: Option<Tz>) -> Self {
        self.timezone = timezone;
        self
    }

    /// Evict idle sessions after each daily cycle.
    pub fn with_idle_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub async fn get(&self, conversation_id: &str) -> Arc<ConversationSession> {
        let slot = self
            .sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        slot.get_or_init(|| self.create_session(conversation_id))
            .await
            .clone()
    }

    async fn create_session(&self, conversation_id: &str) -> Arc<ConversationSession> {
        let preferences = match self.services.store.load_preferences(conversation_id).await {
            Ok(Some(preferences)) => preferences,
            Ok(None) => PreferenceSet::default(),
            Err(e) => {
                warn!(
                    conversation_id,
                    error = %e,
                    "Failed to load preferences, using defaults"
                );
                PreferenceSet::default()
            }
        };

        debug!(conversation_id, "Session created");
        ConversationSession::new(conversation_id, preferences, self.services.clone())
    }

    /// Existing session, without creating one.
    pub fn get_if_present(&self, conversation_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions
            .get(conversation_id)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session and cancel their timers. Buffered events are lost.
    pub async fn clear(&self) {
        for session in self.sessions_snapshot() {
            session.shutdown().await;
        }
        self.sessions.clear();
    }

    /// Remove sessions with nothing buffered and no activity for `ttl`.
    ///
    /// A session still referenced outside the registry is kept, which
    /// covers callers that obtained it from [`get`](Self::get) but have not
    /// used it yet.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut evicted = 0;
        for id in self.conversation_ids() {
            let removed = self.sessions.remove_if(&id, |_, slot| {
                Arc::strong_count(slot) == 1
                    && slot
                        .get()
                        .is_some_and(|session| Arc::strong_count(session) == 1 && session.is_evictable(ttl))
            });
            if removed.is_some() {
                debug!(conversation_id = %id, "Idle session evicted");
                evicted += 1;
            }
        }
        evicted
    }

    fn sessions_snapshot(&self) -> Vec<Arc<ConversationSession>> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Flush date in the configured timezone, UTC when unset.
    fn today(&self) -> NaiveDate {
        let now = Utc::now();
        match self.timezone {
            Some(tz) => now.with_timezone(&tz).date_naive(),
            None => now.date_naive(),
        }
    }

    /// Deliver digests of AutoDigest sessions, then flush every session.
    pub async fn run_daily_cycle(&self, notifier: &dyn DigestNotifier) -> DailyCycleReport {
        let started = Instant::now();
        let date = self.today();
        let sessions = self.sessions_snapshot();
        let mut report = DailyCycleReport {
            sessions: sessions.len(),
            ..DailyCycleReport::default()
        };

        for session in &sessions {
            if session.preferences().await.auto_digest
                && let Some(digest) = session.current_digest().await
            {
                match notifier.deliver(session.id(), &digest).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        error!(
                            conversation_id = %session.id(),
                            error = %e,
                            "Failed to deliver daily digest"
                        );
                    }
                }
            }

            match session.daily_flush_on(date).await {
                Ok(_) => report.flushed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        conversation_id = %session.id(),
                        error = %e,
                        "Daily flush failed"
                    );
                }
            }
        }
        drop(sessions);

        if let Some(ttl) = self.idle_ttl {
            report.evicted = self.evict_idle(ttl);
        }

        info!(
            %date,
            sessions = report.sessions,
            delivered = report.delivered,
            flushed = report.flushed,
            failed = report.failed,
            evicted = report.evicted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Daily cycle completed"
        );
        report
    }
}
