//! One conversation's buffers, debounce timer and preferences.
//!
//! # Triggers
//!
//! An event is appended to the active and daily buffers under the state
//! lock. When the active buffer reaches `max_events` it is swapped out into
//! the pass queue and analyzed before `add_event` returns; otherwise the
//! debounce timer is re-armed. A timer that fires analyzes whatever is
//! buffered.
//!
//! # Timer cancellation
//!
//! Every arm or cancel bumps `timer_generation`. A fired timer checks its
//! generation and swaps out the buffer in the same critical section, so only
//! the most recently armed timer can start a pass and an event arriving
//! afterwards always gets a timer of its own. The fired timer detaches its
//! handle so nothing aborts it mid-pass.
//!
//! # Passes
//!
//! Drained buffers queue up in `pending_batches`. Passes run one at a time
//! under `pass_lock` on a task of their own, so dropping the caller's future
//! never strands a popped batch. External calls happen without the state
//! lock, so new events keep landing in a fresh buffer while a pass is in
//! flight.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analyzer::{ContentAnalyzer, FactBlock};
use crate::composer::DigestComposer;
use crate::error::{DigestError, Result};
use crate::model::ConversationEvent;
use crate::preferences::{PreferenceKey, PreferenceSet};
use crate::store::DigestStore;

/// Returned by [`ConversationSession::get_digest`] before any digest exists.
pub const NOTHING_TO_SUMMARIZE: &str = "Nothing to summarize.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Buffering,
    Analyzing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PreferenceUpdate {
    Applied { key: String, value: String },
    Rejected { reason: String },
}

impl PreferenceUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, PreferenceUpdate::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_events: usize,
    pub idle_timeout: Duration,
    /// Deadline for analysis plus composition, none for unbounded
    pub pass_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_events: 10,
            idle_timeout: Duration::from_secs(180),
            pass_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Collaborators shared by every session of a registry.
#[derive(Clone)]
pub struct SessionServices {
    pub analyzer: Arc<ContentAnalyzer>,
    pub composer: Arc<DigestComposer>,
    pub store: Arc<dyn DigestStore>,
    pub settings: SessionSettings,
}

/// What a daily flush wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyFlushReport {
    pub date: NaiveDate,
    pub events_persisted: usize,
    pub digest_persisted: bool,
    pub forced_pass: bool,
}

struct SessionState {
    active: Vec<ConversationEvent>,
    daily: Vec<ConversationEvent>,
    running_digest: String,
    /// Facts of a pass whose composition failed
    carryover: Option<FactBlock>,
    preferences: PreferenceSet,
    pending_batches: VecDeque<Vec<ConversationEvent>>,
    pending_filters: HashSet<String>,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    analyzing: bool,
    passes_completed: u64,
    last_activity: Instant,
}

impl SessionState {
    fn cancel_timer(&mut self) {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// Move the active buffer into the pass queue. Returns false if empty.
    fn queue_active(&mut self) -> bool {
        if self.active.is_empty() {
            return false;
        }
        let batch = std::mem::take(&mut self.active);
        self.pending_batches.push_back(batch);
        true
    }

    fn apply_preference(&mut self, conversation_id: &str, key: &str, value: &str) -> PreferenceUpdate {
        match self.preferences.set(key, value) {
            Ok(parsed) => {
                let value = self.preferences.get(parsed);
                debug!(conversation_id, key = %parsed, value = %value, "Preference updated");
                PreferenceUpdate::Applied {
                    key: parsed.as_str().to_string(),
                    value,
                }
            }
            Err(e) => {
                warn!(conversation_id, key, error = %e, "Preference update rejected");
                PreferenceUpdate::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }
}

struct PassFailure {
    error: DigestError,
    facts: Option<FactBlock>,
}

pub struct ConversationSession {
    id: String,
    state: Mutex<SessionState>,
    pass_lock: Mutex<()>,
    services: SessionServices,
    this: Weak<ConversationSession>,
}

impl ConversationSession {
    pub fn new(
        id: impl Into<String>,
        preferences: PreferenceSet,
        services: SessionServices,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|this| Self {
            id,
            state: Mutex::new(SessionState {
                active: Vec::new(),
                daily: Vec::new(),
                running_digest: String::new(),
                carryover: None,
                preferences,
                pending_batches: VecDeque::new(),
                pending_filters: HashSet::new(),
                timer: None,
                timer_generation: 0,
                analyzing: false,
                passes_completed: 0,
                last_activity: Instant::now(),
            }),
            pass_lock: Mutex::new(()),
            services,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.services.settings
    }

    /// Accept one event.
    ///
    /// Events from an author awaiting a topic filter never reach the
    /// buffers: text becomes the new `FilterTopic`, anything else is dropped.
    /// Reaching the count threshold runs the pass before returning.
    pub async fn add_event(&self, event: ConversationEvent) {
        let mut state = self.state.lock().await;
        state.last_activity = Instant::now();

        if state.pending_filters.contains(&event.author) {
            if event.kind.is_text() {
                state.pending_filters.remove(&event.author);
                let update = state.apply_preference(
                    &self.id,
                    PreferenceKey::FilterTopic.as_str(),
                    &event.payload,
                );
                info!(
                    conversation_id = %self.id,
                    author = %event.author,
                    applied = update.is_applied(),
                    "Topic filter set from pending author"
                );
            } else {
                debug!(
                    conversation_id = %self.id,
                    author = %event.author,
                    kind = %event.kind,
                    "Dropped non-text event from author with pending filter"
                );
            }
            return;
        }

        state.active.push(event.clone());
        state.daily.push(event);

        if state.active.len() >= self.services.settings.max_events {
            state.cancel_timer();
            state.queue_active();
            drop(state);
            debug!(conversation_id = %self.id, "Count threshold reached");
            self.drain_passes().await;
        } else {
            self.arm_timer(&mut state);
        }
    }

    fn arm_timer(&self, state: &mut SessionState) {
        state.cancel_timer();
        let generation = state.timer_generation;
        let idle = self.services.settings.idle_timeout;
        let session = self.this.clone();

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Some(session) = session.upgrade() {
                session.on_timer_fired(generation).await;
            }
        }));
    }

    async fn on_timer_fired(&self, generation: u64) {
        let has_work = {
            let mut state = self.state.lock().await;
            if state.timer_generation != generation {
                debug!(conversation_id = %self.id, "Stale debounce timer ignored");
                return;
            }
            // Detach so a later cancel cannot abort this pass.
            state.timer = None;
            state.timer_generation = state.timer_generation.wrapping_add(1);
            state.queue_active() || !state.pending_batches.is_empty()
        };

        if !has_work {
            debug!(conversation_id = %self.id, "Debounce timer fired with nothing buffered");
            return;
        }
        debug!(conversation_id = %self.id, "Debounce timer fired");
        self.drain_passes().await;
    }

    /// Analyze whatever is buffered. Logs a warning and does nothing when
    /// the buffer is empty.
    pub async fn analysis_pass(&self) {
        let has_work = {
            let mut state = self.state.lock().await;
            state.queue_active() || !state.pending_batches.is_empty()
        };
        if !has_work {
            warn!(conversation_id = %self.id, "Analysis requested with an empty buffer");
            return;
        }
        self.drain_passes().await;
    }

    /// Run queued batches to completion and wait for them.
    ///
    /// The work runs on a spawned task, so the queue is drained even if the
    /// awaiting caller goes away.
    async fn drain_passes(&self) {
        let Some(session) = self.this.upgrade() else {
            self.run_queue().await;
            return;
        };

        let task = tokio::spawn(async move { session.run_queue().await });
        if let Err(e) = task.await {
            error!(conversation_id = %self.id, error = %e, "Analysis task aborted");
            let mut state = self.state.lock().await;
            if state.pending_batches.is_empty() {
                state.analyzing = false;
            }
        }
    }

    /// Pop and analyze batches one pass at a time until the queue is empty.
    async fn run_queue(&self) {
        let _pass = self.pass_lock.lock().await;

        loop {
            let (batch, prior, preferences, carryover) = {
                let mut state = self.state.lock().await;
                let Some(batch) = state.pending_batches.pop_front() else {
                    state.analyzing = false;
                    break;
                };
                state.analyzing = true;
                (
                    batch,
                    state.running_digest.clone(),
                    state.preferences.clone(),
                    state.carryover.take(),
                )
            };

            let started = Instant::now();
            let outcome = self.execute_pass(&batch, &prior, &preferences, carryover).await;

            let mut state = self.state.lock().await;
            match outcome {
                Ok(digest) => {
                    state.running_digest = digest;
                    state.passes_completed += 1;
                    info!(
                        conversation_id = %self.id,
                        events = batch.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Analysis pass completed"
                    );
                }
                Err(failure) => {
                    state.carryover = failure.facts;
                    error!(
                        conversation_id = %self.id,
                        events = batch.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %failure.error,
                        "Analysis pass failed, keeping previous digest"
                    );
                }
            }
        }
    }

    async fn execute_pass(
        &self,
        batch: &[ConversationEvent],
        prior: &str,
        preferences: &PreferenceSet,
        carryover: Option<FactBlock>,
    ) -> std::result::Result<String, PassFailure> {
        let timeout = self.services.settings.pass_timeout;
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let expired = |facts| PassFailure {
            error: DigestError::DeadlineExceeded(timeout.unwrap_or_default()),
            facts,
        };

        let Some(mut facts) = within(deadline, self.services.analyzer.analyze_batch(batch)).await
        else {
            return Err(expired(carryover));
        };
        if let Some(earlier) = carryover {
            facts.prepend(earlier);
        }

        match within(
            deadline,
            self.services.composer.compose(prior, &facts, preferences),
        )
        .await
        {
            Some(Ok(digest)) => Ok(digest),
            Some(Err(error)) => Err(PassFailure {
                error,
                facts: Some(facts),
            }),
            None => Err(expired(Some(facts))),
        }
    }

    /// Latest digest, analyzing any buffered events first.
    pub async fn get_digest(&self) -> String {
        self.current_digest()
            .await
            .unwrap_or_else(|| NOTHING_TO_SUMMARIZE.to_string())
    }

    /// Like [`get_digest`](Self::get_digest) but `None` while no digest exists.
    pub async fn current_digest(&self) -> Option<String> {
        {
            let mut state = self.state.lock().await;
            state.cancel_timer();
            state.queue_active();
        }
        // Also waits for a pass started by the timer.
        self.drain_passes().await;

        let state = self.state.lock().await;
        (!state.running_digest.is_empty()).then(|| state.running_digest.clone())
    }

    /// Digest as of the last completed pass, without triggering analysis.
    pub async fn running_digest(&self) -> String {
        self.state.lock().await.running_digest.clone()
    }

    /// Persist the day's events, preferences and digest under today's UTC
    /// date, then clear the daily buffer. Nothing is cleared if a write fails.
    pub async fn daily_flush(&self) -> Result<DailyFlushReport> {
        self.daily_flush_on(Utc::now().date_naive()).await
    }

    pub async fn daily_flush_on(&self, date: NaiveDate) -> Result<DailyFlushReport> {
        let started = Instant::now();
        let (events, preferences) = {
            let state = self.state.lock().await;
            (state.daily.clone(), state.preferences.clone())
        };

        let store = &self.services.store;
        store.append_events(&self.id, &events).await?;
        store.save_preferences(&self.id, &preferences).await?;

        let forced_pass = {
            let mut state = self.state.lock().await;
            let queued = state.queue_active();
            if queued {
                state.cancel_timer();
            }
            queued
        };
        if forced_pass {
            self.drain_passes().await;
        }

        let digest = self.running_digest().await;
        let digest_persisted = !digest.is_empty();
        if digest_persisted {
            store.append_daily_digest(&self.id, date, &digest).await?;
        }

        {
            let mut state = self.state.lock().await;
            // Events added during the flush stay for the next one.
            let flushed = events.len().min(state.daily.len());
            state.daily.drain(..flushed);
        }

        info!(
            conversation_id = %self.id,
            %date,
            events = events.len(),
            digest_persisted,
            forced_pass,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Daily flush completed"
        );

        Ok(DailyFlushReport {
            date,
            events_persisted: events.len(),
            digest_persisted,
            forced_pass,
        })
    }

    pub async fn update_preference(&self, key: &str, value: &str) -> PreferenceUpdate {
        let mut state = self.state.lock().await;
        state.apply_preference(&self.id, key, value)
    }

    /// Current value of a preference, `None` for unknown keys.
    pub async fn get_preference(&self, key: &str) -> Option<String> {
        let key = PreferenceKey::parse(key)?;
        Some(self.state.lock().await.preferences.get(key))
    }

    pub async fn preferences(&self) -> PreferenceSet {
        self.state.lock().await.preferences.clone()
    }

    pub async fn add_pending_filter(&self, author: &str) {
        let mut state = self.state.lock().await;
        state.pending_filters.insert(author.to_string());
    }

    pub async fn remove_pending_filter(&self, author: &str) {
        let mut state = self.state.lock().await;
        state.pending_filters.remove(author);
    }

    pub async fn is_pending_filter(&self, author: &str) -> bool {
        self.state.lock().await.pending_filters.contains(author)
    }

    pub async fn phase(&self) -> SessionPhase {
        let state = self.state.lock().await;
        if state.analyzing {
            SessionPhase::Analyzing
        } else if !state.active.is_empty() {
            SessionPhase::Buffering
        } else {
            SessionPhase::Idle
        }
    }

    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn daily_len(&self) -> usize {
        self.state.lock().await.daily.len()
    }

    pub async fn passes_completed(&self) -> u64 {
        self.state.lock().await.passes_completed
    }

    pub async fn has_live_timer(&self) -> bool {
        self.state
            .lock()
            .await
            .timer
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// True when nothing is buffered or in flight and the last event is
    /// older than `ttl`. A session whose lock is held is never idle.
    pub fn is_evictable(&self, ttl: Duration) -> bool {
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        state.active.is_empty()
            && state.daily.is_empty()
            && state.pending_batches.is_empty()
            && state.carryover.is_none()
            && !state.analyzing
            && state.last_activity.elapsed() >= ttl
    }

    /// Cancel the debounce timer. Buffered events stay where they are.
    pub async fn shutdown(&self) {
        self.state.lock().await.cancel_timer();
    }
}

async fn within<F: Future>(deadline: Option<tokio::time::Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}
