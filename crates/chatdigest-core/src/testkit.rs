//! Deterministic fakes for pipeline tests.
//!
//! Enabled for this crate's unit tests and, through the `test-utils`
//! feature, for crates that drive sessions in their own tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chatdigest_ai::{
    AiError, CompletionRequest, CompletionResponse, FinishReason, LlmClient, MediaToolkit,
    RetryPolicy, Transcriber,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::analyzer::{AnalyzerSettings, ContentAnalyzer};
use crate::composer::DigestComposer;
use crate::model::ConversationEvent;
use crate::preferences::PreferenceSet;
use crate::scheduler::DigestNotifier;
use crate::session::{SessionServices, SessionSettings};
use crate::store::DigestStore;

/// Retry policy with millisecond backoff and no jitter.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 4,
        max_jitter_ms: 0,
    }
}

/// 2026-10-16 09:00:00 UTC plus `offset_secs`.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + chrono::Duration::seconds(offset_secs)
}

pub fn text_event(author: &str, text: &str, offset_secs: i64) -> ConversationEvent {
    ConversationEvent::text(author, text, at(offset_secs))
}

/// Session services backed by `llm`, `store`, a transcriber that always
/// answers "transcript" and a media toolkit that needs no binaries.
pub fn test_services(
    llm: Arc<MockLlmClient>,
    store: Arc<InMemoryDigestStore>,
    settings: SessionSettings,
) -> SessionServices {
    let analyzer_settings = AnalyzerSettings {
        retry: fast_retry(2),
        ..AnalyzerSettings::default()
    };
    let analyzer = ContentAnalyzer::new(
        llm.clone(),
        Arc::new(MockTranscriber::replying("transcript")),
        analyzer_settings,
    )
    .with_media_toolkit(Arc::new(MockMediaToolkit::default()));

    SessionServices {
        analyzer: Arc::new(analyzer),
        composer: Arc::new(DigestComposer::new(llm, fast_retry(2))),
        store,
        settings,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail(message.into())
    }

    fn into_result(self) -> chatdigest_ai::Result<CompletionResponse> {
        match self {
            MockReply::Text(text) => Ok(CompletionResponse {
                content: Some(text),
                finish_reason: FinishReason::Stop,
                usage: None,
            }),
            MockReply::Fail(message) => Err(AiError::Llm(message)),
        }
    }
}

/// Scripted [`LlmClient`].
///
/// Requests carrying images get the image reply when one is set. Other
/// requests consume queued replies first, then fall back to the default.
pub struct MockLlmClient {
    fallback: Mutex<MockReply>,
    queued: Mutex<VecDeque<MockReply>>,
    image_reply: Option<MockReply>,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_fallback(MockReply::text(text))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_fallback(MockReply::fail(message))
    }

    fn with_fallback(fallback: MockReply) -> Self {
        Self {
            fallback: Mutex::new(fallback),
            queued: Mutex::new(VecDeque::new()),
            image_reply: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_image_reply(mut self, reply: MockReply) -> Self {
        self.image_reply = Some(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.queued).push_back(reply);
    }

    pub fn set_fallback(&self, reply: MockReply) {
        *lock(&self.fallback) = reply;
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn image_request_count(&self) -> usize {
        lock(&self.requests).iter().filter(|r| r.has_images()).count()
    }

    fn next_reply(&self, request: &CompletionRequest) -> MockReply {
        if request.has_images()
            && let Some(reply) = &self.image_reply
        {
            return reply.clone();
        }
        lock(&self.queued)
            .pop_front()
            .unwrap_or_else(|| lock(&self.fallback).clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> chatdigest_ai::Result<CompletionResponse> {
        let reply = self.next_reply(&request);
        lock(&self.requests).push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        reply.into_result()
    }
}

pub struct MockTranscriber {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: MockReply::text(text),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: MockReply::fail(message),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> chatdigest_ai::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fail(message) => Err(AiError::Transcription(message.clone())),
        }
    }
}

/// [`MediaToolkit`] that writes placeholder files instead of decoding.
#[derive(Debug, Clone)]
pub struct MockMediaToolkit {
    has_audio: bool,
    frames: u32,
}

impl Default for MockMediaToolkit {
    fn default() -> Self {
        Self::silent(2)
    }
}

impl MockMediaToolkit {
    pub fn with_audio(frames: u32) -> Self {
        Self {
            has_audio: true,
            frames,
        }
    }

    pub fn silent(frames: u32) -> Self {
        Self {
            has_audio: false,
            frames,
        }
    }
}

#[async_trait]
impl MediaToolkit for MockMediaToolkit {
    async fn has_audio_track(&self, _video: &Path) -> chatdigest_ai::Result<bool> {
        Ok(self.has_audio)
    }

    async fn extract_audio(&self, _video: &Path, output: &Path) -> chatdigest_ai::Result<()> {
        tokio::fs::write(output, b"audio").await?;
        Ok(())
    }

    async fn sample_frames(
        &self,
        _video: &Path,
        out_dir: &Path,
        _stride: u32,
        max_frames: u32,
    ) -> chatdigest_ai::Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for index in 1..=self.frames.min(max_frames) {
            let path = out_dir.join(format!("frame_{:04}.jpg", index));
            tokio::fs::write(&path, b"jpeg").await?;
            frames.push(path);
        }
        Ok(frames)
    }
}

/// [`DigestStore`] kept in memory, with switchable write and load failures.
#[derive(Default)]
pub struct InMemoryDigestStore {
    preferences: Mutex<HashMap<String, PreferenceSet>>,
    events: Mutex<HashMap<String, Vec<ConversationEvent>>>,
    digests: Mutex<HashMap<String, Vec<(NaiveDate, String)>>>,
    fail_writes: AtomicBool,
    fail_loads: AtomicBool,
}

impl InMemoryDigestStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn seed_preferences(&self, conversation_id: &str, preferences: PreferenceSet) {
        lock(&self.preferences).insert(conversation_id.to_string(), preferences);
    }

    pub fn saved_preferences(&self, conversation_id: &str) -> Option<PreferenceSet> {
        lock(&self.preferences).get(conversation_id).cloned()
    }

    pub fn events_for(&self, conversation_id: &str) -> Vec<ConversationEvent> {
        lock(&self.events)
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn digests_for(&self, conversation_id: &str) -> Vec<(NaiveDate, String)> {
        lock(&self.digests)
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_writes(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("in-memory store is failing writes"));
        }
        Ok(())
    }
}

#[async_trait]
impl DigestStore for InMemoryDigestStore {
    async fn load_preferences(&self, conversation_id: &str) -> Result<Option<PreferenceSet>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("in-memory store is failing loads"));
        }
        Ok(self.saved_preferences(conversation_id))
    }

    async fn save_preferences(&self, conversation_id: &str, preferences: &PreferenceSet) -> Result<()> {
        self.check_writes()?;
        self.seed_preferences(conversation_id, preferences.clone());
        Ok(())
    }

    async fn append_event(&self, conversation_id: &str, event: &ConversationEvent) -> Result<()> {
        self.check_writes()?;
        lock(&self.events)
            .entry(conversation_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn append_daily_digest(&self, conversation_id: &str, date: NaiveDate, digest: &str) -> Result<()> {
        self.check_writes()?;
        lock(&self.digests)
            .entry(conversation_id.to_string())
            .or_default()
            .push((date, digest.to_string()));
        Ok(())
    }
}

/// [`DigestNotifier`] that records every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn deliveries(&self) -> Vec<(String, String)> {
        lock(&self.deliveries).clone()
    }
}

#[async_trait]
impl DigestNotifier for RecordingNotifier {
    async fn deliver(&self, conversation_id: &str, digest: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("delivery to {} failed", conversation_id));
        }
        lock(&self.deliveries).push((conversation_id.to_string(), digest.to_string()));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
