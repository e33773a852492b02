#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatdigest_ai::{
    AiError, CompletionRequest, CompletionResponse, FinishReason, LlmClient, RetryPolicy,
    Transcriber,
};
use chatdigest_core::{
    ConversationEvent, DigestConfig, DigestCore, RedbDigestStore, SessionRegistry,
};
use chatdigest_storage::Storage;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// LLM double: vision calls fail or answer a fixed text, compositions
/// answer `digest #N`, and every request is recorded.
pub struct ScriptedLlm {
    vision_reply: Option<String>,
    fail_compositions: Mutex<bool>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(vision_reply: Option<&str>) -> Self {
        Self {
            vision_reply: vision_reply.map(str::to_string),
            fail_compositions: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_compositions(&self, fail: bool) {
        *self.fail_compositions.lock().unwrap() = fail;
    }

    pub fn compositions(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| is_composition(r))
            .cloned()
            .collect()
    }

    pub fn vision_calls(&self) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.has_images()).count()
    }
}

fn is_composition(request: &CompletionRequest) -> bool {
    request
        .messages
        .first()
        .is_some_and(|m| m.content.contains("running digest"))
}

/// Fact lines sent in a composition request.
pub fn fact_lines(request: &CompletionRequest) -> Vec<String> {
    let user = &request.messages[1].content;
    let (_, facts) = user.split_once("New messages:\n").unwrap();
    facts.lines().map(str::to_string).collect()
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> chatdigest_ai::Result<CompletionResponse> {
        let composition = is_composition(&request);
        let images = request.has_images();
        let number = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.iter().filter(|r| is_composition(r)).count()
        };

        let text = if images {
            self.vision_reply
                .clone()
                .ok_or_else(|| AiError::Llm("vision unavailable".to_string()))?
        } else if composition {
            if *self.fail_compositions.lock().unwrap() {
                return Err(AiError::Llm("composition unavailable".to_string()));
            }
            format!("digest #{}", number)
        } else {
            "summary".to_string()
        };

        Ok(CompletionResponse {
            content: Some(text),
            finish_reason: FinishReason::Stop,
            usage: None,
        })
    }
}

pub struct SilentTranscriber;

#[async_trait]
impl Transcriber for SilentTranscriber {
    async fn transcribe(&self, _audio_path: &Path) -> chatdigest_ai::Result<String> {
        Ok("transcript".to_string())
    }
}

pub fn test_config(max_events: usize) -> DigestConfig {
    DigestConfig {
        max_events,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 4,
            max_jitter_ms: 0,
        },
        pass_timeout_secs: 10,
        ..DigestConfig::default()
    }
}

pub struct Harness {
    pub llm: Arc<ScriptedLlm>,
    pub store: Arc<RedbDigestStore>,
    pub registry: SessionRegistry,
    pub temp_dir: TempDir,
}

impl Harness {
    pub fn new(llm: ScriptedLlm, max_events: usize, idle_timeout: Duration) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path().join("chatdigest.db")).unwrap());
        Self::with_storage(llm, max_events, idle_timeout, storage, temp_dir)
    }

    pub fn with_storage(
        llm: ScriptedLlm,
        max_events: usize,
        idle_timeout: Duration,
        storage: Arc<Storage>,
        temp_dir: TempDir,
    ) -> Self {
        let llm = Arc::new(llm);
        let store = Arc::new(RedbDigestStore::new(storage));
        let config = test_config(max_events);

        let mut services = DigestCore::services(
            &config,
            llm.clone(),
            Arc::new(SilentTranscriber),
            store.clone(),
        );
        // Config granularity is whole seconds.
        services.settings.idle_timeout = idle_timeout;

        Self {
            llm,
            store,
            registry: SessionRegistry::new(services),
            temp_dir,
        }
    }
}

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
}

pub fn text(author: &str, body: &str, offset_secs: i64) -> ConversationEvent {
    ConversationEvent::text(author, body, at(offset_secs))
}
