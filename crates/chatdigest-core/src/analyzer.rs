//! Turns buffered events into fact lines.
//!
//! Text events become facts directly. Every media event is analyzed in its
//! own task under the retry policy, bounded by a shared semaphore, and
//! written back into the slot of its source event. A media event whose
//! analysis fails for good keeps a fact line with empty content.

use chatdigest_ai::media::{image_url_for, to_data_url};
use chatdigest_ai::{
    AiError, CompletionRequest, DefaultDocumentExtractor, DocumentExtractor, FfmpegToolkit,
    LlmClient, MediaFetcher, MediaToolkit, Message, RetryPolicy, ScratchSpace, Transcriber,
    truncate_chars,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::DigestConfig;
use crate::model::{ConversationEvent, EventKind};

const MEDIA_SYSTEM_PROMPT: &str = "You turn attachments shared in a group chat into short, factual \
descriptions that will be merged into a summary of the conversation. Reply with the description only.";

/// Ordered fact lines produced by one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactBlock {
    lines: Vec<String>,
}

impl FactBlock {
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Put `earlier` in front of this block.
    pub fn prepend(&mut self, earlier: FactBlock) {
        let mut lines = earlier.lines;
        lines.append(&mut self.lines);
        self.lines = lines;
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// `[timestamp] author: text` for text events,
/// `[timestamp] author sent <kind>: description` for media.
pub fn fact_line(event: &ConversationEvent, content: &str) -> String {
    let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S");
    if event.kind.is_text() {
        return format!("[{}] {}: {}", timestamp, event.author, content);
    }

    let mut body = content.trim().to_string();
    if let Some(caption) = event.caption() {
        if body.is_empty() {
            body = format!("(caption: {})", caption);
        } else {
            body.push_str(&format!(" (caption: {})", caption));
        }
    }
    format!(
        "[{}] {} sent {}: {}",
        timestamp,
        event.author,
        event.kind.description(),
        body
    )
}

#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub media_max_tokens: u32,
    pub video_frame_stride: u32,
    pub max_video_frames: u32,
    pub document_max_chars: usize,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
}

impl From<&DigestConfig> for AnalyzerSettings {
    fn from(config: &DigestConfig) -> Self {
        Self {
            media_max_tokens: config.media_max_tokens,
            video_frame_stride: config.video_frame_stride,
            max_video_frames: config.max_video_frames,
            document_max_chars: config.document_max_chars,
            max_concurrent: config.max_concurrent_analyses,
            retry: config.retry,
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from(&DigestConfig::default())
    }
}

#[derive(Clone)]
pub struct ContentAnalyzer {
    llm: Arc<dyn LlmClient>,
    transcriber: Arc<dyn Transcriber>,
    media: Arc<dyn MediaToolkit>,
    documents: Arc<dyn DocumentExtractor>,
    fetcher: MediaFetcher,
    scratch: ScratchSpace,
    settings: AnalyzerSettings,
    permits: Arc<Semaphore>,
}

impl ContentAnalyzer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        transcriber: Arc<dyn Transcriber>,
        settings: AnalyzerSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self {
            llm,
            transcriber,
            media: Arc::new(FfmpegToolkit::default()),
            documents: Arc::new(DefaultDocumentExtractor::default()),
            fetcher: MediaFetcher::new(),
            scratch: ScratchSpace::system(),
            settings,
            permits,
        }
    }

    pub fn from_config(
        llm: Arc<dyn LlmClient>,
        transcriber: Arc<dyn Transcriber>,
        config: &DigestConfig,
    ) -> Self {
        Self::new(llm, transcriber, AnalyzerSettings::from(config))
            .with_scratch(config.scratch_space())
            .with_fetcher(config.media_fetcher())
    }

    pub fn with_media_toolkit(mut self, media: Arc<dyn MediaToolkit>) -> Self {
        self.media = media;
        self
    }

    pub fn with_document_extractor(mut self, documents: Arc<dyn DocumentExtractor>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_fetcher(mut self, fetcher: MediaFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_scratch(mut self, scratch: ScratchSpace) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Analyze a batch and return one fact line per event, in input order.
    ///
    /// Dropping the returned future aborts every outstanding media task.
    pub async fn analyze_batch(&self, events: &[ConversationEvent]) -> FactBlock {
        let started = Instant::now();
        let mut slots = Vec::with_capacity(events.len());
        let mut tasks = JoinSet::new();

        for (index, event) in events.iter().enumerate() {
            if event.kind.is_text() {
                slots.push(fact_line(event, &event.payload));
                continue;
            }

            slots.push(fact_line(event, ""));
            let analyzer = self.clone();
            let event = event.clone();
            tasks.spawn(async move {
                let _permit = analyzer.permits.clone().acquire_owned().await.ok();
                let content = analyzer.analyze_event(&event).await;
                (index, fact_line(&event, &content))
            });
        }

        let media_tasks = tasks.len();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, line)) => slots[index] = line,
                Err(e) => warn!(error = %e, "Media analysis task did not complete"),
            }
        }

        debug!(
            events = events.len(),
            media_tasks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch analyzed"
        );
        FactBlock::from_lines(slots)
    }

    /// Normalized content for one event, empty when analysis failed.
    pub async fn analyze_event(&self, event: &ConversationEvent) -> String {
        let label = format!("{} analysis for {}", event.kind, event.author);
        self.settings
            .retry
            .run(&label, || self.transform(event))
            .await
            .unwrap_or_default()
    }

    async fn transform(&self, event: &ConversationEvent) -> chatdigest_ai::Result<String> {
        match event.kind {
            EventKind::Text => Ok(event.payload.clone()),
            EventKind::Image => self.describe_image(event).await,
            EventKind::Audio => self.transcribe_audio(event).await,
            EventKind::Video => self.describe_video(event).await,
            EventKind::Document => self.summarize_document(event).await,
        }
    }

    async fn describe_image(&self, event: &ConversationEvent) -> chatdigest_ai::Result<String> {
        let url = image_url_for(&event.payload).await?;
        let mut prompt = String::from("Describe this image in one or two sentences.");
        if let Some(caption) = event.caption() {
            prompt.push_str(&format!(" The sender captioned it: \"{}\".", caption));
        }
        self.ask(Message::user_with_images(prompt, vec![url])).await
    }

    async fn transcribe_audio(&self, event: &ConversationEvent) -> chatdigest_ai::Result<String> {
        let scratch = self.scratch.allocate("audio")?;
        let local = self.fetcher.fetch_or_copy(&event.payload, scratch.path()).await?;
        let transcript = self.transcriber.transcribe(&local).await?;
        non_empty(transcript, "transcription")
    }

    async fn describe_video(&self, event: &ConversationEvent) -> chatdigest_ai::Result<String> {
        let scratch = self.scratch.allocate("video")?;
        let local = self.fetcher.fetch_or_copy(&event.payload, scratch.path()).await?;

        let has_audio = match self.media.has_audio_track(&local).await {
            Ok(has_audio) => has_audio,
            Err(e) => {
                warn!(error = %e, "Could not probe video for audio, treating it as silent");
                false
            }
        };

        let frames_dir = scratch.path().join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;
        let frames = self
            .media
            .sample_frames(
                &local,
                &frames_dir,
                self.settings.video_frame_stride,
                self.settings.max_video_frames,
            )
            .await?;
        if frames.is_empty() {
            return Err(AiError::Media("No frames could be sampled".to_string()));
        }

        let visual = self.describe_frames(&frames, event.caption());
        let audio = async {
            if !has_audio {
                return Ok::<Option<String>, AiError>(None);
            }
            let track = scratch.path().join("audio.mp3");
            self.media.extract_audio(&local, &track).await?;
            let transcript = self.transcriber.transcribe(&track).await?;
            Ok(Some(transcript).filter(|t| !t.trim().is_empty()))
        };
        let (visual, audio) = tokio::join!(visual, audio);
        let visual = visual?;

        match audio {
            Ok(Some(transcript)) => self.fuse_video(&visual, &transcript).await,
            Ok(None) => Ok(visual),
            Err(e) => {
                warn!(error = %e, "Video audio track could not be transcribed");
                Ok(visual)
            }
        }
    }

    async fn describe_frames(
        &self,
        frames: &[PathBuf],
        caption: Option<&str>,
    ) -> chatdigest_ai::Result<String> {
        let mut urls = Vec::with_capacity(frames.len());
        for frame in frames {
            urls.push(to_data_url(frame).await?);
        }
        let mut prompt = String::from(
            "These frames are sampled in order from a video. Describe what happens in it in a few sentences.",
        );
        if let Some(caption) = caption {
            prompt.push_str(&format!(" The sender captioned it: \"{}\".", caption));
        }
        self.ask(Message::user_with_images(prompt, urls)).await
    }

    async fn fuse_video(&self, visual: &str, transcript: &str) -> chatdigest_ai::Result<String> {
        let prompt = format!(
            "Combine the visual description and the audio transcript of the same video into one \
             short description of its content.\n\nVisual description:\n{}\n\nAudio transcript:\n{}",
            visual, transcript
        );
        self.ask(Message::user(prompt)).await
    }

    async fn summarize_document(&self, event: &ConversationEvent) -> chatdigest_ai::Result<String> {
        let scratch = self.scratch.allocate("document")?;
        let local = self.fetcher.fetch_or_copy(&event.payload, scratch.path()).await?;
        let extracted = self.documents.extract(&local).await?;
        let text = truncate_chars(extracted.trim(), self.settings.document_max_chars);
        if text.is_empty() {
            return Err(AiError::Document("Document has no extractable text".to_string()));
        }

        let mut prompt = String::from("Summarize this document shared in the chat in a few sentences.");
        if let Some(caption) = event.caption() {
            prompt.push_str(&format!(" The sender captioned it: \"{}\".", caption));
        }
        prompt.push_str("\n\n");
        prompt.push_str(text);
        self.ask(Message::user(prompt)).await
    }

    async fn ask(&self, message: Message) -> chatdigest_ai::Result<String> {
        let request = CompletionRequest::new(vec![Message::system(MEDIA_SYSTEM_PROMPT), message])
            .with_max_tokens(self.settings.media_max_tokens);
        let response = self.llm.complete(request).await?;
        non_empty(response.text(), "model")
    }
}

fn non_empty(text: String, source: &str) -> chatdigest_ai::Result<String> {
    let text = text.trim();
    if text.is_empty() {
        Err(AiError::InvalidFormat(format!("Empty {} response", source)))
    } else {
        Ok(text.to_string())
    }
}
