//! ChatDigest AI - clients for the external text, vision and speech services
//! plus the local media plumbing the content analyzer relies on.

pub mod document;
pub mod error;
mod http_client;
pub mod llm;
pub mod media;
pub mod retry;
pub mod transcribe;

pub use document::{DefaultDocumentExtractor, DocumentExtractor, truncate_chars};
pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, OpenAIClient, Role,
    TokenUsage,
};
pub use media::{DEFAULT_MAX_MEDIA_BYTES, FfmpegToolkit, MediaFetcher, MediaToolkit, ScratchSpace};
pub use retry::{RetryPolicy, Retrying, with_retry};
pub use transcribe::{Transcriber, WhisperTranscriber};
