//! Error types for the service clients

use thiserror::Error;

/// Service client error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error ({status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Media tool `{tool}` failed: {message}")]
    MediaTool { tool: String, message: String },

    #[error("Document extraction error: {0}")]
    Document(String),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for service client operations
pub type Result<T> = std::result::Result<T, AiError>;
