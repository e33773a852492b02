//! Speech-to-text via the OpenAI Whisper API.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;
use crate::llm::response_to_error;

/// Turns a local audio file into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper transcription client
pub struct WhisperTranscriber {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            language: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Hint the spoken language (ISO-639-1)
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        let audio_bytes = fs::read(audio_path).await.map_err(|e| {
            AiError::Transcription(format!(
                "Cannot read audio file '{}': {}",
                audio_path.display(),
                e
            ))
        })?;

        let filename = audio_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio.mp3");

        let mut form = Form::new()
            .part(
                "file",
                Part::bytes(audio_bytes)
                    .file_name(filename.to_string())
                    .mime_str("application/octet-stream")?,
            )
            .text("model", self.model.clone());

        if let Some(language) = self.language.clone() {
            form = form.text("language", language);
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response, "Whisper").await);
        }

        let body: TranscriptionResponse = response.json().await.map_err(|e| {
            AiError::InvalidFormat(format!("Transcription response has no text field: {}", e))
        })?;

        Ok(body.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_transcribe_uploads_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": " ciao a tutti "})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("voice.ogg");
        std::fs::write(&audio, b"OggS fake audio").unwrap();

        let transcriber = WhisperTranscriber::new("sk-test")
            .with_base_url(server.uri())
            .with_language("it");
        let text = transcriber.transcribe(&audio).await.unwrap();
        assert_eq!(text, "ciao a tutti");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("voice.ogg"));
        assert!(body.contains("whisper-1"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_request() {
        let transcriber = WhisperTranscriber::new("sk-test").with_base_url("http://127.0.0.1:9");
        let result = transcriber
            .transcribe(Path::new("/nonexistent/voice.ogg"))
            .await;
        assert!(matches!(result, Err(AiError::Transcription(_))));
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("a.mp3");
        std::fs::write(&audio, b"ID3").unwrap();

        let transcriber = WhisperTranscriber::new("sk-bad").with_base_url(server.uri());
        let err = transcriber.transcribe(&audio).await.unwrap_err();
        assert!(matches!(err, AiError::LlmHttp { status: 401, .. }));
    }
}
