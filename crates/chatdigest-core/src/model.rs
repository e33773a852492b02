//! Conversation events and their kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of content kinds the analyzer knows how to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::Image => "image",
            EventKind::Audio => "audio",
            EventKind::Video => "video",
            EventKind::Document => "document",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, EventKind::Text)
    }

    /// Noun phrase used in fact lines ("sent an image").
    pub fn description(&self) -> &'static str {
        match self {
            EventKind::Text => "a message",
            EventKind::Image => "an image",
            EventKind::Audio => "an audio message",
            EventKind::Video => "a video",
            EventKind::Document => "a document",
        }
    }

    /// Classify a delivery-level media field.
    ///
    /// Stickers count as images unless animated; documents whose MIME type
    /// is an image or a video are treated as such.
    pub fn from_media_field(field: &str, mime_type: Option<&str>, is_animated: bool) -> Option<Self> {
        let kind = match field {
            "text" => EventKind::Text,
            "photo" => EventKind::Image,
            "sticker" if is_animated => EventKind::Video,
            "sticker" => EventKind::Image,
            "voice" | "audio" => EventKind::Audio,
            "video" | "animation" | "video_note" => EventKind::Video,
            "document" => match mime_type {
                Some(mime) if mime.starts_with("image") => EventKind::Image,
                Some(mime) if mime.starts_with("video") => EventKind::Video,
                _ => EventKind::Document,
            },
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(EventKind::Text),
            "image" => Ok(EventKind::Image),
            "audio" => Ok(EventKind::Audio),
            "video" => Ok(EventKind::Video),
            "document" => Ok(EventKind::Document),
            other => Err(format!("Unknown event kind: {}", other)),
        }
    }
}

/// One inbound unit of conversation content.
///
/// For media kinds `payload` is a local path or an `http(s)` URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub author: String,
    pub kind: EventKind,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ConversationEvent {
    pub fn new(
        author: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            author: author.into(),
            kind,
            payload: payload.into(),
            timestamp,
            caption: None,
        }
    }

    pub fn text(author: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(author, EventKind::Text, text, timestamp)
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        self.caption = if caption.trim().is_empty() {
            None
        } else {
            Some(caption)
        };
        self
    }

    /// Caption text, if any non-blank caption was supplied.
    pub fn caption(&self) -> Option<&str> {
        self.caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
