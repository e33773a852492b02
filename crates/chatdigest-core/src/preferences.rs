//! Per-conversation preference set.
//!
//! Exactly four keys exist. Anything else, and any value that does not parse
//! for its key, is rejected without touching the set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferenceKey {
    AutoDigest,
    Language,
    FilterTopic,
    DigestLength,
}

impl PreferenceKey {
    pub const ALL: [PreferenceKey; 4] = [
        PreferenceKey::AutoDigest,
        PreferenceKey::Language,
        PreferenceKey::FilterTopic,
        PreferenceKey::DigestLength,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceKey::AutoDigest => "AutoDigest",
            PreferenceKey::Language => "Language",
            PreferenceKey::FilterTopic => "FilterTopic",
            PreferenceKey::DigestLength => "DigestLength",
        }
    }

    /// Parse a key name. Accepts canonical, snake_case and legacy names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "AutoDigest" | "auto_digest" | "Auto-Riassunto" => Some(PreferenceKey::AutoDigest),
            "Language" | "language" | "Lingua" => Some(PreferenceKey::Language),
            "FilterTopic" | "filter_topic" | "Filtro" => Some(PreferenceKey::FilterTopic),
            "DigestLength" | "digest_length" | "Lunghezza Riassunto" => {
                Some(PreferenceKey::DigestLength)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested digest size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl DigestLength {
    /// Output budget for the composition call.
    pub fn max_tokens(&self) -> u32 {
        match self {
            DigestLength::Short => 150,
            DigestLength::Medium => 300,
            DigestLength::Long => 600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestLength::Short => "short",
            DigestLength::Medium => "medium",
            DigestLength::Long => "long",
        }
    }
}

impl FromStr for DigestLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short" | "breve" => Ok(DigestLength::Short),
            "medium" | "medio" => Ok(DigestLength::Medium),
            "long" | "lungo" => Ok(DigestLength::Long),
            other => Err(format!("Unknown digest length: {}", other)),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Why a preference update was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceError {
    UnknownKey(String),
    InvalidValue { key: PreferenceKey, value: String },
}

impl fmt::Display for PreferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceError::UnknownKey(key) => write!(f, "unknown preference key '{}'", key),
            PreferenceError::InvalidValue { key, value } => {
                write!(f, "invalid value '{}' for preference {}", value, key)
            }
        }
    }
}

impl std::error::Error for PreferenceError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceSet {
    pub auto_digest: bool,
    pub language: String,
    /// Empty means no filter
    pub filter_topic: String,
    pub digest_length: DigestLength,
}

impl Default for PreferenceSet {
    fn default() -> Self {
        Self {
            auto_digest: true,
            language: "it".to_string(),
            filter_topic: String::new(),
            digest_length: DigestLength::Medium,
        }
    }
}

impl PreferenceSet {
    pub fn get(&self, key: PreferenceKey) -> String {
        match key {
            PreferenceKey::AutoDigest => self.auto_digest.to_string(),
            PreferenceKey::Language => self.language.clone(),
            PreferenceKey::FilterTopic => self.filter_topic.clone(),
            PreferenceKey::DigestLength => self.digest_length.as_str().to_string(),
        }
    }

    /// Set `key` from its string form. The set is unchanged on error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<PreferenceKey, PreferenceError> {
        let parsed = PreferenceKey::parse(key)
            .ok_or_else(|| PreferenceError::UnknownKey(key.to_string()))?;
        let invalid = || PreferenceError::InvalidValue {
            key: parsed,
            value: value.to_string(),
        };

        match parsed {
            PreferenceKey::AutoDigest => {
                self.auto_digest = parse_bool(value).ok_or_else(invalid)?;
            }
            PreferenceKey::Language => {
                let language = value.trim();
                if language.is_empty() {
                    return Err(invalid());
                }
                self.language = language.to_string();
            }
            PreferenceKey::FilterTopic => {
                self.filter_topic = value.trim().to_string();
            }
            PreferenceKey::DigestLength => {
                self.digest_length = value.parse().map_err(|_| invalid())?;
            }
        }
        Ok(parsed)
    }

    pub fn has_filter(&self) -> bool {
        !self.filter_topic.is_empty()
    }

    /// All four key/value pairs in display order.
    pub fn entries(&self) -> Vec<(PreferenceKey, String)> {
        PreferenceKey::ALL
            .iter()
            .map(|key| (*key, self.get(*key)))
            .collect()
    }
}
