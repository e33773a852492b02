//! Pipeline configuration, loaded from `config.toml`.

use anyhow::{Context, Result, anyhow};
use chatdigest_ai::{DEFAULT_MAX_MEDIA_BYTES, MediaFetcher, RetryPolicy, ScratchSpace};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::session::SessionSettings;

// Default configuration constants
const DEFAULT_MAX_EVENTS: usize = 10;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 180; // 3 minutes
const DEFAULT_MAX_CONCURRENT_ANALYSES: usize = 4;
const DEFAULT_PASS_TIMEOUT_SECS: u64 = 600; // 10 minutes
const DEFAULT_MEDIA_MAX_TOKENS: u32 = 200;
const DEFAULT_VIDEO_FRAME_STRIDE: u32 = 60;
const DEFAULT_MAX_VIDEO_FRAMES: u32 = 16;
const DEFAULT_DOCUMENT_MAX_CHARS: usize = 12_000;
const DEFAULT_DAILY_FLUSH_CRON: &str = "0 0 0 * * *"; // midnight
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Buffer size that triggers an immediate analysis pass
    pub max_events: usize,
    /// Quiet period after the last event before a pass runs
    pub idle_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Upper bound on media analyses running at once across all sessions
    pub max_concurrent_analyses: usize,
    /// Deadline for analysis plus composition (0 disables it)
    pub pass_timeout_secs: u64,
    pub media_max_tokens: u32,
    pub video_frame_stride: u32,
    pub max_video_frames: u32,
    pub document_max_chars: usize,
    /// Largest media file fetched or copied into scratch space
    pub media_max_bytes: u64,
    pub scratch_dir: Option<PathBuf>,
    pub daily_flush_cron: String,
    /// IANA timezone for the daily flush, UTC when unset
    pub timezone: Option<String>,
    /// Evict sessions idle for this long after each daily cycle
    pub session_idle_ttl_secs: Option<u64>,
    pub model: String,
    pub transcription_model: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
            max_concurrent_analyses: DEFAULT_MAX_CONCURRENT_ANALYSES,
            pass_timeout_secs: DEFAULT_PASS_TIMEOUT_SECS,
            media_max_tokens: DEFAULT_MEDIA_MAX_TOKENS,
            video_frame_stride: DEFAULT_VIDEO_FRAME_STRIDE,
            max_video_frames: DEFAULT_MAX_VIDEO_FRAMES,
            document_max_chars: DEFAULT_DOCUMENT_MAX_CHARS,
            media_max_bytes: DEFAULT_MAX_MEDIA_BYTES,
            scratch_dir: None,
            daily_flush_cron: DEFAULT_DAILY_FLUSH_CRON.to_string(),
            timezone: None,
            session_idle_ttl_secs: None,
            model: DEFAULT_MODEL.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

impl DigestConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_events == 0 {
            return Err(anyhow!("max_events must be at least 1"));
        }

        if self.idle_timeout_secs == 0 {
            return Err(anyhow!("idle_timeout_secs must be at least 1"));
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be at least 1"));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            ));
        }

        if self.max_concurrent_analyses == 0 {
            return Err(anyhow!("max_concurrent_analyses must be at least 1"));
        }

        if self.video_frame_stride == 0 {
            return Err(anyhow!("video_frame_stride must be at least 1"));
        }

        if self.media_max_bytes == 0 {
            return Err(anyhow!("media_max_bytes must be at least 1"));
        }

        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Option<Tz>> {
        self.timezone
            .as_deref()
            .map(|name| Tz::from_str(name).map_err(|e| anyhow!("Invalid timezone {}: {}", name, e)))
            .transpose()
    }

    pub fn pass_timeout(&self) -> Option<Duration> {
        (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs))
    }

    pub fn session_idle_ttl(&self) -> Option<Duration> {
        self.session_idle_ttl_secs.map(Duration::from_secs)
    }

    pub fn scratch_space(&self) -> ScratchSpace {
        match &self.scratch_dir {
            Some(dir) => ScratchSpace::under(dir),
            None => ScratchSpace::system(),
        }
    }

    pub fn media_fetcher(&self) -> MediaFetcher {
        MediaFetcher::new().with_max_bytes(self.media_max_bytes)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_events: self.max_events,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            pass_timeout: self.pass_timeout(),
        }
    }
}
