use reqwest::Client;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{AiError, Result};
use crate::http_client::build_http_client;

/// Whether a media reference must be fetched over the network.
pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Allocates per-task scratch directories.
///
/// Each directory is a [`TempDir`]: it is removed when dropped, on success
/// and failure alike.
#[derive(Debug, Clone, Default)]
pub struct ScratchSpace {
    root: Option<PathBuf>,
}

impl ScratchSpace {
    /// Scratch directories under the system temp dir.
    pub fn system() -> Self {
        Self { root: None }
    }

    /// Scratch directories under `root` (created on demand).
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn allocate(&self, label: &str) -> Result<TempDir> {
        let prefix = format!("chatdigest-{}-", label);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %dir.path().display(), "Allocated scratch directory");
        Ok(dir)
    }
}

/// Default cap on a fetched or copied media file.
pub const DEFAULT_MAX_MEDIA_BYTES: u64 = 64 * 1024 * 1024;

/// Brings a media reference into a local directory.
///
/// Remote bodies are streamed to disk chunk by chunk and abandoned once
/// they pass `max_bytes`.
#[derive(Clone)]
pub struct MediaFetcher {
    client: Client,
    max_bytes: u64,
}

impl Default for MediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFetcher {
    pub fn new() -> Self {
        Self::with_client(build_http_client())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_bytes: DEFAULT_MAX_MEDIA_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn too_large(&self, reference: &str) -> AiError {
        AiError::Media(format!(
            "Media '{}' exceeds the {} byte limit",
            reference, self.max_bytes
        ))
    }

    /// Download a remote reference or copy a local one into `dest_dir`.
    ///
    /// Returns the path of the local copy.
    pub async fn fetch_or_copy(&self, reference: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = file_name_for(reference);
        let target = dest_dir.join(&file_name);

        if is_remote(reference) {
            let written = match self.download(reference, &target).await {
                Ok(written) => written,
                Err(e) => {
                    if let Err(cleanup) = tokio::fs::remove_file(&target).await
                        && cleanup.kind() != std::io::ErrorKind::NotFound
                    {
                        warn!(path = %target.display(), error = %cleanup, "Failed to remove partial download");
                    }
                    return Err(e);
                }
            };
            debug!(reference, bytes = written, "Downloaded media");
        } else {
            let source = Path::new(reference);
            let Ok(metadata) = tokio::fs::metadata(source).await else {
                return Err(AiError::Media(format!(
                    "Media file not found: {}",
                    reference
                )));
            };
            if metadata.len() > self.max_bytes {
                return Err(self.too_large(reference));
            }
            tokio::fs::copy(source, &target).await?;
            debug!(reference, "Copied local media");
        }

        Ok(target)
    }

    async fn download(&self, reference: &str, target: &Path) -> Result<u64> {
        let mut response = self.client.get(reference).send().await?;
        if !response.status().is_success() {
            return Err(AiError::Media(format!(
                "Download of '{}' failed with status {}",
                reference,
                response.status()
            )));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(self.too_large(reference));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(self.too_large(reference));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Last path segment of a reference, without query string, restricted to
/// filename-safe characters.
fn file_name_for(reference: &str) -> String {
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    let last = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "media".to_string()
    } else {
        cleaned
    }
}
