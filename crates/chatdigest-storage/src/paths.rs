//! Path utilities for ChatDigest directory resolution.

use anyhow::Result;
use std::path::PathBuf;

const CHATDIGEST_DIR: &str = ".chatdigest";
const DATABASE_FILE: &str = "chatdigest.db";
const CONFIG_FILE: &str = "config.toml";

/// Environment variable to override the ChatDigest directory.
const CHATDIGEST_DIR_ENV: &str = "CHATDIGEST_DIR";

/// Resolve the ChatDigest data directory.
/// Priority: CHATDIGEST_DIR env var > ~/.chatdigest/
pub fn resolve_chatdigest_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CHATDIGEST_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(CHATDIGEST_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the ChatDigest directory exists and return its path.
pub fn ensure_chatdigest_dir() -> Result<PathBuf> {
    let dir = resolve_chatdigest_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Database path: ~/.chatdigest/chatdigest.db
pub fn database_path() -> Result<PathBuf> {
    Ok(ensure_chatdigest_dir()?.join(DATABASE_FILE))
}

/// Config path: ~/.chatdigest/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(resolve_chatdigest_dir()?.join(CONFIG_FILE))
}
