use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Process-level settings. Pipeline tuning lives in `DigestConfig`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Pipeline config file, `~/.chatdigest/config.toml` when unset
    pub digest_config: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    /// Directory for daily rolling log files
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    openai: OpenAISection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_bind")]
    bind: String,
    #[serde(default)]
    log_dir: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct OpenAISection {
    #[serde(default)]
    base_url: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl ServerConfig {
    /// `server.toml` (or `CHATDIGEST_SERVER_CONFIG`) first, then environment
    /// variables on top.
    pub fn load() -> anyhow::Result<Self> {
        let file_config = load_from_file()?.unwrap_or_default();
        Ok(Self::from_parts(file_config, |name| env::var(name).ok()))
    }

    fn from_parts(file_config: FileConfig, var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        Self {
            bind: non_empty("CHATDIGEST_BIND").unwrap_or(file_config.server.bind),
            digest_config: non_empty("CHATDIGEST_CONFIG").map(PathBuf::from),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL").or(file_config.openai.base_url),
            log_dir: non_empty("CHATDIGEST_LOG_DIR")
                .map(PathBuf::from)
                .or(file_config.server.log_dir),
        }
    }
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("CHATDIGEST_SERVER_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("server.toml").exists() {
        Some("server.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_parts(FileConfig::default(), vars(&[]));
        assert_eq!(config.bind, "0.0.0.0:8000");
        assert!(config.openai_api_key.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
[server]
bind = "127.0.0.1:9000"
log_dir = "/var/log/chatdigest"

[openai]
base_url = "http://llm.internal/v1"
"#,
        )
        .unwrap();

        let config = ServerConfig::from_parts(
            file,
            vars(&[("CHATDIGEST_BIND", "127.0.0.1:7000"), ("OPENAI_API_KEY", "sk-test")]),
        );
        assert_eq!(config.bind, "127.0.0.1:7000");
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_base_url.as_deref(), Some("http://llm.internal/v1"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/chatdigest")));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let config = ServerConfig::from_parts(FileConfig::default(), vars(&[("CHATDIGEST_BIND", "  ")]));
        assert_eq!(config.bind, "0.0.0.0:8000");
    }
}
