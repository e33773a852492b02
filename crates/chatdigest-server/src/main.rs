mod api;
mod config;

use anyhow::{Context, Result};
use chatdigest_ai::{LlmClient, OpenAIClient, Transcriber, WhisperTranscriber};
use chatdigest_core::{DigestConfig, DigestCore, LogNotifier};
use chatdigest_storage::paths;
use config::ServerConfig;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

/// stdout logging, plus a daily rolling file when `log_dir` is set.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,chatdigest=debug".into())
    };

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "chatdigest.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_thread_ids(true)
                .with_line_number(true)
                .init();
            None
        }
    }
}

fn build_clients(
    server: &ServerConfig,
    digest: &DigestConfig,
) -> Result<(Arc<dyn LlmClient>, Arc<dyn Transcriber>)> {
    let api_key = match (&server.openai_api_key, &server.openai_base_url) {
        (Some(key), _) => key.clone(),
        // Self-hosted OpenAI-compatible endpoints may not need a key.
        (None, Some(_)) => String::new(),
        (None, None) => anyhow::bail!("OPENAI_API_KEY is not set"),
    };

    let mut llm = OpenAIClient::new(api_key.clone()).with_model(&digest.model);
    let mut transcriber =
        WhisperTranscriber::new(api_key).with_model(&digest.transcription_model);
    if let Some(base_url) = &server.openai_base_url {
        llm = llm.with_base_url(base_url);
        transcriber = transcriber.with_base_url(base_url);
    }

    Ok((Arc::new(llm), Arc::new(transcriber)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let server_config = ServerConfig::load()?;
    let _log_guard = init_logging(server_config.log_dir.as_deref());

    tracing::info!("Starting ChatDigest server");

    let config_path = match &server_config.digest_config {
        Some(path) => path.clone(),
        None => paths::config_path()?,
    };
    let digest_config = DigestConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let (llm, transcriber) = build_clients(&server_config, &digest_config)?;
    let db_path = paths::database_path()?;
    let core = DigestCore::new(&db_path, digest_config, llm, transcriber)
        .context("Failed to initialize digest core")?;

    let notifier = Arc::new(LogNotifier);
    let mut scheduler = core.daily_scheduler(notifier.clone()).await?;
    scheduler.start().await?;

    let state = Arc::new(api::state::ServerState { core, notifier });
    let registry = state.core.registry.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&server_config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", server_config.bind))?;

    tracing::info!("ChatDigest running on http://{}", server_config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    scheduler.shutdown().await?;
    registry.clear().await;
    Ok(())
}
