pub mod analyzer;
pub mod composer;
pub mod config;
pub mod error;
pub mod model;
pub mod preferences;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use analyzer::{AnalyzerSettings, ContentAnalyzer, FactBlock, fact_line};
pub use composer::DigestComposer;
pub use config::DigestConfig;
pub use error::{DigestError, Result};
pub use model::{ConversationEvent, EventKind};
pub use preferences::{DigestLength, PreferenceError, PreferenceKey, PreferenceSet};
pub use registry::{DailyCycleReport, SessionRegistry};
pub use scheduler::{DailyFlushScheduler, DigestNotifier, LogNotifier};
pub use session::{
    ConversationSession, DailyFlushReport, NOTHING_TO_SUMMARIZE, PreferenceUpdate, SessionPhase,
    SessionServices, SessionSettings,
};
pub use store::{DailyDigestRecord, DigestStore, RedbDigestStore};

use chatdigest_ai::{LlmClient, Transcriber};
use chatdigest_storage::Storage;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Pipeline state shared by the server's handlers and the daily scheduler.
pub struct DigestCore {
    pub config: DigestConfig,
    pub store: Arc<RedbDigestStore>,
    pub registry: Arc<SessionRegistry>,
}

impl DigestCore {
    pub fn new(
        db_path: impl AsRef<Path>,
        config: DigestConfig,
        llm: Arc<dyn LlmClient>,
        transcriber: Arc<dyn Transcriber>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::new(db_path)?);
        let store = Arc::new(RedbDigestStore::new(storage));

        let services = Self::services(&config, llm, transcriber, store.clone());
        let registry = Arc::new(SessionRegistry::from_config(services, &config)?);

        info!(
            max_events = config.max_events,
            idle_timeout_secs = config.idle_timeout_secs,
            "Initializing ChatDigest"
        );

        Ok(Self {
            config,
            store,
            registry,
        })
    }

    /// Wire analyzer, composer and store into session services.
    pub fn services(
        config: &DigestConfig,
        llm: Arc<dyn LlmClient>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn DigestStore>,
    ) -> SessionServices {
        let analyzer = ContentAnalyzer::from_config(llm.clone(), transcriber, config);
        SessionServices {
            analyzer: Arc::new(analyzer),
            composer: Arc::new(DigestComposer::new(llm, config.retry)),
            store,
            settings: config.session_settings(),
        }
    }

    /// Daily scheduler over this core's registry, not yet started.
    pub async fn daily_scheduler(
        &self,
        notifier: Arc<dyn DigestNotifier>,
    ) -> anyhow::Result<DailyFlushScheduler> {
        DailyFlushScheduler::new(
            self.registry.clone(),
            notifier,
            self.config.daily_flush_cron.clone(),
            self.config.timezone()?,
        )
        .await
    }
}
