use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Outbound delivery of a daily digest to its conversation.
#[async_trait]
pub trait DigestNotifier: Send + Sync {
    async fn deliver(&self, conversation_id: &str, digest: &str) -> Result<()>;
}

/// Notifier that only logs the digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl DigestNotifier for LogNotifier {
    async fn deliver(&self, conversation_id: &str, digest: &str) -> Result<()> {
        info!(conversation_id, chars = digest.chars().count(), "Daily digest ready");
        debug!(conversation_id, digest, "Daily digest text");
        Ok(())
    }
}

/// Cron job that runs the registry's daily cycle
///
/// The cron expression has 6 fields (sec min hour day month weekday), e.g.
/// "0 0 0 * * *" for midnight every day. Without a timezone it runs in UTC.
pub struct DailyFlushScheduler {
    scheduler: JobScheduler,
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn DigestNotifier>,
    cron: String,
    timezone: Option<Tz>,
    job_id: Option<Uuid>,
}

impl DailyFlushScheduler {
    pub async fn new(
        registry: Arc<SessionRegistry>,
        notifier: Arc<dyn DigestNotifier>,
        cron: impl Into<String>,
        timezone: Option<Tz>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            scheduler,
            registry,
            notifier,
            cron: cron.into(),
            timezone,
            job_id: None,
        })
    }

    /// Register the daily job and start ticking.
    pub async fn start(&mut self) -> Result<()> {
        let registry = self.registry.clone();
        let notifier = self.notifier.clone();
        let run = move |_uuid: Uuid, _l: JobScheduler| {
            let registry = registry.clone();
            let notifier = notifier.clone();
            Box::pin(async move {
                info!("Daily flush triggered");
                registry.run_daily_cycle(notifier.as_ref()).await;
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        let job = match self.timezone {
            Some(tz) => Job::new_async_tz(self.cron.as_str(), tz, run)
                .map_err(|e| anyhow!("Failed to create cron job with timezone: {}", e))?,
            None => Job::new_async(self.cron.as_str(), run)
                .map_err(|e| anyhow!("Failed to create cron job: {}", e))?,
        };

        let job_id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to add job to scheduler: {}", e))?;
        self.job_id = Some(job_id);

        self.scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start scheduler: {}", e))?;

        info!(
            cron = %self.cron,
            timezone = ?self.timezone,
            job_uuid = %job_id,
            "DailyFlushScheduler started"
        );
        Ok(())
    }

    pub fn is_scheduled(&self) -> bool {
        self.job_id.is_some()
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("Failed to shutdown scheduler: {}", e))?;
        self.job_id = None;

        info!("DailyFlushScheduler shutdown successfully");
        Ok(())
    }
}
