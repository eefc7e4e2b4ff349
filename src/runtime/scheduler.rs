/// Background asset reaper
///
/// Runs `ExpiringAssetStore::reap_expired` on a fixed interval using
/// tokio-cron-scheduler. Reaping is idempotent, so an overlapping tick or a
/// manual sweep alongside the job is harmless.

use crate::assets::ExpiringAssetStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct AssetReaperService {
    scheduler: Arc<RwLock<JobScheduler>>,
    store: Arc<ExpiringAssetStore>,
    interval: Duration,
    job_id: RwLock<Option<Uuid>>,
}

impl std::fmt::Debug for AssetReaperService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetReaperService")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl AssetReaperService {
    pub async fn new(store: Arc<ExpiringAssetStore>, interval: Duration) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            store,
            interval,
            job_id: RwLock::new(None),
        })
    }

    /// Register the reaper job and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting asset reaper (every {:?})", self.interval);

        // Sweep whatever expired while the process was down
        let reaped = self.store.reap_expired().await;
        if reaped > 0 {
            tracing::info!("🧹 Startup sweep removed {} expired asset(s)", reaped);
        }

        let store = self.store.clone();
        let job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let store = store.clone();
            Box::pin(async move {
                let reaped = store.reap_expired().await;
                if reaped > 0 {
                    tracing::info!("🧹 Reaped {} expired asset(s)", reaped);
                } else {
                    tracing::debug!("🧹 Reaper tick: nothing expired");
                }
            })
        })?;

        {
            let scheduler = self.scheduler.read().await;
            let job_id = scheduler.add(job).await?;
            *self.job_id.write().await = Some(job_id);
            scheduler.start().await?;
        }

        tracing::info!("✅ Asset reaper started");
        Ok(())
    }

    /// Remove the job and shut the scheduler down
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping asset reaper");

        if let Some(job_id) = self.job_id.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove reaper job {}: {}", job_id, e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Asset reaper stopped");
        Ok(())
    }

    /// Run one sweep immediately
    pub async fn sweep(&self) -> usize {
        self.store.reap_expired().await
    }
}
