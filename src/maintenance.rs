use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::{shutdown::ShutdownToken, store::JobStore, QueueResult, QueueService};

/// Configuration for the scheduled maintenance loop
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often the sweep runs
    pub interval: Duration,

    /// Age in `Working` after which a job counts as abandoned
    pub stuck_threshold: Duration,

    /// Minimum age of a `Done` row before it is eligible for archival
    pub archive_safety_window: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(30 * 60),
            archive_safety_window: Duration::from_secs(10),
        }
    }
}

/// What one maintenance sweep accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Stuck jobs reset to pending
    pub reclaimed: u64,

    /// Completed jobs moved to the archive
    pub archived: u64,
}

/// Scheduled runner for the stuck-job sweep and the archiver.
///
/// Runs out-of-band against the store, never in the request path. Stuck-job
/// sweep failures are logged and retried next tick; archiver failures are
/// logged as errors because the batch did not complete.
pub struct MaintenanceRunner<S: JobStore> {
    service: QueueService<S>,
    config: MaintenanceConfig,
}

impl<S: JobStore> MaintenanceRunner<S> {
    /// Create a runner with the default schedule
    pub fn new(service: QueueService<S>) -> Self {
        Self::with_config(service, MaintenanceConfig::default())
    }

    /// Create a runner with a custom schedule
    pub fn with_config(service: QueueService<S>, config: MaintenanceConfig) -> Self {
        Self { service, config }
    }

    /// Run the maintenance loop until shutdown is requested
    pub async fn run(self, mut token: ShutdownToken) {
        let mut ticker = interval(self.config.interval);

        info!(
            "queue maintenance started (interval {:?}, stuck threshold {:?})",
            self.config.interval, self.config.stuck_threshold
        );

        loop {
            tokio::select! {
                _ = token.requested() => break,
                _ = ticker.tick() => {}
            }

            match self.service.reclaim_stuck(self.config.stuck_threshold).await {
                Ok(count) if count > 0 => debug!("sweep reset {} stuck jobs", count),
                Ok(_) => {}
                Err(err) => warn!("stuck-job sweep failed: {}", err),
            }

            match self
                .service
                .archive_completed(self.config.archive_safety_window)
                .await
            {
                Ok(count) if count > 0 => debug!("sweep archived {} jobs", count),
                Ok(_) => {}
                Err(err) => error!("archive batch did not complete: {}", err),
            }
        }

        info!("queue maintenance stopped");
    }

    /// Run one sweep immediately.
    ///
    /// An archiver failure propagates; the stuck-job count reflects what was
    /// reset before it.
    pub async fn sweep(&self) -> QueueResult<SweepOutcome> {
        let reclaimed = self.service.reclaim_stuck(self.config.stuck_threshold).await?;
        let archived = self
            .service
            .archive_completed(self.config.archive_safety_window)
            .await?;
        Ok(SweepOutcome {
            reclaimed,
            archived,
        })
    }
}
