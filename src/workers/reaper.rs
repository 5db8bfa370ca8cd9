use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::infrastructure::queue::JobQueue;
use crate::modules::jobs::model::JobStatus;
use crate::modules::jobs::store::{JobStore, StoreError};
use crate::modules::summary::service::ResultAggregator;
use crate::state::AppState;

/// Interval between stale job detection runs.
const DETECTION_INTERVAL: Duration = Duration::from_secs(60);

/// How far back summary reconciliation looks for settled sources.
const SUMMARY_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Keeps every job moving after a lost worker or a failed dispatch.
///
/// Each cycle:
/// - re-enqueues `pending` jobs that have gone a visibility timeout without
///   any change (their message was lost or never published),
/// - retries or fails `processing` jobs older than the visibility timeout,
/// - rewrites summaries of recently settled sources that are missing one.
pub struct StaleJobReaper {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    aggregator: ResultAggregator,
    visibility_timeout: Duration,
    max_attempts: u32,
    interval: Duration,
}

impl StaleJobReaper {
    pub fn new(state: &AppState) -> Self {
        Self {
            jobs: state.jobs.clone(),
            queue: state.queue.clone(),
            aggregator: state.aggregator.clone(),
            visibility_timeout: state.config.visibility_timeout,
            max_attempts: state.config.max_attempts,
            interval: DETECTION_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting stale job reaper (interval: {:?}, timeout: {:?})",
            self.interval, self.visibility_timeout
        );

        let mut ticker = interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reap().await {
                error!("Stale job detection error: {}", e);
            }
            if let Err(e) = self.reconcile_summaries().await {
                error!("Summary reconciliation error: {}", e);
            }
        }

        info!("Stale job reaper stopped");
    }

    /// Runs one detection cycle and returns how many jobs were recovered or
    /// dispatched again.
    pub async fn reap(&self) -> Result<usize, StoreError> {
        // Idle jobs first: the stale pass below stamps the jobs it resets.
        let idle = self.jobs.redispatch_idle(self.visibility_timeout).await?;
        for job in &idle {
            warn!(job.id = %job.id, "Re-dispatching idle pending job");
            if let Err(e) = self.queue.enqueue(job.id).await {
                error!(job.id = %job.id, "Failed to re-enqueue idle job: {}", e);
            }
        }

        let recovered = self
            .jobs
            .requeue_stale(self.visibility_timeout, self.max_attempts)
            .await?;

        for job in &recovered {
            warn!(
                job.id = %job.id,
                attempts = job.attempt_count,
                status = %job.status,
                "Recovered stale job"
            );

            if job.status == JobStatus::Pending {
                // Picked up again by the idle pass if this fails.
                if let Err(e) = self.queue.enqueue(job.id).await {
                    error!(job.id = %job.id, "Failed to re-enqueue stale job: {}", e);
                }
            } else if let Err(e) = self.aggregator.on_job_resolved(job).await {
                error!(job.id = %job.id, "Failed to update source summary: {}", e);
            }
        }

        let total = idle.len() + recovered.len();
        if total > 0 {
            info!(
                "Stale job detection complete: {} recovered, {} re-dispatched",
                recovered.len(),
                idle.len()
            );
        }
        Ok(total)
    }

    /// Writes summaries that a failed aggregation left missing or outdated.
    pub async fn reconcile_summaries(&self) -> Result<usize, StoreError> {
        self.aggregator
            .reconcile(OffsetDateTime::now_utc() - SUMMARY_LOOKBACK)
            .await
    }
}
