use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::infrastructure::queue::{Delivery, JobQueue, QueueError};
use crate::infrastructure::storage::{ObjectStorage, StorageError};
use crate::modules::jobs::model::{EncodeParameters, Job, JobStatus, QualityMetrics};
use crate::modules::jobs::store::{JobStore, StoreError};
use crate::modules::summary::service::ResultAggregator;
use crate::state::AppState;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EncodeError {
    pub message: String,
    pub retryable: bool,
}

impl EncodeError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MetricError {
    pub message: String,
    pub retryable: bool,
}

impl MetricError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Re-encodes a source with one parameter combination.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, source: &Bytes, parameters: &EncodeParameters) -> Result<Bytes, EncodeError>;
}

/// Scores an encoded artifact against its source.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(&self, source: &Bytes, artifact: &Bytes) -> Result<QualityMetrics, MetricError>;
}

/// Why processing one job failed. The display text becomes the job's error.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Metric(#[from] MetricError),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}

impl ProcessingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::Storage(_) | ProcessingError::Timeout { .. } => true,
            ProcessingError::Encode(e) => e.retryable,
            ProcessingError::Metric(e) => e.retryable,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_attempts: u32,
    pub encode_timeout: Duration,
    pub score_timeout: Duration,
}

/// What to tell the queue once a delivery has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
}

pub(crate) fn backoff_with_jitter(base: Duration) -> Duration {
    let base_millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let jitter = rand::rng().random_range(0..=base_millis);
    base + Duration::from_millis(jitter)
}

/// Pulls one delivery at a time and drives its job through
/// encode -> score -> upload -> resolve.
pub struct TranscodeWorker {
    name: String,
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<dyn ObjectStorage>,
    encoder: Arc<dyn Encoder>,
    scorer: Arc<dyn QualityScorer>,
    aggregator: ResultAggregator,
    settings: WorkerSettings,
}

impl TranscodeWorker {
    pub fn new(
        name: impl Into<String>,
        state: &AppState,
        encoder: Arc<dyn Encoder>,
        scorer: Arc<dyn QualityScorer>,
    ) -> Self {
        Self {
            name: name.into(),
            jobs: state.jobs.clone(),
            queue: state.queue.clone(),
            storage: state.storage.clone(),
            encoder,
            scorer,
            aggregator: state.aggregator.clone(),
            settings: state.config.worker_settings(),
        }
    }

    /// Runs until `shutdown` fires or the queue closes. A job already in
    /// progress is finished before the worker stops.
    pub async fn run(self, shutdown: CancellationToken) {
        let span = info_span!("worker", worker.name = %self.name);

        async move {
            info!("🎥 Worker started");

            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = self.queue.receive() => received,
                };

                match received {
                    Ok(delivery) => {
                        if self.handle(delivery).await == Settlement::Requeue {
                            self.pause(&shutdown).await;
                        }
                    }
                    Err(QueueError::Closed) => {
                        info!("Queue closed");
                        break;
                    }
                    Err(e) => {
                        error!("❌ Failed to receive from queue: {}", e);
                        self.pause(&shutdown).await;
                    }
                }
            }

            info!("🎥 Worker stopped");
        }
        .instrument(span)
        .await
    }

    async fn pause(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = sleep(backoff_with_jitter(BACKOFF_BASE)) => {}
        }
    }

    /// Processes one delivery and settles it with the queue.
    pub async fn handle(&self, delivery: Delivery) -> Settlement {
        let job_id = delivery.job_id;
        let settlement = self.process(job_id).await;

        let settled = match settlement {
            Settlement::Ack => delivery.ack().await,
            Settlement::Requeue => delivery.nack(true).await,
        };
        if let Err(e) = settled {
            // The broker redelivers; the claim check absorbs the duplicate.
            warn!(job.id = %job_id, "Failed to settle delivery: {}", e);
        }
        settlement
    }

    async fn process(&self, job_id: Uuid) -> Settlement {
        let job = match self.jobs.claim(job_id, &self.name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job.id = %job_id, "Job is no longer pending, discarding delivery");
                return Settlement::Ack;
            }
            Err(StoreError::NotFound(_)) => {
                warn!(job.id = %job_id, "Delivery for unknown job, discarding");
                return Settlement::Ack;
            }
            Err(e) => {
                error!(job.id = %job_id, "❌ Failed to claim job: {}", e);
                return Settlement::Requeue;
            }
        };

        info!(
            job.id = %job.id,
            source = %job.source_ref,
            params = %job.parameters,
            attempt = job.attempt_count,
            "📦 Processing job"
        );

        let resolved = match self.execute(&job).await {
            Ok((output_ref, metrics)) => self.jobs.complete_job(job.id, &output_ref, metrics).await,
            Err(e) => {
                warn!(job.id = %job.id, retryable = e.is_retryable(), "Job attempt failed: {}", e);
                self.jobs
                    .fail_job(job.id, &e.to_string(), e.is_retryable(), self.settings.max_attempts)
                    .await
            }
        };

        match resolved {
            Ok(job) => self.after_resolution(&job).await,
            Err(StoreError::InvalidTransition { from, to, .. }) => {
                // Cancelled or reaped while we were working.
                warn!(job.id = %job_id, "Result discarded, job moved {} and cannot go to {}", from, to);
                Settlement::Ack
            }
            Err(e) => {
                // Left in `processing`; the stale job reaper recovers it.
                error!(job.id = %job_id, "❌ Failed to record job result: {}", e);
                Settlement::Ack
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<(String, QualityMetrics), ProcessingError> {
        let source = self.storage.get(&job.source_ref).await?;

        let encode_timeout = self.settings.encode_timeout;
        let artifact = timeout(encode_timeout, self.encoder.encode(&source, &job.parameters))
            .await
            .map_err(|_| ProcessingError::Timeout {
                stage: "encode",
                after: encode_timeout,
            })??;

        let score_timeout = self.settings.score_timeout;
        let metrics = timeout(score_timeout, self.scorer.score(&source, &artifact))
            .await
            .map_err(|_| ProcessingError::Timeout {
                stage: "score",
                after: score_timeout,
            })??;

        let key = format!("encoded/{}.mp4", job.id);
        let content_type = mime_guess::from_path(&key).first_or_octet_stream().to_string();
        let output_ref = self.storage.put(&key, artifact, &content_type).await?;

        Ok((output_ref, metrics))
    }

    async fn after_resolution(&self, job: &Job) -> Settlement {
        match job.status {
            JobStatus::Completed => {
                info!(job.id = %job.id, output = ?job.output_ref, "✅ Job completed");
            }
            JobStatus::Failed => {
                error!(job.id = %job.id, attempts = job.attempt_count, "❌ Job failed: {}", job.error.as_deref().unwrap_or_default());
            }
            JobStatus::Pending => {
                if let Err(e) = self.queue.enqueue(job.id).await {
                    // Hand the original delivery back instead.
                    error!(job.id = %job.id, "Failed to re-enqueue job: {}", e);
                    return Settlement::Requeue;
                }
                info!(job.id = %job.id, attempt = job.attempt_count, "🔁 Job scheduled for retry");
                return Settlement::Ack;
            }
            JobStatus::Processing => return Settlement::Ack,
        }

        if let Err(e) = self.aggregator.on_job_resolved(job).await {
            error!(job.id = %job.id, "Failed to update source summary: {}", e);
        }
        Settlement::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let storage = ProcessingError::from(StorageError::Download("connection reset".into()));
        assert!(storage.is_retryable());

        let fatal = ProcessingError::from(EncodeError::fatal("unsupported codec"));
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.to_string(), "unsupported codec");

        let flaky = ProcessingError::from(MetricError::transient("scorer busy"));
        assert!(flaky.is_retryable());

        let timed_out = ProcessingError::Timeout {
            stage: "encode",
            after: Duration::from_secs(5),
        };
        assert!(timed_out.is_retryable());
        assert_eq!(timed_out.to_string(), "encode timed out after 5s");
    }

    #[test]
    fn test_backoff_stays_within_jitter_window() {
        for _ in 0..50 {
            let delay = backoff_with_jitter(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }
}
