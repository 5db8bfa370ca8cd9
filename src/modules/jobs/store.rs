use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{EncodeParameters, Job, JobStatus, QualityMetrics};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("an active batch for `{source_ref}` with the same parameters already exists")]
    DuplicateBatch { source_ref: String },
    #[error("a batch needs at least one parameter combination")]
    EmptyBatch,
    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id} has a corrupt row: {reason}")]
    Corrupt { id: Uuid, reason: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Paging and status filter for [`JobStore::list`]. An empty `statuses` list
/// matches every job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub skip: i64,
    pub limit: i64,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&job.status)
    }
}

/// Durable record of every job and the only place job lifecycle fields change.
///
/// Every transition is a compare-and-swap on the current status: a call that
/// finds the job in any other state fails with
/// [`StoreError::InvalidTransition`] and leaves it untouched.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates one `pending` job per parameter combination, atomically.
    async fn create_batch(
        &self,
        source_ref: &str,
        parameters: &[EncodeParameters],
    ) -> Result<Vec<Job>, StoreError>;

    /// Claims the oldest `pending` job, if any.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Claims one specific job. `Ok(None)` means it is no longer `pending`.
    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError>;

    async fn complete_job(
        &self,
        id: Uuid,
        output_ref: &str,
        metrics: QualityMetrics,
    ) -> Result<Job, StoreError>;

    /// Re-queues a retryable failure while attempts remain, otherwise fails
    /// the job for good.
    async fn fail_job(
        &self,
        id: Uuid,
        error: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<Job, StoreError>;

    /// Administrative termination of a `pending` or `processing` job.
    async fn cancel_job(&self, id: Uuid, reason: &str) -> Result<Job, StoreError>;

    /// Treats `processing` jobs not updated within `older_than` as lost and
    /// resolves them as retryable failures.
    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Job>, StoreError>;

    /// Returns `pending` jobs untouched for longer than `older_than` and marks
    /// them as just dispatched, so each is handed out at most once per period.
    async fn redispatch_idle(&self, older_than: Duration) -> Result<Vec<Job>, StoreError>;

    /// Sources whose jobs are all terminal and whose last job changed at or
    /// after `since`.
    async fn settled_sources(&self, since: OffsetDateTime) -> Result<Vec<String>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Newest first, paged by `skip`/`limit`.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Every job of a source, ordered by parameters.
    async fn list_by_source(&self, source_ref: &str) -> Result<Vec<Job>, StoreError>;
}

pub const WORKER_LOST: &str = "worker stopped responding before the job finished";

/// Canonical identity of a parameter set, independent of input order.
pub fn batch_fingerprint(parameters: &[EncodeParameters]) -> String {
    let mut sorted = parameters.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .map(|p| format!("{}:{}", p.quantization, p.rate_control_factor))
        .collect::<Vec<_>>()
        .join(",")
}

/// Failed jobs always carry a non-empty reason.
pub(crate) fn failure_reason(error: &str) -> String {
    let trimmed = error.trim();
    if trimmed.is_empty() {
        "unknown error".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_order_and_duplicates() {
        let a = [EncodeParameters::new(26, 17), EncodeParameters::new(25, 18)];
        let b = [
            EncodeParameters::new(25, 18),
            EncodeParameters::new(26, 17),
            EncodeParameters::new(25, 18),
        ];
        assert_eq!(batch_fingerprint(&a), batch_fingerprint(&b));
        assert_eq!(batch_fingerprint(&a), "25:18,26:17");
    }

    #[test]
    fn test_failure_reason_is_never_empty() {
        assert_eq!(failure_reason("  "), "unknown error");
        assert_eq!(failure_reason("unsupported codec"), "unsupported codec");
    }
}
