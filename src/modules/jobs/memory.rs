use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{EncodeParameters, Job, JobStatus, QualityMetrics};
use super::store::{JobFilter, JobStore, StoreError, WORKER_LOST, batch_fingerprint, failure_reason};

struct BatchRecord {
    id: Uuid,
    source_ref: String,
    fingerprint: String,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    batches: Vec<BatchRecord>,
}

impl Inner {
    fn job_mut(&mut self, id: Uuid) -> Result<&mut Job, StoreError> {
        self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// Process-local job store. Every operation runs under one lock, which makes
/// each transition linearizable.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require(job: &Job, to: JobStatus) -> Result<(), StoreError> {
    if job.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: job.id,
            from: job.status,
            to,
        })
    }
}

fn start_processing(job: &mut Job, worker_id: &str, now: OffsetDateTime) {
    job.status = JobStatus::Processing;
    job.attempt_count += 1;
    job.worker_id = Some(worker_id.to_string());
    job.updated_at = now;
}

fn resolve_failure(job: &mut Job, error: &str, retryable: bool, max_attempts: u32, now: OffsetDateTime) {
    job.worker_id = None;
    job.updated_at = now;
    if retryable && i64::from(job.attempt_count) < i64::from(max_attempts) {
        job.status = JobStatus::Pending;
        job.error = None;
    } else {
        job.status = JobStatus::Failed;
        job.error = Some(failure_reason(error));
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_batch(
        &self,
        source_ref: &str,
        parameters: &[EncodeParameters],
    ) -> Result<Vec<Job>, StoreError> {
        if parameters.is_empty() {
            return Err(StoreError::EmptyBatch);
        }

        let mut inner = self.inner.lock().await;
        let fingerprint = batch_fingerprint(parameters);

        let active_duplicate = inner
            .batches
            .iter()
            .filter(|b| b.source_ref == source_ref && b.fingerprint == fingerprint)
            .any(|b| {
                inner
                    .jobs
                    .values()
                    .any(|j| j.batch_id == b.id && j.status != JobStatus::Failed)
            });
        if active_duplicate {
            return Err(StoreError::DuplicateBatch {
                source_ref: source_ref.to_string(),
            });
        }

        let mut unique = parameters.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let batch_id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let jobs: Vec<Job> = unique
            .into_iter()
            .map(|p| Job::new(batch_id, source_ref, p, now))
            .collect();

        inner.batches.push(BatchRecord {
            id: batch_id,
            source_ref: source_ref.to_string(),
            fingerprint,
        });
        for job in &jobs {
            inner.jobs.insert(job.id, job.clone());
        }

        Ok(jobs)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let job = inner.job_mut(id)?;
        start_processing(job, worker_id, OffsetDateTime::now_utc());
        Ok(Some(job.clone()))
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        start_processing(job, worker_id, OffsetDateTime::now_utc());
        Ok(Some(job.clone()))
    }

    async fn complete_job(
        &self,
        id: Uuid,
        output_ref: &str,
        metrics: QualityMetrics,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        require(job, JobStatus::Completed)?;

        job.status = JobStatus::Completed;
        job.output_ref = Some(output_ref.to_string());
        job.metrics = Some(metrics);
        job.error = None;
        job.worker_id = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(job.clone())
    }

    async fn fail_job(
        &self,
        id: Uuid,
        error: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: JobStatus::Failed,
            });
        }

        resolve_failure(job, error, retryable, max_attempts, OffsetDateTime::now_utc());
        Ok(job.clone())
    }

    async fn cancel_job(&self, id: Uuid, reason: &str) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        require(job, JobStatus::Failed)?;

        job.status = JobStatus::Failed;
        job.error = Some(failure_reason(reason));
        job.worker_id = None;
        job.updated_at = OffsetDateTime::now_utc();
        Ok(job.clone())
    }

    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let cutoff = now - older_than;

        let mut recovered = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                resolve_failure(job, WORKER_LOST, true, max_attempts, now);
                recovered.push(job.clone());
            }
        }
        Ok(recovered)
    }

    async fn redispatch_idle(&self, older_than: Duration) -> Result<Vec<Job>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let cutoff = now - older_than;

        let mut idle = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Pending && job.updated_at < cutoff {
                job.updated_at = now;
                idle.push(job.clone());
            }
        }
        idle.sort_by_key(|j| (j.created_at, j.id));
        Ok(idle)
    }

    async fn settled_sources(&self, since: OffsetDateTime) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;

        // source -> (all terminal, newest update)
        let mut sources: HashMap<&str, (bool, OffsetDateTime)> = HashMap::new();
        for job in inner.jobs.values() {
            let entry = sources
                .entry(job.source_ref.as_str())
                .or_insert((true, job.updated_at));
            entry.0 &= job.is_terminal();
            entry.1 = entry.1.max(job.updated_at);
        }

        let mut settled: Vec<String> = sources
            .into_iter()
            .filter(|(_, (terminal, newest))| *terminal && *newest >= since)
            .map(|(source, _)| source.to_string())
            .collect();
        settled.sort();
        Ok(settled)
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(jobs
            .into_iter()
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn list_by_source(&self, source_ref: &str) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.source_ref == source_ref)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (a.parameters, a.created_at, a.id).cmp(&(b.parameters, b.created_at, b.id)));
        Ok(jobs)
    }
}
