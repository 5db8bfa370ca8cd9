use std::time::Duration;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{EncodeParameters, Job, JobStatus, QualityMetrics};
use super::store::{JobFilter, JobStore, StoreError, WORKER_LOST, batch_fingerprint, failure_reason};

const JOB_COLUMNS: &str = "id, batch_id, source_ref, quantization, rate_control_factor, status, \
     output_ref, metrics, error, worker_id, attempt_count, created_at, updated_at";

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    batch_id: Uuid,
    source_ref: String,
    quantization: i32,
    rate_control_factor: i32,
    status: String, // Stored as text, checked by the table constraint
    output_ref: Option<String>,
    metrics: Option<Json<QualityMetrics>>,
    error: Option<String>,
    worker_id: Option<String>,
    attempt_count: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|reason| StoreError::Corrupt { id: row.id, reason })?;

        Ok(Job {
            id: row.id,
            batch_id: row.batch_id,
            source_ref: row.source_ref,
            parameters: EncodeParameters::new(row.quantization, row.rate_control_factor),
            status,
            output_ref: row.output_ref,
            metrics: row.metrics.map(|m| m.0),
            error: row.error,
            worker_id: row.worker_id,
            attempt_count: row.attempt_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

fn attempts(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}

/// Postgres-backed [`JobStore`]. Transitions are single `UPDATE ... WHERE
/// status = ...` statements, so the row lock makes each one a compare-and-swap.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Turns a CAS miss into the error the caller should see.
    async fn reject(&self, id: Uuid, to: JobStatus) -> StoreError {
        match self.get(id).await {
            Ok(job) => StoreError::InvalidTransition {
                id,
                from: job.status,
                to,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_batch(
        &self,
        source_ref: &str,
        parameters: &[EncodeParameters],
    ) -> Result<Vec<Job>, StoreError> {
        if parameters.is_empty() {
            return Err(StoreError::EmptyBatch);
        }

        let fingerprint = batch_fingerprint(parameters);
        let mut unique = parameters.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut tx = self.pool.begin().await?;

        // Serializes submissions for the same source until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(source_ref)
            .execute(&mut *tx)
            .await?;

        let duplicate = sqlx::query_scalar::<_, bool>(
            r"
            SELECT EXISTS (
                SELECT 1
                FROM job_batches b
                WHERE b.source_ref = $1
                  AND b.fingerprint = $2
                  AND EXISTS (
                      SELECT 1 FROM jobs j WHERE j.batch_id = b.id AND j.status <> 'failed'
                  )
            )
            ",
        )
        .bind(source_ref)
        .bind(&fingerprint)
        .fetch_one(&mut *tx)
        .await?;

        if duplicate {
            tx.rollback().await?;
            return Err(StoreError::DuplicateBatch {
                source_ref: source_ref.to_string(),
            });
        }

        let batch_id = Uuid::new_v4();
        sqlx::query("INSERT INTO job_batches (id, source_ref, fingerprint) VALUES ($1, $2, $3)")
            .bind(batch_id)
            .bind(source_ref)
            .bind(&fingerprint)
            .execute(&mut *tx)
            .await?;

        let mut jobs = Vec::with_capacity(unique.len());
        for params in unique {
            let row = sqlx::query_as::<_, JobRow>(&format!(
                r"
                INSERT INTO jobs (id, batch_id, source_ref, quantization, rate_control_factor)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {JOB_COLUMNS}
                "
            ))
            .bind(Uuid::new_v4())
            .bind(batch_id)
            .bind(source_ref)
            .bind(params.quantization)
            .bind(params.rate_control_factor)
            .fetch_one(&mut *tx)
            .await?;
            jobs.push(Job::try_from(row)?);
        }

        tx.commit().await?;
        Ok(jobs)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                worker_id = $1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                worker_id = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Job::try_from(row)?)),
            // Distinguishes an unknown id from a job someone else holds.
            None => self.get(id).await.map(|_| None),
        }
    }

    async fn complete_job(
        &self,
        id: Uuid,
        output_ref: &str,
        metrics: QualityMetrics,
    ) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = 'completed',
                output_ref = $2,
                metrics = $3,
                error = NULL,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(id)
        .bind(output_ref)
        .bind(Json(metrics))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.reject(id, JobStatus::Completed).await),
        }
    }

    async fn fail_job(
        &self,
        id: Uuid,
        error: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = CASE WHEN $3 AND attempt_count < $4 THEN 'pending' ELSE 'failed' END,
                error = CASE WHEN $3 AND attempt_count < $4 THEN NULL ELSE $2 END,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(id)
        .bind(failure_reason(error))
        .bind(retryable)
        .bind(attempts(max_attempts))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.reject(id, JobStatus::Failed).await),
        }
    }

    async fn cancel_job(&self, id: Uuid, reason: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                worker_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(id)
        .bind(failure_reason(reason))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.reject(id, JobStatus::Failed).await),
        }
    }

    async fn requeue_stale(
        &self,
        older_than: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET status = CASE WHEN attempt_count < $2 THEN 'pending' ELSE 'failed' END,
                error = CASE WHEN attempt_count < $2 THEN NULL ELSE $3 END,
                worker_id = NULL,
                updated_at = NOW()
            WHERE status = 'processing' AND updated_at < $1
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(cutoff)
        .bind(attempts(max_attempts))
        .bind(WORKER_LOST)
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn redispatch_idle(&self, older_than: Duration) -> Result<Vec<Job>, StoreError> {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE jobs
            SET updated_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending' AND updated_at < $1
                ORDER BY created_at, id
                FOR UPDATE SKIP LOCKED
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = into_jobs(rows)?;
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn settled_sources(&self, since: OffsetDateTime) -> Result<Vec<String>, StoreError> {
        let sources = sqlx::query_scalar::<_, String>(
            r"
            SELECT source_ref
            FROM jobs
            GROUP BY source_ref
            HAVING bool_and(status IN ('completed', 'failed'))
               AND MAX(updated_at) >= $1
            ORDER BY source_ref
            ",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(sources)
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        Job::try_from(row)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE cardinality($1::text[]) = 0 OR status = ANY($1)
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "
        ))
        .bind(statuses)
        .bind(filter.skip.max(0))
        .bind(filter.limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }

    async fn list_by_source(&self, source_ref: &str) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE source_ref = $1
            ORDER BY quantization ASC, rate_control_factor ASC, created_at ASC, id ASC
            "
        ))
        .bind(source_ref)
        .fetch_all(&self.pool)
        .await?;

        into_jobs(rows)
    }
}
