use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{ListTasksQuery, TaskDetailResponse, TaskListResponse, TaskResponse};
use super::model::JobStatus;
use super::store::StoreError;
use crate::infrastructure::storage::StorageError;
use crate::state::AppState;

pub const DEFAULT_CANCEL_REASON: &str = "cancelled by administrator";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read side of the job store plus the administrative cancel.
pub struct JobService;

impl JobService {
    /// One page, newest first. Fetches a single extra row to learn whether
    /// another page exists.
    pub async fn list(state: &AppState, query: ListTasksQuery) -> Result<TaskListResponse, TaskError> {
        let mut filter = query.into_filter().map_err(TaskError::InvalidQuery)?;
        let page_size = filter.limit;
        filter.limit = page_size + 1;

        let mut jobs = state.jobs.list(&filter).await?;
        let has_more = jobs.len() as i64 > page_size;
        jobs.truncate(page_size as usize);

        Ok(TaskListResponse {
            tasks: jobs.into_iter().map(TaskResponse::from).collect(),
            has_more,
        })
    }

    pub async fn detail(state: &AppState, id: Uuid) -> Result<TaskDetailResponse, TaskError> {
        let job = state.jobs.get(id).await?;

        let download_url = match (&job.status, &job.output_ref) {
            (JobStatus::Completed, Some(key)) => Some(
                state
                    .storage
                    .presigned_url(key, state.config.presigned_url_ttl)
                    .await?,
            ),
            _ => None,
        };

        let worker_id = job.worker_id.clone();
        Ok(TaskDetailResponse {
            task: job.into(),
            worker_id,
            download_url,
        })
    }

    pub async fn cancel(state: &AppState, id: Uuid, reason: Option<String>) -> Result<TaskResponse, TaskError> {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

        let job = state.jobs.cancel_job(id, &reason).await?;
        info!(job.id = %id, reason = %reason, "🛑 Job cancelled");

        if let Err(e) = state.aggregator.on_job_resolved(&job).await {
            warn!(job.id = %id, "Failed to update summary after cancel: {}", e);
        }

        Ok(job.into())
    }
}
