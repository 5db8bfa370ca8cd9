use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::model::{EncodeParameters, Job, JobStatus, QualityMetrics};
use super::store::JobFilter;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListTasksQuery {
    /// Statuses to include, repeated (`statuses=pending&statuses=failed`) or
    /// comma-separated (`statuses=pending,failed`). Empty means all.
    #[serde(default)]
    pub statuses: Vec<String>,
    pub skip: Option<i64>,
    /// Page size, clamped to 1..=500.
    pub limit: Option<i64>,
}

impl ListTasksQuery {
    pub fn into_filter(self) -> Result<JobFilter, String> {
        let statuses = self
            .statuses
            .iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<JobStatus>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JobFilter {
            statuses,
            skip: self.skip.unwrap_or(0).max(0),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskResponse {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub source_ref: String,
    pub parameters: EncodeParameters,
    pub status: JobStatus,
    pub output_ref: Option<String>,
    pub metrics: Option<QualityMetrics>,
    pub error: Option<String>,
    pub attempt_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

impl From<Job> for TaskResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            batch_id: job.batch_id,
            source_ref: job.source_ref,
            parameters: job.parameters,
            status: job.status,
            output_ref: job.output_ref,
            metrics: job.metrics,
            error: job.error,
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskDetailResponse {
    #[serde(flatten)]
    pub task: TaskResponse,
    pub worker_id: Option<String>,
    /// Presigned download link for the encoded artifact of a completed task.
    pub download_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults() {
        let filter = ListTasksQuery::default().into_filter().unwrap();
        assert!(filter.statuses.is_empty());
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_filter_parses_and_clamps() {
        let query = ListTasksQuery {
            statuses: vec!["pending, failed,".into()],
            skip: Some(-5),
            limit: Some(10_000),
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.statuses, vec![JobStatus::Pending, JobStatus::Failed]);
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.limit, MAX_PAGE_SIZE);

        let zero = ListTasksQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.into_filter().unwrap().limit, 1);
    }

    #[test]
    fn test_filter_rejects_unknown_status() {
        let query = ListTasksQuery {
            statuses: vec!["pending".into(), "archived".into()],
            ..Default::default()
        };
        assert!(query.into_filter().is_err());
    }

    #[test]
    fn test_filter_mixes_repeated_and_comma_separated() {
        let query = ListTasksQuery {
            statuses: vec!["completed".into(), "pending,failed".into(), "completed".into()],
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(
            filter.statuses,
            vec![
                JobStatus::Completed,
                JobStatus::Pending,
                JobStatus::Failed,
                JobStatus::Completed
            ]
        );
    }
}
