use super::dto::*;
use super::service::{JobService, TaskError};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::Query;
use uuid::Uuid;

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Store(e) => e.into(),
            TaskError::Storage(e) => ApiError(e.to_string(), StatusCode::BAD_GATEWAY),
            e @ TaskError::InvalidQuery(_) => ApiError::bad_request(e.to_string()),
        }
    }
}

/// List tasks, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    params(ListTasksQuery),
    responses(
        (status = 200, description = "A page of tasks", body = ApiResponse<TaskListResponse>),
        (status = 400, description = "Unknown status in filter"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Tasks"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> impl IntoResponse {
    match JobService::list(&state, query).await {
        Ok(page) => ApiSuccess::ok(page, "Tasks retrieved successfully").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Get one task
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    params(
        ("id" = Uuid, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task details", body = ApiResponse<TaskDetailResponse>),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match JobService::detail(&state, id).await {
        Ok(task) => ApiSuccess::ok(task, "Task retrieved successfully").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Cancel a pending or processing task
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Task ID")
    ),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Task cancelled", body = ApiResponse<TaskResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task already finished")
    ),
    tag = "Tasks",
    security(("bearer_auth" = []))
)]
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> impl IntoResponse {
    match JobService::cancel(&state, id, req.reason).await {
        Ok(task) => ApiSuccess::ok(task, "Task cancelled successfully").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
