use super::dto::SummaryQuery;
use super::model::SourceSummary;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};

/// Aggregated sweep results for one source
#[utoipa::path(
    get,
    path = "/api/v1/summaries",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Source summary", body = ApiResponse<SourceSummary>),
        (status = 404, description = "No summary yet for this source"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Summaries"
)]
pub async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> impl IntoResponse {
    match state.aggregator.summary(&query.source_ref).await {
        Ok(Some(summary)) => ApiSuccess::ok(summary, "Summary retrieved successfully").into_response(),
        Ok(None) => ApiError::not_found(format!("No summary for {}", query.source_ref)).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
