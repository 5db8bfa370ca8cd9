use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::grid::ParameterRange;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateSweepRequest {
    /// Storage key of an already uploaded source video.
    #[validate(length(min = 1, message = "source_ref is required"))]
    pub source_ref: String,
    /// Defaults to the configured quantization range.
    pub quantization: Option<ParameterRange>,
    /// Defaults to the configured rate control range.
    pub rate_control: Option<ParameterRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub source_ref: String,
    pub batch_id: Uuid,
    pub job_ids: Vec<Uuid>,
}
