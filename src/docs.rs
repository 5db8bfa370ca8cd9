use utoipa::OpenApi;

use crate::modules::jobs::dto::{CancelRequest, TaskDetailResponse, TaskListResponse, TaskResponse};
use crate::modules::jobs::model::{EncodeParameters, JobStatus, QualityMetrics};
use crate::modules::summary::model::{ParameterResult, SourceSummary};
use crate::modules::sweep::dto::{CreateSweepRequest, SweepResponse};
use crate::modules::sweep::grid::ParameterRange;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::list_tasks,
        crate::modules::jobs::handler::get_task,
        crate::modules::jobs::handler::cancel_task,
        crate::modules::sweep::handler::create_sweep,
        crate::modules::sweep::handler::upload_source,
        crate::modules::summary::handler::get_summary,
    ),
    components(
        schemas(
            TaskResponse, TaskListResponse, TaskDetailResponse, CancelRequest,
            CreateSweepRequest, SweepResponse, ParameterRange,
            JobStatus, EncodeParameters, QualityMetrics,
            SourceSummary, ParameterResult,
        )
    ),
    tags(
        (name = "Tasks", description = "Encode job status and administration"),
        (name = "Sweeps", description = "Parameter sweep submission"),
        (name = "Summaries", description = "Aggregated sweep results")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
