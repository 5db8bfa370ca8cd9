use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::modules::jobs::model::{EncodeParameters, QualityMetrics};

/// Outcome of one completed job within a source's sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ParameterResult {
    pub parameters: EncodeParameters,
    pub output_ref: String,
    pub metrics: QualityMetrics,
    /// `source_size / output_size`; absent for an empty artifact.
    pub compression_ratio: Option<f64>,
}

/// Aggregated sweep results for one source, built once all of its jobs are
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceSummary {
    pub source_ref: String,
    pub total_jobs: usize,
    pub completed: usize,
    pub failed: usize,
    pub best_compression_ratio: Option<f64>,
    pub best_parameters: Option<EncodeParameters>,
    /// Ordered by parameters.
    pub results: Vec<ParameterResult>,
}
