use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct SummaryQuery {
    /// Storage key of the source video.
    pub source_ref: String,
}
