use super::dto::{CreateSweepRequest, SweepResponse};
use super::grid::GridSpec;
use super::service::{SubmitError, SweepService};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Grid(e) => e.into(),
            SubmitError::Store(e) => e.into(),
            e @ SubmitError::Dispatch { .. } => ApiError(e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
        }
    }
}

/// Submit a parameter sweep for an uploaded source
#[utoipa::path(
    post,
    path = "/api/v1/sweeps",
    request_body = CreateSweepRequest,
    responses(
        (status = 201, description = "Sweep submitted", body = ApiResponse<SweepResponse>),
        (status = 400, description = "Invalid range"),
        (status = 409, description = "Same sweep already active for this source"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Sweeps"
)]
pub async fn create_sweep(
    State(state): State<AppState>,
    Json(req): Json<CreateSweepRequest>,
) -> impl IntoResponse {
    if let Err(e) = req.validate() {
        return ApiError::from(e).into_response();
    }

    let defaults = state.config.default_grid;
    let grid_spec = GridSpec {
        quantization: req.quantization.unwrap_or(defaults.quantization),
        rate_control: req.rate_control.unwrap_or(defaults.rate_control),
    };

    match SweepService::submit(&state, &req.source_ref, &grid_spec).await {
        Ok(res) => ApiSuccess::created(res, "Sweep submitted successfully").into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

fn extension_of(file_name: Option<&str>, content_type: &str) -> String {
    let from_name = file_name
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase());

    from_name
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Upload a source video and sweep it with the default grid
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Source uploaded and sweep submitted", body = ApiResponse<SweepResponse>),
        (status = 400, description = "Missing or invalid video field"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Sweeps"
)]
pub async fn upload_source(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
        };

        if field.name() != Some("video") {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM.as_ref())
            .to_string();
        let is_video = content_type
            .parse::<mime::Mime>()
            .is_ok_and(|m| m.type_() == mime::VIDEO);
        if !is_video {
            return ApiError::bad_request("Invalid content type: only video/* allowed").into_response();
        }

        let key = format!(
            "source/{}{}",
            Uuid::new_v4(),
            extension_of(field.file_name(), &content_type)
        );

        let body = match field.bytes().await {
            Ok(body) => body,
            Err(e) => return ApiError::bad_request(format!("Upload interrupted: {}", e)).into_response(),
        };
        if body.is_empty() {
            return ApiError::bad_request("Uploaded video is empty").into_response();
        }

        info!("⬆️ Uploading {} bytes to {}", body.len(), key);
        if let Err(e) = state.storage.put(&key, body, &content_type).await {
            return ApiError(format!("Upload failed: {}", e), StatusCode::BAD_GATEWAY).into_response();
        }

        let grid_spec = state.config.default_grid;
        return match SweepService::submit(&state, &key, &grid_spec).await {
            Ok(res) => ApiSuccess::created(res, "Video uploaded and sweep submitted").into_response(),
            Err(e) => ApiError::from(e).into_response(),
        };
    }

    ApiError::bad_request("No video field found in multipart request").into_response()
}

#[cfg(test)]
mod tests {
    use super::extension_of;

    #[test]
    fn test_extension_prefers_file_name() {
        assert_eq!(extension_of(Some("Clip.MKV"), "video/mp4"), ".mkv");
        assert_eq!(extension_of(None, "video/x-unknown-thing"), "");
    }
}
