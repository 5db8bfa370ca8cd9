use crate::common::response::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

/// Compares without an early exit, so the time taken does not depend on
/// how long a prefix of the token matched. Only the length leaks.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Requires `Authorization: Bearer <ADMIN_TOKEN>`. Without a configured token
/// every administrative route is refused.
pub async fn admin_guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(ApiError(
            "Forbidden: administration is disabled".to_string(),
            StatusCode::FORBIDDEN,
        ));
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| tokens_match(token.as_bytes(), expected.as_bytes()));

    match token {
        Some(true) => Ok(next.run(req).await),
        Some(false) => {
            warn!(path = %req.uri().path(), "Rejected admin request with a wrong token");
            Err(ApiError(
                "Unauthorized: Invalid token".to_string(),
                StatusCode::UNAUTHORIZED,
            ))
        }
        None => Err(ApiError(
            "Unauthorized: Missing or invalid token".to_string(),
            StatusCode::UNAUTHORIZED,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::tokens_match;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match(b"s3cret", b"s3cret"));
        assert!(!tokens_match(b"s3creT", b"s3cret"));
        assert!(!tokens_match(b"x3cret", b"s3cret"));
        assert!(!tokens_match(b"s3cre", b"s3cret"));
        assert!(!tokens_match(b"", b"s3cret"));
        assert!(tokens_match(b"", b""));
    }
}
