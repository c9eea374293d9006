//! Dialect-specific HTTP error rendering for [`GatewayError`] (§4.5, §7).
//!
//! Each client-facing endpoint renders the same error kinds into its own
//! dialect's error body shape; the status-code mapping is shared.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::dialect::claude::{ClaudeErrorBody, ClaudeErrorDetail};
use crate::error::GatewayError;

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::NoAvailableProvider(_) => StatusCode::BAD_REQUEST,
        GatewayError::ModelNotAvailable(_) => StatusCode::BAD_REQUEST,
        GatewayError::ContextLimitExceeded(_) => StatusCode::BAD_REQUEST,
        GatewayError::UpstreamTransient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::OAuthFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `NoAvailableProvider`/`ModelNotAvailable` both render with the
/// `model_not_available` code (§7); everything else uses the error's own
/// stable code.
fn code_for(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::NoAvailableProvider(_) => "model_not_available",
        other => other.code(),
    }
}

pub fn openai_error_response(err: &GatewayError) -> Response {
    let status = status_for(err);
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": "invalid_request_error",
            "code": code_for(err),
        }
    });
    (status, Json(body)).into_response()
}

pub fn claude_error_response(err: &GatewayError) -> Response {
    let status = status_for(err);
    let body = ClaudeErrorBody {
        response_type: "error",
        error: ClaudeErrorDetail {
            error_type: code_for(err).to_string(),
            message: err.to_string(),
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_available_provider_renders_model_not_available_code() {
        let err = GatewayError::NoAvailableProvider(Some("claude-opus-4-5".to_string()));
        assert_eq!(code_for(&err), "model_not_available");
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn quota_exceeded_maps_to_429() {
        assert_eq!(status_for(&GatewayError::QuotaExceeded), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn context_limit_exceeded_maps_to_400() {
        let err = GatewayError::ContextLimitExceeded("too long".to_string());
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }
}
