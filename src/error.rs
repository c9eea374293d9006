//! Crate-wide error types.
//!
//! Request-path code returns [`GatewayError`] so that `IntoResponse` can pick
//! the right HTTP status and dialect-specific error body (see `api::errors`).
//! Internal plumbing (disk I/O, OAuth token exchange, store loading) returns
//! `anyhow::Result` the way the teacher's own store/config code does.

use thiserror::Error;

/// Errors surfaced on the client-facing request path (§7 of the design).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("api key daily quota exceeded")]
    QuotaExceeded,

    #[error("no available provider for model {0:?}")]
    NoAvailableProvider(Option<String>),

    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    #[error("context limit exceeded: {0}")]
    ContextLimitExceeded(String),

    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("oauth flow failed: {0}")]
    OAuthFailure(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Stable machine-readable error code used in dialect error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::AuthenticationFailed => "authentication_failed",
            GatewayError::QuotaExceeded => "quota_exceeded",
            GatewayError::NoAvailableProvider(_) => "no_available_provider",
            GatewayError::ModelNotAvailable(_) => "model_not_available",
            GatewayError::ContextLimitExceeded(_) => "context_limit_exceeded",
            GatewayError::UpstreamTransient(_) => "upstream_error",
            GatewayError::OAuthFailure(_) => "oauth_failure",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}
