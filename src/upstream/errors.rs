//! Error surface for a per-account upstream service handle (§4.3).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    /// Upstream signaled prompt-too-long. Distinguished from generic
    /// failure: it never counts against the account's circuit breaker.
    #[error("context limit exceeded: {0}")]
    ContextLimitExceeded(String),

    /// Transport, 5xx, or transient-auth failure. Carries the upstream
    /// status (if any) and message.
    #[error("upstream error ({status:?}): {message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// Token refresh failed outright (bad refresh token, revoked grant).
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

impl UpstreamError {
    pub fn is_context_limit(&self) -> bool {
        matches!(self, UpstreamError::ContextLimitExceeded(_))
    }

    pub fn message(&self) -> String {
        match self {
            UpstreamError::ContextLimitExceeded(m) => m.clone(),
            UpstreamError::Transient { message, .. } => message.clone(),
            UpstreamError::RefreshFailed(m) => m.clone(),
        }
    }
}
