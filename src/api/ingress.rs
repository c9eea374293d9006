//! The two proxy endpoints (§4.5, §6) plus `/v1/models` and `/health`.
//!
//! Shared contract per request: authenticate the API key, validate the
//! body and model, translate to the upstream dialect, then either run the
//! unary retry envelope or the one-shot streaming envelope (§4.1). Errors
//! are rendered in the caller's own dialect (§4.5, §7) — OpenAI errors as
//! `{"error": {...}}`, Claude errors as `{"type":"error", "error": {...}}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::accounts::pool::AttemptOutcome;
use crate::dialect::claude::{MessagesRequest, MessagesResponse};
use crate::dialect::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::dialect::stream::{claude_error_event, openai_error_event, to_claude_sse, to_openai_sse, SseEvent};
use crate::error::GatewayError;
use crate::models;
use crate::settings::Settings;
use crate::upstream::kiro_wire::{InternalRequest, InternalResponse, KiroFrame};
use crate::upstream::UpstreamError;

use super::errors::{claude_error_response, openai_error_response};
use super::state::AppState;

#[derive(Clone, Copy)]
enum Dialect {
    OpenAi,
    Claude,
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(key) = s.strip_prefix("Bearer ") {
                return Some(key.to_string());
            }
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let key = extract_api_key(headers).ok_or(GatewayError::AuthenticationFailed)?;
    state.api_keys.validate_and_increment(&key).await?;
    Ok(())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    match chat_completions_inner(state, headers, body).await {
        Ok(resp) => resp,
        Err(e) => openai_error_response(&e),
    }
}

async fn chat_completions_inner(
    state: AppState,
    headers: HeaderMap,
    body: serde_json::Value,
) -> Result<Response, GatewayError> {
    authenticate(&state, &headers).await?;

    let req: ChatCompletionRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed request body: {e}")))?;

    if !models::is_supported(&req.model) {
        return Err(GatewayError::InvalidRequest(format!(
            "unknown model: {}",
            req.model
        )));
    }

    let settings = state.settings.get().await;
    let internal = req.to_internal(&settings.system_prompt)?;

    if internal.stream {
        run_stream(state, internal, Dialect::OpenAi, settings).await
    } else {
        let resp = run_unary(&state, &internal, &settings).await?;
        let created = chrono::Utc::now().timestamp();
        Ok(Json(ChatCompletionResponse::from_internal(resp, created)).into_response())
    }
}

pub async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    match messages_inner(state, headers, body).await {
        Ok(resp) => resp,
        Err(e) => claude_error_response(&e),
    }
}

async fn messages_inner(
    state: AppState,
    headers: HeaderMap,
    body: serde_json::Value,
) -> Result<Response, GatewayError> {
    authenticate(&state, &headers).await?;

    let req: MessagesRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed request body: {e}")))?;

    if !models::is_supported(&req.model) {
        return Err(GatewayError::InvalidRequest(format!(
            "unknown model: {}",
            req.model
        )));
    }

    let settings = state.settings.get().await;
    let internal = req.to_internal(&settings.system_prompt)?;

    if internal.stream {
        run_stream(state, internal, Dialect::Claude, settings).await
    } else {
        let resp = run_unary(&state, &internal, &settings).await?;
        Ok(Json(MessagesResponse::from_internal(resp)).into_response())
    }
}

/// §4.1 `executeWithRetry`: acquires, ensures a fresh token, calls, and
/// classifies the outcome so the pool can drive its selection/breaker
/// state. Credential refreshes are persisted immediately rather than only
/// on overall success, since a refreshed token should not be thrown away
/// just because the subsequent call happened to fail.
async fn run_unary(
    state: &AppState,
    internal: &InternalRequest,
    settings: &Settings,
) -> Result<InternalResponse, GatewayError> {
    let model = Some(internal.model.as_str());
    let accounts = state.accounts.clone();
    let services = state.services.clone();
    let http = state.http.clone();
    let internal = internal.clone();
    let max_retries = settings.request_max_retries;
    let base_delay = Duration::from_millis(settings.request_base_delay_ms);
    let max_errors = settings.max_error_count;

    state
        .pool
        .execute_with_retry(
            model,
            settings.provider_strategy,
            max_retries,
            base_delay,
            max_errors,
            move |account| {
                let services = services.clone();
                let http = http.clone();
                let accounts = accounts.clone();
                let internal = internal.clone();
                Box::pin(async move {
                    let svc = services.get_or_create(account, http).await;
                    match svc.ensure_fresh_token().await {
                        Ok(Some(creds)) => {
                            accounts.update_provider_credentials(account.id, creds).await;
                        }
                        Ok(None) => {}
                        Err(e) => return AttemptOutcome::Failure(e.message()),
                    }
                    match svc.call_api(&internal).await {
                        Ok(resp) => AttemptOutcome::Success {
                            value: resp,
                            refreshed_credentials: None,
                        },
                        Err(e) if e.is_context_limit() => AttemptOutcome::ContextLimitExceeded(e.message()),
                        Err(e) => AttemptOutcome::Failure(e.message()),
                    }
                })
            },
        )
        .await
}

/// §4.1 `executeStream` + §4.5(d): acquires once (no retry), ensures a
/// fresh token, opens the upstream stream, and peeks the first frame
/// before committing to an SSE response — a pre-stream failure becomes an
/// HTTP error status rather than an in-band SSE error event (§9 open
/// question: this pre-fetch is *not* a retryable attempt).
async fn run_stream(
    state: AppState,
    internal: InternalRequest,
    dialect: Dialect,
    settings: Settings,
) -> Result<Response, GatewayError> {
    let model = Some(internal.model.as_str());
    let account = state
        .pool
        .acquire_for_stream(model, settings.provider_strategy)
        .await?;

    let svc = state.services.get_or_create(&account, state.http.clone()).await;

    match svc.ensure_fresh_token().await {
        Ok(Some(creds)) => {
            state
                .accounts
                .update_provider_credentials(account.id, creds)
                .await;
        }
        Ok(None) => {}
        Err(e) => {
            state
                .pool
                .report_error(account.id, e.message(), settings.max_error_count)
                .await;
            return Err(GatewayError::UpstreamTransient(e.message()));
        }
    }

    let mut frames = match svc.stream_api(&internal).await {
        Ok(s) => Box::pin(s),
        Err(e) if e.is_context_limit() => return Err(GatewayError::ContextLimitExceeded(e.message())),
        Err(e) => {
            state
                .pool
                .report_error(account.id, e.message(), settings.max_error_count)
                .await;
            return Err(GatewayError::UpstreamTransient(e.message()));
        }
    };

    let first_frame = match frames.next().await {
        None => {
            state
                .pool
                .report_error(
                    account.id,
                    "upstream stream produced no frames".to_string(),
                    settings.max_error_count,
                )
                .await;
            return Err(GatewayError::UpstreamTransient(
                "upstream stream produced no frames".to_string(),
            ));
        }
        Some(Err(e)) if e.is_context_limit() => return Err(GatewayError::ContextLimitExceeded(e.message())),
        Some(Err(e)) => {
            state
                .pool
                .report_error(account.id, e.message(), settings.max_error_count)
                .await;
            return Err(GatewayError::UpstreamTransient(e.message()));
        }
        Some(Ok(frame)) => frame,
    };

    let terminal_flag = Arc::new(AtomicBool::new(false));
    let tagged = tee_terminal_flag(
        futures::stream::once(async move { Ok(first_frame) }).chain(frames),
        terminal_flag.clone(),
    );

    let content_type = "text/event-stream";
    let body = match dialect {
        Dialect::OpenAi => {
            let sse = to_openai_sse(tagged, internal.model.clone());
            Body::from_stream(finalize_stream(state, account.id, settings.max_error_count, dialect, sse, terminal_flag))
        }
        Dialect::Claude => {
            let sse = to_claude_sse(tagged, internal.model.clone());
            Body::from_stream(finalize_stream(state, account.id, settings.max_error_count, dialect, sse, terminal_flag))
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("cache-control", "no-cache")
        .body(body)
        .map_err(|e| GatewayError::Internal(e.into()))
}

/// Tags the raw Kiro frame stream with whether it ever reached
/// `MessageStop` — the reporting wrapper downstream needs this to decide
/// `reportSuccess` vs `reportError` once the dialect-sequenced SSE stream
/// has fully drained (§4.1 "Streaming variant", §5 "Cancellation &
/// timeouts").
fn tee_terminal_flag(
    frames: impl Stream<Item = Result<KiroFrame, UpstreamError>>,
    flag: Arc<AtomicBool>,
) -> impl Stream<Item = Result<KiroFrame, UpstreamError>> {
    async_stream::stream! {
        futures::pin_mut!(frames);
        while let Some(item) = frames.next().await {
            match item {
                Ok(KiroFrame::MessageStop) => {
                    flag.store(true, Ordering::SeqCst);
                    yield Ok(KiroFrame::MessageStop);
                    return;
                }
                Ok(other) => yield Ok(other),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

/// Forwards dialect-sequenced SSE events as response body bytes and, once
/// the stream drains, reports the terminal outcome to the pool. A client
/// disconnect simply drops this generator mid-await — the code after the
/// last forwarded byte never runs, so neither `reportSuccess` nor
/// `reportError` fires (§5: "half-finished streams are neither success
/// nor failure").
fn finalize_stream(
    state: AppState,
    account_id: u64,
    max_error_count: u32,
    dialect: Dialect,
    sse: impl Stream<Item = Result<SseEvent, UpstreamError>>,
    terminal_flag: Arc<AtomicBool>,
) -> impl Stream<Item = Result<Bytes, std::convert::Infallible>> {
    async_stream::stream! {
        futures::pin_mut!(sse);
        let mut saw_error = false;

        while let Some(item) = sse.next().await {
            match item {
                Ok(event) => {
                    yield Ok(Bytes::from(event.to_wire()));
                }
                Err(e) => {
                    saw_error = true;
                    let error_event = match dialect {
                        Dialect::OpenAi => openai_error_event(&e.message(), "upstream_error"),
                        Dialect::Claude => claude_error_event(&e.message()),
                    };
                    yield Ok(Bytes::from(error_event.to_wire()));
                    state.pool.report_error(account_id, e.message(), max_error_count).await;
                    return;
                }
            }
        }

        if terminal_flag.load(Ordering::SeqCst) {
            state.pool.report_success(account_id).await;
        } else if !saw_error {
            state
                .pool
                .report_error(
                    account_id,
                    "upstream stream ended without a terminal frame".to_string(),
                    max_error_count,
                )
                .await;
        }
    }
}

pub async fn list_models() -> Response {
    let data: Vec<_> = models::SUPPORTED_MODELS
        .iter()
        .map(|id| serde_json::json!({"id": id, "object": "model"}))
        .collect();
    Json(serde_json::json!({"object": "list", "data": data})).into_response()
}

pub async fn health() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-kiro-abc"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-kiro-abc"));
    }

    #[test]
    fn extracts_x_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-kiro-xyz"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-kiro-xyz"));
    }

    #[test]
    fn missing_auth_header_yields_none() {
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }
}
