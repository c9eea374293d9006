//! HTTP surface for the gateway.
//!
//! ## Endpoints
//!
//! - `POST /v1/chat/completions` — OpenAI-compatible completions (§4.5)
//! - `POST /v1/messages` — Claude-compatible messages (§4.5)
//! - `GET /v1/models` — model allow-list
//! - `GET /health` — liveness probe
//!
//! Account, API-key, settings, and OAuth-session administration are not
//! exposed as HTTP routes here — those stores are `pub` library API (see
//! [`crate::accounts::store`], [`crate::apikeys`], [`crate::settings`],
//! [`crate::oauth`]) for an external admin layer to link against directly.

mod errors;
pub mod ingress;
pub mod loops;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(ingress::chat_completions))
        .route("/v1/messages", post(ingress::messages))
        .route("/v1/models", get(ingress::list_models))
        .route("/health", get(ingress::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `{host}:{port}`, spawns the background maintenance loops, and
/// serves until SIGINT/SIGTERM (§5 graceful shutdown).
pub async fn serve(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    tokio::spawn(loops::health_check_loop(state.clone()));
    tokio::spawn(loops::usage_sync_loop(state.clone()));
    tokio::spawn(loops::session_reap_loop(state.clone()));

    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("kiro gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
