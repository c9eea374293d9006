//! Kiro Gateway — HTTP server entry point.

use std::sync::Arc;

use kiro_gateway::accounts::store::AccountStore;
use kiro_gateway::api::{self, AppState};
use kiro_gateway::apikeys::ApiKeyStore;
use kiro_gateway::oauth::SessionRegistry;
use kiro_gateway::settings::SettingsStore;
use kiro_gateway::{bootstrap, GatewayConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiro_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;
    tokio::fs::create_dir_all(&config.data_dir).await?;
    info!("data directory: {}", config.data_dir.display());

    let accounts = Arc::new(AccountStore::new(config.data_dir.join("accounts.json")).await);
    let api_keys = Arc::new(ApiKeyStore::new(&config.data_dir).await);
    let settings = Arc::new(SettingsStore::new(&config.data_dir).await);
    let oauth_sessions = Arc::new(SessionRegistry::new());

    if let Ok(seed_path) = std::env::var("KIRO_SEED_FILE") {
        if let Err(e) = bootstrap::import_if_empty(
            std::path::Path::new(&seed_path),
            &accounts,
            &api_keys,
        )
        .await
        {
            tracing::warn!("seed import from {seed_path} failed: {e}");
        }
    }

    let state = AppState::new(accounts, api_keys, settings, oauth_sessions);

    // The bind address is fixed for the process lifetime at the
    // `GatewayConfig` (env) value; `settings.host`/`settings.port` describe
    // the *configured* address for admin-facing display and are only
    // picked up on the next restart, since rebinding a live listener is out
    // of scope (§5, §6).
    info!("starting kiro gateway on {}:{}", config.host, config.port);
    api::serve(&config.host, config.port, state).await?;

    Ok(())
}
