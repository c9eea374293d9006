//! Shared process state handed to every request handler and background
//! loop (§5: "no shared mutable state except (i) the store, (ii) the
//! service cache, (iii) the OAuth session registry, (iv) the round-robin
//! cursor" — the cursor lives inside [`crate::accounts::pool::AccountPool`]
//! itself, everything else is named here).

use std::sync::Arc;

use crate::accounts::pool::SharedAccountPool;
use crate::accounts::store::SharedAccountStore;
use crate::apikeys::SharedApiKeyStore;
use crate::oauth::SharedSessionRegistry;
use crate::settings::SharedSettingsStore;
use crate::upstream::SharedServiceCache;

#[derive(Clone)]
pub struct AppState {
    pub accounts: SharedAccountStore,
    pub pool: SharedAccountPool,
    pub api_keys: SharedApiKeyStore,
    pub settings: SharedSettingsStore,
    pub services: SharedServiceCache,
    pub oauth_sessions: SharedSessionRegistry,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        accounts: SharedAccountStore,
        api_keys: SharedApiKeyStore,
        settings: SharedSettingsStore,
        oauth_sessions: SharedSessionRegistry,
    ) -> Self {
        let pool = Arc::new(crate::accounts::pool::AccountPool::new(accounts.clone()));
        Self {
            accounts,
            pool,
            api_keys,
            settings,
            services: crate::upstream::service::ServiceCache::new().into(),
            oauth_sessions,
            http: reqwest::Client::new(),
        }
    }
}
