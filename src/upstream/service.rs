//! Per-account upstream service handle and the process-wide service cache
//! (§4.3, §9).
//!
//! A handle owns one account's credentials in memory, refreshes them
//! single-flight, and makes the actual HTTP calls against the Kiro upstream.
//! The cache keys handles by account id *and* a hash of the credential blob
//! so that a credential rotation (e.g. a refresh completed by a different
//! handle, or an admin re-auth) invalidates the stale entry without an
//! explicit eviction call — the next acquire just builds a fresh handle.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use futures::Stream;
use tokio::sync::{Mutex, RwLock};

use crate::accounts::credentials::{ProviderCredentials, TokenState};
use crate::accounts::Account;

use super::errors::UpstreamError;
use super::kiro_wire::{InternalRequest, InternalResponse, KiroFrame, UsageLimitsResponse};

fn region_base_url(region: &str) -> String {
    format!("https://kiro.{region}.amazonaws.com")
}

fn credential_hash(creds: &ProviderCredentials) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    creds.access_token().hash(&mut hasher);
    creds.tokens().refresh_token.hash(&mut hasher);
    hasher.finish()
}

/// A per-account, in-memory client owning the refresh lifecycle and
/// upstream HTTP calls (§4.3, GLOSSARY "Service handle").
pub struct UpstreamService {
    account_id: u64,
    region: String,
    state: RwLock<ProviderCredentials>,
    refresh_lock: Mutex<()>,
    http: reqwest::Client,
}

impl UpstreamService {
    pub fn new(account: &Account, http: reqwest::Client) -> Self {
        Self {
            account_id: account.id,
            region: account.region.clone(),
            state: RwLock::new(account.credentials.clone()),
            refresh_lock: Mutex::new(()),
            http,
        }
    }

    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    /// §4.3 `ensureFreshToken`. Single-flight per handle: the first caller
    /// to observe an expiring token takes the refresh lock and performs the
    /// HTTP refresh; concurrent callers block on the same lock and, once
    /// granted it, re-check and find the token already fresh (§8 property
    /// 4, §5 "Credential refresh is single-flight per account").
    pub async fn ensure_fresh_token(&self) -> Result<Option<ProviderCredentials>, UpstreamError> {
        if !self.state.read().await.needs_refresh(Utc::now()) {
            return Ok(None);
        }

        let _guard = self.refresh_lock.lock().await;
        if !self.state.read().await.needs_refresh(Utc::now()) {
            return Ok(Some(self.state.read().await.clone()));
        }

        let refreshed = self.refresh().await?;
        *self.state.write().await = refreshed.clone();
        Ok(Some(refreshed))
    }

    async fn refresh(&self) -> Result<ProviderCredentials, UpstreamError> {
        let current = self.state.read().await.clone();
        let (token_endpoint, refresh_token, client_id, client_secret) = match &current {
            ProviderCredentials::Social { tokens, .. } => (
                format!("{}/oauth/refresh", region_base_url(&self.region)),
                tokens.refresh_token.clone(),
                None,
                None,
            ),
            ProviderCredentials::BuilderId {
                tokens,
                client_id,
                client_secret,
                ..
            }
            | ProviderCredentials::IdentityCenter {
                tokens,
                client_id,
                client_secret,
                ..
            } => (
                format!("https://oidc.{}.amazonaws.com/token", self.region),
                tokens.refresh_token.clone(),
                Some(client_id.clone()),
                Some(client_secret.clone()),
            ),
        };

        let mut body = serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });
        if let (Some(id), Some(secret)) = (client_id, client_secret) {
            body["client_id"] = serde_json::Value::String(id);
            body["client_secret"] = serde_json::Value::String(secret);
        }

        let response = self
            .http
            .post(&token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::RefreshFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpstreamError::RefreshFailed(format!(
                "refresh rejected with status {}",
                response.status()
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::RefreshFailed(e.to_string()))?;

        let new_tokens = TokenState {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token.unwrap_or(refresh_token),
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in as i64),
        };

        Ok(match current {
            ProviderCredentials::Social {
                provider,
                profile_arn,
                ..
            } => ProviderCredentials::Social {
                tokens: new_tokens,
                provider,
                profile_arn,
            },
            ProviderCredentials::BuilderId {
                client_id,
                client_secret,
                client_secret_expires_at,
                ..
            } => ProviderCredentials::BuilderId {
                tokens: new_tokens,
                client_id,
                client_secret,
                client_secret_expires_at,
            },
            ProviderCredentials::IdentityCenter {
                client_id,
                client_secret,
                client_secret_expires_at,
                start_url,
                sso_region,
                ..
            } => ProviderCredentials::IdentityCenter {
                tokens: new_tokens,
                client_id,
                client_secret,
                client_secret_expires_at,
                start_url,
                sso_region,
            },
        })
    }

    /// §4.3 `callApi` — unary upstream call.
    pub async fn call_api(&self, request: &InternalRequest) -> Result<InternalResponse, UpstreamError> {
        let access_token = self.state.read().await.access_token().to_string();
        let url = format!("{}/v1/messages", region_base_url(&self.region));

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        classify_http_status(response.status().as_u16())?;

        response
            .json::<InternalResponse>()
            .await
            .map_err(|e| UpstreamError::Transient {
                status: None,
                message: format!("failed to decode upstream response: {e}"),
            })
    }

    /// §4.3 `streamApi` — lazy, finite, non-restartable sequence of decoded
    /// frames (GLOSSARY "Streaming generators"). The pre-stream status check
    /// happens before the first frame is yielded so handlers can classify
    /// a pre-stream 4xx/5xx as an HTTP error rather than an SSE error event
    /// (§4.5, §9 open question).
    pub async fn stream_api(
        &self,
        request: &InternalRequest,
    ) -> Result<impl Stream<Item = Result<KiroFrame, UpstreamError>>, UpstreamError> {
        let access_token = self.state.read().await.access_token().to_string();
        let url = format!("{}/v1/messages", region_base_url(&self.region));

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        classify_http_status(response.status().as_u16())?;

        Ok(super::frame_decode::decode_frame_stream(response))
    }

    /// §4.3 `getUsageLimits`.
    pub async fn get_usage_limits(&self) -> Result<UsageLimitsResponse, UpstreamError> {
        let access_token = self.state.read().await.access_token().to_string();
        let url = format!("{}/v1/usage", region_base_url(&self.region));

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        classify_http_status(response.status().as_u16())?;

        response
            .json::<UsageLimitsResponse>()
            .await
            .map_err(|e| UpstreamError::Transient {
                status: None,
                message: format!("failed to decode usage response: {e}"),
            })
    }
}

#[derive(Debug, serde::Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

fn classify_transport_error(err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Transient {
            status: None,
            message: "upstream request timed out".to_string(),
        }
    } else {
        UpstreamError::Transient {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Maps a pre-stream or unary HTTP status to the right error classification.
/// 413/422-style "too long" statuses from Kiro surface as context-limit;
/// everything else is a generic transient failure (§4.3, §7).
fn classify_http_status(status: u16) -> Result<(), UpstreamError> {
    match status {
        200..=299 => Ok(()),
        413 => Err(UpstreamError::ContextLimitExceeded(
            "request exceeds the model's context window".to_string(),
        )),
        _ => Err(UpstreamError::Transient {
            status: Some(status),
            message: format!("upstream returned status {status}"),
        }),
    }
}

/// Process-wide concurrent mapping from account id + credential hash to a
/// long-lived service handle (§9 "Global service cache").
#[derive(Default)]
pub struct ServiceCache {
    entries: RwLock<HashMap<(u64, u64), Arc<UpstreamService>>>,
}

pub type SharedServiceCache = Arc<ServiceCache>;

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `account` if its credential hash still
    /// matches, otherwise builds and caches a fresh one.
    ///
    /// The whole check-and-insert runs under a single held write lock so
    /// concurrent callers racing on a cold cache converge on one handle
    /// instead of each building their own — with their own independent
    /// `refresh_lock` — and silently clobbering each other's entry (§8
    /// property 4: exactly one upstream refresh call is issued).
    pub async fn get_or_create(&self, account: &Account, http: reqwest::Client) -> Arc<UpstreamService> {
        let key = (account.id, credential_hash(&account.credentials));

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }

        let handle = Arc::new(UpstreamService::new(account, http));
        // Credential rotation means the old (id, old_hash) entry is
        // otherwise never removed — drop it here so the cache stays bounded
        // at one live handle per account instead of one per rotation ever
        // seen (§9 "Global service cache").
        entries.retain(|(id, _), _| *id != account.id);
        entries.insert(key, handle.clone());
        handle
    }

    /// Drops every cached handle for an account, forcing a rebuild on next
    /// acquire. Not required for correctness (stale-key lookups already miss
    /// and rebuild), but keeps memory bounded across many rotations.
    pub async fn invalidate(&self, account_id: u64) {
        self.entries.write().await.retain(|(id, _), _| *id != account_id);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::credentials::ProviderCredentials;

    fn account() -> Account {
        Account::new(
            "a".to_string(),
            "us-east-1".to_string(),
            ProviderCredentials::social_stub(),
        )
    }

    #[tokio::test]
    async fn fresh_token_skips_refresh() {
        let svc = UpstreamService::new(&account(), reqwest::Client::new());
        let result = svc.ensure_fresh_token().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn service_cache_reuses_handle_for_unchanged_credentials() {
        let cache = ServiceCache::new();
        let a = account();
        let first = cache.get_or_create(&a, reqwest::Client::new()).await;
        let second = cache.get_or_create(&a, reqwest::Client::new()).await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn service_cache_rebuilds_after_credential_rotation() {
        let cache = ServiceCache::new();
        let mut a = account();
        let first = cache.get_or_create(&a, reqwest::Client::new()).await;
        a.credentials = ProviderCredentials::social_stub();
        a.credentials.tokens_mut().access_token = "rotated".to_string();
        let second = cache.get_or_create(&a, reqwest::Client::new()).await;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn status_413_maps_to_context_limit() {
        let err = classify_http_status(413).unwrap_err();
        assert!(err.is_context_limit());
    }

    #[test]
    fn status_429_maps_to_transient() {
        let err = classify_http_status(429).unwrap_err();
        assert!(!err.is_context_limit());
    }
}
