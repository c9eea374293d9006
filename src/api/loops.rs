//! Background maintenance loops: health checker, usage syncer, and OAuth
//! session reaper (§4.1 "Health checker" / "Usage syncer", §4.2 "Lifecycle
//! management").
//!
//! Each loop owns none of the shared state directly — it only holds the
//! `AppState` handles and ticks on its own interval, matching the way the
//! teacher's `provider_health.rs` and workspace reaper tasks are spawned
//! from `main` as independent `tokio::spawn` loops rather than wired
//! through a scheduler abstraction.

use std::time::Duration;

use crate::accounts::health;
use crate::accounts::AccountType;
use crate::upstream::kiro_wire::{ContentBlock, InternalMessage, InternalRequest, Role};

use super::state::AppState;

const DEFAULT_CHECK_MODEL: &str = "claude-sonnet-4-20250514";
const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// §4.1 "Health checker": probes every eligible-for-probing account on
/// `settings.health_check_interval_minutes`. A probe failure trips the
/// breaker immediately (`maxErrorCount` of 1, independent of the account's
/// own configured threshold) via [`health::record_probe_result`].
pub async fn health_check_loop(state: AppState) {
    loop {
        let settings = state.settings.get().await;
        tokio::time::sleep(Duration::from_secs(settings.health_check_interval_minutes * 60)).await;

        let accounts = state.accounts.list().await;
        for account in accounts {
            if account.is_disabled || !account.check_health {
                continue;
            }

            let model = account
                .check_model_name
                .clone()
                .unwrap_or_else(|| DEFAULT_CHECK_MODEL.to_string());

            let probe = InternalRequest {
                model,
                system: None,
                messages: vec![InternalMessage {
                    role: Role::User,
                    content: vec![ContentBlock::Text { text: "ping".to_string() }],
                }],
                max_tokens: 10,
                temperature: None,
                tools: Vec::new(),
                stream: false,
            };

            let svc = state.services.get_or_create(&account, state.http.clone()).await;
            let result = match svc.ensure_fresh_token().await {
                Ok(_) => svc.call_api(&probe).await.map(|_| ()),
                Err(e) => Err(e),
            };

            let (ok, message) = match result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.message())),
            };

            state
                .accounts
                .update(account.id, |a| health::record_probe_result(a, ok, message.clone()))
                .await;

            tracing::debug!(account_id = account.id, ok, "health probe completed");
        }
    }
}

/// §4.1 "Usage syncer": pulls accounts due for a usage refresh and updates
/// their cached quota snapshot plus the exhaustion flag that gates
/// selection. An account whose upstream-reported tier has newly become
/// `FREE` has its allow-list reset to the operator-configured default
/// (§4.1) if it does not already carry an explicit one — an account with
/// its own allow-list keeps it, since a narrower admin-set list should not
/// be silently widened or replaced by the tier default.
pub async fn usage_sync_loop(state: AppState) {
    loop {
        let settings = state.settings.get().await;
        tokio::time::sleep(Duration::from_secs(settings.usage_sync_interval_minutes * 60)).await;

        let due = state
            .accounts
            .get_providers_needing_usage_sync(settings.usage_sync_interval_minutes)
            .await;

        for account in due {
            let svc = state.services.get_or_create(&account, state.http.clone()).await;

            let fetch = async {
                svc.ensure_fresh_token().await?;
                svc.get_usage_limits().await
            };

            match fetch.await {
                Ok(usage) => {
                    // §4.1: the aggregator runs over `usageBreakdown[0]` only,
                    // summing its base/free-trial/bonus buckets.
                    let entry = usage.usage_breakdown.first();
                    let used = entry.map(|e| e.used()).unwrap_or(0.0);
                    let limit = entry.map(|e| e.limit()).unwrap_or(0.0);
                    let percent = entry.map(|e| e.percent()).unwrap_or(0.0);
                    let exhausted = percent >= 100.0;

                    state
                        .accounts
                        .update_provider_usage_cache(
                            account.id,
                            crate::accounts::UsageCache { used, limit, percent },
                            exhausted,
                        )
                        .await;

                    if let Some(reported) = usage.account_type.as_deref() {
                        let new_type = match reported.to_uppercase().as_str() {
                            "FREE" => Some(AccountType::Free),
                            "PRO" => Some(AccountType::Pro),
                            _ => None,
                        };
                        if let Some(new_type) = new_type {
                            let became_free =
                                new_type == AccountType::Free && account.account_type != AccountType::Free;
                            state
                                .accounts
                                .update(account.id, |a| {
                                    a.account_type = new_type;
                                    if became_free && a.allowed_models.is_none() {
                                        a.allowed_models = Some(default_free_tier_models(&settings));
                                    }
                                })
                                .await;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(account_id = account.id, error = %e.message(), "usage sync failed");
                }
            }
        }
    }
}

/// §4.1's "configured default allow-list" for accounts that drop to the
/// FREE tier: the crate has no separate named setting for this, so it
/// reuses the model allow-list rather than inventing a new configuration
/// key the external admin surface would also have to learn about.
fn default_free_tier_models(_settings: &crate::settings::Settings) -> Vec<String> {
    crate::models::SUPPORTED_MODELS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// §4.2 session lifecycle: sweeps expired-pending and long-terminal OAuth
/// sessions on a fixed tick — the spec does not name this interval the way
/// it names the health/usage intervals, so it runs independent of
/// `Settings`.
pub async fn session_reap_loop(state: AppState) {
    loop {
        tokio::time::sleep(SESSION_REAP_INTERVAL).await;
        state.oauth_sessions.reap().await;
    }
}
