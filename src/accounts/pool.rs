//! Selection policy and the retry/streaming envelopes that drive the
//! account pool (§4.1). The pool is the only writer of an account's health
//! and usage-cache fields while serving requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::health;
use super::store::SharedAccountStore;
use super::{Account, ProviderCredentials};
use crate::error::GatewayError;

/// §4.1 selection strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Lru,
    RoundRobin,
    LeastUsage,
    MostUsage,
    OldestFirst,
}

impl SelectionStrategy {
    /// Sorts `accounts` into the strategy's preferred order. For
    /// `RoundRobin` this just fixes a stable base ordering (ascending id);
    /// the actual rotating pick happens in [`AccountPool::acquire`].
    pub fn order(&self, accounts: &mut [Account]) {
        match self {
            SelectionStrategy::Lru => {
                accounts.sort_by(|a, b| a.last_used_at.cmp(&b.last_used_at).then(a.id.cmp(&b.id)))
            }
            SelectionStrategy::RoundRobin => accounts.sort_by_key(|a| a.id),
            SelectionStrategy::LeastUsage => accounts.sort_by(|a, b| {
                a.remaining_quota()
                    .partial_cmp(&b.remaining_quota())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            }),
            SelectionStrategy::MostUsage => accounts.sort_by(|a, b| {
                b.remaining_quota()
                    .partial_cmp(&a.remaining_quota())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            }),
            SelectionStrategy::OldestFirst => accounts
                .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))),
        }
    }
}

/// The outcome of one upstream attempt, distinguishing context-limit errors
/// (never count against the breaker, §4.1/§8) from everything else.
pub enum AttemptOutcome<T> {
    Success {
        value: T,
        refreshed_credentials: Option<ProviderCredentials>,
    },
    ContextLimitExceeded(String),
    Failure(String),
}

pub struct AccountPool {
    store: SharedAccountStore,
    round_robin_cursor: AtomicU64,
}

pub type SharedAccountPool = std::sync::Arc<AccountPool>;

impl AccountPool {
    pub fn new(store: SharedAccountStore) -> Self {
        Self {
            store,
            round_robin_cursor: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &SharedAccountStore {
        &self.store
    }

    /// Acquire an eligible account for `model`, skipping ids in `exclude`
    /// unless doing so would leave nothing eligible (§4.1 retry re-selection
    /// rule).
    pub async fn acquire(
        &self,
        model: Option<&str>,
        strategy: SelectionStrategy,
        exclude: &[u64],
    ) -> Result<Account, GatewayError> {
        let mut candidates = self.store.get_providers_by_strategy(strategy, model).await;
        if candidates.is_empty() {
            return Err(GatewayError::NoAvailableProvider(model.map(String::from)));
        }

        let without_excluded: Vec<Account> = candidates
            .iter()
            .filter(|a| !exclude.contains(&a.id))
            .cloned()
            .collect();
        if !without_excluded.is_empty() {
            candidates = without_excluded;
        }

        let chosen = match strategy {
            SelectionStrategy::RoundRobin => {
                let n = candidates.len() as u64;
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::SeqCst) % n;
                candidates[idx as usize].clone()
            }
            _ => candidates[0].clone(),
        };

        self.store.touch_last_used(chosen.id).await;
        Ok(chosen)
    }

    pub async fn report_success(&self, id: u64) {
        self.store.mark_provider_healthy(id).await;
    }

    pub async fn report_error(&self, id: u64, message: String, global_max_errors: u32) {
        self.store
            .mark_provider_unhealthy(id, message, global_max_errors)
            .await;
    }

    /// §4.1 `executeWithRetry`. `attempt` receives the acquired account and
    /// is responsible for ensuring a fresh token, making the call, and
    /// classifying the outcome — the pool only owns selection and
    /// health-state transitions.
    pub async fn execute_with_retry<T, F>(
        &self,
        model: Option<&str>,
        strategy: SelectionStrategy,
        max_retries: u32,
        base_delay: Duration,
        global_max_errors: u32,
        mut attempt: F,
    ) -> Result<T, GatewayError>
    where
        F: for<'a> FnMut(&'a Account) -> BoxFuture<'a, AttemptOutcome<T>>,
    {
        let mut excluded: Vec<u64> = Vec::new();
        let attempts = max_retries.max(1);

        let mut last_err: Option<GatewayError> = None;
        for i in 1..=attempts {
            let account = self.acquire(model, strategy, &excluded).await?;

            match attempt(&account).await {
                AttemptOutcome::Success {
                    value,
                    refreshed_credentials,
                } => {
                    if let Some(creds) = refreshed_credentials {
                        self.store
                            .update_provider_credentials(account.id, creds)
                            .await;
                    }
                    self.report_success(account.id).await;
                    return Ok(value);
                }
                AttemptOutcome::ContextLimitExceeded(msg) => {
                    return Err(GatewayError::ContextLimitExceeded(msg));
                }
                AttemptOutcome::Failure(msg) => {
                    self.report_error(account.id, msg.clone(), global_max_errors)
                        .await;
                    excluded.push(account.id);
                    last_err = Some(GatewayError::UpstreamTransient(msg));
                    if i < attempts {
                        let backoff = base_delay * 2u32.pow(i - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or(GatewayError::NoAvailableProvider(model.map(String::from))))
    }

    /// §4.1 `executeStream`: acquires once, no retry — streams are not
    /// replayable. Success/error reporting happens after the stream drains
    /// (the caller invokes [`AccountPool::report_success`] /
    /// [`AccountPool::report_error`] once it knows the terminal outcome).
    pub async fn acquire_for_stream(
        &self,
        model: Option<&str>,
        strategy: SelectionStrategy,
    ) -> Result<Account, GatewayError> {
        self.acquire(model, strategy, &[]).await
    }

    pub async fn clear_cooldown(&self, id: u64) -> Option<Account> {
        self.store
            .update(id, |a| health::clear_cooldown(a))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::credentials::ProviderCredentials;
    use crate::accounts::Account;
    use chrono::Utc;

    async fn seeded_store() -> SharedAccountStore {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(
            crate::accounts::store::AccountStore::new(dir.path().join("accounts.json")).await,
        );
        store
    }

    fn account(name: &str) -> Account {
        Account::new(
            name.to_string(),
            "us-east-1".to_string(),
            ProviderCredentials::social_stub(),
        )
    }

    #[tokio::test]
    async fn lru_selects_least_recently_used_first() {
        let store = seeded_store().await;
        let mut a = account("A");
        a.last_used_at = Some(Utc::now() - chrono::Duration::hours(2));
        let mut b = account("B");
        b.last_used_at = Some(Utc::now() - chrono::Duration::hours(1));
        let a = store.add(a).await;
        let b = store.add(b).await;

        let pool = AccountPool::new(store.clone());
        let first = pool
            .acquire(None, SelectionStrategy::Lru, &[])
            .await
            .unwrap();
        assert_eq!(first.id, a.id);

        let second = pool
            .acquire(None, SelectionStrategy::Lru, &[])
            .await
            .unwrap();
        assert_eq!(second.id, b.id);
    }

    #[tokio::test]
    async fn no_available_provider_when_pool_empty() {
        let store = seeded_store().await;
        let pool = AccountPool::new(store);
        let err = pool.acquire(None, SelectionStrategy::Lru, &[]).await;
        assert!(matches!(err, Err(GatewayError::NoAvailableProvider(_))));
    }

    #[tokio::test]
    async fn exclude_falls_back_when_it_would_empty_the_set() {
        let store = seeded_store().await;
        let a = store.add(account("A")).await;
        let pool = AccountPool::new(store);
        let chosen = pool
            .acquire(None, SelectionStrategy::Lru, &[a.id])
            .await
            .unwrap();
        assert_eq!(chosen.id, a.id);
    }

    #[tokio::test]
    async fn context_limit_exceeded_does_not_report_error() {
        let store = seeded_store().await;
        let a = store.add(account("A")).await;
        let pool = AccountPool::new(store.clone());

        let result: Result<(), GatewayError> = pool
            .execute_with_retry(
                None,
                SelectionStrategy::Lru,
                3,
                Duration::from_millis(1),
                3,
                |_account| Box::pin(async { AttemptOutcome::ContextLimitExceeded("too long".into()) }),
            )
            .await;

        assert!(matches!(result, Err(GatewayError::ContextLimitExceeded(_))));
        let reloaded = store.get(a.id).await.unwrap();
        assert_eq!(reloaded.error_count, 0);
    }

    #[tokio::test]
    async fn failure_reports_error_and_exhausts_retries() {
        let store = seeded_store().await;
        let a = store.add(account("A")).await;
        let pool = AccountPool::new(store.clone());

        let result: Result<(), GatewayError> = pool
            .execute_with_retry(
                None,
                SelectionStrategy::Lru,
                2,
                Duration::from_millis(1),
                5,
                |_account| Box::pin(async { AttemptOutcome::Failure("boom".into()) }),
            )
            .await;

        assert!(result.is_err());
        let reloaded = store.get(a.id).await.unwrap();
        assert_eq!(reloaded.error_count, 2);
    }
}
