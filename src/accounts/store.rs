//! Account persistence — the store contract §6 calls out, backing onto a
//! JSON file the same way the teacher's `AIProviderStore` backs onto
//! `ai_providers.json` (see `examples` grounding in `ai_providers.rs`).
//!
//! This is the literal implementation of the "embedded SQL store" the
//! top-level design treats as opaque: a single JSON-file-backed table with
//! atomic per-call writes (temp-file-then-rename), satisfying every
//! operation named in §6 without requiring multi-statement transactions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::health;
use super::pool::SelectionStrategy;
use super::{Account, UsageCache};

pub type SharedAccountStore = Arc<AccountStore>;

#[derive(Debug)]
pub struct AccountStore {
    accounts: RwLock<HashMap<u64, Account>>,
    next_id: AtomicU64,
    storage_path: PathBuf,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
struct OnDisk {
    accounts: Vec<Account>,
    #[serde(default)]
    next_id: u64,
}

impl AccountStore {
    pub async fn new(storage_path: PathBuf) -> Self {
        let (accounts, next_id) = match Self::load_from_disk(&storage_path) {
            Ok(Some(on_disk)) => {
                let map = on_disk
                    .accounts
                    .into_iter()
                    .map(|a| (a.id, a))
                    .collect::<HashMap<_, _>>();
                let next_id = on_disk.next_id.max(map.keys().max().copied().unwrap_or(0) + 1);
                (map, next_id)
            }
            Ok(None) => (HashMap::new(), 1),
            Err(e) => {
                tracing::warn!("failed to load account store, starting empty: {e}");
                (HashMap::new(), 1)
            }
        };

        Self {
            accounts: RwLock::new(accounts),
            next_id: AtomicU64::new(next_id),
            storage_path,
        }
    }

    fn load_from_disk(path: &PathBuf) -> Result<Option<OnDisk>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let on_disk = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(on_disk))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let accounts = self.accounts.read().await;
        let on_disk = OnDisk {
            accounts: accounts.values().cloned().collect(),
            next_id: self.next_id.load(Ordering::SeqCst),
        };
        drop(accounts);

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&on_disk)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        Ok(())
    }

    // ---- CRUD ----------------------------------------------------------

    pub async fn add(&self, mut account: Account) -> Account {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        account.id = id;
        let mut accounts = self.accounts.write().await;
        accounts.insert(id, account.clone());
        drop(accounts);
        if let Err(e) = self.save_to_disk().await {
            tracing::error!("failed to persist new account {id}: {e}");
        }
        account
    }

    pub async fn get(&self, id: u64) -> Option<Account> {
        self.accounts.read().await.get(&id).cloned()
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Option<Account> {
        self.accounts
            .read()
            .await
            .values()
            .find(|a| a.uuid == uuid)
            .cloned()
    }

    pub async fn list(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    pub async fn delete(&self, id: u64) -> bool {
        let mut accounts = self.accounts.write().await;
        let removed = accounts.remove(&id).is_some();
        drop(accounts);
        if removed {
            if let Err(e) = self.save_to_disk().await {
                tracing::error!("failed to persist account deletion {id}: {e}");
            }
        }
        removed
    }

    /// `updateProvider(id, patch)` — generic field patch via a closure,
    /// saved atomically.
    pub async fn update<F>(&self, id: u64, patch: F) -> Option<Account>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(&id)?;
        patch(account);
        let updated = account.clone();
        drop(accounts);
        if let Err(e) = self.save_to_disk().await {
            tracing::error!("failed to persist account update {id}: {e}");
        }
        Some(updated)
    }

    // ---- Store contract operations (§6) ---------------------------------

    /// `getAvailableProviders()` — strictly eligible accounts, ignoring
    /// model. Used by admin/debug surfaces; request-path selection goes
    /// through `pool::AccountPool::acquire`.
    pub async fn get_available_providers(&self) -> Vec<Account> {
        self.accounts
            .read()
            .await
            .values()
            .filter(|a| a.is_eligible_for(None))
            .cloned()
            .collect()
    }

    /// `getProvidersByStrategy(strategy, model?)` — §4.1 selection table,
    /// strict eligibility. Falls back to eligibility-ignoring-exhaustion if
    /// the strict set is empty, per §4.1.
    pub async fn get_providers_by_strategy(
        &self,
        strategy: SelectionStrategy,
        model: Option<&str>,
    ) -> Vec<Account> {
        let accounts = self.accounts.read().await;
        let mut eligible: Vec<Account> = accounts
            .values()
            .filter(|a| a.is_eligible_for(model))
            .cloned()
            .collect();
        if eligible.is_empty() {
            eligible = accounts
                .values()
                .filter(|a| a.is_eligible_ignoring_exhaustion(model))
                .cloned()
                .collect();
        }
        drop(accounts);
        strategy.order(&mut eligible);
        eligible
    }

    /// `getProvidersNeedingUsageSync(intervalMinutes)`.
    pub async fn get_providers_needing_usage_sync(&self, interval_minutes: u64) -> Vec<Account> {
        let cutoff = Utc::now() - chrono::Duration::minutes(interval_minutes as i64);
        self.accounts
            .read()
            .await
            .values()
            .filter(|a| !a.is_disabled)
            .filter(|a| a.last_usage_sync.map(|t| t < cutoff).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// `getProviderById(id)` — alias of `get` kept for store-contract parity.
    pub async fn get_provider_by_id(&self, id: u64) -> Option<Account> {
        self.get(id).await
    }

    pub async fn update_provider_credentials(
        &self,
        id: u64,
        credentials: super::ProviderCredentials,
    ) -> Option<Account> {
        self.update(id, |a| a.credentials = credentials).await
    }

    pub async fn update_provider_usage_cache(
        &self,
        id: u64,
        usage: UsageCache,
        exhausted: bool,
    ) -> Option<Account> {
        self.update(id, |a| {
            a.usage_exhausted = exhausted;
            a.cached_usage_data = Some(usage);
            a.last_usage_sync = Some(Utc::now());
        })
        .await
    }

    pub async fn update_provider_account_email(&self, id: u64, email: String) -> Option<Account> {
        self.update(id, |a| a.account_email = Some(email)).await
    }

    pub async fn mark_provider_healthy(&self, id: u64) -> Option<Account> {
        self.update(id, |a| health::record_success(a)).await
    }

    pub async fn mark_provider_unhealthy(
        &self,
        id: u64,
        message: String,
        global_max_errors: u32,
    ) -> Option<Account> {
        self.update(id, |a| health::record_error(a, message, global_max_errors))
            .await
    }

    /// `updateProviderUsage(id)` — bumps `lastUsedAt`, used at selection
    /// time so the LRU strategy observes the new ordering on the next call.
    pub async fn touch_last_used(&self, id: u64) -> Option<Account> {
        self.update(id, |a| a.last_used_at = Some(Utc::now())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::credentials::ProviderCredentials;

    fn new_account(name: &str) -> Account {
        Account::new(
            name.to_string(),
            "us-east-1".to_string(),
            ProviderCredentials::social_stub(),
        )
    }

    #[tokio::test]
    async fn add_assigns_dense_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("accounts.json")).await;
        let a = store.add(new_account("a")).await;
        let b = store.add(new_account("b")).await;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = AccountStore::new(path.clone()).await;
        store.add(new_account("a")).await;

        let reloaded = AccountStore::new(path).await;
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn mark_unhealthy_trips_breaker_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::new(dir.path().join("accounts.json")).await;
        let a = store.add(new_account("a")).await;
        store.mark_provider_unhealthy(a.id, "e1".into(), 1).await;
        let reloaded = store.get(a.id).await.unwrap();
        assert!(!reloaded.is_healthy);
    }
}
