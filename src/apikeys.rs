//! Client-facing API keys (§3 `ApiKey`, §4.5/§6 "authenticate the API key
//! and increment its daily counter").
//!
//! Issuance and listing are library-level operations only — per spec.md §1
//! the admin CRUD surface for keys is an external collaborator's
//! responsibility; this store is the seam that collaborator links against.
//! The one operation the core itself performs on the request path is
//! [`ApiKeyStore::validate_and_increment`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::GatewayError;

fn hex_sha256(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a.len() {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: u64,
    pub uuid: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    /// First 8 chars of the raw secret, returned in listings.
    pub key_prefix: String,
    /// SHA-256 hex digest of the raw secret; lookup is by hash only.
    pub key_hash: String,
    /// -1 means unlimited.
    pub daily_limit: i64,
    pub usage_today: u64,
    pub usage_date: NaiveDate,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Returned exactly once, at creation, carrying the raw secret.
#[derive(Debug, Serialize)]
pub struct IssuedApiKey {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub key: String,
    pub key_prefix: String,
    pub daily_limit: i64,
}

/// Admin-safe view — never carries the raw secret or the hash.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeySummary {
    pub id: u64,
    pub uuid: Uuid,
    pub user_id: Option<String>,
    pub name: String,
    pub key_prefix: String,
    pub daily_limit: i64,
    pub usage_today: u64,
    pub usage_date: NaiveDate,
    pub is_active: bool,
}

impl From<&ApiKey> for ApiKeySummary {
    fn from(k: &ApiKey) -> Self {
        Self {
            id: k.id,
            uuid: k.uuid,
            user_id: k.user_id.clone(),
            name: k.name.clone(),
            key_prefix: k.key_prefix.clone(),
            daily_limit: k.daily_limit,
            usage_today: k.usage_today,
            usage_date: k.usage_date,
            is_active: k.is_active,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
    keys: Vec<ApiKey>,
    next_id: u64,
}

pub struct ApiKeyStore {
    keys: RwLock<HashMap<u64, ApiKey>>,
    next_id: AtomicU64,
    storage_path: PathBuf,
}

pub type SharedApiKeyStore = Arc<ApiKeyStore>;

impl ApiKeyStore {
    pub async fn new(data_dir: &Path) -> Self {
        let storage_path = data_dir.join("api_keys.json");
        let (keys, next_id) = Self::load_from_disk(&storage_path).unwrap_or_default();
        Self {
            keys: RwLock::new(keys),
            next_id: AtomicU64::new(next_id),
            storage_path,
        }
    }

    fn load_from_disk(path: &Path) -> Option<(HashMap<u64, ApiKey>, u64)> {
        let contents = std::fs::read_to_string(path).ok()?;
        let on_disk: OnDisk = serde_json::from_str(&contents).ok()?;
        let keys = on_disk.keys.into_iter().map(|k| (k.id, k)).collect();
        Some((keys, on_disk.next_id))
    }

    async fn save_to_disk(&self) -> Result<(), GatewayError> {
        let keys = self.keys.read().await;
        let on_disk = OnDisk {
            keys: keys.values().cloned().collect(),
            next_id: self.next_id.load(Ordering::SeqCst),
        };
        if let Some(parent) = self.storage_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Internal(e.into()))?;
        }
        let contents = serde_json::to_string_pretty(&on_disk).map_err(|e| GatewayError::Internal(e.into()))?;
        let tmp_path = self.storage_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &contents)
            .await
            .map_err(|e| GatewayError::Internal(e.into()))?;
        tokio::fs::rename(&tmp_path, &self.storage_path)
            .await
            .map_err(|e| GatewayError::Internal(e.into()))?;
        Ok(())
    }

    /// Mints a new key. The raw secret is only ever returned here.
    pub async fn create(
        &self,
        name: String,
        user_id: Option<String>,
        daily_limit: i64,
    ) -> Result<IssuedApiKey, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let raw_key = format!("sk-kiro-{}", Uuid::new_v4().as_simple());
        let key_prefix = raw_key[..8].to_string();
        let record = ApiKey {
            id,
            uuid: Uuid::new_v4(),
            user_id,
            name: name.clone(),
            key_prefix: key_prefix.clone(),
            key_hash: hex_sha256(&raw_key),
            daily_limit,
            usage_today: 0,
            usage_date: chrono::Utc::now().date_naive(),
            is_active: true,
            created_at: chrono::Utc::now(),
        };

        self.keys.write().await.insert(id, record.clone());
        self.save_to_disk().await?;

        Ok(IssuedApiKey {
            id,
            uuid: record.uuid,
            name,
            key: raw_key,
            key_prefix,
            daily_limit,
        })
    }

    pub async fn list(&self) -> Vec<ApiKeySummary> {
        self.keys.read().await.values().map(ApiKeySummary::from).collect()
    }

    pub async fn delete(&self, id: u64) -> Result<bool, GatewayError> {
        let removed = self.keys.write().await.remove(&id).is_some();
        if removed {
            self.save_to_disk().await?;
        }
        Ok(removed)
    }

    /// Core request-path operation (§4.5 step a): authenticate the presented
    /// secret and increment its daily counter. Resets `usage_today` when the
    /// calendar day has rolled over. `QuotaExceeded` when `dailyLimit != -1`
    /// and the limit is already reached; `AuthenticationFailed` when no
    /// active key matches.
    pub async fn validate_and_increment(&self, presented_key: &str) -> Result<ApiKeySummary, GatewayError> {
        let presented_hash = hex_sha256(presented_key);
        let mut keys = self.keys.write().await;

        let matched_id = keys
            .values()
            .find(|k| k.is_active && constant_time_eq(&k.key_hash, &presented_hash))
            .map(|k| k.id);

        let Some(id) = matched_id else {
            return Err(GatewayError::AuthenticationFailed);
        };

        let key = keys.get_mut(&id).expect("matched id exists");
        let today = chrono::Utc::now().date_naive();
        if key.usage_date != today {
            key.usage_date = today;
            key.usage_today = 0;
        }

        if key.daily_limit >= 0 && key.usage_today >= key.daily_limit as u64 {
            return Err(GatewayError::QuotaExceeded);
        }

        key.usage_today += 1;
        let summary = ApiKeySummary::from(&*key);
        drop(keys);
        self.save_to_disk().await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn validate_and_increment_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).await;
        let result = store.validate_and_increment("sk-kiro-bogus").await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn validate_and_increment_accepts_issued_key_and_counts_usage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).await;
        let issued = store.create("ci".to_string(), None, 2).await.unwrap();

        let summary = store.validate_and_increment(&issued.key).await.unwrap();
        assert_eq!(summary.usage_today, 1);
        let summary = store.validate_and_increment(&issued.key).await.unwrap();
        assert_eq!(summary.usage_today, 2);
    }

    #[tokio::test]
    async fn validate_and_increment_enforces_daily_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).await;
        let issued = store.create("ci".to_string(), None, 1).await.unwrap();

        store.validate_and_increment(&issued.key).await.unwrap();
        let result = store.validate_and_increment(&issued.key).await;
        assert!(matches!(result, Err(GatewayError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn unlimited_daily_limit_never_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).await;
        let issued = store.create("ci".to_string(), None, -1).await.unwrap();

        for _ in 0..10 {
            store.validate_and_increment(&issued.key).await.unwrap();
        }
    }

    #[tokio::test]
    async fn inactive_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::new(dir.path()).await;
        let issued = store.create("ci".to_string(), None, -1).await.unwrap();
        {
            let mut keys = store.keys.write().await;
            keys.get_mut(&issued.id).unwrap().is_active = false;
        }
        let result = store.validate_and_increment(&issued.key).await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed)));
    }
}
