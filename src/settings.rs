//! Global runtime settings storage.
//!
//! Persists operator-configurable settings to disk at
//! `{data_dir}/settings.json`. Unlike [`crate::config::GatewayConfig`] (read
//! once from the environment at process start), these can be changed while
//! the process is running via the admin surface and take effect on the next
//! read — the background loops and request handlers always go through
//! `SettingsStore::get()` rather than caching values locally.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::accounts::pool::SelectionStrategy;

/// Operator-configurable settings (§6 configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub host: String,
    pub provider_strategy: SelectionStrategy,
    pub max_error_count: u32,
    pub health_check_interval_minutes: u64,
    pub usage_sync_interval_minutes: u64,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
    pub session_expire_hours: u64,
    pub system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 9091,
            host: "0.0.0.0".to_string(),
            provider_strategy: SelectionStrategy::Lru,
            max_error_count: 3,
            health_check_interval_minutes: 10,
            usage_sync_interval_minutes: 10,
            request_max_retries: 3,
            request_base_delay_ms: 1000,
            session_expire_hours: 24,
            system_prompt: String::new(),
        }
    }
}

/// In-memory settings store with disk persistence.
#[derive(Debug)]
pub struct SettingsStore {
    settings: RwLock<Settings>,
    storage_path: PathBuf,
}

pub type SharedSettingsStore = Arc<SettingsStore>;

impl SettingsStore {
    /// Load settings from `{data_dir}/settings.json`, falling back to
    /// defaults if the file is absent or unreadable.
    pub async fn new(data_dir: &PathBuf) -> Self {
        let storage_path = data_dir.join("settings.json");

        let settings = if storage_path.exists() {
            match Self::load_from_path(&storage_path) {
                Ok(s) => {
                    tracing::info!("loaded settings from {}", storage_path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to load settings from {}: {e}, using defaults",
                        storage_path.display()
                    );
                    Settings::default()
                }
            }
        } else {
            tracing::info!(
                "no settings file at {}, using defaults",
                storage_path.display()
            );
            Settings::default()
        };

        Self {
            settings: RwLock::new(settings),
            storage_path,
        }
    }

    fn load_from_path(path: &PathBuf) -> Result<Settings, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    async fn save_to_disk(&self) -> Result<(), std::io::Error> {
        let settings = self.settings.read().await;

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&*settings)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp_path = self.storage_path.with_extension("tmp");
        std::fs::write(&tmp_path, &contents)?;
        std::fs::rename(&tmp_path, &self.storage_path)?;
        tracing::debug!("saved settings to {}", self.storage_path.display());
        Ok(())
    }

    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, new_settings: Settings) -> Result<(), std::io::Error> {
        let mut settings = self.settings.write().await;
        *settings = new_settings;
        drop(settings);
        self.save_to_disk().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_match_spec_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(&dir.path().to_path_buf()).await;
        let s = store.get().await;
        assert_eq!(s.port, 9091);
        assert_eq!(s.max_error_count, 3);
        assert_eq!(s.request_base_delay_ms, 1000);
        assert_eq!(s.session_expire_hours, 24);
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let store = SettingsStore::new(&path).await;
        let mut updated = store.get().await;
        updated.max_error_count = 7;
        store.update(updated).await.unwrap();

        let reloaded = SettingsStore::new(&path).await;
        assert_eq!(reloaded.get().await.max_error_count, 7);
    }
}
