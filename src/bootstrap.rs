//! Optional one-shot import of accounts and API keys from a seed file at
//! first boot, so the gateway can be made to answer requests without first
//! standing up a separate admin client (§1: "runnable standalone for local
//! development and CI").
//!
//! Only consulted when `KIRO_SEED_FILE` is set and the account store is
//! still empty — an existing store is never overwritten by a seed file
//! left behind from an earlier run.

use std::path::Path;

use serde::Deserialize;

use crate::accounts::store::SharedAccountStore;
use crate::accounts::{Account, ProviderCredentials};
use crate::apikeys::SharedApiKeyStore;

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    accounts: Vec<SeedAccount>,
    #[serde(default)]
    api_keys: Vec<SeedApiKey>,
}

/// A minimal account description, expanded to a full [`Account`] via
/// [`Account::new`] plus the overrides given here — a seed file carries
/// only what an operator would realistically hand-author, not a full
/// store dump.
#[derive(Debug, Deserialize)]
struct SeedAccount {
    name: String,
    region: String,
    credentials: ProviderCredentials,
    #[serde(default)]
    allowed_models: Option<Vec<String>>,
    #[serde(default)]
    check_health: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SeedApiKey {
    name: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default = "default_daily_limit")]
    daily_limit: i64,
}

fn default_daily_limit() -> i64 {
    -1
}

/// Imports `path` into `accounts`/`api_keys` if the account store is
/// currently empty. Newly issued API key secrets are logged once at `info`
/// since there is no other channel to hand them to an operator running the
/// seed import.
pub async fn import_if_empty(
    path: &Path,
    accounts: &SharedAccountStore,
    api_keys: &SharedApiKeyStore,
) -> anyhow::Result<()> {
    if !accounts.list().await.is_empty() {
        tracing::debug!("account store already populated, skipping seed import");
        return Ok(());
    }

    let contents = tokio::fs::read_to_string(path).await?;
    let seed: SeedFile = serde_json::from_str(&contents)?;

    for seed_account in seed.accounts {
        let mut account = Account::new(seed_account.name.clone(), seed_account.region, seed_account.credentials);
        account.allowed_models = seed_account.allowed_models;
        if let Some(check_health) = seed_account.check_health {
            account.check_health = check_health;
        }
        accounts.add(account).await;
        tracing::info!(name = seed_account.name, "imported seed account");
    }

    for key in seed.api_keys {
        let issued = api_keys.create(key.name.clone(), key.user_id, key.daily_limit).await?;
        tracing::info!(name = %key.name, key = %issued.key, "imported seed api key (secret shown once)");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_import_when_store_already_has_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = std::sync::Arc::new(
            crate::accounts::store::AccountStore::new(dir.path().join("accounts.json")).await,
        );
        accounts
            .add(Account::new(
                "existing".to_string(),
                "us-east-1".to_string(),
                crate::accounts::ProviderCredentials::social_stub(),
            ))
            .await;
        let api_keys = std::sync::Arc::new(crate::apikeys::ApiKeyStore::new(dir.path()).await);

        let seed_path = dir.path().join("seed.json");
        std::fs::write(
            &seed_path,
            r#"{"accounts":[{"name":"should-not-import","region":"us-east-1","credentials":{"auth_method":"social","provider":"google","tokens":{"access_token":"a","refresh_token":"r","expires_at":"2099-01-01T00:00:00Z"},"profile_arn":null}}]}"#,
        )
        .unwrap();

        import_if_empty(&seed_path, &accounts, &api_keys).await.unwrap();
        assert_eq!(accounts.list().await.len(), 1);
        assert_eq!(accounts.list().await[0].name, "existing");
    }

    #[tokio::test]
    async fn imports_accounts_and_api_keys_into_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let accounts = std::sync::Arc::new(
            crate::accounts::store::AccountStore::new(dir.path().join("accounts.json")).await,
        );
        let api_keys = std::sync::Arc::new(crate::apikeys::ApiKeyStore::new(dir.path()).await);

        let seed = serde_json::json!({
            "accounts": [{
                "name": "seeded",
                "region": "us-east-1",
                "credentials": crate::accounts::ProviderCredentials::social_stub(),
            }],
            "api_keys": [{"name": "ci"}],
        });
        let seed_path = dir.path().join("seed.json");
        std::fs::write(&seed_path, serde_json::to_string(&seed).unwrap()).unwrap();

        import_if_empty(&seed_path, &accounts, &api_keys).await.unwrap();
        assert_eq!(accounts.list().await.len(), 1);
        assert_eq!(api_keys.list().await.len(), 1);
    }
}
