//! The account pool: data model, persistence, selection policy, and the
//! circuit breaker that gates which accounts may serve a request.
//!
//! An [`Account`] is the unit of pooling — one upstream Kiro credential plus
//! its health state, usage cache, and selection bookkeeping. The pool
//! (`pool::AccountPool`) is the only writer of an account's health and
//! usage-cache fields while serving requests; everything else (admin CRUD)
//! goes through `store::AccountStore` directly.

pub mod credentials;
pub mod health;
pub mod pool;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use credentials::{AuthMethod, ProviderCredentials};

/// `accountType` — the upstream subscription tier, used by the usage syncer
/// and by allow-list defaulting (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Free,
    Pro,
    Unknown,
}

impl Default for AccountType {
    fn default() -> Self {
        AccountType::Unknown
    }
}

/// Last-known formatted quota snapshot for an account, refreshed by the
/// usage syncer (§4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCache {
    pub used: f64,
    pub limit: f64,
    pub percent: f64,
}

/// An upstream Kiro credential record and everything the pool needs to
/// schedule and gate requests against it (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Dense integer identity, assigned on creation and stable thereafter.
    pub id: u64,
    /// Opaque external identity, safe to hand to admin callers.
    pub uuid: Uuid,

    pub name: String,
    pub region: String,
    pub account_type: AccountType,

    pub credentials: ProviderCredentials,

    pub is_healthy: bool,
    pub error_count: u32,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
    /// Per-account circuit-breaker override. `None` defers to the global
    /// `settings.max_error_count`.
    pub max_error_count: Option<u32>,

    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,

    pub cached_usage_data: Option<UsageCache>,
    pub last_usage_sync: Option<DateTime<Utc>>,
    pub usage_exhausted: bool,

    pub is_disabled: bool,
    /// `None` means all models are allowed.
    pub allowed_models: Option<Vec<String>>,
    pub check_health: bool,
    pub check_model_name: Option<String>,

    pub account_email: Option<String>,
}

impl Account {
    pub fn new(name: String, region: String, credentials: ProviderCredentials) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name,
            region,
            account_type: AccountType::Unknown,
            credentials,
            is_healthy: true,
            error_count: 0,
            last_error_time: None,
            last_error_message: None,
            max_error_count: None,
            last_used_at: None,
            created_at: Utc::now(),
            cached_usage_data: None,
            last_usage_sync: None,
            usage_exhausted: false,
            is_disabled: false,
            allowed_models: None,
            check_health: true,
            check_model_name: None,
            account_email: None,
        }
    }

    /// Effective circuit-breaker threshold: per-account override, else the
    /// global default passed in from `Settings`.
    pub fn effective_max_error_count(&self, global_default: u32) -> u32 {
        self.max_error_count.unwrap_or(global_default)
    }

    /// §3 eligibility predicate.
    pub fn is_eligible_for(&self, model: Option<&str>) -> bool {
        if self.is_disabled || !self.is_healthy || self.usage_exhausted {
            return false;
        }
        match (&self.allowed_models, model) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(allowed), Some(m)) => allowed.iter().any(|a| a == m),
        }
    }

    /// Eligibility ignoring usage exhaustion — the §4.1 selection fallback
    /// used when no account is eligible under the strict predicate.
    pub fn is_eligible_ignoring_exhaustion(&self, model: Option<&str>) -> bool {
        if self.is_disabled || !self.is_healthy {
            return false;
        }
        match (&self.allowed_models, model) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(allowed), Some(m)) => allowed.iter().any(|a| a == m),
        }
    }

    pub fn remaining_quota(&self) -> f64 {
        match &self.cached_usage_data {
            Some(u) => (u.limit - u.used).max(0.0),
            None => f64::INFINITY,
        }
    }
}

/// Admin-safe view of an [`Account`] — credentials are never included
/// (§3 invariant, §8 property 7).
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub region: String,
    pub account_type: AccountType,
    pub auth_method: AuthMethod,
    pub is_healthy: bool,
    pub error_count: u32,
    pub last_error_message: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub usage_exhausted: bool,
    pub is_disabled: bool,
    pub allowed_models: Option<Vec<String>>,
    pub account_email: Option<String>,
}

impl From<&Account> for AccountSummary {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            uuid: a.uuid,
            name: a.name.clone(),
            region: a.region.clone(),
            account_type: a.account_type,
            auth_method: a.credentials.auth_method(),
            is_healthy: a.is_healthy,
            error_count: a.error_count,
            last_error_message: a.last_error_message.clone(),
            last_used_at: a.last_used_at,
            created_at: a.created_at,
            usage_exhausted: a.usage_exhausted,
            is_disabled: a.is_disabled,
            allowed_models: a.allowed_models.clone(),
            account_email: a.account_email.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(
            "test".to_string(),
            "us-east-1".to_string(),
            ProviderCredentials::social_stub(),
        )
    }

    #[test]
    fn eligible_by_default() {
        let a = account();
        assert!(a.is_eligible_for(Some("claude-opus-4-5")));
    }

    #[test]
    fn disabled_account_is_not_eligible() {
        let mut a = account();
        a.is_disabled = true;
        assert!(!a.is_eligible_for(None));
    }

    #[test]
    fn allow_list_restricts_model() {
        let mut a = account();
        a.allowed_models = Some(vec!["claude-haiku-4-5".to_string()]);
        assert!(!a.is_eligible_for(Some("claude-opus-4-5")));
        assert!(a.is_eligible_for(Some("claude-haiku-4-5")));
    }

    #[test]
    fn exhausted_account_ignored_in_strict_but_included_in_fallback() {
        let mut a = account();
        a.usage_exhausted = true;
        assert!(!a.is_eligible_for(Some("m")));
        assert!(a.is_eligible_ignoring_exhaustion(Some("m")));
    }
}
