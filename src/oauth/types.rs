//! OAuth session data model (§3 `OAuthSession`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::credentials::ProviderCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OAuthFlowType {
    Social,
    BuilderId,
    IdentityCenter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthSessionStatus {
    Pending,
    Completed,
    Error,
    Expired,
    Timeout,
    Cancelled,
}

impl OAuthSessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OAuthSessionStatus::Pending)
    }
}

/// Flow-specific fields, only populated for the flow that created the
/// session (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthFlowFields {
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub device_code: Option<String>,
    pub user_code: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub start_url: Option<String>,
    pub sso_region: Option<String>,
    pub verification_uri: Option<String>,
    pub verification_uri_complete: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    pub session_id: Uuid,
    pub flow_type: OAuthFlowType,
    pub provider: Option<String>,
    pub region: String,
    pub fields: OAuthFlowFields,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: OAuthSessionStatus,
    pub error: Option<String>,
    /// Set only when `status == Completed` (§3).
    pub credentials: Option<ProviderCredentials>,
    /// When the session first entered a terminal status; drives the
    /// reaper's "10 min past terminal" sweep (§3 "Lifecycle").
    pub terminal_at: Option<DateTime<Utc>>,
}

impl OAuthSession {
    pub fn new(flow_type: OAuthFlowType, region: String, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            flow_type,
            provider: None,
            region,
            fields: OAuthFlowFields::default(),
            created_at: now,
            expires_at: now + ttl,
            status: OAuthSessionStatus::Pending,
            error: None,
            credentials: None,
            terminal_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// §8 property 3: a session transitions at most once from pending to a
    /// terminal status. Returns `false` (no-op) if already terminal.
    pub fn transition(&mut self, status: OAuthSessionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.terminal_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self, credentials: ProviderCredentials) -> bool {
        if !self.transition(OAuthSessionStatus::Completed) {
            return false;
        }
        self.credentials = Some(credentials);
        true
    }

    pub fn fail(&mut self, message: String) -> bool {
        if !self.transition(OAuthSessionStatus::Error) {
            return false;
        }
        self.error = Some(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_at_most_once_from_pending() {
        let mut s = OAuthSession::new(OAuthFlowType::Social, "us-east-1".into(), chrono::Duration::minutes(10));
        assert!(s.fail("first".into()));
        assert!(!s.fail("second".into()));
        assert_eq!(s.error.as_deref(), Some("first"));
    }

    #[test]
    fn expiry_is_relative_to_ttl() {
        let s = OAuthSession::new(OAuthFlowType::BuilderId, "us-east-1".into(), chrono::Duration::seconds(1));
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(Utc::now() + chrono::Duration::seconds(2)));
    }
}
