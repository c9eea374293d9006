//! Credential blob: a tagged variant over the three OAuth methods an
//! account can be authenticated with (§9 design note — the dynamically
//! typed credential blob of the source system becomes a Rust enum here,
//! serialized as a single JSON column keyed by `auth_method`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which OAuth flow produced a credential (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    Social,
    BuilderId,
    IdentityCenter,
}

/// Fields shared by every auth method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    /// §4.3: refresh when within 60s of expiry.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - chrono::Duration::seconds(60)
    }
}

/// The account's OAuth credential blob, tagged by the method that produced
/// it. Device-flow variants retain the dynamic client registration alongside
/// the token state since both are needed to refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "auth_method", rename_all = "kebab-case")]
pub enum ProviderCredentials {
    Social {
        #[serde(flatten)]
        tokens: TokenState,
        provider: SocialProvider,
        profile_arn: Option<String>,
    },
    BuilderId {
        #[serde(flatten)]
        tokens: TokenState,
        client_id: String,
        client_secret: String,
        client_secret_expires_at: DateTime<Utc>,
    },
    IdentityCenter {
        #[serde(flatten)]
        tokens: TokenState,
        client_id: String,
        client_secret: String,
        client_secret_expires_at: DateTime<Utc>,
        start_url: String,
        sso_region: String,
    },
}

/// The two social OAuth providers named in §1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialProvider {
    Google,
    GitHub,
}

impl ProviderCredentials {
    pub fn auth_method(&self) -> AuthMethod {
        match self {
            ProviderCredentials::Social { .. } => AuthMethod::Social,
            ProviderCredentials::BuilderId { .. } => AuthMethod::BuilderId,
            ProviderCredentials::IdentityCenter { .. } => AuthMethod::IdentityCenter,
        }
    }

    pub fn tokens(&self) -> &TokenState {
        match self {
            ProviderCredentials::Social { tokens, .. } => tokens,
            ProviderCredentials::BuilderId { tokens, .. } => tokens,
            ProviderCredentials::IdentityCenter { tokens, .. } => tokens,
        }
    }

    pub fn tokens_mut(&mut self) -> &mut TokenState {
        match self {
            ProviderCredentials::Social { tokens, .. } => tokens,
            ProviderCredentials::BuilderId { tokens, .. } => tokens,
            ProviderCredentials::IdentityCenter { tokens, .. } => tokens,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.tokens().access_token
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.tokens().needs_refresh(now)
    }

    /// Test/fixture helper — never used on the request path.
    #[cfg(test)]
    pub fn social_stub() -> Self {
        ProviderCredentials::Social {
            tokens: TokenState {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            },
            provider: SocialProvider::Google,
            profile_arn: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_refresh_within_60s_of_expiry() {
        let state = TokenState {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(state.needs_refresh(Utc::now()));
    }

    #[test]
    fn does_not_need_refresh_well_before_expiry() {
        let state = TokenState {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(!state.needs_refresh(Utc::now()));
    }

    #[test]
    fn serde_round_trip_preserves_tag() {
        let cred = ProviderCredentials::social_stub();
        let json = serde_json::to_string(&cred).unwrap();
        assert!(json.contains("\"auth_method\":\"social\""));
        let back: ProviderCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(back.auth_method(), AuthMethod::Social);
    }
}
