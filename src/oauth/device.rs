//! AWS Builder ID and IAM Identity Center device-authorization flows
//! (§4.2). Both share the same dynamic-client-registration +
//! device-authorization + polling shape; Identity Center additionally
//! validates a caller-supplied `startUrl`/`ssoRegion`.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::accounts::credentials::{ProviderCredentials, TokenState};
use crate::error::GatewayError;

use super::registry::SharedSessionRegistry;
use super::types::{OAuthFlowType, OAuthSession, OAuthSessionStatus};

const SESSION_TTL_MINUTES: i64 = 10;

fn start_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https://(d-[a-z0-9]+|[a-z0-9-]+)\.awsapps\.com/start/?$").unwrap())
}

const ALLOWED_SSO_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
];

pub fn validate_start_url(start_url: &str) -> Result<(), GatewayError> {
    if start_url_regex().is_match(start_url) {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "invalid identity center start url: {start_url}"
        )))
    }
}

pub fn validate_sso_region(region: &str) -> Result<(), GatewayError> {
    if ALLOWED_SSO_REGIONS.contains(&region) {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(format!(
            "unsupported sso region: {region}"
        )))
    }
}

/// Response handed to the admin caller immediately after starting a device
/// flow (§4.2 step 3).
#[derive(Debug, serde::Serialize)]
pub struct DeviceFlowStart {
    pub session_id: Uuid,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: i64,
    pub interval: u64,
}

#[derive(serde::Deserialize)]
struct ClientRegistration {
    client_id: String,
    client_secret: String,
    client_secret_expires_at: i64,
}

#[derive(serde::Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: String,
    expires_in: i64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

fn oidc_base(region: &str) -> String {
    format!("https://oidc.{region}.amazonaws.com")
}

async fn register_client(
    http: &reqwest::Client,
    region: &str,
) -> Result<ClientRegistration, GatewayError> {
    let response = http
        .post(format!("{}/client/register", oidc_base(region)))
        .json(&serde_json::json!({
            "clientName": "kiro-gateway",
            "clientType": "public",
        }))
        .send()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("client registration failed: {e}")))?;

    if !response.status().is_success() {
        return Err(GatewayError::OAuthFailure(format!(
            "client registration rejected with status {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("malformed client registration response: {e}")))
}

async fn start_device_authorization(
    http: &reqwest::Client,
    region: &str,
    client_id: &str,
    client_secret: &str,
    start_url: Option<&str>,
) -> Result<DeviceAuthorization, GatewayError> {
    let mut body = serde_json::json!({
        "clientId": client_id,
        "clientSecret": client_secret,
    });
    if let Some(start_url) = start_url {
        body["startUrl"] = serde_json::Value::String(start_url.to_string());
    }

    let response = http
        .post(format!("{}/device_authorization", oidc_base(region)))
        .json(&body)
        .send()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("device authorization failed: {e}")))?;

    if !response.status().is_success() {
        return Err(GatewayError::OAuthFailure(format!(
            "device authorization rejected with status {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("malformed device authorization response: {e}")))
}

async fn start_flow(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    flow_type: OAuthFlowType,
    region: String,
    start_url: Option<String>,
    sso_region: Option<String>,
) -> Result<DeviceFlowStart, GatewayError> {
    let registration = register_client(&http, &region).await?;
    let device_auth = start_device_authorization(
        &http,
        &region,
        &registration.client_id,
        &registration.client_secret,
        start_url.as_deref(),
    )
    .await?;

    let mut session = OAuthSession::new(
        flow_type,
        region.clone(),
        chrono::Duration::minutes(SESSION_TTL_MINUTES),
    );
    session.fields.client_id = Some(registration.client_id.clone());
    session.fields.client_secret = Some(registration.client_secret.clone());
    session.fields.device_code = Some(device_auth.device_code.clone());
    session.fields.user_code = Some(device_auth.user_code.clone());
    session.fields.poll_interval_secs = Some(device_auth.interval);
    session.fields.verification_uri = Some(device_auth.verification_uri.clone());
    session.fields.verification_uri_complete = Some(device_auth.verification_uri_complete.clone());
    session.fields.start_url = start_url;
    session.fields.sso_region = sso_region;

    let session = registry.create(session).await;
    let session_id = session.session_id;

    tokio::spawn(poll_token_endpoint(
        registry,
        http,
        session_id,
        region,
        registration.client_id,
        registration.client_secret,
        registration.client_secret_expires_at,
        device_auth.device_code,
        device_auth.interval,
        device_auth.expires_in,
    ));

    Ok(DeviceFlowStart {
        session_id,
        user_code: device_auth.user_code,
        verification_uri: device_auth.verification_uri,
        verification_uri_complete: device_auth.verification_uri_complete,
        expires_in: device_auth.expires_in,
        interval: device_auth.interval,
    })
}

pub async fn start_builder_id(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    region: String,
) -> Result<DeviceFlowStart, GatewayError> {
    start_flow(registry, http, OAuthFlowType::BuilderId, region, None, None).await
}

pub async fn start_identity_center(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    start_url: String,
    sso_region: String,
) -> Result<DeviceFlowStart, GatewayError> {
    validate_start_url(&start_url)?;
    validate_sso_region(&sso_region)?;
    start_flow(
        registry,
        http,
        OAuthFlowType::IdentityCenter,
        sso_region.clone(),
        Some(start_url),
        Some(sso_region),
    )
    .await
}

#[derive(serde::Deserialize)]
struct TokenPollResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

#[allow(clippy::too_many_arguments)]
async fn poll_token_endpoint(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    session_id: Uuid,
    region: String,
    client_id: String,
    client_secret: String,
    client_secret_expires_at: i64,
    device_code: String,
    mut interval: u64,
    expires_in: i64,
) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(expires_in.max(0) as u64);

    loop {
        if tokio::time::Instant::now() >= deadline {
            registry
                .update(session_id, |s| {
                    s.transition(OAuthSessionStatus::Expired);
                })
                .await;
            return;
        }

        tokio::time::sleep(std::time::Duration::from_secs(interval)).await;

        let response = http
            .post(format!("{}/token", oidc_base(&region)))
            .json(&serde_json::json!({
                "grantType": "urn:ietf:params:oauth:grant-type:device_code",
                "deviceCode": device_code,
                "clientId": client_id,
                "clientSecret": client_secret,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                registry
                    .update(session_id, |s| s.fail(format!("token poll transport error: {e}")))
                    .await;
                return;
            }
        };

        let parsed: TokenPollResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                registry
                    .update(session_id, |s| s.fail(format!("malformed token poll response: {e}")))
                    .await;
                return;
            }
        };

        match parsed.error.as_deref() {
            Some("authorization_pending") => continue,
            Some("slow_down") => {
                interval *= 2;
                continue;
            }
            Some("expired_token") => {
                registry
                    .update(session_id, |s| {
                        s.transition(OAuthSessionStatus::Expired);
                    })
                    .await;
                return;
            }
            Some(other) => {
                registry
                    .update(session_id, |s| s.fail(format!("device flow error: {other}")))
                    .await;
                return;
            }
            None => {}
        }

        let (Some(access_token), Some(refresh_token), Some(expires_in)) =
            (parsed.access_token, parsed.refresh_token, parsed.expires_in)
        else {
            registry
                .update(session_id, |s| s.fail("token response missing fields".to_string()))
                .await;
            return;
        };

        let session = registry.get(session_id).await;
        let credentials = match session.map(|s| s.flow_type) {
            Some(OAuthFlowType::IdentityCenter) => {
                let session = registry.get(session_id).await.unwrap();
                ProviderCredentials::IdentityCenter {
                    tokens: TokenState {
                        access_token,
                        refresh_token,
                        expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in),
                    },
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    client_secret_expires_at: chrono::DateTime::from_timestamp(client_secret_expires_at, 0)
                        .unwrap_or_else(chrono::Utc::now),
                    start_url: session.fields.start_url.clone().unwrap_or_default(),
                    sso_region: session.fields.sso_region.clone().unwrap_or_default(),
                }
            }
            _ => ProviderCredentials::BuilderId {
                tokens: TokenState {
                    access_token,
                    refresh_token,
                    expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in),
                },
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                client_secret_expires_at: chrono::DateTime::from_timestamp(client_secret_expires_at, 0)
                    .unwrap_or_else(chrono::Utc::now),
            },
        };

        registry
            .update(session_id, |s| {
                s.complete(credentials);
            })
            .await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_identity_center_start_url() {
        assert!(validate_start_url("https://d-abc123.awsapps.com/start").is_ok());
        assert!(validate_start_url("https://d-abc123.awsapps.com/start/").is_ok());
    }

    #[test]
    fn rejects_malformed_start_url() {
        assert!(validate_start_url("https://evil.example.com/start").is_err());
        assert!(validate_start_url("http://d-abc123.awsapps.com/start").is_err());
    }

    #[test]
    fn rejects_unknown_sso_region() {
        assert!(validate_sso_region("us-east-1").is_ok());
        assert!(validate_sso_region("mars-west-1").is_err());
    }
}
