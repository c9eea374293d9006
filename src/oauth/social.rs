//! Social (Google/GitHub) OAuth flow: PKCE with loopback capture (§4.2).

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::accounts::credentials::{ProviderCredentials, SocialProvider, TokenState};
use crate::error::GatewayError;

use super::registry::SharedSessionRegistry;
use super::types::{OAuthFlowType, OAuthSession, OAuthSessionStatus};

const LOOPBACK_PORT_RANGE: std::ops::RangeInclusive<u16> = 19876..=19880;
const SESSION_TTL_MINUTES: i64 = 10;

pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Generates a random 43-128 char URL-safe verifier and its S256 challenge
/// (§4.2 step 1).
pub fn generate_pkce() -> PkceChallenge {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());

    PkceChallenge { verifier, challenge }
}

pub fn generate_state() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn bind_loopback_listener() -> Result<(TcpListener, u16), GatewayError> {
    for port in LOOPBACK_PORT_RANGE {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)).await {
            return Ok((listener, port));
        }
    }
    Err(GatewayError::OAuthFailure(
        "no free loopback callback port in [19876, 19880]".to_string(),
    ))
}

fn authorize_url(
    provider: SocialProvider,
    region: &str,
    state: &str,
    redirect_uri: &str,
    code_challenge: &str,
) -> String {
    let provider_name = match provider {
        SocialProvider::Google => "google",
        SocialProvider::GitHub => "github",
    };
    let mut url = url::Url::parse(&format!(
        "https://kiro.{region}.amazonaws.com/oauth/authorize"
    ))
    .expect("static base url parses");
    url.query_pairs_mut()
        .append_pair("provider", provider_name)
        .append_pair("region", region)
        .append_pair("state", state)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");
    url.to_string()
}

/// Starts the flow: binds the loopback listener, builds the authorize URL,
/// registers the session, and spawns the one-shot callback acceptor in the
/// background. Returns immediately with `{sessionId, authUrl, state}`
/// (§4.2 step 4) — the caller does not wait on the exchange here.
pub async fn start(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    provider: SocialProvider,
    region: String,
) -> Result<(OAuthSession, String), GatewayError> {
    let pkce = generate_pkce();
    let state = generate_state();
    let (listener, port) = bind_loopback_listener().await?;
    let redirect_uri = format!("http://127.0.0.1:{port}/callback");

    let auth_url = authorize_url(provider, &region, &state, &redirect_uri, &pkce.challenge);

    let mut session = OAuthSession::new(
        OAuthFlowType::Social,
        region.clone(),
        chrono::Duration::minutes(SESSION_TTL_MINUTES),
    );
    session.provider = Some(match provider {
        SocialProvider::Google => "google".to_string(),
        SocialProvider::GitHub => "github".to_string(),
    });
    session.fields.code_verifier = Some(pkce.verifier.clone());
    session.fields.redirect_uri = Some(redirect_uri.clone());
    session.fields.state = Some(state.clone());
    let session = registry.create(session).await;
    let session_id = session.session_id;

    tokio::spawn(run_callback_acceptor(
        registry,
        http,
        session_id,
        listener,
        region,
        provider,
        pkce.verifier,
        state,
        redirect_uri,
    ));

    Ok((session, auth_url))
}

#[allow(clippy::too_many_arguments)]
async fn run_callback_acceptor(
    registry: SharedSessionRegistry,
    http: reqwest::Client,
    session_id: Uuid,
    listener: TcpListener,
    region: String,
    provider: SocialProvider,
    code_verifier: String,
    expected_state: String,
    redirect_uri: String,
) {
    let accept_result = tokio::time::timeout(
        std::time::Duration::from_secs(SESSION_TTL_MINUTES as u64 * 60),
        listener.accept(),
    )
    .await;

    let (mut stream, _) = match accept_result {
        Ok(Ok(pair)) => pair,
        _ => {
            registry
                .update(session_id, |s| {
                    s.fail("loopback callback timed out".to_string());
                })
                .await;
            return;
        }
    };

    let mut buf = vec![0u8; 8192];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            registry
                .update(session_id, |s| s.fail(format!("loopback read error: {e}")))
                .await;
            return;
        }
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let parsed = url::Url::parse(&format!("http://localhost{path}")).ok();
    let code = parsed
        .as_ref()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "code"))
        .map(|(_, v)| v.to_string());
    let state = parsed
        .as_ref()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "state"))
        .map(|(_, v)| v.to_string());

    let _ = stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
              <html><body><script>window.close()</script>Authentication complete, you may close this tab.</body></html>",
        )
        .await;

    if state.as_deref() != Some(expected_state.as_str()) {
        registry
            .update(session_id, |s| s.fail("state mismatch on callback".to_string()))
            .await;
        return;
    }

    let Some(code) = code else {
        registry
            .update(session_id, |s| s.fail("callback missing authorization code".to_string()))
            .await;
        return;
    };

    match exchange_code(&http, &region, provider, &code, &code_verifier, &redirect_uri).await {
        Ok(credentials) => {
            registry
                .update(session_id, |s| {
                    s.complete(credentials);
                })
                .await;
        }
        Err(e) => {
            registry
                .update(session_id, |s| s.fail(e.to_string()))
                .await;
        }
    }
}

async fn exchange_code(
    http: &reqwest::Client,
    region: &str,
    provider: SocialProvider,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<ProviderCredentials, GatewayError> {
    let token_url = format!("https://kiro.{region}.amazonaws.com/oauth/token");
    let response = http
        .post(&token_url)
        .json(&serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "code_verifier": code_verifier,
            "redirect_uri": redirect_uri,
        }))
        .send()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("token exchange failed: {e}")))?;

    if !response.status().is_success() {
        return Err(GatewayError::OAuthFailure(format!(
            "token exchange rejected with status {}",
            response.status()
        )));
    }

    #[derive(serde::Deserialize)]
    struct TokenResponse {
        access_token: String,
        refresh_token: String,
        expires_in: i64,
        #[serde(default)]
        profile_arn: Option<String>,
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| GatewayError::OAuthFailure(format!("malformed token response: {e}")))?;

    Ok(ProviderCredentials::Social {
        tokens: TokenState {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        },
        provider,
        profile_arn: parsed.profile_arn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_derived_from_verifier() {
        let pkce = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(pkce.verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn authorize_url_carries_required_params() {
        let url = authorize_url(
            SocialProvider::Google,
            "us-east-1",
            "state123",
            "http://127.0.0.1:19876/callback",
            "challenge123",
        );
        assert!(url.contains("state=state123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("provider=google"));
    }
}
