//! Process-wide OAuth session registry, reaper, and `waitForAuth` (§4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::error::GatewayError;

use super::types::{OAuthSession, OAuthSessionStatus};

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, OAuthSession>>,
    wakers: RwLock<HashMap<Uuid, Arc<Notify>>>,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            wakers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create(&self, session: OAuthSession) -> OAuthSession {
        let id = session.session_id;
        self.sessions.write().await.insert(id, session.clone());
        self.wakers.write().await.insert(id, Arc::new(Notify::new()));
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<OAuthSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn update<F>(&self, id: Uuid, f: F) -> Option<OAuthSession>
    where
        F: FnOnce(&mut OAuthSession),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        f(session);
        let updated = session.clone();
        let is_terminal = updated.status.is_terminal();
        drop(sessions);

        if is_terminal {
            if let Some(notify) = self.wakers.read().await.get(&id) {
                notify.notify_waiters();
            }
        }
        Some(updated)
    }

    /// Cancelling a pending session flips it to `cancelled`; any other
    /// status is left untouched (§4.2 "Cancellation").
    pub async fn cancel(&self, id: Uuid) -> Option<OAuthSession> {
        self.update(id, |s| {
            s.transition(OAuthSessionStatus::Cancelled);
        })
        .await
    }

    /// §4.2 `waitForAuth`: blocks until the session enters a terminal state
    /// or `timeout` elapses. On `completed` it returns the credentials and
    /// deletes the session; any other terminal status is returned as an
    /// error.
    pub async fn wait_for_auth(
        &self,
        id: Uuid,
        timeout: StdDuration,
    ) -> Result<crate::accounts::credentials::ProviderCredentials, GatewayError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let session = self
                .get(id)
                .await
                .ok_or_else(|| GatewayError::OAuthFailure("session not found".to_string()))?;

            if session.status.is_terminal() {
                return self.finish(id, session).await;
            }

            let notify = self.wakers.read().await.get(&id).cloned();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.update(id, |s| {
                    s.transition(OAuthSessionStatus::Timeout);
                })
                .await;
                let session = self.get(id).await.unwrap();
                return self.finish(id, session).await;
            }

            match notify {
                Some(n) => {
                    let _ = tokio::time::timeout(remaining, n.notified()).await;
                }
                None => return Err(GatewayError::OAuthFailure("session not found".to_string())),
            }
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        session: OAuthSession,
    ) -> Result<crate::accounts::credentials::ProviderCredentials, GatewayError> {
        match session.status {
            OAuthSessionStatus::Completed => {
                let creds = session
                    .credentials
                    .clone()
                    .ok_or_else(|| GatewayError::OAuthFailure("completed without credentials".to_string()))?;
                self.delete(id).await;
                Ok(creds)
            }
            other => Err(GatewayError::OAuthFailure(format!(
                "oauth session ended with status {other:?}"
            ))),
        }
    }

    pub async fn delete(&self, id: Uuid) -> Option<OAuthSession> {
        let removed = self.sessions.write().await.remove(&id);
        self.wakers.write().await.remove(&id);
        removed
    }

    pub async fn list(&self) -> Vec<OAuthSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Sweeps pending sessions past `expires_at` into `expired`, and drops
    /// any session more than 10 minutes past its terminal transition (§3
    /// "Lifecycle: ... Reaped after 10 min past terminal").
    pub async fn reap(&self) {
        let now = chrono::Utc::now();
        let ids: Vec<Uuid> = self.sessions.read().await.keys().copied().collect();

        for id in ids {
            let Some(session) = self.get(id).await else { continue };

            if session.status == OAuthSessionStatus::Pending && session.is_expired(now) {
                self.update(id, |s| {
                    s.transition(OAuthSessionStatus::Expired);
                })
                .await;
                continue;
            }

            if let Some(terminal_at) = session.terminal_at {
                if now - terminal_at > chrono::Duration::minutes(10) {
                    self.delete(id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::types::OAuthFlowType;

    #[tokio::test]
    async fn cancel_flips_pending_session_to_cancelled() {
        let registry = SessionRegistry::new();
        let session = OAuthSession::new(OAuthFlowType::Social, "us-east-1".into(), chrono::Duration::minutes(10));
        let id = session.session_id;
        registry.create(session).await;

        registry.cancel(id).await;
        let updated = registry.get(id).await.unwrap();
        assert_eq!(updated.status, OAuthSessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn wait_for_auth_times_out_when_never_completed() {
        let registry = SessionRegistry::new();
        let session = OAuthSession::new(OAuthFlowType::Social, "us-east-1".into(), chrono::Duration::minutes(10));
        let id = session.session_id;
        registry.create(session).await;

        let result = registry.wait_for_auth(id, StdDuration::from_millis(50)).await;
        assert!(result.is_err());
        let session = registry.get(id).await.unwrap();
        assert_eq!(session.status, OAuthSessionStatus::Timeout);
    }

    #[tokio::test]
    async fn wait_for_auth_returns_credentials_and_deletes_on_completion() {
        let registry = Arc::new(SessionRegistry::new());
        let session = OAuthSession::new(OAuthFlowType::Social, "us-east-1".into(), chrono::Duration::minutes(10));
        let id = session.session_id;
        registry.create(session).await;

        let registry2 = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            registry2
                .update(id, |s| {
                    s.complete(crate::accounts::credentials::ProviderCredentials::social_stub());
                })
                .await;
        });

        let result = registry.wait_for_auth(id, StdDuration::from_secs(2)).await;
        assert!(result.is_ok());
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn reap_expires_pending_sessions_past_deadline() {
        let registry = SessionRegistry::new();
        let session = OAuthSession::new(OAuthFlowType::Social, "us-east-1".into(), chrono::Duration::milliseconds(1));
        let id = session.session_id;
        registry.create(session).await;
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        registry.reap().await;
        let session = registry.get(id).await.unwrap();
        assert_eq!(session.status, OAuthSessionStatus::Expired);
    }
}
