use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use github_integration::{GatewayError, OAuthProvider};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{AccessToken, Identity, Session, SessionId},
    error::ErrorCode,
};
use storage::{SessionRecord, SessionStore};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no authenticated session")]
    MissingSession,
    #[error("authorization rejected: {0}")]
    Rejected(String),
    #[error("oauth state does not match the pending login")]
    StateMismatch,
    #[error("identity provider request failed: {0}")]
    Remote(GatewayError),
    #[error("session store failed: {0}")]
    Store(#[from] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingSession | Self::Rejected(_) | Self::StateMismatch => {
                ErrorCode::Unauthorized
            }
            Self::Remote(_) => ErrorCode::RemoteApi,
            Self::Store(_) => ErrorCode::Internal,
        }
    }
}

impl From<GatewayError> for AuthError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized(reason) | GatewayError::NotFound(reason) => {
                Self::Rejected(reason)
            }
            other => Self::Remote(other),
        }
    }
}

/// Round-tripped through the provider in the `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    pub nonce: String,
    pub return_to: String,
}

impl OAuthState {
    pub fn encode(&self) -> serde_json::Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let json = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice(&json).ok()
    }
}

/// Keeps only same-origin relative paths; anything else becomes `/`.
pub fn safe_return_path(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub session_id: SessionId,
    pub authorize_url: String,
}

#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub session_id: SessionId,
    pub session: Session,
    pub return_to: String,
}

fn new_session_id() -> SessionId {
    SessionId(Uuid::new_v4().simple().to_string())
}

/// OAuth login, identity resolution and session bookkeeping.
#[derive(Clone)]
pub struct AuthSession {
    oauth: Arc<dyn OAuthProvider>,
    sessions: Arc<dyn SessionStore>,
    redirect_uri: Option<String>,
}

impl AuthSession {
    pub fn new(
        oauth: Arc<dyn OAuthProvider>,
        sessions: Arc<dyn SessionStore>,
        redirect_uri: Option<String>,
    ) -> Self {
        Self {
            oauth,
            sessions,
            redirect_uri,
        }
    }

    /// Stores a pending session and builds the provider redirect for it.
    pub async fn begin_login(&self, return_to: Option<&str>) -> Result<LoginRedirect, AuthError> {
        let session_id = new_session_id();
        let state = OAuthState {
            nonce: Uuid::new_v4().simple().to_string(),
            return_to: safe_return_path(return_to),
        };
        self.sessions
            .set(
                &session_id,
                SessionRecord::pending(state.nonce.clone(), state.return_to.clone()),
            )
            .await?;
        let encoded = state.encode().map_err(anyhow::Error::from)?;
        let authorize_url = self
            .oauth
            .authorize_url(&encoded, self.redirect_uri.as_deref());
        Ok(LoginRedirect {
            session_id,
            authorize_url,
        })
    }

    /// Handles the provider callback. The pending session is replaced by a
    /// fresh authenticated one under a new id.
    pub async fn complete_login(
        &self,
        pending: Option<&SessionId>,
        code: &str,
        state: Option<&str>,
    ) -> Result<CompletedLogin, AuthError> {
        let mut return_to = "/".to_string();
        if let Some(pending_id) = pending {
            let record = self.sessions.get(pending_id).await?;
            // A pending record is single use, whether or not the state matches.
            self.sessions.invalidate(pending_id).await?;
            if let Some(record) = record {
                if let Some(expected) = record.oauth_nonce.as_deref() {
                    let decoded = state.and_then(OAuthState::decode);
                    match decoded {
                        Some(state) if state.nonce == expected => {
                            return_to = safe_return_path(record.return_to.as_deref());
                        }
                        _ => return Err(AuthError::StateMismatch),
                    }
                }
            }
        }

        let token = self.exchange_code(code).await?;
        let identity = self.resolve_identity(&token).await?;
        let session = Session {
            token,
            login: identity.login,
            avatar_url: identity.avatar_url,
        };
        let session_id = new_session_id();
        self.sessions
            .set(&session_id, SessionRecord::authenticated(&session))
            .await?;
        info!(login = %session.login, "login completed");
        Ok(CompletedLogin {
            session_id,
            session,
            return_to,
        })
    }

    pub async fn exchange_code(&self, code: &str) -> Result<AccessToken, AuthError> {
        Ok(self.oauth.exchange_code(code).await?)
    }

    pub async fn resolve_identity(&self, token: &AccessToken) -> Result<Identity, AuthError> {
        Ok(self.oauth.resolve_identity(token).await?)
    }

    /// The stored session, without asking the provider.
    pub async fn current_session(&self, id: &SessionId) -> Result<Session, AuthError> {
        self.sessions
            .get(id)
            .await?
            .and_then(|record| record.session())
            .ok_or(AuthError::MissingSession)
    }

    /// Re-resolves the identity behind a session. A rejected token discards
    /// the session; provider outages leave it in place.
    pub async fn verify_session(&self, id: &SessionId) -> Result<Session, AuthError> {
        let session = self.current_session(id).await?;
        match self.resolve_identity(&session.token).await {
            Ok(identity) => Ok(Session {
                token: session.token,
                login: identity.login,
                avatar_url: identity.avatar_url,
            }),
            Err(err @ AuthError::Rejected(_)) => {
                warn!(login = %session.login, error = %err, "session no longer valid");
                self.revoke(id).await;
                Err(err)
            }
            Err(err) => {
                warn!(login = %session.login, error = %err, "could not verify session");
                Err(err)
            }
        }
    }

    /// Forgets the session. Idempotent; store failures are only logged.
    pub async fn revoke(&self, id: &SessionId) {
        if let Err(err) = self.sessions.invalidate(id).await {
            warn!(error = %err, "failed to invalidate session");
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
