use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::domain::{AccessToken, Session, SessionId};
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteSessionStore;

pub const PENDING_SESSION_TTL_HOURS: i64 = 1;
pub const AUTHENTICATED_SESSION_TTL_HOURS: i64 = 24;

/// Server-side state behind one session cookie.
///
/// A record is *pending* between the authorize redirect and the OAuth callback
/// (only `oauth_nonce`/`return_to` are set) and *authenticated* afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub access_token: Option<AccessToken>,
    pub login: Option<String>,
    pub avatar_url: Option<String>,
    pub oauth_nonce: Option<String>,
    pub return_to: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn pending(nonce: impl Into<String>, return_to: impl Into<String>) -> Self {
        Self {
            access_token: None,
            login: None,
            avatar_url: None,
            oauth_nonce: Some(nonce.into()),
            return_to: Some(return_to.into()),
            expires_at: Utc::now() + Duration::hours(PENDING_SESSION_TTL_HOURS),
        }
    }

    pub fn authenticated(session: &Session) -> Self {
        Self {
            access_token: Some(session.token.clone()),
            login: Some(session.login.clone()),
            avatar_url: Some(session.avatar_url.clone()),
            oauth_nonce: None,
            return_to: None,
            expires_at: Utc::now() + Duration::hours(AUTHENTICATED_SESSION_TTL_HOURS),
        }
    }

    /// The authenticated session, if the OAuth exchange has completed.
    pub fn session(&self) -> Option<Session> {
        match (&self.access_token, &self.login, &self.avatar_url) {
            (Some(token), Some(login), Some(avatar_url)) => Some(Session {
                token: token.clone(),
                login: login.clone(),
                avatar_url: avatar_url.clone(),
            }),
            _ => None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Pluggable session backend. Expired records read as absent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>>;
    async fn set(&self, id: &SessionId, record: SessionRecord) -> Result<()>;
    async fn invalidate(&self, id: &SessionId) -> Result<()>;
    /// Deletes every expired record and returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    records: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(id)
            .filter(|record| !record.is_expired_at(Utc::now()))
            .cloned())
    }

    async fn set(&self, id: &SessionId, record: SessionRecord) -> Result<()> {
        self.records.write().await.insert(id.clone(), record);
        Ok(())
    }

    async fn invalidate(&self, id: &SessionId) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
