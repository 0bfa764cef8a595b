use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{AccessToken, SessionId};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::{SessionRecord, SessionStore};

/// Session store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: Pool<Sqlite>,
}

impl SqliteSessionStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open session database '{database_url}'"))?;

        let store = Self { pool };
        store.ensure_sessions_table().await?;
        Ok(store)
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_sessions_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id   TEXT PRIMARY KEY NOT NULL,
                access_token TEXT,
                login        TEXT,
                avatar_url   TEXT,
                oauth_nonce  TEXT,
                return_to    TEXT,
                expires_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure sessions table exists")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT access_token, login, avatar_url, oauth_nonce, return_to, expires_at
             FROM sessions WHERE session_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let record = SessionRecord {
            access_token: row
                .try_get::<Option<String>, _>("access_token")?
                .map(AccessToken::new),
            login: row.try_get("login")?,
            avatar_url: row.try_get("avatar_url")?,
            oauth_nonce: row.try_get("oauth_nonce")?,
            return_to: row.try_get("return_to")?,
            expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
        };
        if record.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn set(&self, id: &SessionId, record: SessionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions
                 (session_id, access_token, login, avatar_url, oauth_nonce, return_to, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                 access_token = excluded.access_token,
                 login = excluded.login,
                 avatar_url = excluded.avatar_url,
                 oauth_nonce = excluded.oauth_nonce,
                 return_to = excluded.return_to,
                 expires_at = excluded.expires_at",
        )
        .bind(id.as_str())
        .bind(record.access_token.as_ref().map(|t| t.expose().to_string()))
        .bind(record.login)
        .bind(record.avatar_url)
        .bind(record.oauth_nonce)
        .bind(record.return_to)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .context("failed to store session")?;
        Ok(())
    }

    async fn invalidate(&self, id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
