use std::{collections::HashMap, time::Duration};

use anyhow::{bail, Context};
use config::{Config, Environment, File};
use github_integration::GitHubConfig;
use serde::Deserialize;
use server_api::SubmissionConfig;
use shared::domain::RepoSlug;

use crate::session_cookie::SessionCookieConfig;

const CALLBACK_PATH: &str = "/auth/github/callback";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub github_client_id: String,
    #[serde(default)]
    pub github_client_secret: String,
    #[serde(default)]
    pub app_secret_key: String,
    #[serde(default)]
    pub upstream_repo: String,
    pub base_branch: String,
    pub server_bind: String,
    pub public_url: Option<String>,
    pub session_database_url: Option<String>,
    pub http_timeout_seconds: u64,
    pub github_api_url: String,
    pub github_oauth_url: String,
    pub allowed_origins: Option<String>,
}

/// Defaults, then an optional `server.toml`, then the process environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    build_settings(Environment::default(), "server")
}

fn build_settings(env: Environment, file_stem: &str) -> anyhow::Result<Settings> {
    let settings: Settings = Config::builder()
        .set_default("base_branch", "dev")?
        .set_default("server_bind", "127.0.0.1:5003")?
        .set_default("http_timeout_seconds", 30)?
        .set_default("github_api_url", "https://api.github.com")?
        .set_default("github_oauth_url", "https://github.com")?
        .add_source(File::with_name(file_stem).required(false))
        .add_source(env)
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("invalid configuration")?;
    settings.check_required()?;
    Ok(settings)
}

/// Builds settings from an explicit variable map instead of the process
/// environment.
pub fn settings_from_vars(vars: HashMap<String, String>) -> anyhow::Result<Settings> {
    build_settings(
        Environment::default().source(Some(vars)),
        "server-settings-not-present",
    )
}

impl Settings {
    fn check_required(&self) -> anyhow::Result<()> {
        let missing: Vec<&str> = [
            ("GITHUB_CLIENT_ID", &self.github_client_id),
            ("GITHUB_CLIENT_SECRET", &self.github_client_secret),
            ("APP_SECRET_KEY", &self.app_secret_key),
            ("UPSTREAM_REPO", &self.upstream_repo),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect();
        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }
        self.upstream()?;
        Ok(())
    }

    pub fn upstream(&self) -> anyhow::Result<RepoSlug> {
        self.upstream_repo
            .parse()
            .context("UPSTREAM_REPO must be owner/repo")
    }

    pub fn github_config(&self) -> GitHubConfig {
        GitHubConfig {
            api_base: self.github_api_url.clone(),
            oauth_base: self.github_oauth_url.clone(),
            client_id: self.github_client_id.clone(),
            client_secret: self.github_client_secret.clone(),
            timeout: Duration::from_secs(self.http_timeout_seconds),
            ..GitHubConfig::default()
        }
    }

    pub fn submission_config(&self) -> anyhow::Result<SubmissionConfig> {
        Ok(SubmissionConfig {
            upstream: self.upstream()?,
            base_branch: self.base_branch.trim().to_string(),
        })
    }

    pub fn cookie_config(&self) -> SessionCookieConfig {
        SessionCookieConfig {
            secret: self.app_secret_key.clone(),
            secure: self
                .public_url()
                .is_some_and(|url| url.starts_with("https://")),
        }
    }

    fn public_url(&self) -> Option<&str> {
        self.public_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    /// OAuth `redirect_uri`, only when a public URL is configured.
    pub fn redirect_uri(&self) -> Option<String> {
        self.public_url().map(|url| format!("{url}{CALLBACK_PATH}"))
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    pub fn session_database_url(&self) -> Option<String> {
        self.session_database_url
            .as_deref()
            .map(normalize_database_url)
            .filter(|url| !url.is_empty())
    }
}

/// Accepts plain file paths as well as `sqlite:` URLs.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();
    if raw_database_url.is_empty()
        || raw_database_url.starts_with("sqlite:")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }
    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
