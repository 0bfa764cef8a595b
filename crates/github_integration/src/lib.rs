use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shared::{
    domain::{
        AccessToken, Branch, BranchName, CommitSha, ForkHandle, Identity, PullRequest, RepoSlug,
    },
    error::ErrorCode,
};
use thiserror::Error;

mod client;

pub use client::{ClientBuildError, GitHubClient, GitHubConfig};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    #[error("remote api returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("request to remote api failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Remote { .. } | Self::Transport(_) => ErrorCode::RemoteApi,
        }
    }
}

/// File content in the representation the contents API expects (base64).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContent(String);

impl EncodedContent {
    pub fn encode(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorize URL for the browser redirect. Pure; no request is made.
    fn authorize_url(&self, state: &str, redirect_uri: Option<&str>) -> String;
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, GatewayError>;
    async fn resolve_identity(&self, token: &AccessToken) -> Result<Identity, GatewayError>;
}

/// One method per remote operation. Implementations never retry.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Looks the fork up first and only creates it when the lookup finds nothing.
    async fn get_or_create_fork(
        &self,
        token: &AccessToken,
        identity: &Identity,
        upstream: &RepoSlug,
    ) -> Result<ForkHandle, GatewayError>;

    async fn get_base_commit(
        &self,
        token: &AccessToken,
        upstream: &RepoSlug,
        base_branch: &str,
    ) -> Result<CommitSha, GatewayError>;

    async fn create_branch(
        &self,
        token: &AccessToken,
        fork: &ForkHandle,
        name: &BranchName,
        base_sha: &CommitSha,
    ) -> Result<Branch, GatewayError>;

    async fn create_file(
        &self,
        token: &AccessToken,
        fork: &ForkHandle,
        branch: &BranchName,
        path: &str,
        content: &EncodedContent,
        message: &str,
    ) -> Result<CommitSha, GatewayError>;

    async fn create_pull_request(
        &self,
        token: &AccessToken,
        upstream: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GatewayError>;

    async fn path_exists(
        &self,
        token: &AccessToken,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<bool, GatewayError>;
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
