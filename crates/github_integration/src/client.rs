use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::domain::{
    AccessToken, Branch, BranchName, CommitSha, ForkHandle, Identity, PullRequest, RepoSlug,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{EncodedContent, GatewayError, NewPullRequest, OAuthProvider, RepositoryGateway};

const GITHUB_API_VERSION: &str = "2022-11-28";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub oauth_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            oauth_base: "https://github.com".into(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "repo".into(),
            user_agent: concat!("device-submit/", env!("CARGO_PKG_VERSION")).into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid github url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// REST client for the GitHub API and OAuth endpoints.
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token_endpoint: String,
    authorize_endpoint: Url,
    client_id: String,
    client_secret: String,
    scope: String,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    name: String,
    owner: OwnerResponse,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateFileRequest<'a> {
    message: &'a str,
    content: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateFileResponse {
    commit: CommitObject,
}

#[derive(Debug, Deserialize)]
struct CommitObject {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    avatar_url: String,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, ClientBuildError> {
        let oauth_base = config.oauth_base.trim_end_matches('/').to_string();
        let authorize = format!("{oauth_base}/login/oauth/authorize");
        let authorize_endpoint =
            Url::parse(&authorize).map_err(|source| ClientBuildError::InvalidUrl {
                url: authorize.clone(),
                source,
            })?;
        let http = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token_endpoint: format!("{oauth_base}/login/oauth/access_token"),
            authorize_endpoint,
            client_id: config.client_id,
            client_secret: config.client_secret,
            scope: config.scope,
        })
    }

    fn api(&self, method: reqwest::Method, path: &str, token: &AccessToken) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_base))
            .header(header::ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .bearer_auth(token.expose())
    }

    async fn get_repo(
        &self,
        token: &AccessToken,
        repo: &RepoSlug,
    ) -> Result<Option<ForkHandle>, GatewayError> {
        let response = self
            .api(reqwest::Method::GET, &format!("/repos/{repo}"), token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, &repo.to_string()).await?;
        let body: RepoResponse = response.json().await?;
        Ok(Some(fork_handle(body)))
    }
}

fn fork_handle(body: RepoResponse) -> ForkHandle {
    ForkHandle {
        repo: RepoSlug::new(body.owner.login, body.name),
        html_url: body.html_url,
    }
}

async fn remote_message(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let message = response
        .json::<RemoteErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    (status, message)
}

fn classify(status: StatusCode, message: String, subject: &str) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized(message),
        StatusCode::NOT_FOUND => GatewayError::NotFound(subject.to_string()),
        _ => GatewayError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

async fn ensure_success(response: Response, subject: &str) -> Result<Response, GatewayError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let (status, message) = remote_message(response).await;
    Err(classify(status, message, subject))
}

/// Like `ensure_success`, but a 409, or a 422 saying the ref or file is
/// already there, is a `Conflict`. Other 422s stay remote errors.
async fn ensure_created(response: Response, subject: &str) -> Result<Response, GatewayError> {
    let status = response.status();
    if status != StatusCode::CONFLICT && status != StatusCode::UNPROCESSABLE_ENTITY {
        return ensure_success(response, subject).await;
    }
    let (status, message) = remote_message(response).await;
    if status == StatusCode::CONFLICT || reports_existing_target(&message) {
        Err(GatewayError::Conflict(format!("{subject} ({message})")))
    } else {
        Err(classify(status, message, subject))
    }
}

fn reports_existing_target(message: &str) -> bool {
    message.contains("already exists") || message.contains("\"sha\" wasn't supplied")
}

#[async_trait]
impl OAuthProvider for GitHubClient {
    fn authorize_url(&self, state: &str, redirect_uri: Option<&str>) -> String {
        let mut url = self.authorize_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.client_id);
            query.append_pair("scope", &self.scope);
            query.append_pair("state", state);
            if let Some(redirect_uri) = redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
        }
        url.into()
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, GatewayError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await?;
        let response = ensure_success(response, "oauth token endpoint").await?;
        let body: TokenResponse = response.json().await?;
        match body.access_token {
            Some(token) if !token.is_empty() => Ok(AccessToken::new(token)),
            _ => Err(GatewayError::Unauthorized(
                body.error_description
                    .or(body.error)
                    .unwrap_or_else(|| "no access token in response".to_string()),
            )),
        }
    }

    async fn resolve_identity(&self, token: &AccessToken) -> Result<Identity, GatewayError> {
        let response = self.api(reqwest::Method::GET, "/user", token).send().await?;
        let response = ensure_success(response, "authenticated user").await?;
        let user: UserResponse = response.json().await?;
        Ok(Identity {
            login: user.login,
            avatar_url: user.avatar_url,
        })
    }
}

#[async_trait]
impl RepositoryGateway for GitHubClient {
    async fn get_or_create_fork(
        &self,
        token: &AccessToken,
        identity: &Identity,
        upstream: &RepoSlug,
    ) -> Result<ForkHandle, GatewayError> {
        let candidate = RepoSlug::new(identity.login.clone(), upstream.name.clone());
        if let Some(existing) = self.get_repo(token, &candidate).await? {
            debug!(fork = %existing.repo, "using existing fork");
            return Ok(existing);
        }

        let response = self
            .api(
                reqwest::Method::POST,
                &format!("/repos/{upstream}/forks"),
                token,
            )
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let response = ensure_success(response, &upstream.to_string()).await?;
        let body: RepoResponse = response.json().await?;
        let fork = fork_handle(body);
        info!(fork = %fork.repo, %upstream, "created fork");
        Ok(fork)
    }

    async fn get_base_commit(
        &self,
        token: &AccessToken,
        upstream: &RepoSlug,
        base_branch: &str,
    ) -> Result<CommitSha, GatewayError> {
        let response = self
            .api(
                reqwest::Method::GET,
                &format!("/repos/{upstream}/git/ref/heads/{base_branch}"),
                token,
            )
            .send()
            .await?;
        let subject = format!("branch {base_branch} in {upstream}");
        let response = ensure_success(response, &subject).await?;
        let body: RefResponse = response.json().await?;
        Ok(CommitSha(body.object.sha))
    }

    async fn create_branch(
        &self,
        token: &AccessToken,
        fork: &ForkHandle,
        name: &BranchName,
        base_sha: &CommitSha,
    ) -> Result<Branch, GatewayError> {
        let response = self
            .api(
                reqwest::Method::POST,
                &format!("/repos/{}/git/refs", fork.repo),
                token,
            )
            .json(&CreateRefRequest {
                git_ref: format!("refs/heads/{name}"),
                sha: base_sha.as_str(),
            })
            .send()
            .await?;
        ensure_created(response, &format!("branch {name} in {}", fork.repo)).await?;
        Ok(Branch {
            name: name.clone(),
            base_sha: base_sha.clone(),
        })
    }

    async fn create_file(
        &self,
        token: &AccessToken,
        fork: &ForkHandle,
        branch: &BranchName,
        path: &str,
        content: &EncodedContent,
        message: &str,
    ) -> Result<CommitSha, GatewayError> {
        let response = self
            .api(
                reqwest::Method::PUT,
                &format!("/repos/{}/contents/{path}", fork.repo),
                token,
            )
            .json(&CreateFileRequest {
                message,
                content: content.as_str(),
                branch: branch.as_str(),
            })
            .send()
            .await?;
        let response = ensure_created(response, &format!("{path} on {branch}")).await?;
        let body: CreateFileResponse = response.json().await?;
        Ok(CommitSha(body.commit.sha))
    }

    async fn create_pull_request(
        &self,
        token: &AccessToken,
        upstream: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GatewayError> {
        let response = self
            .api(
                reqwest::Method::POST,
                &format!("/repos/{upstream}/pulls"),
                token,
            )
            .json(&CreatePullRequest {
                title: &request.title,
                body: &request.body,
                head: &request.head,
                base: &request.base,
            })
            .send()
            .await?;
        let response = ensure_success(response, &format!("pull requests of {upstream}")).await?;
        let body: PullRequestResponse = response.json().await?;
        Ok(PullRequest {
            number: body.number,
            title: request.title.clone(),
            body: request.body.clone(),
            head: request.head.clone(),
            base: request.base.clone(),
            url: body.html_url,
        })
    }

    async fn path_exists(
        &self,
        token: &AccessToken,
        repo: &RepoSlug,
        path: &str,
        git_ref: &str,
    ) -> Result<bool, GatewayError> {
        let response = self
            .api(
                reqwest::Method::GET,
                &format!("/repos/{repo}/contents/{path}"),
                token,
            )
            .query(&[("ref", git_ref)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response, &format!("{path} in {repo}")).await?;
        Ok(true)
    }
}
