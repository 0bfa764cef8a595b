//! In-process fakes for the remote seams, used by this crate's tests and by the
//! server's router tests.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use github_integration::{
    EncodedContent, GatewayError, NewPullRequest, OAuthProvider, RepositoryGateway,
};
use shared::domain::{
    AccessToken, Branch, BranchName, CommitSha, ForkHandle, Identity, PullRequest, RepoSlug,
};

use crate::naming::BranchNameSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    LookupFork { owner: String },
    CreateFork { owner: String },
    GetBaseCommit { branch: String },
    CreateBranch { name: String },
    CreateFile { path: String, content: Vec<u8>, message: String },
    CreatePullRequest(NewPullRequest),
    PathExists { path: String },
}

#[derive(Default)]
struct GatewayBehaviour {
    existing_fork: bool,
    missing_base_branch: bool,
    failing_file: Option<String>,
    upstream_paths: HashSet<String>,
}

/// Records every call and answers like a cooperative remote.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    behaviour: Arc<Mutex<GatewayBehaviour>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing_fork(self) -> Self {
        lock(&self.behaviour).existing_fork = true;
        self
    }

    pub fn without_base_branch(self) -> Self {
        lock(&self.behaviour).missing_base_branch = true;
        self
    }

    /// Rejects the write of `path` as a conflict.
    pub fn failing_file(self, path: impl Into<String>) -> Self {
        lock(&self.behaviour).failing_file = Some(path.into());
        self
    }

    pub fn with_upstream_path(self, path: impl Into<String>) -> Self {
        lock(&self.behaviour).upstream_paths.insert(path.into());
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn committed_paths(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::CreateFile { path, .. } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn committed_file(&self, path: &str) -> Option<Vec<u8>> {
        self.calls().into_iter().find_map(|call| match call {
            GatewayCall::CreateFile {
                path: committed,
                content,
                ..
            } if committed == path => Some(content),
            _ => None,
        })
    }

    pub fn pull_requests(&self) -> Vec<NewPullRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::CreatePullRequest(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl RepositoryGateway for RecordingGateway {
    async fn get_or_create_fork(
        &self,
        _token: &AccessToken,
        identity: &Identity,
        upstream: &RepoSlug,
    ) -> Result<ForkHandle, GatewayError> {
        self.record(GatewayCall::LookupFork {
            owner: identity.login.clone(),
        });
        if !lock(&self.behaviour).existing_fork {
            self.record(GatewayCall::CreateFork {
                owner: identity.login.clone(),
            });
        }
        Ok(ForkHandle {
            repo: RepoSlug::new(identity.login.clone(), upstream.name.clone()),
            html_url: None,
        })
    }

    async fn get_base_commit(
        &self,
        _token: &AccessToken,
        upstream: &RepoSlug,
        base_branch: &str,
    ) -> Result<CommitSha, GatewayError> {
        self.record(GatewayCall::GetBaseCommit {
            branch: base_branch.to_string(),
        });
        if lock(&self.behaviour).missing_base_branch {
            return Err(GatewayError::NotFound(format!(
                "branch {base_branch} in {upstream}"
            )));
        }
        Ok(CommitSha("base0000".into()))
    }

    async fn create_branch(
        &self,
        _token: &AccessToken,
        _fork: &ForkHandle,
        name: &BranchName,
        base_sha: &CommitSha,
    ) -> Result<Branch, GatewayError> {
        self.record(GatewayCall::CreateBranch {
            name: name.to_string(),
        });
        Ok(Branch {
            name: name.clone(),
            base_sha: base_sha.clone(),
        })
    }

    async fn create_file(
        &self,
        _token: &AccessToken,
        _fork: &ForkHandle,
        _branch: &BranchName,
        path: &str,
        content: &EncodedContent,
        message: &str,
    ) -> Result<CommitSha, GatewayError> {
        self.record(GatewayCall::CreateFile {
            path: path.to_string(),
            content: STANDARD.decode(content.as_str()).unwrap_or_default(),
            message: message.to_string(),
        });
        if lock(&self.behaviour).failing_file.as_deref() == Some(path) {
            return Err(GatewayError::Conflict(path.to_string()));
        }
        Ok(CommitSha(format!("commit-{}", lock(&self.calls).len())))
    }

    async fn create_pull_request(
        &self,
        _token: &AccessToken,
        upstream: &RepoSlug,
        request: &NewPullRequest,
    ) -> Result<PullRequest, GatewayError> {
        self.record(GatewayCall::CreatePullRequest(request.clone()));
        Ok(PullRequest {
            number: 7,
            title: request.title.clone(),
            body: request.body.clone(),
            head: request.head.clone(),
            base: request.base.clone(),
            url: format!("https://github.com/{upstream}/pull/7"),
        })
    }

    async fn path_exists(
        &self,
        _token: &AccessToken,
        _repo: &RepoSlug,
        path: &str,
        _git_ref: &str,
    ) -> Result<bool, GatewayError> {
        self.record(GatewayCall::PathExists {
            path: path.to_string(),
        });
        Ok(lock(&self.behaviour).upstream_paths.contains(path))
    }
}

/// Accepts one code and one token.
#[derive(Clone)]
pub struct FakeOAuth {
    pub valid_code: String,
    pub token: String,
    pub identity: Identity,
    remote_calls: Arc<Mutex<usize>>,
    outage: Arc<Mutex<Option<u16>>>,
}

impl Default for FakeOAuth {
    fn default() -> Self {
        Self {
            valid_code: "good-code".into(),
            token: "gho_fake".into(),
            identity: Identity {
                login: "octocat".into(),
                avatar_url: "https://avatars.example/octocat.png".into(),
            },
            remote_calls: Arc::default(),
            outage: Arc::default(),
        }
    }
}

impl FakeOAuth {
    pub fn remote_calls(&self) -> usize {
        *lock(&self.remote_calls)
    }

    /// While set, identity lookups fail with this upstream status.
    pub fn set_outage(&self, status: Option<u16>) {
        *lock(&self.outage) = status;
    }

    fn count_call(&self) {
        *lock(&self.remote_calls) += 1;
    }
}

#[async_trait]
impl OAuthProvider for FakeOAuth {
    fn authorize_url(&self, state: &str, redirect_uri: Option<&str>) -> String {
        let mut url = format!("https://github.example/login/oauth/authorize?state={state}");
        if let Some(redirect_uri) = redirect_uri {
            url.push_str("&redirect_uri=");
            url.push_str(redirect_uri);
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, GatewayError> {
        self.count_call();
        if code == self.valid_code {
            Ok(AccessToken::new(self.token.clone()))
        } else {
            Err(GatewayError::Unauthorized("bad_verification_code".into()))
        }
    }

    async fn resolve_identity(&self, token: &AccessToken) -> Result<Identity, GatewayError> {
        self.count_call();
        if let Some(status) = *lock(&self.outage) {
            return Err(GatewayError::Remote {
                status,
                message: "Server Error".into(),
            });
        }
        if token.expose() == self.token {
            Ok(self.identity.clone())
        } else {
            Err(GatewayError::Unauthorized("Bad credentials".into()))
        }
    }
}

/// Always hands out the same branch name.
pub struct FixedBranchName(pub String);

impl BranchNameSource for FixedBranchName {
    fn branch_name(&self, _slug: &str) -> BranchName {
        BranchName(self.0.clone())
    }
}
