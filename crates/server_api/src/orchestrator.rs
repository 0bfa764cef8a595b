use std::{collections::HashSet, fmt, sync::Arc};

use github_integration::{EncodedContent, GatewayError, NewPullRequest, RepositoryGateway};
use shared::{
    domain::{
        AccessToken, Branch, CommittedFile, DeviceSubmission, ForkHandle, Identity, PullRequest,
        RepoSlug, SubmissionForm,
    },
    error::ErrorCode,
};
use thiserror::Error;
use tracing::info;

use crate::{
    naming::{
        canonical_slug, config_path, descriptor_path, image_path, sanitize_filename,
        unique_filename, BranchNameSource, RandomDatedBranchNames,
    },
    payload::{pull_request_title, render_device_descriptor, render_pull_request_body},
    validation::{validate, ValidationError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
    pub upstream: RepoSlug,
    pub base_branch: String,
}

/// Progress of one submission attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubmissionStage {
    Validated,
    ForkReady,
    BaseResolved,
    BranchCreated,
    AssetsCommitted,
    ConfigCommitted,
    PrCreated,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validated => "validated",
            Self::ForkReady => "fork_ready",
            Self::BaseResolved => "base_resolved",
            Self::BranchCreated => "branch_created",
            Self::AssetsCommitted => "assets_committed",
            Self::ConfigCommitted => "config_committed",
            Self::PrCreated => "pr_created",
        };
        f.write_str(name)
    }
}

/// The remote operation a submission was performing when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStep {
    ResolveFork,
    ResolveBaseCommit,
    CreateBranch,
    CommitFile { path: String },
    CreatePullRequest,
}

impl fmt::Display for SubmissionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolveFork => f.write_str("resolving fork"),
            Self::ResolveBaseCommit => f.write_str("resolving base commit"),
            Self::CreateBranch => f.write_str("creating branch"),
            Self::CommitFile { path } => write!(f, "committing {path}"),
            Self::CreatePullRequest => f.write_str("creating pull request"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{step} failed: {source}")]
    Remote {
        step: SubmissionStep,
        last_stage: SubmissionStage,
        #[source]
        source: GatewayError,
    },
}

impl SubmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Remote { source, .. } => source.code(),
        }
    }

    /// Last stage completed before the failure. `None` when validation failed.
    pub fn last_stage(&self) -> Option<SubmissionStage> {
        match self {
            Self::Validation(_) => None,
            Self::Remote { last_stage, .. } => Some(*last_stage),
        }
    }
}

/// Drives one submission through fork, branch, commits and pull request.
/// Nothing is rolled back when a step fails.
#[derive(Clone)]
pub struct SubmissionOrchestrator {
    gateway: Arc<dyn RepositoryGateway>,
    config: SubmissionConfig,
    branch_names: Arc<dyn BranchNameSource>,
}

struct Attempt<'a> {
    gateway: &'a dyn RepositoryGateway,
    token: &'a AccessToken,
    stage: SubmissionStage,
}

impl Attempt<'_> {
    fn fail(&self, step: SubmissionStep) -> impl FnOnce(GatewayError) -> SubmissionError {
        let last_stage = self.stage;
        move |source| SubmissionError::Remote {
            step,
            last_stage,
            source,
        }
    }

    async fn commit(
        &self,
        fork: &ForkHandle,
        branch: &Branch,
        file: &CommittedFile,
    ) -> Result<(), SubmissionError> {
        let content = EncodedContent::encode(&file.content);
        self.gateway
            .create_file(
                self.token,
                fork,
                &branch.name,
                &file.path,
                &content,
                &file.message,
            )
            .await
            .map_err(self.fail(SubmissionStep::CommitFile {
                path: file.path.clone(),
            }))?;
        Ok(())
    }
}

impl SubmissionOrchestrator {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, config: SubmissionConfig) -> Self {
        Self {
            gateway,
            config,
            branch_names: Arc::new(RandomDatedBranchNames),
        }
    }

    pub fn with_branch_names(mut self, branch_names: Arc<dyn BranchNameSource>) -> Self {
        self.branch_names = branch_names;
        self
    }

    /// Validates `form` and, only if it is complete, opens a pull request for it
    /// from the contributor's fork.
    pub async fn submit(
        &self,
        identity: &Identity,
        token: &AccessToken,
        form: SubmissionForm,
    ) -> Result<PullRequest, SubmissionError> {
        let submission = validate(form)?;
        let mut attempt = Attempt {
            gateway: self.gateway.as_ref(),
            token,
            stage: SubmissionStage::Validated,
        };
        info!(login = %identity.login, slug = %submission.slug, "submission validated");

        let upstream = &self.config.upstream;
        let fork = self
            .gateway
            .get_or_create_fork(token, identity, upstream)
            .await
            .map_err(attempt.fail(SubmissionStep::ResolveFork))?;
        attempt.stage = SubmissionStage::ForkReady;
        info!(fork = %fork.repo, url = ?fork.html_url, stage = %attempt.stage, "fork ready");

        let base_sha = self
            .gateway
            .get_base_commit(token, upstream, &self.config.base_branch)
            .await
            .map_err(attempt.fail(SubmissionStep::ResolveBaseCommit))?;
        attempt.stage = SubmissionStage::BaseResolved;
        info!(base = %self.config.base_branch, sha = %base_sha, stage = %attempt.stage, "base commit resolved");

        let branch_name = self.branch_names.branch_name(&submission.slug);
        let branch = self
            .gateway
            .create_branch(token, &fork, &branch_name, &base_sha)
            .await
            .map_err(attempt.fail(SubmissionStep::CreateBranch))?;
        attempt.stage = SubmissionStage::BranchCreated;
        info!(branch = %branch.name, stage = %attempt.stage, "branch created");

        let image_files = plan_image_files(&submission);
        for file in &image_files {
            attempt.commit(&fork, &branch, file).await?;
            info!(path = %file.path, "image committed");
        }
        attempt.stage = SubmissionStage::AssetsCommitted;
        info!(images = image_files.len(), stage = %attempt.stage, "assets committed");

        for file in plan_config_files(&submission) {
            attempt.commit(&fork, &branch, &file).await?;
        }
        attempt.stage = SubmissionStage::ConfigCommitted;
        info!(stage = %attempt.stage, "descriptor and config committed");

        let image_paths: Vec<String> = image_files.into_iter().map(|file| file.path).collect();
        let request = NewPullRequest {
            title: pull_request_title(&submission),
            body: render_pull_request_body(&submission, &image_paths),
            head: format!("{}:{}", identity.login, branch.name),
            base: self.config.base_branch.clone(),
        };
        let pull_request = self
            .gateway
            .create_pull_request(token, upstream, &request)
            .await
            .map_err(attempt.fail(SubmissionStep::CreatePullRequest))?;
        info!(
            number = pull_request.number,
            url = %pull_request.url,
            stage = %SubmissionStage::PrCreated,
            "pull request created"
        );
        Ok(pull_request)
    }

    /// `false` when a directory for `slug` already exists upstream on the base
    /// branch. Returns `None` if the slug would be refused by validation.
    pub async fn slug_available(
        &self,
        token: &AccessToken,
        slug: &str,
    ) -> Result<Option<bool>, GatewayError> {
        let Some(slug) = canonical_slug(slug) else {
            return Ok(None);
        };
        let exists = self
            .gateway
            .path_exists(token, &self.config.upstream, slug, &self.config.base_branch)
            .await?;
        Ok(Some(!exists))
    }
}

/// Image commits in input order, with sanitised and de-duplicated filenames.
pub fn plan_image_files(submission: &DeviceSubmission) -> Vec<CommittedFile> {
    let mut used = HashSet::new();
    submission
        .images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let filename = sanitize_filename(&image.filename)
                .unwrap_or_else(|| format!("image-{}", index + 1));
            let filename = unique_filename(filename, &mut used);
            CommittedFile {
                path: image_path(&submission.slug, &filename),
                content: image.bytes.clone(),
                message: format!("Add image {filename} for {}", submission.slug),
            }
        })
        .collect()
}

/// `device.yaml` followed by the verbatim `config.yaml`.
pub fn plan_config_files(submission: &DeviceSubmission) -> [CommittedFile; 2] {
    let descriptor = descriptor_path(&submission.slug);
    let config = config_path(&submission.slug);
    [
        CommittedFile {
            message: format!("Add {descriptor} for {}", submission.slug),
            content: render_device_descriptor(submission).into_bytes(),
            path: descriptor,
        },
        CommittedFile {
            message: format!("Add {config} for {}", submission.slug),
            content: submission.yaml_config.clone().into_bytes(),
            path: config,
        },
    ]
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
