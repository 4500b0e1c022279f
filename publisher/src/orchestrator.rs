//! Turns one triggering upstream pull request into one downstream pull request.
//!
//! A run walks through these states, stopping at the first terminal one:
//!
//! ```text
//! fork ensured -> branch resolved (existing PR => stop)
//!   -> content generated -> committed (nothing changed => stop)
//!   -> pushed -> PR created -> [closed, dry runs only]
//! ```
//!
//! Every failure is reported as a comment on the triggering pull request.
//! When that comment cannot be posted either, both errors are returned
//! together as [`PublishError::Reported`].

use crate::git::{CommitOutcome, GitClientFactory, GitError, RepoClient};
use crate::metrics_defs::{RUN_DURATION, RUNS};
use crate::modifier::PullRequestModifier;
use crate::review::{ReviewClient, ReviewError};
use crate::types::{BotUser, DownstreamBranch, DownstreamRepo, NewPullRequest, PullRequest, RepoRef};
use generator::{Codegen, CodegenError, LoadError, UpstreamConfig, load_upstream};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_WEB_URL: &str = "https://github.com";
const COMMIT_MESSAGE: &str = "autogenerated";

/// Deterministic per (trigger, target branch, modifier), which is what makes
/// re-runs find the pull request of an earlier run.
pub fn branch_name(
    upstream: &RepoRef,
    target_branch: &str,
    modifier: PullRequestModifier,
) -> String {
    format!(
        "auto-checkout-{}-to-{}{}",
        upstream.pull_request_number,
        target_branch,
        modifier.branch_suffix()
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Created { number: u64 },
    CreatedAndClosed { number: u64 },
    /// An open pull request already uses the branch of this run.
    Existing { number: u64, url: String },
    NoChanges,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Created { .. } => "created",
            PublishOutcome::CreatedAndClosed { .. } => "created_and_closed",
            PublishOutcome::Existing { .. } => "existing",
            PublishOutcome::NoChanges => "no_changes",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("cannot fork {repo}: {source}")]
    Fork { repo: String, source: ReviewError },

    #[error("cannot clone {repo}: {source}")]
    Clone { repo: String, source: GitError },

    #[error("cannot checkout `{rev}`: {source}")]
    Checkout { rev: String, source: GitError },

    #[error("failed to configure git {key}: {source}")]
    GitConfig {
        key: &'static str,
        source: GitError,
    },

    #[error("failed to list pull requests for {repo}: {source}")]
    ListPullRequests { repo: String, source: ReviewError },

    #[error("failed to create branch {branch}: {source}")]
    NewBranch { branch: String, source: GitError },

    #[error("failed to load upstream config: {0}")]
    Load(#[from] LoadError),

    #[error("failed to generate artifacts: {0}")]
    Codegen(#[from] CodegenError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to `git add & git commit`: {0}")]
    Commit(#[source] GitError),

    #[error("failed to push auto-generated changes in GitHub: {0}")]
    Push(#[source] GitError),

    #[error("new pull request could not be created: {0}")]
    CreatePullRequest(#[source] ReviewError),

    #[error("failed to close pull request #{number}: {source}")]
    ClosePullRequest { number: u64, source: ReviewError },

    #[error("failed to create comment: {0}")]
    Comment(#[source] ReviewError),

    #[error("{source}; reporting it also failed: {comment}")]
    Reported {
        source: Box<PublishError>,
        comment: ReviewError,
    },
}

#[derive(Clone, Debug)]
pub struct PublisherSettings {
    pub downstream: DownstreamRepo,
    pub target_branch: String,
    /// Commit email. Falls back to the bot's public email, then to its
    /// noreply address.
    pub email: Option<String>,
    /// Base of the links posted back to the triggering pull request.
    pub web_url: String,
}

enum BranchState {
    New(DownstreamBranch),
    Existing(PullRequest),
}

pub struct Publisher {
    git: Arc<dyn GitClientFactory>,
    review: Arc<dyn ReviewClient>,
    codegen: Arc<Codegen>,
    bot: BotUser,
    settings: PublisherSettings,
}

impl Publisher {
    pub fn new(
        git: Arc<dyn GitClientFactory>,
        review: Arc<dyn ReviewClient>,
        codegen: Arc<Codegen>,
        bot: BotUser,
        settings: PublisherSettings,
    ) -> Self {
        Publisher {
            git,
            review,
            codegen,
            bot,
            settings,
        }
    }

    /// Reads the upstream configuration at the merge commit of `upstream` and
    /// publishes the generated artifacts downstream.
    pub async fn run(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
    ) -> Result<PublishOutcome, PublishError> {
        let start = Instant::now();
        tracing::info!(
            org = %upstream.org,
            repo = %upstream.name,
            pr = upstream.pull_request_number,
            %modifier,
            "Starting codegen run"
        );

        let result = match self.fetch_upstream_configs(upstream).await {
            Ok(config) => self.publish(upstream, modifier, config).await,
            Err(err) => {
                let message = format!("cannot read upstream configuration:\n```\n{err}\n```");
                Err(self.fail_with(upstream, err, message).await)
            }
        };

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        counter!(RUNS, "outcome" => outcome, "modifier" => modifier.as_str()).increment(1);
        histogram!(RUN_DURATION, "modifier" => modifier.as_str())
            .record(start.elapsed().as_secs_f64());
        tracing::info!(
            org = %upstream.org,
            repo = %upstream.name,
            pr = upstream.pull_request_number,
            outcome,
            duration_ms = start.elapsed().as_millis() as u64,
            "Codegen run finished"
        );
        result
    }

    /// Clones the upstream repository at the merge commit and parses it.
    pub async fn fetch_upstream_configs(
        &self,
        upstream: &RepoRef,
    ) -> Result<UpstreamConfig, PublishError> {
        let repo = self
            .git
            .client_for(&upstream.org, &upstream.name)
            .await
            .map_err(|source| PublishError::Clone {
                repo: format!("{}/{}", upstream.org, upstream.name),
                source,
            })?;
        repo.checkout(&upstream.merge_sha)
            .await
            .map_err(|source| PublishError::Checkout {
                rev: upstream.merge_sha.clone(),
                source,
            })?;
        let branch = format!("src-{}", upstream.pull_request_number);
        repo.checkout_new_branch(&branch)
            .await
            .map_err(|source| PublishError::NewBranch { branch, source })?;

        let root = repo.directory().to_path_buf();
        let config = tokio::task::spawn_blocking(move || load_upstream(&root)).await??;
        Ok(config)
    }

    pub async fn publish(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
        config: UpstreamConfig,
    ) -> Result<PublishOutcome, PublishError> {
        let downstream = &self.settings.downstream;

        if let Err(source) = self
            .review
            .ensure_fork(&self.bot.login, &downstream.org, &downstream.name)
            .await
        {
            let err = PublishError::Fork {
                repo: downstream.to_string(),
                source,
            };
            return Err(self.fail(upstream, err).await);
        }

        let repo = match self.git.client_for(&downstream.org, &downstream.name).await {
            Ok(repo) => repo,
            Err(source) => {
                let err = PublishError::Clone {
                    repo: downstream.to_string(),
                    source,
                };
                return Err(self.fail(upstream, err).await);
            }
        };

        let branch = match self.resolve_branch(upstream, modifier, repo.as_ref()).await? {
            BranchState::New(branch) => branch,
            BranchState::Existing(pr) => {
                tracing::info!(url = %pr.html_url, "Pull request already exists");
                let message = format!(
                    "Looks like #{} has already been created in {}",
                    pr.number, pr.html_url
                );
                self.comment(upstream, &message)
                    .await
                    .map_err(PublishError::Comment)?;
                return Ok(PublishOutcome::Existing {
                    number: pr.number,
                    url: pr.html_url,
                });
            }
        };

        let codegen = self.codegen.clone();
        let dst_dir = repo.directory().to_path_buf();
        let UpstreamConfig { accounts, tenants } = config;
        let generated =
            tokio::task::spawn_blocking(move || codegen.fan_out(&dst_dir, &accounts, &tenants))
                .await;
        match generated {
            Ok(Ok(summary)) => {
                tracing::info!(
                    artifacts = summary.artifacts,
                    purged = summary.purged,
                    "Generated downstream content"
                );
            }
            Ok(Err(err)) => {
                let message = format!("failed to generate artifacts:\n```\n{err}\n```");
                return Err(self.fail_with(upstream, err.into(), message).await);
            }
            Err(err) => return Err(self.fail(upstream, err.into()).await),
        }

        match repo.commit_all(COMMIT_MESSAGE).await {
            Ok(CommitOutcome::Committed) => {}
            Ok(CommitOutcome::NothingToCommit) => {
                self.comment(upstream, &modifier.noop_message(downstream))
                    .await
                    .map_err(PublishError::Comment)?;
                return Ok(PublishOutcome::NoChanges);
            }
            Err(err) => {
                let message = format!(
                    "#{} failed to apply on top of branch {:?}:\n```\n{}\n```",
                    upstream.pull_request_number, branch.target_branch, err
                );
                return Err(self.fail_with(upstream, PublishError::Commit(err), message).await);
            }
        }

        if let Err(err) = repo.push_to_fork(&branch.new_branch, true).await {
            return Err(self.fail(upstream, PublishError::Push(err)).await);
        }

        let from = upstream.pull_request_path();
        let request = NewPullRequest {
            title: format!("{}Tenant codegen from {from}", modifier.title_tag()),
            body: format!("This is an auto-generated PR via codegen-bot from {from}."),
            head: format!("{}:{}", self.bot.login, branch.new_branch),
            base: branch.target_branch.clone(),
            maintainer_can_modify: true,
        };
        let number = match self
            .review
            .create_pull_request(&downstream.org, &downstream.name, &request)
            .await
        {
            Ok(number) => number,
            Err(err) => return Err(self.fail(upstream, PublishError::CreatePullRequest(err)).await),
        };

        let link = format!(
            "{}{}/{}/{}/pull/{}.",
            modifier.post_comment_prefix(),
            self.settings.web_url.trim_end_matches('/'),
            downstream.org,
            downstream.name,
            number
        );
        let commented = self.comment(upstream, &link).await;

        // Dry-run PRs are closed even when the link could not be posted.
        if modifier.tear_down() {
            if let Err(source) = self
                .review
                .close_pull_request(&downstream.org, &downstream.name, number)
                .await
            {
                let err = PublishError::ClosePullRequest { number, source };
                return Err(self.fail(upstream, err).await);
            }
            commented.map_err(PublishError::Comment)?;
            return Ok(PublishOutcome::CreatedAndClosed { number });
        }

        commented.map_err(PublishError::Comment)?;
        Ok(PublishOutcome::Created { number })
    }

    async fn resolve_branch(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
        repo: &dyn RepoClient,
    ) -> Result<BranchState, PublishError> {
        let downstream = &self.settings.downstream;
        let target_branch = self.settings.target_branch.clone();
        let new_branch = branch_name(upstream, &target_branch, modifier);

        if let Err(source) = repo.checkout(&target_branch).await {
            let err = PublishError::Checkout {
                rev: target_branch,
                source,
            };
            return Err(self.fail(upstream, err).await);
        }

        let email = self
            .settings
            .email
            .clone()
            .or_else(|| self.bot.email.clone())
            .unwrap_or_else(|| format!("{}@users.noreply.github.com", self.bot.login));
        for (key, value) in [("user.name", self.bot.login.as_str()), ("user.email", email.as_str())] {
            if let Err(source) = repo.config(key, value).await {
                return Err(self.fail(upstream, PublishError::GitConfig { key, source }).await);
            }
        }

        let open = match self
            .review
            .list_pull_requests(&downstream.org, &downstream.name)
            .await
        {
            Ok(open) => open,
            Err(source) => {
                let err = PublishError::ListPullRequests {
                    repo: downstream.to_string(),
                    source,
                };
                return Err(self.fail(upstream, err).await);
            }
        };
        if let Some(existing) = open.into_iter().find(|pr| pr.head_ref == new_branch) {
            return Ok(BranchState::Existing(existing));
        }

        if let Err(source) = repo.checkout_new_branch(&new_branch).await {
            let err = PublishError::NewBranch {
                branch: new_branch,
                source,
            };
            return Err(self.fail(upstream, err).await);
        }

        Ok(BranchState::New(DownstreamBranch {
            target_branch,
            new_branch,
        }))
    }

    async fn comment(&self, upstream: &RepoRef, body: &str) -> Result<(), ReviewError> {
        self.review
            .create_comment(
                &upstream.org,
                &upstream.name,
                upstream.pull_request_number,
                body,
            )
            .await
    }

    async fn fail(&self, upstream: &RepoRef, err: PublishError) -> PublishError {
        let message = err.to_string();
        self.fail_with(upstream, err, message).await
    }

    /// Posts `message` on the triggering pull request and hands back the error
    /// to return, merged with the comment failure if there was one.
    async fn fail_with(&self, upstream: &RepoRef, err: PublishError, message: String) -> PublishError {
        tracing::error!(
            org = %upstream.org,
            repo = %upstream.name,
            pr = upstream.pull_request_number,
            error = %err,
            "Codegen run failed"
        );
        match self.comment(upstream, &message).await {
            Ok(()) => err,
            Err(comment) => PublishError::Reported {
                source: Box::new(err),
                comment,
            },
        }
    }
}
