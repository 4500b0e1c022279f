use crate::events::{GitHubPullRequest, Repository, User};
use crate::types::{BotUser, NewPullRequest, PullRequest};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("codegen-bot/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum ReviewError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid url for {path}: {source}")]
    Url {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{method} {path} failed: {source}")]
    Request {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned {status}: {message}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        message: String,
    },
}

/// Operations on the code review platform hosting both repositories.
#[async_trait]
pub trait ReviewClient: Send + Sync {
    async fn bot_user(&self) -> Result<BotUser, ReviewError>;

    /// Makes sure `owner` has a fork of `org/repo` and returns the fork's name.
    async fn ensure_fork(&self, owner: &str, org: &str, repo: &str) -> Result<String, ReviewError>;

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, ReviewError>;

    /// Open pull requests only.
    async fn list_pull_requests(&self, org: &str, repo: &str)
    -> Result<Vec<PullRequest>, ReviewError>;

    /// Returns the number of the new pull request.
    async fn create_pull_request(
        &self,
        org: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<u64, ReviewError>;

    async fn close_pull_request(&self, org: &str, repo: &str, number: u64)
    -> Result<(), ReviewError>;

    async fn create_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ReviewError>;

    async fn add_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ReviewError>;
}

#[derive(Deserialize)]
struct CreatedPullRequest {
    number: u64,
}

/// GitHub REST API client.
///
/// With `dry_run` set, every call that would change state on GitHub is
/// logged and skipped; reads still go through.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: Url,
    token: String,
    dry_run: bool,
}

impl GitHubClient {
    pub fn new(
        mut api_url: Url,
        token: impl Into<String>,
        dry_run: bool,
    ) -> Result<Self, ReviewError> {
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ReviewError::Client)?;

        Ok(GitHubClient {
            client,
            api_url,
            token: token.into(),
            dry_run,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ReviewError> {
        let url = self.api_url.join(path).map_err(|source| ReviewError::Url {
            path: path.to_string(),
            source,
        })?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ReviewError::Request {
                method: method.clone(),
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReviewError::Status {
                method,
                path: path.to_string(),
                status,
                message: message.trim().to_string(),
            });
        }
        Ok(response)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ReviewError> {
        let response = self.request(method.clone(), path, body).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| ReviewError::Request {
                method,
                path: path.to_string(),
                source,
            })
    }

    fn skip_in_dry_run(&self, action: &str, target: &str) -> bool {
        if self.dry_run {
            tracing::info!(action, target, "Dry run, not calling GitHub");
        }
        self.dry_run
    }
}

#[async_trait]
impl ReviewClient for GitHubClient {
    async fn bot_user(&self) -> Result<BotUser, ReviewError> {
        let user: User = self.request_json(Method::GET, "user", None).await?;
        Ok(BotUser {
            login: user.login,
            email: user.email.filter(|email| !email.is_empty()),
        })
    }

    async fn ensure_fork(&self, owner: &str, org: &str, repo: &str) -> Result<String, ReviewError> {
        if self.skip_in_dry_run("ensure_fork", &format!("{org}/{repo}")) {
            return Ok(repo.to_string());
        }

        // Forking is idempotent on GitHub: an existing fork is returned as is.
        let path = format!("repos/{org}/{repo}/forks");
        let fork: Repository = self
            .request_json(Method::POST, &path, Some(serde_json::json!({})))
            .await?;
        if fork.owner.login != owner {
            tracing::warn!(
                expected = owner,
                actual = %fork.owner.login,
                "Fork is owned by an unexpected account"
            );
        }
        Ok(fork.name)
    }

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, ReviewError> {
        let path = format!("repos/{org}/{repo}/pulls/{number}");
        let pr: GitHubPullRequest = self.request_json(Method::GET, &path, None).await?;
        Ok(pr.into())
    }

    async fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<Vec<PullRequest>, ReviewError> {
        let mut pull_requests = Vec::new();
        for page in 1.. {
            let path = format!("repos/{org}/{repo}/pulls?state=open&per_page={PAGE_SIZE}&page={page}");
            let batch: Vec<GitHubPullRequest> =
                self.request_json(Method::GET, &path, None).await?;
            let done = batch.len() < PAGE_SIZE;
            pull_requests.extend(batch.into_iter().map(PullRequest::from));
            if done {
                break;
            }
        }
        Ok(pull_requests)
    }

    async fn create_pull_request(
        &self,
        org: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<u64, ReviewError> {
        if self.skip_in_dry_run("create_pull_request", &pull_request.head) {
            return Ok(0);
        }

        let path = format!("repos/{org}/{repo}/pulls");
        let body = serde_json::json!({
            "title": pull_request.title,
            "body": pull_request.body,
            "head": pull_request.head,
            "base": pull_request.base,
            "maintainer_can_modify": pull_request.maintainer_can_modify,
        });
        let created: CreatedPullRequest = self.request_json(Method::POST, &path, Some(body)).await?;
        Ok(created.number)
    }

    async fn close_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<(), ReviewError> {
        if self.skip_in_dry_run("close_pull_request", &format!("{org}/{repo}#{number}")) {
            return Ok(());
        }

        let path = format!("repos/{org}/{repo}/pulls/{number}");
        self.request(
            Method::PATCH,
            &path,
            Some(serde_json::json!({ "state": "closed" })),
        )
        .await?;
        Ok(())
    }

    async fn create_comment(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ReviewError> {
        if self.skip_in_dry_run("create_comment", &format!("{org}/{repo}#{number}")) {
            tracing::info!(body, "Comment not posted");
            return Ok(());
        }

        let path = format!("repos/{org}/{repo}/issues/{number}/comments");
        self.request(Method::POST, &path, Some(serde_json::json!({ "body": body })))
            .await?;
        Ok(())
    }

    async fn add_label(
        &self,
        org: &str,
        repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ReviewError> {
        if self.skip_in_dry_run("add_label", &format!("{org}/{repo}#{number}")) {
            return Ok(());
        }

        let path = format!("repos/{org}/{repo}/issues/{number}/labels");
        self.request(
            Method::POST,
            &path,
            Some(serde_json::json!({ "labels": [label] })),
        )
        .await?;
        Ok(())
    }
}
