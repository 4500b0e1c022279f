//! GitHub webhook payloads and the REST objects they embed.
//!
//! Only the fields the bot reads are modelled; everything else in the
//! payload is ignored by serde.

use crate::types::PullRequest;
use serde::Deserialize;

pub const ISSUE_COMMENT_EVENT: &str = "issue_comment";
pub const PULL_REQUEST_EVENT: &str = "pull_request";

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub repo: Option<Repository>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GitHubPullRequest {
    pub number: u64,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub head: GitRef,
    pub base: GitRef,
}

impl From<GitHubPullRequest> for PullRequest {
    fn from(pr: GitHubPullRequest) -> Self {
        PullRequest {
            number: pr.number,
            html_url: pr.html_url,
            head_ref: pr.head.ref_name,
            merged: pr.merged,
            merge_sha: pr.merge_commit_sha.filter(|sha| !sha.is_empty()),
            labels: pr.labels.into_iter().map(|label| label.name).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCommentAction {
    Created,
    Edited,
    Deleted,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Issue {
    pub number: u64,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub body: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub action: IssueCommentAction,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Labeled,
    Unlabeled,
    Synchronize,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: u64,
    pub pull_request: GitHubPullRequest,
}

#[derive(Clone, Debug)]
pub enum Event {
    IssueComment(IssueCommentEvent),
    PullRequest(PullRequestEvent),
    /// Any event type the bot does not act on.
    Other(String),
}

impl Event {
    pub fn parse(event_type: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        match event_type {
            ISSUE_COMMENT_EVENT => serde_json::from_slice(payload).map(Event::IssueComment),
            PULL_REQUEST_EVENT => serde_json::from_slice(payload).map(Event::PullRequest),
            other => Ok(Event::Other(other.to_string())),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Event::IssueComment(_) => ISSUE_COMMENT_EVENT,
            Event::PullRequest(_) => PULL_REQUEST_EVENT,
            Event::Other(event_type) => event_type,
        }
    }
}
