use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The upstream pull request that triggered a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepoRef {
    pub org: String,
    pub name: String,
    pub pull_request_number: u64,
    pub merge_sha: String,
}

impl RepoRef {
    /// `org/repo/pull/N`, used in titles and bodies of generated PRs.
    pub fn pull_request_path(&self) -> String {
        format!("{}/{}/pull/{}", self.org, self.name, self.pull_request_number)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid repository {0:?}, expected <org>/<name>")]
pub struct InvalidRepoName(pub String);

/// Repository receiving the generated pull requests.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct DownstreamRepo {
    pub org: String,
    pub name: String,
}

impl FromStr for DownstreamRepo {
    type Err = InvalidRepoName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(DownstreamRepo {
                    org: org.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(InvalidRepoName(s.to_string())),
        }
    }
}

impl TryFrom<String> for DownstreamRepo {
    type Error = InvalidRepoName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DownstreamRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamBranch {
    pub target_branch: String,
    pub new_branch: String,
}

/// The subset of a pull request the bot looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub head_ref: String,
    pub merged: bool,
    pub merge_sha: Option<String>,
    pub labels: Vec<String>,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// `<fork owner>:<branch>`
    pub head: String,
    pub base: String,
    pub maintainer_can_modify: bool,
}

/// Identity the bot acts as on the review platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotUser {
    pub login: String,
    pub email: Option<String>,
}
