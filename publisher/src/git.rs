//! Working-tree operations on cloned repositories.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tempfile::TempDir;
use tokio::process::Command;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum GitError {
    #[error("failed to create working directory: {0}")]
    WorkDir(#[source] io::Error),

    #[error("failed to run `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`git {command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("invalid remote for {repo}: {source}")]
    Remote {
        repo: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// A checked-out working tree. Dropping the client removes the tree.
#[async_trait]
pub trait RepoClient: Send + Sync {
    fn directory(&self) -> &Path;

    async fn checkout(&self, rev: &str) -> Result<(), GitError>;

    async fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError>;

    async fn config(&self, key: &str, value: &str) -> Result<(), GitError>;

    /// Stages everything in the tree and commits it, unless the tree matches HEAD.
    async fn commit_all(&self, message: &str) -> Result<CommitOutcome, GitError>;

    /// Pushes `branch` to the bot's fork of this repository.
    async fn push_to_fork(&self, branch: &str, force: bool) -> Result<(), GitError>;
}

#[async_trait]
pub trait GitClientFactory: Send + Sync {
    async fn client_for(&self, org: &str, repo: &str) -> Result<Box<dyn RepoClient>, GitError>;
}

/// Clones over HTTPS into temporary directories and shells out to `git`.
pub struct LocalGitFactory {
    base_url: Url,
    user: String,
    token: String,
}

impl LocalGitFactory {
    /// `user` owns the forks that branches are pushed to.
    pub fn new(mut base_url: Url, user: impl Into<String>, token: impl Into<String>) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        LocalGitFactory {
            base_url,
            user: user.into(),
            token: token.into(),
        }
    }

    fn remote_url(&self, owner: &str, repo: &str) -> Result<Url, GitError> {
        let mut url = self
            .base_url
            .join(&format!("{owner}/{repo}.git"))
            .map_err(|source| GitError::Remote {
                repo: format!("{owner}/{repo}"),
                source,
            })?;

        if !self.token.is_empty() && url.has_host() {
            // Only fails for URLs without a host.
            let _ = url.set_username(&self.user);
            let _ = url.set_password(Some(&self.token));
        }
        Ok(url)
    }
}

#[async_trait]
impl GitClientFactory for LocalGitFactory {
    async fn client_for(&self, org: &str, repo: &str) -> Result<Box<dyn RepoClient>, GitError> {
        let work_dir = tempfile::Builder::new()
            .prefix("codegen-")
            .tempdir()
            .map_err(GitError::WorkDir)?;
        let remote = self.remote_url(org, repo)?;
        let fork_remote = self.remote_url(&self.user, repo)?;
        let dir = work_dir.path().join(repo);

        git(
            work_dir.path(),
            [
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new(remote.as_str()),
                dir.as_os_str(),
            ],
            &self.token,
        )
        .await?;
        tracing::debug!(org, repo, dir = %dir.display(), "Cloned repository");

        Ok(Box::new(LocalRepo {
            _work_dir: work_dir,
            dir,
            fork_remote,
            token: self.token.clone(),
        }))
    }
}

struct LocalRepo {
    _work_dir: TempDir,
    dir: PathBuf,
    fork_remote: Url,
    token: String,
}

impl LocalRepo {
    async fn git<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        git(&self.dir, args, &self.token).await
    }
}

#[async_trait]
impl RepoClient for LocalRepo {
    fn directory(&self) -> &Path {
        &self.dir
    }

    async fn checkout(&self, rev: &str) -> Result<(), GitError> {
        self.git(["checkout", "--quiet", rev]).await.map(drop)
    }

    async fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError> {
        self.git(["checkout", "--quiet", "-b", branch]).await.map(drop)
    }

    async fn config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.git(["config", key, value]).await.map(drop)
    }

    async fn commit_all(&self, message: &str) -> Result<CommitOutcome, GitError> {
        self.git(["add", "--all"]).await?;
        let status = self.git(["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(CommitOutcome::NothingToCommit);
        }
        self.git(["commit", "--quiet", "-m", message]).await?;
        Ok(CommitOutcome::Committed)
    }

    async fn push_to_fork(&self, branch: &str, force: bool) -> Result<(), GitError> {
        let refspec = format!("{branch}:{branch}");
        let mut args = vec!["push", "--quiet"];
        if force {
            args.push("--force");
        }
        args.push(self.fork_remote.as_str());
        args.push(&refspec);
        self.git(args).await.map(drop)
    }
}

async fn git<I, S>(dir: &Path, args: I, secret: &str) -> Result<String, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect();
    let command = redact(
        &args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" "),
        secret,
    );

    let output = Command::new("git")
        .args(&args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(GitError::Command {
            command,
            status: output.status,
            stderr: redact(String::from_utf8_lossy(&output.stderr).trim(), secret),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn redact(text: &str, secret: &str) -> String {
    match secret.is_empty() {
        true => text.to_string(),
        false => text.replace(secret, "***"),
    }
}
