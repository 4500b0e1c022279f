//! In-memory git and review clients, and a canned HTTP server.

use crate::git::{CommitOutcome, GitClientFactory, GitError, RepoClient};
use crate::orchestrator::{DEFAULT_WEB_URL, Publisher, PublisherSettings};
use crate::review::{ReviewClient, ReviewError};
use crate::types::{BotUser, NewPullRequest, PullRequest, RepoRef};
use async_trait::async_trait;
use generator::{Codegen, Matcher};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use reqwest::{Method, StatusCode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

pub const UPSTREAM_REPO: &str = "acme/tenants";
pub const BOT_LOGIN: &str = "codegen-bot";

pub fn upstream_ref(number: u64) -> RepoRef {
    RepoRef {
        org: "acme".into(),
        name: "tenants".into(),
        pull_request_number: number,
        merge_sha: "abc123".into(),
    }
}

/// Seeds the upstream repository with one tenant and two accounts.
pub fn upstream_fixture(git: FakeGit) -> FakeGit {
    git.with_file(
        UPSTREAM_REPO,
        "infra/account.yaml",
        r#"
accounts:
  - cloud_provider: aws
    account_id: "111111111111"
    tags:
      env: prod
  - cloud_provider: gcp
    account_id: acme-prod
    tags:
      env: prod
"#,
    )
    .with_file(
        UPSTREAM_REPO,
        "tenants/foo/prod/resource.yaml",
        r#"
buckets:
  - name: foo-logs
    region: us-west-2
"#,
    )
}

pub fn publisher(git: Arc<FakeGit>, review: Arc<FakeReview>) -> Publisher {
    Publisher::new(
        git,
        review,
        Arc::new(Codegen::new(Matcher::default()).unwrap()),
        BotUser {
            login: BOT_LOGIN.into(),
            email: None,
        },
        PublisherSettings {
            downstream: "acme/infra-live".parse().unwrap(),
            target_branch: "main".into(),
            email: None,
            web_url: DEFAULT_WEB_URL.into(),
        },
    )
}

pub type Snapshot = BTreeMap<PathBuf, Vec<u8>>;

fn snapshot(root: &Path) -> Snapshot {
    let mut files = Snapshot::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                files.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    files
}

fn injected_git_error(operation: &str) -> GitError {
    GitError::Spawn {
        command: operation.to_string(),
        source: io::Error::other("injected failure"),
    }
}

#[derive(Clone, Debug)]
pub struct Push {
    pub repo: String,
    pub branch: String,
    pub files: Snapshot,
}

#[derive(Default)]
struct FakeGitState {
    remotes: HashMap<String, Snapshot>,
    pushes: Vec<Push>,
    operations: Vec<String>,
    failing: HashSet<&'static str>,
    directories: Vec<PathBuf>,
}

impl FakeGitState {
    fn check(&mut self, repo: &str, operation: &'static str, detail: String) -> Result<(), GitError> {
        self.operations.push(format!("{repo}: {detail}"));
        match self.failing.contains(operation) {
            true => Err(injected_git_error(operation)),
            false => Ok(()),
        }
    }
}

/// Every clone gets the remote's files in a fresh temporary directory.
/// All revisions of a repository share the same content.
#[derive(Default)]
pub struct FakeGit {
    state: Arc<Mutex<FakeGitState>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, repo: &str, path: &str, content: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .remotes
            .entry(repo.to_string())
            .or_default()
            .insert(PathBuf::from(path), content.as_bytes().to_vec());
        self
    }

    /// Makes every later call of `operation` fail. One of `clone`,
    /// `checkout`, `checkout_new_branch`, `config`, `commit`, `push`.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.state.lock().unwrap().pushes.clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().directories.clone()
    }

    /// Replaces the remote content with the files of the latest push.
    pub fn merge_last_push(&self) {
        let mut state = self.state.lock().unwrap();
        let push = state.pushes.last().cloned().unwrap();
        state.remotes.insert(push.repo, push.files);
    }
}

#[async_trait]
impl GitClientFactory for FakeGit {
    async fn client_for(&self, org: &str, repo: &str) -> Result<Box<dyn RepoClient>, GitError> {
        let name = format!("{org}/{repo}");
        let mut state = self.state.lock().unwrap();
        state.check(&name, "clone", "clone".into())?;

        let dir = tempfile::tempdir().unwrap();
        let files = state.remotes.get(&name).cloned().unwrap_or_default();
        for (path, content) in &files {
            let path = dir.path().join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        state.directories.push(dir.path().to_path_buf());

        Ok(Box::new(FakeRepo {
            dir,
            name,
            committed: Mutex::new(files),
            state: self.state.clone(),
        }))
    }
}

struct FakeRepo {
    dir: TempDir,
    name: String,
    committed: Mutex<Snapshot>,
    state: Arc<Mutex<FakeGitState>>,
}

impl FakeRepo {
    fn check(&self, operation: &'static str, detail: String) -> Result<(), GitError> {
        self.state
            .lock()
            .unwrap()
            .check(&self.name, operation, detail)
    }
}

#[async_trait]
impl RepoClient for FakeRepo {
    fn directory(&self) -> &Path {
        self.dir.path()
    }

    async fn checkout(&self, rev: &str) -> Result<(), GitError> {
        self.check("checkout", format!("checkout {rev}"))
    }

    async fn checkout_new_branch(&self, branch: &str) -> Result<(), GitError> {
        self.check("checkout_new_branch", format!("checkout -b {branch}"))
    }

    async fn config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.check("config", format!("config {key} {value}"))
    }

    async fn commit_all(&self, message: &str) -> Result<CommitOutcome, GitError> {
        self.check("commit", format!("commit -m {message}"))?;
        let current = snapshot(self.dir.path());
        let mut committed = self.committed.lock().unwrap();
        if *committed == current {
            return Ok(CommitOutcome::NothingToCommit);
        }
        *committed = current;
        Ok(CommitOutcome::Committed)
    }

    async fn push_to_fork(&self, branch: &str, force: bool) -> Result<(), GitError> {
        self.check("push", format!("push force={force} {branch}"))?;
        let files = self.committed.lock().unwrap().clone();
        self.state.lock().unwrap().pushes.push(Push {
            repo: self.name.clone(),
            branch: branch.to_string(),
            files,
        });
        Ok(())
    }
}

fn injected_review_error(operation: &str) -> ReviewError {
    ReviewError::Status {
        method: Method::POST,
        path: operation.to_string(),
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "injected failure".into(),
    }
}

#[derive(Default)]
struct FakeReviewState {
    pull_requests: Vec<(String, PullRequest)>,
    created: Vec<NewPullRequest>,
    closed: Vec<u64>,
    comments: Vec<String>,
    labels: Vec<(u64, String)>,
    failing: HashSet<&'static str>,
}

/// Records every call. Created pull requests are numbered from 100.
#[derive(Default)]
pub struct FakeReview {
    state: Mutex<FakeReviewState>,
}

impl FakeReview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pull_request(&self, repo: &str, pull_request: PullRequest) {
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .push((repo.to_string(), pull_request));
    }

    /// Makes every later call of the `ReviewClient` method `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn created(&self) -> Vec<NewPullRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn comments(&self) -> Vec<String> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn labels(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().labels.clone()
    }

    fn check(&self, operation: &'static str) -> Result<(), ReviewError> {
        match self.state.lock().unwrap().failing.contains(operation) {
            true => Err(injected_review_error(operation)),
            false => Ok(()),
        }
    }
}

#[async_trait]
impl ReviewClient for FakeReview {
    async fn bot_user(&self) -> Result<BotUser, ReviewError> {
        self.check("bot_user")?;
        Ok(BotUser {
            login: BOT_LOGIN.into(),
            email: None,
        })
    }

    async fn ensure_fork(&self, _owner: &str, _org: &str, repo: &str) -> Result<String, ReviewError> {
        self.check("ensure_fork")?;
        Ok(repo.to_string())
    }

    async fn get_pull_request(
        &self,
        org: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest, ReviewError> {
        self.check("get_pull_request")?;
        let name = format!("{org}/{repo}");
        self.state
            .lock()
            .unwrap()
            .pull_requests
            .iter()
            .find(|(r, pr)| *r == name && pr.number == number)
            .map(|(_, pr)| pr.clone())
            .ok_or_else(|| ReviewError::Status {
                method: Method::GET,
                path: format!("repos/{name}/pulls/{number}"),
                status: StatusCode::NOT_FOUND,
                message: "Not Found".into(),
            })
    }

    async fn list_pull_requests(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<Vec<PullRequest>, ReviewError> {
        self.check("list_pull_requests")?;
        let name = format!("{org}/{repo}");
        let state = self.state.lock().unwrap();
        Ok(state
            .pull_requests
            .iter()
            .filter(|(r, pr)| *r == name && !state.closed.contains(&pr.number))
            .map(|(_, pr)| pr.clone())
            .collect())
    }

    async fn create_pull_request(
        &self,
        org: &str,
        repo: &str,
        pull_request: &NewPullRequest,
    ) -> Result<u64, ReviewError> {
        self.check("create_pull_request")?;
        let mut state = self.state.lock().unwrap();
        let number = 100 + state.created.len() as u64;
        let head_ref = pull_request
            .head
            .split_once(':')
            .map(|(_, branch)| branch)
            .unwrap_or(&pull_request.head)
            .to_string();
        state.created.push(pull_request.clone());
        state.pull_requests.push((
            format!("{org}/{repo}"),
            PullRequest {
                number,
                html_url: format!("https://github.com/{org}/{repo}/pull/{number}"),
                head_ref,
                ..Default::default()
            },
        ));
        Ok(number)
    }

    async fn close_pull_request(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
    ) -> Result<(), ReviewError> {
        self.check("close_pull_request")?;
        self.state.lock().unwrap().closed.push(number);
        Ok(())
    }

    async fn create_comment(
        &self,
        _org: &str,
        _repo: &str,
        _number: u64,
        body: &str,
    ) -> Result<(), ReviewError> {
        self.check("create_comment")?;
        self.state.lock().unwrap().comments.push(body.to_string());
        Ok(())
    }

    async fn add_label(
        &self,
        _org: &str,
        _repo: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ReviewError> {
        self.check("add_label")?;
        self.state
            .lock()
            .unwrap()
            .labels
            .push((number, label.to_string()));
        Ok(())
    }
}

/// A canned response for one method and path.
#[derive(Clone)]
pub struct MockRoute {
    method: &'static str,
    path: &'static str,
    status: u16,
    body: String,
}

impl MockRoute {
    pub fn json(method: &'static str, path: &'static str, status: u16, body: serde_json::Value) -> Self {
        MockRoute {
            method,
            path,
            status,
            body: body.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path_and_query: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// HTTP server on an ephemeral port answering from a fixed route table.
/// Unknown routes get a 404.
pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(routes: Vec<MockRoute>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let recorded = recorded.clone();
                let service = service_fn(move |req: Request<Incoming>| {
                    let routes = routes.clone();
                    let recorded = recorded.clone();
                    async move { Ok::<_, Infallible>(respond(req, &routes, &recorded).await) }
                });
                tokio::spawn(async move {
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        MockServer {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(
    req: Request<Incoming>,
    routes: &[MockRoute],
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> Response<Full<Bytes>> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(String::from);
    let body = req.into_body().collect().await.unwrap().to_bytes();
    recorded.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path_and_query,
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let (status, body) = routes
        .iter()
        .find(|route| route.method == method && route.path == path)
        .map(|route| (route.status, route.body.clone()))
        .unwrap_or((404, r#"{"message":"Not Found"}"#.to_string()));
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
