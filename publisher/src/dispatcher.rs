//! Routes webhook events to codegen runs.
//!
//! - A `/codegen` comment on a pull request adds the marker label. The run
//!   itself happens once the pull request is merged and labeled.
//! - A `/codegen-dryrun` comment runs right away with the dry-run modifier.
//! - A merged pull request carrying the marker label runs with the deploy
//!   modifier, on either the `closed` or the `labeled` action.
//!
//! All runs share one working-tree budget: [`RunLock`] lets a single run
//! proceed at a time, across every repository.

use crate::events::{
    Event, IssueCommentAction, IssueCommentEvent, PullRequestAction, PullRequestEvent,
};
use crate::metrics_defs::EVENTS;
use crate::modifier::PullRequestModifier;
use crate::orchestrator::{PublishError, PublishOutcome, Publisher};
use crate::review::{ReviewClient, ReviewError};
use crate::triggers::Triggers;
use crate::types::{PullRequest, RepoRef};
use async_trait::async_trait;
use shared::counter;
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;

/// Admits one codegen run at a time.
pub struct RunLock {
    semaphore: Semaphore,
}

impl RunLock {
    pub fn new() -> Self {
        RunLock {
            semaphore: Semaphore::new(1),
        }
    }

    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.semaphore.acquire().await
    }

    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for RunLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait CodegenRunner: Send + Sync {
    async fn run_codegen(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
    ) -> Result<PublishOutcome, PublishError>;
}

#[async_trait]
impl CodegenRunner for Publisher {
    async fn run_codegen(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
    ) -> Result<PublishOutcome, PublishError> {
        self.run(upstream, modifier).await
    }
}

/// What handling an event amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Ignored(&'static str),
    LabelAdded { number: u64 },
    Published(PublishOutcome),
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("failed to get pull request #{number}: {source}")]
    PullRequest { number: u64, source: ReviewError },

    #[error("failed to add label {label:?}: {source}")]
    AddLabel { label: String, source: ReviewError },

    #[error("run lock closed: {0}")]
    Lock(#[from] AcquireError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

pub struct Dispatcher {
    triggers: Triggers,
    review: Arc<dyn ReviewClient>,
    runner: Arc<dyn CodegenRunner>,
    lock: RunLock,
}

impl Dispatcher {
    pub fn new(
        triggers: Triggers,
        review: Arc<dyn ReviewClient>,
        runner: Arc<dyn CodegenRunner>,
    ) -> Self {
        Dispatcher {
            triggers,
            review,
            runner,
            lock: RunLock::new(),
        }
    }

    pub fn run_lock(&self) -> &RunLock {
        &self.lock
    }

    /// Handles `event` on a task of its own. Errors are logged there.
    pub fn dispatch(self: &Arc<Self>, event: Event, delivery: String) -> JoinHandle<()> {
        let event_type = event.event_type().to_string();
        counter!(EVENTS, "event_type" => event_type.clone()).increment(1);

        let dispatcher = self.clone();
        tokio::spawn(async move {
            match dispatcher.handle(event).await {
                Ok(action) => {
                    tracing::info!(%event_type, %delivery, ?action, "Event handled");
                }
                Err(err) => {
                    tracing::error!(%event_type, %delivery, error = %err, "Event handling failed");
                }
            }
        })
    }

    pub async fn handle(&self, event: Event) -> Result<Action, DispatchError> {
        match event {
            Event::IssueComment(event) => self.handle_issue_comment(event).await,
            Event::PullRequest(event) => self.handle_pull_request(event).await,
            Event::Other(_) => Ok(Action::Ignored("unsupported event type")),
        }
    }

    async fn handle_issue_comment(&self, event: IssueCommentEvent) -> Result<Action, DispatchError> {
        if event.action != IssueCommentAction::Created || !event.issue.is_pull_request() {
            return Ok(Action::Ignored("not a new pull request comment"));
        }

        let org = event.repository.owner.login;
        let name = event.repository.name;
        let number = event.issue.number;
        let body = event.comment.body;

        if self.triggers.is_dry_run(&body) {
            let pr = self
                .review
                .get_pull_request(&org, &name, number)
                .await
                .map_err(|source| DispatchError::PullRequest { number, source })?;
            let Some(merge_sha) = pr.merge_sha else {
                return Ok(Action::Ignored("pull request has no merge commit"));
            };

            let upstream = RepoRef {
                org,
                name,
                pull_request_number: number,
                merge_sha,
            };
            return self
                .run_serialized(&upstream, PullRequestModifier::DryRun)
                .await
                .map(Action::Published);
        }

        if !self.triggers.is_codegen(&body) {
            return Ok(Action::Ignored("no command"));
        }

        tracing::info!(%org, repo = %name, pr = number, "Requested a downstream codegen");
        let label = self.triggers.label();
        self.review
            .add_label(&org, &name, number, label)
            .await
            .map_err(|source| DispatchError::AddLabel {
                label: label.to_string(),
                source,
            })?;
        Ok(Action::LabelAdded { number })
    }

    async fn handle_pull_request(&self, event: PullRequestEvent) -> Result<Action, DispatchError> {
        if !matches!(
            event.action,
            PullRequestAction::Closed | PullRequestAction::Labeled
        ) {
            return Ok(Action::Ignored("not one of (closed, labeled)"));
        }

        let Some(base_repo) = event.pull_request.base.repo.clone() else {
            return Ok(Action::Ignored("pull request without base repository"));
        };
        let pr = PullRequest::from(event.pull_request);
        let merge_sha = match (pr.merged, pr.merge_sha.clone()) {
            (true, Some(merge_sha)) => merge_sha,
            _ => return Ok(Action::Ignored("pull request is not merged")),
        };
        if !pr.has_label(self.triggers.label()) {
            return Ok(Action::Ignored("marker label is not present"));
        }

        let upstream = RepoRef {
            org: base_repo.owner.login,
            name: base_repo.name,
            pull_request_number: pr.number,
            merge_sha,
        };
        self.run_serialized(&upstream, PullRequestModifier::Deploy)
            .await
            .map(Action::Published)
    }

    async fn run_serialized(
        &self,
        upstream: &RepoRef,
        modifier: PullRequestModifier,
    ) -> Result<PublishOutcome, DispatchError> {
        // Hold permit for the whole run
        let _permit = self.lock.acquire().await?;
        Ok(self.runner.run_codegen(upstream, modifier).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::{issue_comment_payload, pull_request_payload};
    use crate::events::{ISSUE_COMMENT_EVENT, PULL_REQUEST_EVENT};
    use crate::testutils::FakeReview;
    use crate::triggers::{DEFAULT_CODEGEN_PATTERN, DEFAULT_DRY_RUN_PATTERN, DEFAULT_LABEL};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<(RepoRef, PullRequestModifier)>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl CodegenRunner for FakeRunner {
        async fn run_codegen(
            &self,
            upstream: &RepoRef,
            modifier: PullRequestModifier,
        ) -> Result<PublishOutcome, PublishError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.calls
                .lock()
                .unwrap()
                .push((upstream.clone(), modifier));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(PublishOutcome::Created { number: 1 })
        }
    }

    fn default_triggers() -> Triggers {
        Triggers::new(DEFAULT_CODEGEN_PATTERN, DEFAULT_DRY_RUN_PATTERN, DEFAULT_LABEL).unwrap()
    }

    fn setup(triggers: Triggers) -> (Arc<FakeReview>, Arc<FakeRunner>, Arc<Dispatcher>) {
        let review = Arc::new(FakeReview::new());
        let runner = Arc::new(FakeRunner::default());
        let dispatcher = Arc::new(Dispatcher::new(triggers, review.clone(), runner.clone()));
        (review, runner, dispatcher)
    }

    fn comment(action: &str, body: &str, is_pr: bool) -> Event {
        Event::parse(ISSUE_COMMENT_EVENT, &issue_comment_payload(action, body, is_pr)).unwrap()
    }

    fn merged(action: &str, merged: bool, labels: &[&str]) -> Event {
        let sha = merged.then_some("abc123");
        Event::parse(PULL_REQUEST_EVENT, &pull_request_payload(action, merged, sha, labels))
            .unwrap()
    }

    #[tokio::test]
    async fn test_codegen_comment_adds_label() {
        let (review, runner, dispatcher) = setup(default_triggers());
        let action = dispatcher
            .handle(comment("created", "/codegen", true))
            .await
            .unwrap();
        assert_eq!(action, Action::LabelAdded { number: 42 });
        assert_eq!(review.labels(), vec![(42, "post-merge/codegen".to_string())]);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_comment_runs() {
        let (review, runner, dispatcher) = setup(default_triggers());
        review.add_pull_request(
            "acme/tenants",
            PullRequest {
                number: 42,
                merge_sha: Some("abc123".into()),
                ..Default::default()
            },
        );

        let action = dispatcher
            .handle(comment("created", "/codegen-dryrun", true))
            .await
            .unwrap();
        assert_eq!(action, Action::Published(PublishOutcome::Created { number: 1 }));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.org, "acme");
        assert_eq!(calls[0].0.name, "tenants");
        assert_eq!(calls[0].0.merge_sha, "abc123");
        assert_eq!(calls[0].1, PullRequestModifier::DryRun);
        assert!(review.labels().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_without_merge_commit() {
        let (review, runner, dispatcher) = setup(default_triggers());
        review.add_pull_request(
            "acme/tenants",
            PullRequest {
                number: 42,
                ..Default::default()
            },
        );

        let action = dispatcher
            .handle(comment("created", "/codegen-dryrun", true))
            .await
            .unwrap();
        assert!(matches!(action, Action::Ignored(_)));
        assert!(runner.calls.lock().unwrap().is_empty());

        review.fail("get_pull_request");
        let err = dispatcher
            .handle(comment("created", "/codegen-dryrun", true))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PullRequest { number: 42, .. }));
    }

    #[tokio::test]
    async fn test_ignored_comments() {
        let (review, runner, dispatcher) = setup(default_triggers());
        for event in [
            comment("edited", "/codegen", true),
            comment("deleted", "/codegen", true),
            comment("created", "/codegen", false),
            comment("created", "looks good to me", true),
            comment("created", "run /codegen please", true),
        ] {
            let action = dispatcher.handle(event).await.unwrap();
            assert!(matches!(action, Action::Ignored(_)), "{action:?}");
        }
        assert!(review.labels().is_empty());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_label_failure() {
        let (review, _runner, dispatcher) = setup(default_triggers());
        review.fail("add_label");
        let err = dispatcher
            .handle(comment("created", "/codegen", true))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::AddLabel { .. }));
    }

    #[tokio::test]
    async fn test_merged_and_labeled_pull_request_deploys() {
        let (_review, runner, dispatcher) = setup(default_triggers());
        for action in ["closed", "labeled"] {
            let result = dispatcher
                .handle(merged(action, true, &["bug", "post-merge/codegen"]))
                .await
                .unwrap();
            assert_eq!(result, Action::Published(PublishOutcome::Created { number: 1 }));
        }

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.org, "acme");
        assert_eq!(calls[0].0.pull_request_number, 42);
        assert!(calls.iter().all(|(_, m)| *m == PullRequestModifier::Deploy));
    }

    #[tokio::test]
    async fn test_ignored_pull_requests() {
        let (_review, runner, dispatcher) = setup(default_triggers());
        for event in [
            merged("opened", true, &["post-merge/codegen"]),
            merged("synchronize", true, &["post-merge/codegen"]),
            merged("closed", false, &["post-merge/codegen"]),
            merged("closed", true, &["bug"]),
            Event::Other("push".into()),
        ] {
            let action = dispatcher.handle(event).await.unwrap();
            assert!(matches!(action, Action::Ignored(_)), "{action:?}");
        }
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_triggers() {
        let triggers = Triggers::new(r"(?m)^/deploy$", r"(?m)^/deploy-dry$", "deploy-me").unwrap();
        let (review, runner, dispatcher) = setup(triggers);

        dispatcher
            .handle(comment("created", "/deploy", true))
            .await
            .unwrap();
        assert_eq!(review.labels(), vec![(42, "deploy-me".to_string())]);

        let action = dispatcher
            .handle(merged("closed", true, &["post-merge/codegen"]))
            .await
            .unwrap();
        assert!(matches!(action, Action::Ignored(_)));
        dispatcher
            .handle(merged("closed", true, &["deploy-me"]))
            .await
            .unwrap();
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_runs_are_serialized() {
        let (review, runner, dispatcher) = setup(default_triggers());
        review.add_pull_request(
            "acme/tenants",
            PullRequest {
                number: 42,
                merge_sha: Some("abc123".into()),
                ..Default::default()
            },
        );

        let handles = vec![
            dispatcher.dispatch(merged("closed", true, &["post-merge/codegen"]), "1".into()),
            dispatcher.dispatch(merged("labeled", true, &["post-merge/codegen"]), "2".into()),
            dispatcher.dispatch(comment("created", "/codegen-dryrun", true), "3".into()),
        ];
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(runner.calls.lock().unwrap().len(), 3);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        assert!(!dispatcher.run_lock().is_held());
    }

    #[tokio::test]
    async fn test_run_lock() {
        let lock = RunLock::new();
        assert!(!lock.is_held());
        let permit = lock.acquire().await.unwrap();
        assert!(lock.is_held());
        drop(permit);
        assert!(!lock.is_held());
    }
}
