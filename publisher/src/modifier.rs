//! Variants of the downstream pull request a run produces.

use crate::types::DownstreamRepo;
use std::fmt;

/// Presentation and lifecycle of one variant. Plain data so the orchestrator
/// never branches on the variant itself.
#[derive(Debug, PartialEq, Eq)]
pub struct ModifierBehavior {
    pub title_tag: &'static str,
    pub branch_suffix: &'static str,
    pub post_comment_prefix: &'static str,
    pub noop_prefix: &'static str,
    /// Close the pull request right after it was opened.
    pub tear_down: bool,
}

const DEPLOY: ModifierBehavior = ModifierBehavior {
    title_tag: "[Auto-generated] ",
    branch_suffix: "",
    post_comment_prefix: "⭐ Auto-generated a PR: ",
    noop_prefix: "",
    tear_down: false,
};

const DRY_RUN: ModifierBehavior = ModifierBehavior {
    title_tag: "[DO-NOT-MERGE] ",
    branch_suffix: "-dryrun",
    post_comment_prefix: "🧪 Auto-generated a DRYRUN PR: ",
    noop_prefix: "[DRYRUN] ",
    tear_down: true,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PullRequestModifier {
    Deploy,
    DryRun,
}

impl PullRequestModifier {
    pub const fn behavior(self) -> &'static ModifierBehavior {
        match self {
            PullRequestModifier::Deploy => &DEPLOY,
            PullRequestModifier::DryRun => &DRY_RUN,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PullRequestModifier::Deploy => "deploy",
            PullRequestModifier::DryRun => "dry_run",
        }
    }

    pub fn title_tag(self) -> &'static str {
        self.behavior().title_tag
    }

    pub fn branch_suffix(self) -> &'static str {
        self.behavior().branch_suffix
    }

    pub fn post_comment_prefix(self) -> &'static str {
        self.behavior().post_comment_prefix
    }

    pub fn tear_down(self) -> bool {
        self.behavior().tear_down
    }

    pub fn noop_message(self, downstream: &DownstreamRepo) -> String {
        format!(
            "⏹️ {}No changes on cloud resources detected. Skip creating downstream {}/{} PR",
            self.behavior().noop_prefix,
            downstream.org,
            downstream.name
        )
    }
}

impl fmt::Display for PullRequestModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
