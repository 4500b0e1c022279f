use crate::model::{Operator, Requirement, Selector, Tags};
use serde::Deserialize;

/// Tag that carries an account's environment. Checked against the tenant's
/// environment before any explicit requirement.
pub const ENV_TAG: &str = "env";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("requirement on {key:?} uses {operator:?} but lists no values")]
    EmptyValues { key: String, operator: Operator },

    #[error("requirement on {key:?} uses an unknown operator")]
    UnknownOperator { key: String },
}

/// How `In`/`NotIn` treat an account that lacks the requirement's tag key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// `In` fails and `NotIn` holds when the key is missing.
    #[default]
    Reject,
    /// Both `In` and `NotIn` hold when the key is missing.
    Accept,
}

/// Decides which accounts a declared resource applies to.
///
/// Pure and side-effect free; one instance is shared across a whole fan-out run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Matcher {
    missing_key: MissingKeyPolicy,
}

impl Matcher {
    pub const fn new(missing_key: MissingKeyPolicy) -> Self {
        Matcher { missing_key }
    }

    pub const fn missing_key_policy(&self) -> MissingKeyPolicy {
        self.missing_key
    }

    /// True when the account's environment fits `tenant_env` and every
    /// requirement in `selector` holds.
    pub fn matches(&self, tags: &Tags, selector: &Selector, tenant_env: &str) -> bool {
        if !env_matches(tags, tenant_env) {
            return false;
        }

        selector
            .requirements()
            .iter()
            .all(|req| self.requirement_matches(tags, req))
    }

    fn requirement_matches(&self, tags: &Tags, req: &Requirement) -> bool {
        let tag_value = tags.get(req.key());
        let contains = |value: &String| req.values().iter().any(|v| v == value);

        match (req.operator(), tag_value) {
            (Operator::Exists, value) => value.is_some(),
            (Operator::DoesNotExist, value) => value.is_none(),
            (Operator::In, Some(value)) => contains(value),
            (Operator::In, None) => self.missing_key == MissingKeyPolicy::Accept,
            (Operator::NotIn, Some(value)) => !contains(value),
            (Operator::NotIn, None) => true,
            (Operator::Unknown, _) => false,
        }
    }
}

/// An account without an `env` tag is shared by every environment.
pub fn env_matches(tags: &Tags, tenant_env: &str) -> bool {
    match tags.get(ENV_TAG) {
        None => true,
        Some(env) => env.is_empty() || env == tenant_env,
    }
}

/// Matches with the default (fail-closed) missing-key policy.
pub fn matches(tags: &Tags, selector: &Selector, tenant_env: &str) -> bool {
    Matcher::default().matches(tags, selector, tenant_env)
}
