use crate::orchestrator::DEFAULT_WEB_URL;
use crate::triggers::{DEFAULT_CODEGEN_PATTERN, DEFAULT_DRY_RUN_PATTERN, DEFAULT_LABEL, Triggers};
use crate::types::DownstreamRepo;
use generator::MissingKeyPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.github.com/";
pub const DEFAULT_TARGET_BRANCH: &str = "main";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener share {0}")]
    SharedListener(String),

    #[error("Empty target branch")]
    EmptyTargetBranch,

    #[error("Empty trigger label")]
    EmptyLabel,

    #[error("Invalid trigger pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Publisher configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Receives GitHub webhook deliveries
    pub listener: Listener,
    /// Serves /health and /ready
    pub admin_listener: Listener,
    pub github: GitHubConfig,
    /// Repository the generated pull requests are opened against
    pub downstream: DownstreamConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ValidationError::SharedListener(format!(
                "{}:{}",
                self.listener.host, self.listener.port
            )));
        }

        if self.downstream.target_branch.is_empty() {
            return Err(ValidationError::EmptyTargetBranch);
        }

        self.triggers.build()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GitHubConfig {
    /// REST API root
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    /// Root that repositories are cloned from and pull request links point to
    #[serde(default = "default_web_url")]
    pub web_url: Url,
    /// File holding the bot's API token
    pub token_file: PathBuf,
    /// File holding the shared webhook secret
    pub webhook_secret_file: PathBuf,
    /// Commit email. Falls back to the bot account's public email.
    #[serde(default)]
    pub email: Option<String>,
    /// Log mutating API calls instead of issuing them
    #[serde(default)]
    pub dry_run: bool,
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default API URL is valid")
}

fn default_web_url() -> Url {
    Url::parse(DEFAULT_WEB_URL).expect("default web URL is valid")
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DownstreamConfig {
    /// `<org>/<name>`
    pub repo: DownstreamRepo,
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
}

fn default_target_branch() -> String {
    DEFAULT_TARGET_BRANCH.to_string()
}

/// Comment commands and the marker label. Patterns are regular expressions
/// matched against the whole comment body.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    pub codegen: String,
    pub dry_run: String,
    pub label: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            codegen: DEFAULT_CODEGEN_PATTERN.to_string(),
            dry_run: DEFAULT_DRY_RUN_PATTERN.to_string(),
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl TriggerConfig {
    pub fn build(&self) -> Result<Triggers, ValidationError> {
        if self.label.is_empty() {
            return Err(ValidationError::EmptyLabel);
        }
        Ok(Triggers::new(&self.codegen, &self.dry_run, &self.label)?)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SelectorConfig {
    #[serde(default)]
    pub missing_key: MissingKeyPolicy,
}
