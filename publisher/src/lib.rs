//! Publishes generated tenant artifacts as pull requests on a downstream
//! repository, driven by GitHub webhooks on the upstream repository.

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod git;
pub mod metrics_defs;
pub mod modifier;
pub mod orchestrator;
pub mod review;
pub mod triggers;
pub mod types;
pub mod webhook;

#[cfg(test)]
mod testutils;

use crate::dispatcher::Dispatcher;
use crate::git::LocalGitFactory;
use crate::orchestrator::{Publisher, PublisherSettings};
use crate::review::{GitHubClient, ReviewClient, ReviewError};
use crate::webhook::WebhookService;
use generator::{Codegen, CodegenError, Matcher};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ValidationError),

    #[error("GitHub client error: {0}")]
    Review(#[from] ReviewError),

    #[error("codegen setup failed: {0}")]
    Codegen(#[from] CodegenError),
}

/// Secrets read from the files named in [`config::GitHubConfig`].
pub struct Credentials {
    pub token: String,
    pub webhook_secret: String,
}

pub async fn run(config: config::Config, credentials: Credentials) -> Result<(), PublisherError> {
    config.validate()?;
    let triggers = config.triggers.build()?;

    let review = Arc::new(GitHubClient::new(
        config.github.api_url.clone(),
        credentials.token.clone(),
        config.github.dry_run,
    )?);
    let bot = review.bot_user().await?;
    tracing::info!(login = %bot.login, dry_run = config.github.dry_run, "Authenticated with GitHub");

    let git = Arc::new(LocalGitFactory::new(
        config.github.web_url.clone(),
        bot.login.clone(),
        credentials.token,
    ));
    let codegen = Arc::new(Codegen::new(Matcher::new(config.selector.missing_key))?);
    let settings = PublisherSettings {
        downstream: config.downstream.repo.clone(),
        target_branch: config.downstream.target_branch.clone(),
        email: config.github.email.clone(),
        web_url: config.github.web_url.to_string(),
    };
    let publisher = Arc::new(Publisher::new(git, review.clone(), codegen, bot, settings));
    let dispatcher = Arc::new(Dispatcher::new(triggers, review, publisher));

    let webhook_service = WebhookService::new(credentials.webhook_secret, dispatcher);
    let admin_service = AdminService::<_, PublisherError>::new(|| true);

    let webhook_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        webhook_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );
    tokio::try_join!(webhook_task, admin_task)?;
    Ok(())
}
