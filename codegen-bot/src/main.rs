mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use generator::{Codegen, CodegenError, LoadError, Matcher, MissingKeyPolicy, load_upstream};
use metrics_exporter_statsd::StatsdBuilder;
use publisher::{Credentials, PublisherError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "codegen_bot";

#[derive(Parser)]
#[command(version, about = "Publishes generated tenant infrastructure as pull requests")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve GitHub webhooks
    Serve {
        #[arg(long)]
        config: PathBuf,
    },
    /// Generate artifacts from a local checkout of the upstream repository
    Generate {
        #[arg(long)]
        upstream: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Let `In`/`NotIn` requirements hold for accounts lacking the key
        #[arg(long)]
        accept_missing_keys: bool,
        #[arg(long, default_value = config::DEFAULT_LOG_LEVEL)]
        log_level: String,
    },
}

#[derive(thiserror::Error, Debug)]
enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not read secret {path}: {source}")]
    Secret {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("secret file {0} is empty")]
    EmptySecret(PathBuf),

    #[error("could not install metrics exporter: {0}")]
    Metrics(String),

    #[error(transparent)]
    Publisher(#[from] PublisherError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::Serve { config } => serve(&config),
        CliCommand::Generate {
            upstream,
            output,
            accept_missing_keys,
            log_level,
        } => {
            let _sentry = init_logging(&LoggingConfig {
                level: log_level,
                sentry_dsn: None,
            });
            let policy = match accept_missing_keys {
                true => MissingKeyPolicy::Accept,
                false => MissingKeyPolicy::Reject,
            };
            generate(&upstream, &output, policy)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "codegen-bot failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn serve(path: &Path) -> Result<(), BotError> {
    let config = Config::from_file(path)?;
    let logging = config.common.logging.unwrap_or_default();
    let _sentry = init_logging(&logging);
    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let credentials = Credentials {
        token: read_secret(&config.publisher.github.token_file)?,
        webhook_secret: read_secret(&config.publisher.github.webhook_secret_file)?,
    };

    tracing::info!(
        downstream = %config.publisher.downstream.repo,
        target_branch = %config.publisher.downstream.target_branch,
        "Starting codegen-bot"
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(publisher::run(config.publisher, credentials))?;
    Ok(())
}

fn generate(upstream: &Path, output: &Path, policy: MissingKeyPolicy) -> Result<(), BotError> {
    let config = load_upstream(upstream)?;
    let codegen = Codegen::new(Matcher::new(policy))?;
    let summary = codegen.fan_out(output, &config.accounts, &config.tenants)?;
    tracing::info!(
        output = %summary.output_dir.display(),
        artifacts = summary.artifacts,
        purged = summary.purged,
        indexes = summary.indexes,
        "Generated artifacts"
    );
    Ok(())
}

/// Installs the global subscriber. The returned guard flushes Sentry on drop.
fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_LEVEL));

    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();
    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), BotError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|err| BotError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|_| BotError::Metrics("a recorder is already installed".into()))?;

    shared::metrics_defs::describe_all(generator::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(publisher::metrics_defs::ALL_METRICS);
    tracing::info!(host = %config.statsd_host, port = config.statsd_port, "Metrics exporter installed");
    Ok(())
}

/// Reads a secret file, dropping the trailing newline.
fn read_secret(path: &Path) -> Result<String, BotError> {
    let secret = std::fs::read_to_string(path).map_err(|source| BotError::Secret {
        path: path.to_path_buf(),
        source,
    })?;
    let secret = secret.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        return Err(BotError::EmptySecret(path.to_path_buf()));
    }
    Ok(secret.to_string())
}
