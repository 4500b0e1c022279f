//! Reads the declarative input of the upstream configuration repository.
//!
//! ```text
//! <root>/infra/account.yaml                   -> accounts
//! <root>/tenants/<tenant>/<env>/resource.yaml -> one TenantTuple each
//! ```

use crate::model::{Account, ResourceConfig, ResourceConfigError, TenantTuple};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const INFRA_DIR: &str = "infra";
pub const TENANTS_DIR: &str = "tenants";
pub const ACCOUNT_CONFIG_FILE: &str = "account.yaml";
pub const RESOURCE_CONFIG_FILE: &str = "resource.yaml";

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("{ACCOUNT_CONFIG_FILE} not found at {}", .0.display())]
    MissingAccounts(PathBuf),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid resource config in {}: {source}", path.display())]
    InvalidResourceConfig {
        path: PathBuf,
        #[source]
        source: ResourceConfigError,
    },

    #[error("failed to walk directory tree: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Deserialize)]
struct AccountConfig {
    #[serde(default)]
    accounts: Vec<Account>,
}

/// Parsed content of an upstream checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub accounts: Vec<Account>,
    pub tenants: Vec<TenantTuple>,
}

pub fn load_upstream(root: &Path) -> Result<UpstreamConfig, LoadError> {
    let accounts = load_accounts(&root.join(INFRA_DIR))?;
    let tenants = load_tenants(&root.join(TENANTS_DIR))?;
    tracing::info!(
        accounts = accounts.len(),
        tenants = tenants.len(),
        "Loaded upstream config"
    );
    Ok(UpstreamConfig { accounts, tenants })
}

pub fn load_accounts(infra_dir: &Path) -> Result<Vec<Account>, LoadError> {
    let path = infra_dir.join(ACCOUNT_CONFIG_FILE);
    let exists = path.try_exists().map_err(|source| LoadError::Io {
        path: path.clone(),
        source,
    })?;
    if !exists {
        return Err(LoadError::MissingAccounts(path));
    }

    let config: AccountConfig = read_yaml(&path)?;
    Ok(config.accounts)
}

/// Collects every `<tenant>/<env>/resource.yaml` below `tenants_dir`, sorted
/// by tenant and environment. Files at any other depth are ignored.
pub fn load_tenants(tenants_dir: &Path) -> Result<Vec<TenantTuple>, LoadError> {
    let exists = tenants_dir.try_exists().map_err(|source| LoadError::Io {
        path: tenants_dir.to_path_buf(),
        source,
    })?;
    if !exists {
        return Ok(Vec::new());
    }

    let mut tenants = Vec::new();
    for entry in WalkDir::new(tenants_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != RESOURCE_CONFIG_FILE {
            continue;
        }

        let relative = entry.path().strip_prefix(tenants_dir).unwrap_or(entry.path());
        let Some((tenant_id, env)) = tenant_and_env(relative) else {
            tracing::debug!(path = %entry.path().display(), "Skipping file outside the tenant layout");
            continue;
        };

        let resource_config: ResourceConfig = read_yaml(entry.path())?;
        resource_config
            .validate()
            .map_err(|source| LoadError::InvalidResourceConfig {
                path: entry.path().to_path_buf(),
                source,
            })?;

        tenants.push(TenantTuple {
            tenant_id,
            env,
            resource_config: Some(resource_config),
        });
    }

    tenants.sort_by(|a, b| (&a.tenant_id, &a.env).cmp(&(&b.tenant_id, &b.env)));
    Ok(tenants)
}

fn tenant_and_env(relative: &Path) -> Option<(String, String)> {
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;

    match parts.as_slice() {
        [tenant_id, env, _file] => Some((tenant_id.to_string(), env.to_string())),
        _ => None,
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
