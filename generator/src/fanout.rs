use crate::metrics_defs::GENERATION_DURATION;
use crate::model::{Account, RenderedArtifact, ResourceKind, TenantTuple};
use crate::render::{RenderError, Renderer};
use crate::selector::Matcher;
use crate::template::TemplateError;
use crate::writer::{ArtifactWriter, WriteError};
use shared::histogram;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Generated tenant artifacts live under this directory of the downstream repository.
pub const TENANTS_OUTPUT_DIR: &str = "_output/tenants";

#[derive(thiserror::Error, Debug)]
pub enum CodegenError {
    #[error("failed to load built-in templates: {0}")]
    Templates(#[from] TemplateError),

    #[error("tenant {tenant_id:?} ({env}): {source}")]
    Render {
        tenant_id: String,
        env: String,
        #[source]
        source: RenderError,
    },

    #[error("failed to write artifacts: {0}")]
    Write(#[from] WriteError),

    #[error("tenant {tenant_id:?} ({env}) declares {kind} resources, which are not implemented")]
    NotImplemented {
        tenant_id: String,
        env: String,
        kind: ResourceKind,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub output_dir: PathBuf,
    pub artifacts: usize,
    pub purged: usize,
    pub indexes: usize,
}

/// Expands every declared resource into one artifact per matching account.
pub struct Codegen {
    renderer: Renderer,
    matcher: Matcher,
}

impl Codegen {
    pub fn new(matcher: Matcher) -> Result<Self, CodegenError> {
        Ok(Codegen {
            renderer: Renderer::builtin()?,
            matcher,
        })
    }

    pub fn with_renderer(renderer: Renderer, matcher: Matcher) -> Self {
        Codegen { renderer, matcher }
    }

    /// Renders all artifacts in input order without touching the filesystem.
    ///
    /// Iteration is tenants, then resources, then accounts, exactly as given,
    /// so identical input always yields an identical list. The first failure
    /// aborts the whole plan.
    pub fn plan(
        &self,
        accounts: &[Account],
        tenants: &[TenantTuple],
    ) -> Result<Vec<RenderedArtifact>, CodegenError> {
        let mut artifacts = Vec::new();

        for tuple in tenants {
            let Some(config) = &tuple.resource_config else {
                continue;
            };

            if let Some(kubernetes) = &config.kubernetes
                && !kubernetes.namespaces.is_empty()
            {
                return Err(CodegenError::NotImplemented {
                    tenant_id: tuple.tenant_id.clone(),
                    env: tuple.env.clone(),
                    kind: ResourceKind::KubernetesNamespace,
                });
            }

            for bucket in &config.buckets {
                for account in accounts {
                    if !self.matcher.matches(&account.tags, &bucket.selector, &tuple.env) {
                        continue;
                    }

                    let artifact = self
                        .renderer
                        .render_bucket(&tuple.tenant_id, bucket, account)
                        .map_err(|source| CodegenError::Render {
                            tenant_id: tuple.tenant_id.clone(),
                            env: tuple.env.clone(),
                            source,
                        })?;
                    artifacts.push(artifact);
                }
            }
        }

        Ok(artifacts)
    }

    /// Regenerates `<dst_dir>/_output/tenants` from the given accounts and tenants.
    pub fn fan_out(
        &self,
        dst_dir: &Path,
        accounts: &[Account],
        tenants: &[TenantTuple],
    ) -> Result<GenerationSummary, CodegenError> {
        let start = Instant::now();
        let output_dir = dst_dir.join(TENANTS_OUTPUT_DIR);

        let artifacts = self.plan(accounts, tenants)?;
        let writer = ArtifactWriter::new(&output_dir)?;
        let written = writer.write_all(&artifacts)?;

        let elapsed = start.elapsed();
        histogram!(GENERATION_DURATION).record(elapsed.as_secs_f64());
        tracing::info!(
            output_dir = %output_dir.display(),
            artifacts = written.written.len(),
            purged = written.purged,
            duration_ms = elapsed.as_millis() as u64,
            "Fan-out completed"
        );

        Ok(GenerationSummary {
            output_dir,
            artifacts: written.written.len(),
            purged: written.purged,
            indexes: written.indexes.len(),
        })
    }
}
