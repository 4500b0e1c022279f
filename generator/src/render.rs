use crate::model::{Account, Bucket, CloudProvider, RenderedArtifact, ResourceKind};
use crate::region::to_gcp_region;
use crate::template::{Context, Template, TemplateError};
use std::collections::BTreeMap;

const AWS_BUCKET_TEMPLATE: &str = include_str!("../templates/aws-bucket.yaml.tpl");
const GCP_BUCKET_TEMPLATE: &str = include_str!("../templates/gcp-bucket.yaml.tpl");

/// Where artifacts land relative to the tenants output root.
pub const DEFAULT_DIRECTORY_TEMPLATE: &str =
    "{{ tenant_id }}/{{ cloud_provider }}-{{ account_id }}/{{ region }}";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unsupported cloud provider: {0}")]
    UnsupportedProvider(CloudProvider),

    #[error("failed to render {kind} {name:?}: {source}")]
    Template {
        kind: ResourceKind,
        name: String,
        #[source]
        source: TemplateError,
    },
}

/// Templates one cloud provider renders with.
#[derive(Clone, Debug)]
pub struct ProviderTemplates {
    pub bucket: Template,
    pub directory: String,
}

/// Maps each supported provider to its templates.
#[derive(Clone, Debug)]
pub struct Renderer {
    providers: BTreeMap<CloudProvider, ProviderTemplates>,
}

impl Renderer {
    pub fn new(providers: BTreeMap<CloudProvider, ProviderTemplates>) -> Self {
        Renderer { providers }
    }

    /// Renderer with the templates shipped in this crate.
    pub fn builtin() -> Result<Self, TemplateError> {
        let providers = BTreeMap::from([
            (
                CloudProvider::Aws,
                ProviderTemplates {
                    bucket: Template::parse("aws-bucket", AWS_BUCKET_TEMPLATE)?,
                    directory: DEFAULT_DIRECTORY_TEMPLATE.to_string(),
                },
            ),
            (
                CloudProvider::Gcp,
                ProviderTemplates {
                    bucket: Template::parse("gcp-bucket", GCP_BUCKET_TEMPLATE)?,
                    directory: DEFAULT_DIRECTORY_TEMPLATE.to_string(),
                },
            ),
        ]);
        Ok(Renderer::new(providers))
    }

    pub fn supports(&self, provider: CloudProvider) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn render_bucket(
        &self,
        tenant_id: &str,
        bucket: &Bucket,
        account: &Account,
    ) -> Result<RenderedArtifact, RenderError> {
        let templates = self
            .providers
            .get(&account.cloud_provider)
            .ok_or(RenderError::UnsupportedProvider(account.cloud_provider))?;

        let context = Context::new()
            .with("name", &bucket.name)
            .with("region", &bucket.region)
            .with("gcp_region", to_gcp_region(&bucket.region))
            .with("tenant_id", tenant_id)
            .with("account_id", &account.account_id)
            .with("cloud_provider", account.cloud_provider.as_str());

        let content = templates
            .bucket
            .render(&context)
            .map_err(|source| RenderError::Template {
                kind: ResourceKind::Bucket,
                name: bucket.name.clone(),
                source,
            })?;

        Ok(RenderedArtifact {
            tenant_id: tenant_id.to_string(),
            cloud_provider: account.cloud_provider,
            account_id: account.account_id.clone(),
            region: bucket.region.clone(),
            kind: ResourceKind::Bucket,
            resource_name: bucket.name.clone(),
            directory_template: templates.directory.clone(),
            content,
        })
    }
}
