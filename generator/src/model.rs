use crate::selector::SelectorError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Account tags. Ordered so that anything derived from them is stable across runs.
pub type Tags = BTreeMap<String, String>;

/// Cloud providers an account can live in.
///
/// Unknown names are rejected while the account config is loaded, so a
/// misspelled provider never reaches the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub enum CloudProvider {
    Aws,
    Gcp,
}

impl CloudProvider {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported cloud provider: {0}")]
pub struct UnsupportedProvider(pub String);

impl FromStr for CloudProvider {
    type Err = UnsupportedProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(CloudProvider::Aws),
            "gcp" => Ok(CloudProvider::Gcp),
            other => Err(UnsupportedProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for CloudProvider {
    type Error = UnsupportedProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub cloud_provider: CloudProvider,
    pub account_id: String,
    #[serde(default)]
    pub tags: Tags,
}

/// Operators a selector requirement can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    /// Any operator name this version does not know. Never matches.
    #[serde(other)]
    Unknown,
}

impl Operator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Exists => "Exists",
            Operator::DoesNotExist => "DoesNotExist",
            Operator::Unknown => "Unknown",
        }
    }

    const fn takes_values(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

#[derive(Deserialize)]
struct RawRequirement {
    key: String,
    operator: Operator,
    #[serde(default)]
    values: Vec<String>,
}

/// A single tag predicate. `In`/`NotIn` always carry at least one value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRequirement")]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    pub fn new<K, V>(key: K, operator: Operator, values: V) -> Result<Self, SelectorError>
    where
        K: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        let key = key.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if operator.takes_values() && values.is_empty() {
            return Err(SelectorError::EmptyValues { key, operator });
        }
        Ok(Requirement {
            key,
            operator,
            values,
        })
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Requirement {
            key: key.into(),
            operator: Operator::Exists,
            values: Vec::new(),
        }
    }

    pub fn does_not_exist(key: impl Into<String>) -> Self {
        Requirement {
            key: key.into(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl TryFrom<RawRequirement> for Requirement {
    type Error = SelectorError;

    fn try_from(raw: RawRequirement) -> Result<Self, Self::Error> {
        Requirement::new(raw.key, raw.operator, raw.values)
    }
}

/// Conjunction of requirements. An empty selector matches every account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn new(requirements: Vec<Requirement>) -> Self {
        Selector { requirements }
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Returns a copy of this selector with one more requirement appended.
    pub fn and(&self, requirement: Requirement) -> Self {
        let mut requirements = self.requirements.clone();
        requirements.push(requirement);
        Selector { requirements }
    }

    /// Rejects operators that parsed as [`Operator::Unknown`].
    pub fn validate(&self) -> Result<(), SelectorError> {
        match self
            .requirements
            .iter()
            .find(|req| req.operator == Operator::Unknown)
        {
            Some(req) => Err(SelectorError::UnknownOperator {
                key: req.key.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub selector: Selector,
}

/// Kubernetes namespaces a tenant wants. Declared in the config format but not
/// rendered yet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Kubernetes {
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub selector: Selector,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub kubernetes: Option<Kubernetes>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceConfigError {
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("bucket name {0:?} is not a single path segment")]
    InvalidBucketName(String),
}

impl Bucket {
    /// Bucket names end up in output file names.
    fn validate_name(&self) -> Result<(), ResourceConfigError> {
        let name = self.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ResourceConfigError::InvalidBucketName(self.name.clone()));
        }
        Ok(())
    }
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<(), ResourceConfigError> {
        for bucket in &self.buckets {
            bucket.validate_name()?;
            bucket.selector.validate()?;
        }
        if let Some(kubernetes) = &self.kubernetes {
            kubernetes.selector.validate()?;
        }
        Ok(())
    }
}

/// One (tenant, environment) pair discovered in the upstream repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantTuple {
    pub tenant_id: String,
    pub env: String,
    pub resource_config: Option<ResourceConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Bucket,
    KubernetesNamespace,
}

impl ResourceKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bucket => "bucket",
            ResourceKind::KubernetesNamespace => "kubernetes-namespace",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered manifest for one (tenant, account, region, resource) combination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub tenant_id: String,
    pub cloud_provider: CloudProvider,
    pub account_id: String,
    pub region: String,
    pub kind: ResourceKind,
    pub resource_name: String,
    /// Directory template relative to the output root, e.g.
    /// `{{ tenant_id }}/{{ cloud_provider }}-{{ account_id }}/{{ region }}`.
    pub directory_template: String,
    pub content: String,
}

impl RenderedArtifact {
    pub fn file_name(&self) -> String {
        format!("{}-{}.yaml", self.kind, self.resource_name)
    }
}

impl fmt::Display for RenderedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} for tenant {:?} in {}-{} ({})",
            self.kind,
            self.resource_name,
            self.tenant_id,
            self.cloud_provider,
            self.account_id,
            self.region
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_provider_parsing() {
        assert_eq!("aws".parse::<CloudProvider>(), Ok(CloudProvider::Aws));
        assert_eq!("gcp".parse::<CloudProvider>(), Ok(CloudProvider::Gcp));
        assert_eq!(
            "azure".parse::<CloudProvider>(),
            Err(UnsupportedProvider("azure".into()))
        );

        let err = serde_yaml::from_str::<Account>("cloud_provider: azure\naccount_id: '1'\n")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported cloud provider: azure"));
    }

    #[test]
    fn test_requirement_deserialization() {
        let req: Requirement =
            serde_yaml::from_str("{key: tier, operator: In, values: [gold, silver]}").unwrap();
        assert_eq!(req.key(), "tier");
        assert_eq!(req.operator(), Operator::In);
        assert_eq!(req.values(), ["gold", "silver"]);

        let req: Requirement = serde_yaml::from_str("{key: pci, operator: Exists}").unwrap();
        assert_eq!(req.operator(), Operator::Exists);
        assert!(req.values().is_empty());

        // In/NotIn without values is rejected
        let err = serde_yaml::from_str::<Requirement>("{key: tier, operator: NotIn}").unwrap_err();
        assert!(err.to_string().contains("tier"));

        // Unknown operators parse, but fail validation
        let req: Requirement =
            serde_yaml::from_str("{key: tier, operator: GreaterThan, values: ['1']}").unwrap();
        assert_eq!(req.operator(), Operator::Unknown);
        assert_eq!(
            Selector::new(vec![req]).validate(),
            Err(SelectorError::UnknownOperator { key: "tier".into() })
        );
    }

    #[test]
    fn test_resource_config_deserialization() {
        let yaml = r#"
buckets:
  - name: foo-logs
    region: us-west-2
    selector:
      - key: tier
        operator: In
        values: [gold]
  - name: foo-assets
    region: eu-central-1
kubernetes:
  namespaces: [foo1, foo2]
"#;
        let config: ResourceConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.buckets.len(), 2);
        assert_eq!(config.buckets[0].selector.requirements().len(), 1);
        assert!(config.buckets[1].selector.is_empty());
        assert_eq!(
            config.kubernetes.unwrap().namespaces,
            vec!["foo1".to_string(), "foo2".to_string()]
        );
    }

    #[test]
    fn test_bucket_names_are_single_segments() {
        let config = |name: &str| ResourceConfig {
            buckets: vec![Bucket {
                name: name.into(),
                region: "us-east-1".into(),
                selector: Selector::default(),
            }],
            kubernetes: None,
        };

        assert!(config("foo-logs.v2").validate().is_ok());
        for name in ["", ".", "..", "../../etc/passwd", "a/b", "a\\b"] {
            assert_eq!(
                config(name).validate(),
                Err(ResourceConfigError::InvalidBucketName(name.into())),
                "{name:?}"
            );
        }
    }

    #[test]
    fn test_artifact_file_name() {
        let artifact = RenderedArtifact {
            tenant_id: "foo".into(),
            cloud_provider: CloudProvider::Aws,
            account_id: "123".into(),
            region: "us-east-1".into(),
            kind: ResourceKind::Bucket,
            resource_name: "foo-logs".into(),
            directory_template: String::new(),
            content: String::new(),
        };
        assert_eq!(artifact.file_name(), "bucket-foo-logs.yaml");
    }
}
