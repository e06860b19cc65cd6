//! Component definition data model.
//!
//! A [`ComponentDefinition`] is the declarative description of a pipeline
//! component handed to the runtime by the job queue: which image to run (or
//! build), how much memory and CPU it may use, which network mode it gets,
//! and how long it may run. It is parsed once and never mutated; resolvers
//! and the limit calculator only borrow it.

use serde::{Deserialize, Serialize};

use crate::builder::BuildRecipe;

/// Feature flag: swap is disabled for the container (swap limit equals the
/// memory limit).
pub const FEATURE_NO_SWAP: &str = "no-swap";

/// Feature flag: the container keeps the image's root user instead of the
/// default non-root mapping.
pub const FEATURE_CONTAINER_ROOT_USER: &str = "container-root-user";

/// Feature flag: scalar configuration parameters are injected as
/// `KBC_PARAMETER_*` environment variables.
pub const FEATURE_INJECT_ENVIRONMENT: &str = "inject-environment-parameters";

/// The source and auth scheme of a container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryKind {
    #[serde(rename = "dockerhub")]
    DockerHub,
    #[serde(rename = "dockerhub-private")]
    DockerHubPrivate,
    #[serde(rename = "quayio")]
    QuayIo,
    #[serde(rename = "quayio-private")]
    QuayIoPrivate,
    #[serde(rename = "aws-ecr")]
    AwsEcr,
    #[serde(rename = "builder")]
    Builder,
}

impl RegistryKind {
    /// Whether a login is required before pulling.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            RegistryKind::DockerHubPrivate | RegistryKind::QuayIoPrivate | RegistryKind::AwsEcr
        )
    }

    /// Fixed login server for the registry, if it has one. AWS ECR servers
    /// are derived from the image URI instead.
    pub fn server(&self) -> Option<&'static str> {
        match self {
            RegistryKind::QuayIo | RegistryKind::QuayIoPrivate => Some("quay.io"),
            _ => None,
        }
    }
}

/// Network mode for the sandboxed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    None,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::None => "none",
        }
    }

    /// Parses a runtime override value. Anything other than the two
    /// supported modes is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bridge" => Some(NetworkMode::Bridge),
            "none" => Some(NetworkMode::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for a private registry, supplied with the definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryCredentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "#password", default)]
    pub password: Option<String>,
}

/// Log transport declared by the component. The wire format itself is an
/// external collaborator's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingKind {
    #[default]
    Standard,
    Gelf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(rename = "type", default)]
    pub kind: LoggingKind,
}

/// Where the component reads and writes its working data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagingKind {
    #[default]
    Local,
    Workspace,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingStorageConfig {
    #[serde(default)]
    pub input: StagingKind,
    #[serde(default)]
    pub output: StagingKind,
}

/// Declarative description of one pipeline component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Component id, e.g. `acme.csv-extractor`.
    pub id: String,

    /// Registry kind the image comes from.
    #[serde(rename = "type")]
    pub registry: RegistryKind,

    /// Image URI without tag or digest.
    pub uri: String,

    #[serde(default)]
    pub tag: Option<String>,

    /// Content digest; takes precedence over the tag when present.
    #[serde(default)]
    pub digest: Option<String>,

    /// Credentials for private pulls.
    #[serde(default)]
    pub repository: Option<RegistryCredentials>,

    /// Memory quota as an engine-style size string, e.g. `"256m"`.
    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u64,

    #[serde(default)]
    pub network: NetworkMode,

    /// Wall-clock seconds before the container is hard-killed.
    #[serde(default = "default_process_timeout")]
    pub process_timeout: u64,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub staging_storage: StagingStorageConfig,

    /// Feature flags, e.g. `no-swap` or `container-root-user`.
    #[serde(default)]
    pub features: Vec<String>,

    /// Build recipe for `builder` components.
    #[serde(default)]
    pub build_options: Option<BuildRecipe>,
}

fn default_memory() -> String {
    "256m".to_string()
}

fn default_cpu_shares() -> u64 {
    1024
}

fn default_process_timeout() -> u64 {
    3600
}

impl ComponentDefinition {
    /// Fully qualified image reference: digest pin wins over tag, a bare
    /// URI defaults to `latest`.
    pub fn image_reference(&self) -> String {
        if let Some(digest) = &self.digest {
            format!("{}@{}", self.uri, digest)
        } else if let Some(tag) = &self.tag {
            format!("{}:{}", self.uri, tag)
        } else {
            format!("{}:latest", self.uri)
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}
