//! Per-invocation configuration
//!
//! Built once from the command line and passed by reference into every
//! operation. Nothing here is mutated after construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::crd::NetworkingConfig;
use crate::error::{Result, ShortcutError};

pub const DEFAULT_TENANT_PREFIX: &str = "liqo-tenant";
pub const DEFAULT_CREDENTIAL_PREFIX: &str = "kubeconfig-controlplane";
pub const DEFAULT_CREDENTIAL_KEY: &str = "kubeconfig";
pub const DEFAULT_MANIFEST_REF: &str =
    "https://github.com/scal110/foreign_cluster_connector/config/default";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How manifests are submitted to clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplierKind {
    /// Local `kubectl` process
    #[default]
    Kubectl,
    /// In-process server-side apply
    Native,
}

/// Settings shared by every command of one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kubeconfig of the primary cluster (`None` = kube default resolution)
    pub kubeconfig: Option<PathBuf>,
    /// Prefix of the tenant namespace holding a cluster's credential
    pub tenant_prefix: String,
    /// Prefix of the credential secret name
    pub credential_prefix: String,
    /// Key of the payload inside the credential secret
    pub credential_key: String,
    /// Directory where decoded credentials are materialized
    pub scratch_dir: PathBuf,
    /// Reference to the control-plane kustomization
    pub manifest_ref: String,
    pub applier: ApplierKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            tenant_prefix: DEFAULT_TENANT_PREFIX.to_string(),
            credential_prefix: DEFAULT_CREDENTIAL_PREFIX.to_string(),
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            scratch_dir: std::env::temp_dir(),
            manifest_ref: DEFAULT_MANIFEST_REF.to_string(),
            applier: ApplierKind::default(),
        }
    }
}

impl Settings {
    /// Namespace holding the bootstrap credential of `cluster`
    pub fn credential_namespace(&self, cluster: &str) -> String {
        format!("{}-{}", self.tenant_prefix, cluster)
    }

    /// Name of the bootstrap credential secret of `cluster`
    pub fn credential_secret(&self, cluster: &str) -> String {
        format!("{}-{}", self.credential_prefix, cluster)
    }
}

/// Parameters of a create request
#[derive(Debug, Clone)]
pub struct ShortcutRequest {
    pub endpoint_a: String,
    pub endpoint_b: String,
    pub namespace: String,
    pub networking: NetworkingConfig,
}

impl ShortcutRequest {
    pub fn new(endpoint_a: impl Into<String>, endpoint_b: impl Into<String>) -> Self {
        Self {
            endpoint_a: endpoint_a.into(),
            endpoint_b: endpoint_b.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            networking: NetworkingConfig::default(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn networking(mut self, networking: NetworkingConfig) -> Self {
        self.networking = networking;
        self
    }
}

/// Connect to the primary cluster.
pub async fn primary_client(settings: &Settings) -> Result<Client> {
    match &settings.kubeconfig {
        Some(path) => client_from_path(path).await,
        None => {
            let mut config = Config::infer()
                .await
                .map_err(|e| ShortcutError::config(format!("unable to infer kubeconfig: {}", e)))?;
            config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
            config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
            Client::try_from(config)
                .map_err(|e| ShortcutError::config(format!("unable to create client: {}", e)))
        }
    }
}

/// Build a client from a kubeconfig file (default context).
pub async fn client_from_path(path: &Path) -> Result<Client> {
    debug!(path = ?path, "Loading kubeconfig");
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        ShortcutError::config(format!("unable to read kubeconfig {}: {}", path.display(), e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            ShortcutError::config(format!("unable to load kubeconfig {}: {}", path.display(), e))
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config)
        .map_err(|e| ShortcutError::config(format!("unable to create client: {}", e)))
}

/// Name of the user bound to the active context of the operator's kubeconfig.
pub fn operator_identity(kubeconfig: Option<&Path>) -> Result<String> {
    let config = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path),
        None => Kubeconfig::read(),
    }
    .map_err(|e| ShortcutError::config(format!("unable to read kubeconfig: {}", e)))?;

    identity_from_kubeconfig(&config)
}

fn identity_from_kubeconfig(config: &Kubeconfig) -> Result<String> {
    let current = config
        .current_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ShortcutError::config("kubeconfig has no current context"))?;

    let context = config
        .contexts
        .iter()
        .find(|c| c.name == current)
        .ok_or_else(|| ShortcutError::config(format!("context {:?} not found in kubeconfig", current)))?;

    // Read through the serialized form: the optionality of context fields
    // differs between kubeconfig schema revisions.
    let value = serde_json::to_value(context)
        .map_err(|e| ShortcutError::config(format!("invalid context {:?}: {}", current, e)))?;

    value
        .pointer("/context/user")
        .and_then(|u| u.as_str())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ShortcutError::config(format!("context {:?} has no user", current)))
}
