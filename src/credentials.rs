//! Bootstrap credential broker
//!
//! Fetches the control-plane kubeconfig Liqo keeps for each foreign cluster
//! and materializes it as a short-lived file. The file lives exactly as long
//! as the [`Credential`] guard: it is wiped and deleted when the guard is
//! dropped, on success and error paths alike.

use std::fs;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::Kubeconfig;
use kube::Client;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::{self, Settings};
use crate::error::{Result, ShortcutError};

/// Source of credential secrets on the primary cluster
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

/// Secrets served by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecrets {
    client: Client,
}

impl KubeSecrets {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| ShortcutError::remote(format!("get secret {}/{}", namespace, name), e))
    }
}

/// A decoded bootstrap credential written to disk.
///
/// Dropping the guard overwrites the file; the inner [`TempPath`] then
/// removes it.
pub struct Credential {
    cluster: String,
    path: TempPath,
}

impl Credential {
    fn materialize(cluster: &str, dir: &Path, payload: &[u8]) -> Result<Self> {
        let prefix = format!("kubeconfig-{}-", cluster);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".yaml");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o600));
        }

        let mut file = builder.tempfile_in(dir)?;
        file.write_all(payload)?;
        file.flush()?;
        let path = file.into_temp_path();

        debug!(cluster = %cluster, path = ?path, "Materialized credential");
        Ok(Self {
            cluster: cluster.to_string(),
            path,
        })
    }

    /// Cluster this credential grants access to
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Location of the kubeconfig file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Client for the remote cluster addressed by this credential.
    pub async fn client(&self) -> Result<Client> {
        config::client_from_path(self.path()).await
    }

    fn wipe(path: &Path) -> std::io::Result<()> {
        let size = fs::metadata(path)?.len() as usize;
        fs::write(path, vec![0u8; size])
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("cluster", &self.cluster)
            .field("path", &self.path.to_path_buf())
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        match Self::wipe(&self.path) {
            Ok(()) => debug!(cluster = %self.cluster, path = ?self.path, "Releasing credential file"),
            Err(e) => warn!(path = ?self.path, error = %e, "Failed to overwrite credential file"),
        }
    }
}

/// Fetches per-cluster bootstrap credentials from the primary cluster
pub struct CredentialBroker<S> {
    store: S,
    settings: Settings,
}

impl<S: SecretStore> CredentialBroker<S> {
    pub fn new(store: S, settings: &Settings) -> Self {
        Self {
            store,
            settings: settings.clone(),
        }
    }

    /// Fetch, decode and materialize the credential of `cluster`.
    ///
    /// Nothing is written to disk unless the payload decodes to a kubeconfig.
    pub async fn fetch(&self, cluster: &str) -> Result<Credential> {
        let namespace = self.settings.credential_namespace(cluster);
        let name = self.settings.credential_secret(cluster);
        let key = &self.settings.credential_key;

        let secret = self
            .store
            .get(&namespace, &name)
            .await?
            .ok_or_else(|| ShortcutError::SecretNotFound {
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        let payload = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| bytes.0.as_slice())
            .ok_or_else(|| ShortcutError::Decode {
                cluster: cluster.to_string(),
                reason: format!("secret {}/{} has no {:?} entry", namespace, name, key),
            })?;

        let text = std::str::from_utf8(payload).map_err(|e| ShortcutError::Decode {
            cluster: cluster.to_string(),
            reason: format!("payload is not UTF-8: {}", e),
        })?;

        Kubeconfig::from_yaml(text).map_err(|e| ShortcutError::Decode {
            cluster: cluster.to_string(),
            reason: format!("payload is not a kubeconfig: {}", e),
        })?;

        let credential = Credential::materialize(cluster, &self.settings.scratch_dir, payload)?;
        info!(cluster = %cluster, secret = %format!("{}/{}", namespace, name), "Fetched bootstrap credential");
        Ok(credential)
    }
}
