//! Foreign cluster registry
//!
//! Read-only view over the ForeignCluster records of the primary cluster.

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, info};

use crate::crd::{ClusterIdentity, ForeignCluster, REMOTE_CLUSTER_ID_LABEL};
use crate::error::{Result, ShortcutError};

const RESOURCE: &str = "foreignclusters";

/// Backing store for ForeignCluster records
#[async_trait]
pub trait ForeignClusterStore: Send + Sync {
    /// List records, optionally filtered by a label selector (`key=value`).
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<ForeignCluster>>;

    /// Fetch a record by name; `None` when it is not registered.
    async fn get(&self, name: &str) -> Result<Option<ForeignCluster>>;

    /// Fail with `Schema` when the ForeignCluster type is not served at all.
    async fn ensure_served(&self) -> Result<()>;
}

/// ForeignCluster records served by the Kubernetes API
#[derive(Clone)]
pub struct KubeForeignClusters {
    api: Api<ForeignCluster>,
}

impl KubeForeignClusters {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ForeignClusterStore for KubeForeignClusters {
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<ForeignCluster>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }

        let list = self
            .api
            .list(&params)
            .await
            .map_err(|e| ShortcutError::from_list(RESOURCE, e))?;
        Ok(list.items)
    }

    async fn get(&self, name: &str) -> Result<Option<ForeignCluster>> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| ShortcutError::remote(format!("get foreigncluster {}", name), e))
    }

    async fn ensure_served(&self) -> Result<()> {
        self.api
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ShortcutError::from_list(RESOURCE, e))?;
        Ok(())
    }
}

/// Discovers and queries foreign cluster identities
#[derive(Clone)]
pub struct ClusterRegistry<S> {
    store: S,
}

impl<S: ForeignClusterStore> ClusterRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// All registered foreign clusters, in list order. Empty is not an error.
    pub async fn discover_all(&self) -> Result<Vec<ClusterIdentity>> {
        let clusters: Vec<ClusterIdentity> = self
            .store
            .list(None)
            .await?
            .iter()
            .map(ClusterIdentity::from)
            .collect();

        info!(count = clusters.len(), "Discovered foreign clusters");
        Ok(clusters)
    }

    /// Look a cluster up by its identifier label.
    ///
    /// When several records carry the same identifier the first one in list
    /// order wins.
    pub async fn exists_by_id(&self, cluster_id: &str) -> Result<Option<String>> {
        let selector = format!("{}={}", REMOTE_CLUSTER_ID_LABEL, cluster_id);
        let matches = self.store.list(Some(&selector)).await?;

        if matches.len() > 1 {
            debug!(
                cluster_id = %cluster_id,
                count = matches.len(),
                "Multiple foreign clusters share an identifier, using the first"
            );
        }

        Ok(matches.first().map(|fc| ClusterIdentity::from(fc).name))
    }

    /// Fetch a registered cluster, failing with `EndpointNotFound` otherwise.
    ///
    /// A lookup miss is only reported as a missing endpoint once the resource
    /// type itself is known to be served.
    pub async fn get(&self, name: &str) -> Result<ClusterIdentity> {
        match self.store.get(name).await? {
            Some(fc) => Ok(ClusterIdentity::from(&fc)),
            None => {
                self.store.ensure_served().await?;
                Err(ShortcutError::EndpointNotFound {
                    name: name.to_string(),
                })
            }
        }
    }
}
