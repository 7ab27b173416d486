//! Shortcut registry
//!
//! CRUD over ForeignClusterConnection declarations. A declaration links an
//! unordered pair of foreign clusters: `(a, b)` and `(b, a)` are the same
//! shortcut and never coexist.

use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clusters::{ClusterRegistry, ForeignClusterStore};
use crate::config::ShortcutRequest;
use crate::convergence::{Convergence, ConvergenceWatcher, DEFAULT_POLL_INTERVAL};
use crate::crd::{ConnectionPhase, ForeignClusterConnection, ForeignClusterConnectionSpec};
use crate::error::{api_code, Result, ShortcutError};

const RESOURCE: &str = "foreignclusterconnections";

/// Deterministic declaration name for a pair of endpoints.
///
/// Lower-cased, underscores mapped to hyphens, endpoints joined by `-`.
pub fn connection_name(endpoint_a: &str, endpoint_b: &str) -> String {
    format!("{}-{}", endpoint_a, endpoint_b)
        .replace('_', "-")
        .to_lowercase()
}

/// Backing store for connection declarations
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// All declarations across namespaces.
    async fn list(&self) -> Result<Vec<ForeignClusterConnection>>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ForeignClusterConnection>>;

    async fn create(&self, connection: &ForeignClusterConnection) -> Result<ForeignClusterConnection>;

    /// Request deletion; returns without waiting for finalization.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Declarations served by the Kubernetes API
#[derive(Clone)]
pub struct KubeConnections {
    client: Client,
}

impl KubeConnections {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced(&self, namespace: &str) -> Api<ForeignClusterConnection> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConnectionStore for KubeConnections {
    async fn list(&self) -> Result<Vec<ForeignClusterConnection>> {
        let api: Api<ForeignClusterConnection> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ShortcutError::from_list(RESOURCE, e))?;
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ForeignClusterConnection>> {
        self.namespaced(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ShortcutError::remote(format!("get connection {}/{}", namespace, name), e))
    }

    async fn create(&self, connection: &ForeignClusterConnection) -> Result<ForeignClusterConnection> {
        let namespace = connection.namespace().unwrap_or_default();
        let name = connection.name_any();

        self.namespaced(&namespace)
            .create(&PostParams::default(), connection)
            .await
            .map_err(|e| match api_code(&e) {
                Some(409) => ShortcutError::AlreadyExists {
                    namespace: namespace.clone(),
                    name: name.clone(),
                },
                _ => ShortcutError::remote(format!("create connection {}/{}", namespace, name), e),
            })
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if api_code(&e) == Some(404) => {
                debug!(namespace = %namespace, name = %name, "Connection already gone");
                Ok(())
            }
            Err(e) => Err(ShortcutError::remote(
                format!("delete connection {}/{}", namespace, name),
                e,
            )),
        }
    }
}

/// Result of a create request
#[derive(Debug, Clone)]
pub struct CreateReport {
    pub connection: ForeignClusterConnection,
    /// False when an existing declaration for the pair was returned
    pub created: bool,
    /// Set when the request asked to wait for convergence
    pub convergence: Option<Convergence>,
}

/// Manages pairwise connection declarations
pub struct ShortcutRegistry<C, S> {
    clusters: ClusterRegistry<C>,
    store: S,
    poll_interval: Duration,
}

impl<C, S> ShortcutRegistry<C, S>
where
    C: ForeignClusterStore,
    S: ConnectionStore + Clone,
{
    pub fn new(clusters: ClusterRegistry<C>, store: S) -> Self {
        Self {
            clusters,
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Point-in-time snapshot of all declarations.
    pub async fn list(&self) -> Result<Vec<ForeignClusterConnection>> {
        self.store.list().await
    }

    /// The declaration linking `a` and `b`, in either order.
    pub async fn find(&self, a: &str, b: &str) -> Result<Option<ForeignClusterConnection>> {
        Ok(self.store.list().await?.into_iter().find(|c| c.links(a, b)))
    }

    /// Declare a shortcut between two registered foreign clusters.
    ///
    /// An existing declaration for the pair is returned unchanged, whatever
    /// its phase. A name taken by a different pair fails with `AlreadyExists`.
    pub async fn create(
        &self,
        request: &ShortcutRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateReport> {
        let (a, b) = (request.endpoint_a.as_str(), request.endpoint_b.as_str());

        for endpoint in [a, b] {
            self.clusters.get(endpoint).await?;
        }

        if let Some(existing) = self.find(a, b).await? {
            return Ok(Self::reuse(existing));
        }

        let name = connection_name(a, b);
        let namespace = request.namespace.as_str();

        // The list above may predate a concurrent create of the same pair.
        if let Some(taken) = self.store.get(namespace, &name).await? {
            return Self::claim(taken, a, b);
        }

        let mut declaration = ForeignClusterConnection::new(
            &name,
            ForeignClusterConnectionSpec {
                foreign_cluster_a: a.to_string(),
                foreign_cluster_b: b.to_string(),
                networking: request.networking.clone(),
            },
        );
        declaration.metadata.namespace = Some(namespace.to_string());

        let connection = match self.store.create(&declaration).await {
            Ok(connection) => connection,
            Err(ShortcutError::AlreadyExists { .. }) => {
                let taken = self.store.get(namespace, &name).await?.ok_or_else(|| {
                    ShortcutError::AlreadyExists {
                        namespace: namespace.to_string(),
                        name: name.clone(),
                    }
                })?;
                return Self::claim(taken, a, b);
            }
            Err(e) => return Err(e),
        };
        info!(namespace = %namespace, name = %name, "Connection declared");

        let convergence = if request.networking.wait {
            let watcher =
                ConvergenceWatcher::new(self.store.clone()).with_poll_interval(self.poll_interval);
            Some(
                watcher
                    .wait(namespace, &name, request.networking.timeout_seconds, cancel)
                    .await?,
            )
        } else {
            None
        };

        Ok(CreateReport {
            connection,
            created: true,
            convergence,
        })
    }

    /// Report an existing declaration for the requested pair as a no-op.
    fn reuse(existing: ForeignClusterConnection) -> CreateReport {
        if existing.phase() == ConnectionPhase::Failed {
            warn!(
                name = %existing.name_any(),
                "Connection already declared but failed; delete it to retry"
            );
        } else {
            info!(
                name = %existing.name_any(),
                phase = %existing.phase(),
                "Connection already declared"
            );
        }
        CreateReport {
            connection: existing,
            created: false,
            convergence: None,
        }
    }

    /// Resolve a name clash: the same pair is a no-op, any other pair is a collision.
    fn claim(taken: ForeignClusterConnection, a: &str, b: &str) -> Result<CreateReport> {
        if taken.links(a, b) {
            return Ok(Self::reuse(taken));
        }
        Err(ShortcutError::AlreadyExists {
            namespace: taken.namespace().unwrap_or_default(),
            name: taken.name_any(),
        })
    }

    /// Request deletion of the declaration linking `a` and `b`.
    ///
    /// Teardown is carried out asynchronously by the connector controller.
    pub async fn delete(&self, a: &str, b: &str) -> Result<ForeignClusterConnection> {
        let existing = self
            .find(a, b)
            .await?
            .ok_or_else(|| ShortcutError::DeclarationNotFound {
                endpoint_a: a.to_string(),
                endpoint_b: b.to_string(),
            })?;

        let namespace = existing.namespace().unwrap_or_default();
        let name = existing.name_any();
        self.store.delete(&namespace, &name).await?;

        info!(namespace = %namespace, name = %name, "Connection deletion requested");
        Ok(existing)
    }

    /// Re-attach a convergence wait to an existing declaration.
    pub async fn wait(
        &self,
        connection: &ForeignClusterConnection,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let namespace = connection.namespace().unwrap_or_default();
        ConvergenceWatcher::new(self.store.clone())
            .with_poll_interval(self.poll_interval)
            .wait(&namespace, &connection.name_any(), attempts, cancel)
            .await
    }
}
