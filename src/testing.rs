//! In-memory stand-ins for the cluster-facing seams, shared by unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;

use crate::apply::{ApplyTarget, DeclarativeApplier, ManifestBundle};
use crate::clusters::ForeignClusterStore;
use crate::config::Settings;
use crate::credentials::SecretStore;
use crate::crd::{
    ConnectionPhase, ForeignCluster, ForeignClusterConnection, ForeignClusterConnectionSpec,
    ForeignClusterConnectionStatus, ForeignClusterSpec, NetworkingConfig, REMOTE_CLUSTER_ID_LABEL,
};
use crate::error::{Result, ShortcutError};
use crate::shortcuts::{connection_name, ConnectionStore};

/// A minimal kubeconfig accepted by the credential decoder
pub const KUBECONFIG: &str = r#"apiVersion: v1
kind: Config
current-context: remote
clusters:
- name: remote
  cluster:
    server: https://10.0.0.1:6443
contexts:
- name: remote
  context:
    cluster: remote
    user: remote-admin
users:
- name: remote-admin
  user:
    token: secret-token
"#;

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("fake {}", reason),
        reason: reason.to_string(),
        code,
    })
}

pub fn settings_in(scratch_dir: &Path) -> Settings {
    Settings {
        scratch_dir: scratch_dir.to_path_buf(),
        ..Settings::default()
    }
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// A declaration for `(a, b)` under its derived name, with no status yet.
pub fn connection(namespace: &str, a: &str, b: &str) -> ForeignClusterConnection {
    let mut conn = ForeignClusterConnection::new(
        &connection_name(a, b),
        ForeignClusterConnectionSpec {
            foreign_cluster_a: a.to_string(),
            foreign_cluster_b: b.to_string(),
            networking: NetworkingConfig::default(),
        },
    );
    conn.metadata.namespace = Some(namespace.to_string());
    conn
}

/// The bootstrap credential secret of `cluster` under default naming.
pub fn kubeconfig_secret(cluster: &str, payload: &str) -> Secret {
    let settings = Settings::default();
    Secret {
        metadata: ObjectMeta {
            name: Some(settings.credential_secret(cluster)),
            namespace: Some(settings.credential_namespace(cluster)),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            settings.credential_key.clone(),
            ByteString(payload.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    }
}

#[derive(Default)]
struct ClusterState {
    items: Vec<ForeignCluster>,
    list_error: Option<kube::Error>,
}

#[derive(Clone, Default)]
pub struct FakeClusters {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeClusters {
    /// Registry holding `names`, each with identifier `id-<name>`.
    pub fn with(names: &[&str]) -> Self {
        let fake = Self::default();
        for name in names {
            fake.add_with_id(name, &format!("id-{}", name));
        }
        fake
    }

    pub fn add_with_id(&self, name: &str, cluster_id: &str) {
        let mut fc = ForeignCluster::new(
            name,
            ForeignClusterSpec {
                cluster_id: cluster_id.to_string(),
            },
        );
        fc.labels_mut()
            .insert(REMOTE_CLUSTER_ID_LABEL.to_string(), cluster_id.to_string());
        self.state.lock().unwrap().items.push(fc);
    }

    /// Fail the next list (or type check) with `error`.
    pub fn fail_list(&self, error: kube::Error) {
        self.state.lock().unwrap().list_error = Some(error);
    }
}

#[async_trait]
impl ForeignClusterStore for FakeClusters {
    async fn list(&self, label_selector: Option<&str>) -> Result<Vec<ForeignCluster>> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.list_error.take() {
            return Err(ShortcutError::from_list("foreignclusters", error));
        }

        let filter = label_selector.and_then(|s| s.split_once('='));
        Ok(state
            .items
            .iter()
            .filter(|fc| match filter {
                Some((key, value)) => fc.labels().get(key).map(String::as_str) == Some(value),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<Option<ForeignCluster>> {
        let state = self.state.lock().unwrap();
        Ok(state.items.iter().find(|fc| fc.name_any() == name).cloned())
    }

    async fn ensure_served(&self) -> Result<()> {
        match self.state.lock().unwrap().list_error.take() {
            Some(error) => Err(ShortcutError::from_list("foreignclusters", error)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct ConnectionState {
    items: Vec<ForeignClusterConnection>,
    gets: u32,
    creates: u32,
    deletes: u32,
    connect_after: Option<u32>,
    stale_list: bool,
    racer: Option<ForeignClusterConnection>,
}

/// Connection store that records traffic.
///
/// `gets` counts reads that found a declaration, i.e. convergence polls.
#[derive(Clone, Default)]
pub struct FakeConnections {
    state: Arc<Mutex<ConnectionState>>,
}

impl FakeConnections {
    pub fn insert(&self, connection: ForeignClusterConnection) {
        self.state.lock().unwrap().items.push(connection);
    }

    pub fn items(&self) -> Vec<ForeignClusterConnection> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn gets(&self) -> u32 {
        self.state.lock().unwrap().gets
    }

    pub fn creates(&self) -> u32 {
        self.state.lock().unwrap().creates
    }

    pub fn deletes(&self) -> u32 {
        self.state.lock().unwrap().deletes
    }

    /// Report declarations connected from the `reads`-th successful read on.
    pub fn connect_after(&self, reads: u32) {
        self.state.lock().unwrap().connect_after = Some(reads);
    }

    /// Make `list` return an empty snapshot while reads still see the items.
    pub fn stale_list(&self) {
        self.state.lock().unwrap().stale_list = true;
    }

    /// Have another writer store `connection` just before the next create lands.
    pub fn race_on_create(&self, connection: ForeignClusterConnection) {
        self.state.lock().unwrap().racer = Some(connection);
    }

    pub fn set_status(&self, name: &str, phase: ConnectionPhase, is_connected: bool) {
        let mut state = self.state.lock().unwrap();
        for conn in state.items.iter_mut().filter(|c| c.name_any() == name) {
            conn.status = Some(ForeignClusterConnectionStatus { phase, is_connected });
        }
    }
}

#[async_trait]
impl ConnectionStore for FakeConnections {
    async fn list(&self) -> Result<Vec<ForeignClusterConnection>> {
        let state = self.state.lock().unwrap();
        if state.stale_list {
            return Ok(Vec::new());
        }
        Ok(state.items.clone())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ForeignClusterConnection>> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .items
            .iter()
            .position(|c| c.namespace().as_deref() == Some(namespace) && c.name_any() == name);
        let Some(index) = position else {
            return Ok(None);
        };

        state.gets += 1;
        if state.connect_after.is_some_and(|n| state.gets >= n) {
            state.items[index].status = Some(ForeignClusterConnectionStatus {
                phase: ConnectionPhase::Connected,
                is_connected: true,
            });
        }
        Ok(Some(state.items[index].clone()))
    }

    async fn create(&self, connection: &ForeignClusterConnection) -> Result<ForeignClusterConnection> {
        let mut state = self.state.lock().unwrap();
        if let Some(racer) = state.racer.take() {
            state.items.push(racer);
        }
        let namespace = connection.namespace().unwrap_or_default();
        let name = connection.name_any();
        if state
            .items
            .iter()
            .any(|c| c.namespace().unwrap_or_default() == namespace && c.name_any() == name)
        {
            return Err(ShortcutError::AlreadyExists { namespace, name });
        }

        state.creates += 1;
        state.items.push(connection.clone());
        Ok(connection.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.deletes += 1;
        state
            .items
            .retain(|c| !(c.namespace().as_deref() == Some(namespace) && c.name_any() == name));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeSecrets {
    items: Arc<Mutex<Vec<Secret>>>,
}

impl FakeSecrets {
    pub fn insert(&self, secret: Secret) {
        self.items.lock().unwrap().push(secret);
    }
}

#[async_trait]
impl SecretStore for FakeSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.namespace().as_deref() == Some(namespace) && s.name_any() == name)
            .cloned())
    }
}

/// One submission seen by [`FakeApplier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCall {
    pub action: &'static str,
    /// `primary` or the remote cluster name
    pub target: String,
    pub documents: usize,
    /// Whether the remote credential file existed during the call
    pub credential_on_disk: bool,
    /// Entries in the scratch directory during the call
    pub scratch_files: usize,
}

#[derive(Default)]
pub struct FakeApplier {
    calls: Mutex<Vec<AppliedCall>>,
    bundles: Mutex<Vec<ManifestBundle>>,
    fail_on: Option<String>,
    scratch_dir: Option<PathBuf>,
}

impl FakeApplier {
    pub fn watching(scratch_dir: &Path) -> Self {
        Self {
            scratch_dir: Some(scratch_dir.to_path_buf()),
            ..Self::default()
        }
    }

    /// Fail every submission targeting `target` (`primary` or a cluster name).
    pub fn failing_on(mut self, target: &str) -> Self {
        self.fail_on = Some(target.to_string());
        self
    }

    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bundles(&self) -> Vec<ManifestBundle> {
        self.bundles.lock().unwrap().clone()
    }

    fn record(&self, action: &'static str, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        let (name, credential_on_disk) = match target {
            ApplyTarget::Primary => ("primary".to_string(), false),
            ApplyTarget::Remote(credential) => {
                (credential.cluster().to_string(), credential.path().exists())
            }
        };
        let scratch_files = self.scratch_dir.as_deref().map(file_count).unwrap_or(0);

        self.calls.lock().unwrap().push(AppliedCall {
            action,
            target: name.clone(),
            documents: bundle.len(),
            credential_on_disk,
            scratch_files,
        });
        self.bundles.lock().unwrap().push(bundle.clone());

        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(ShortcutError::remote_apply(target.label(), "forbidden"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeclarativeApplier for FakeApplier {
    async fn apply(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        self.record("apply", target, bundle)
    }

    async fn remove(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        self.record("remove", target, bundle)
    }
}
