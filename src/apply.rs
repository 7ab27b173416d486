//! Declarative manifest submission
//!
//! Two appliers sit behind [`DeclarativeApplier`]: a `kubectl` process fed
//! through stdin, and an in-process server-side apply driven by API
//! discovery. Both target either the primary cluster or a remote cluster
//! addressed by a materialized [`Credential`].

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::credentials::Credential;
use crate::error::{api_code, Result, ShortcutError};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "liqo-shortcut";

/// A set of resources submitted as one unit
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestBundle {
    /// Inline resource documents, applied in order
    Documents(Vec<Value>),
    /// Reference to a kustomization (directory or remote URL)
    Kustomization(String),
}

impl ManifestBundle {
    /// Render inline documents as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String> {
        match self {
            ManifestBundle::Documents(docs) => {
                let mut out = String::new();
                for doc in docs {
                    let rendered = serde_yaml::to_string(doc).map_err(|e| {
                        ShortcutError::remote_apply("manifest", format!("cannot render document: {}", e))
                    })?;
                    out.push_str("---\n");
                    out.push_str(&rendered);
                }
                Ok(out)
            }
            ManifestBundle::Kustomization(reference) => Err(ShortcutError::remote_apply(
                "manifest",
                format!("kustomization {} has no inline rendering", reference),
            )),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ManifestBundle::Documents(docs) => docs.len(),
            ManifestBundle::Kustomization(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cluster a bundle is submitted to
#[derive(Debug, Clone, Copy)]
pub enum ApplyTarget<'a> {
    Primary,
    Remote(&'a Credential),
}

impl ApplyTarget<'_> {
    /// Human-readable name used in errors and logs
    pub fn label(&self) -> String {
        match self {
            ApplyTarget::Primary => "primary cluster".to_string(),
            ApplyTarget::Remote(credential) => format!("cluster {}", credential.cluster()),
        }
    }
}

/// Idempotent create-or-update and delete of manifest bundles
#[async_trait]
pub trait DeclarativeApplier: Send + Sync {
    async fn apply(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()>;

    /// Delete the bundle's resources; resources already absent are not an error.
    async fn remove(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()>;
}

/// Submits bundles through a local `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlApplier {
    program: PathBuf,
    leading_args: Vec<String>,
    primary_kubeconfig: Option<PathBuf>,
}

impl KubectlApplier {
    pub fn new(primary_kubeconfig: Option<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("kubectl"),
            leading_args: Vec::new(),
            primary_kubeconfig,
        }
    }

    /// Run a different program, with `leading_args` placed before kubectl's own.
    pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    async fn run(&self, verb: &str, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        let label = target.label();
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);

        match target {
            ApplyTarget::Primary => {
                if let Some(path) = &self.primary_kubeconfig {
                    command.arg("--kubeconfig").arg(path);
                }
            }
            ApplyTarget::Remote(credential) => {
                command.arg("--kubeconfig").arg(credential.path());
            }
        }

        command.arg(verb);
        let stdin = match bundle {
            ManifestBundle::Kustomization(reference) => {
                command.arg("-k").arg(reference);
                None
            }
            ManifestBundle::Documents(_) => {
                command.arg("-f").arg("-");
                Some(bundle.to_yaml()?)
            }
        };
        if verb == "delete" {
            command.arg("--ignore-not-found");
        }

        debug!(target = %label, verb = %verb, "Running kubectl");

        let mut child = command
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ShortcutError::remote_apply(&label, format!("cannot run kubectl: {}", e)))?;

        if let (Some(yaml), Some(mut pipe)) = (stdin, child.stdin.take()) {
            match pipe.write_all(yaml.as_bytes()).await {
                Ok(()) => {}
                // kubectl exited without reading; its status and stderr tell why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(target = %label, "kubectl closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            debug!(target = %label, verb = %verb, "kubectl succeeded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ShortcutError::remote_apply(
                label,
                format!("kubectl {} failed: {}", verb, stderr.trim()),
            ))
        }
    }
}

#[async_trait]
impl DeclarativeApplier for KubectlApplier {
    async fn apply(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        self.run("apply", target, bundle).await
    }

    async fn remove(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        self.run("delete", target, bundle).await
    }
}

/// Identity of one inline document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl DocumentRef {
    pub fn parse(doc: &Value) -> std::result::Result<Self, String> {
        let kind = doc
            .get("kind")
            .and_then(Value::as_str)
            .ok_or("document has no kind")?;
        let api_version = doc
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or("document has no apiVersion")?;
        let name = doc
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or("document has no metadata.name")?;
        let namespace = doc
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));

        Ok(Self {
            gvk: GroupVersionKind::gvk(group, version, kind),
            name: name.to_string(),
            namespace,
        })
    }
}

/// Submits inline bundles with server-side apply
#[derive(Clone)]
pub struct KubeApplier {
    primary: Client,
}

impl KubeApplier {
    pub fn new(primary: Client) -> Self {
        Self { primary }
    }

    async fn connect(&self, target: ApplyTarget<'_>) -> Result<Client> {
        match target {
            ApplyTarget::Primary => Ok(self.primary.clone()),
            ApplyTarget::Remote(credential) => credential.client().await,
        }
    }

    async fn resolve(
        &self,
        target: ApplyTarget<'_>,
        bundle: &ManifestBundle,
    ) -> Result<Vec<(Api<DynamicObject>, DocumentRef, Value)>> {
        let label = target.label();
        let docs = match bundle {
            ManifestBundle::Documents(docs) => docs,
            ManifestBundle::Kustomization(reference) => {
                return Err(ShortcutError::remote_apply(
                    label,
                    format!("kustomization {} requires the kubectl applier", reference),
                ))
            }
        };

        let client = self.connect(target).await?;
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map_err(|e| ShortcutError::remote_apply(&label, format!("API discovery failed: {}", e)))?;

        let mut resolved = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc_ref =
                DocumentRef::parse(doc).map_err(|reason| ShortcutError::remote_apply(&label, reason))?;
            let (resource, caps) = discovery.resolve_gvk(&doc_ref.gvk).ok_or_else(|| {
                ShortcutError::remote_apply(
                    &label,
                    format!("unknown resource type {:?}", doc_ref.gvk),
                )
            })?;

            let api = match (&caps.scope, &doc_ref.namespace) {
                (Scope::Namespaced, Some(ns)) => {
                    Api::namespaced_with(client.clone(), ns, &resource)
                }
                (Scope::Namespaced, None) => Api::default_namespaced_with(client.clone(), &resource),
                (Scope::Cluster, _) => Api::all_with(client.clone(), &resource),
            };
            resolved.push((api, doc_ref, doc.clone()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl DeclarativeApplier for KubeApplier {
    async fn apply(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        let label = target.label();
        let params = PatchParams::apply(FIELD_MANAGER).force();

        for (api, doc_ref, doc) in self.resolve(target, bundle).await? {
            api.patch(&doc_ref.name, &params, &Patch::Apply(&doc))
                .await
                .map_err(|e| {
                    ShortcutError::remote_apply(
                        &label,
                        format!("apply {} {}: {}", doc_ref.gvk.kind, doc_ref.name, e),
                    )
                })?;
            debug!(target = %label, kind = %doc_ref.gvk.kind, name = %doc_ref.name, "Applied");
        }
        Ok(())
    }

    async fn remove(&self, target: ApplyTarget<'_>, bundle: &ManifestBundle) -> Result<()> {
        let label = target.label();

        for (api, doc_ref, _) in self.resolve(target, bundle).await?.into_iter().rev() {
            match api.delete(&doc_ref.name, &DeleteParams::default()).await {
                Ok(_) => debug!(target = %label, kind = %doc_ref.gvk.kind, name = %doc_ref.name, "Deleted"),
                Err(e) if api_code(&e) == Some(404) => {
                    debug!(target = %label, kind = %doc_ref.gvk.kind, name = %doc_ref.name, "Already absent")
                }
                Err(e) => {
                    return Err(ShortcutError::remote_apply(
                        &label,
                        format!("delete {} {}: {}", doc_ref.gvk.kind, doc_ref.name, e),
                    ))
                }
            }
        }
        Ok(())
    }
}
