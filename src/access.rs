//! Fleet access policy
//!
//! Grants the operator the permissions needed to drive Liqo networking on
//! every foreign cluster: one ClusterRole and one ClusterRoleBinding to the
//! operator's user.

use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{error, info};

use crate::apply::{ApplyTarget, DeclarativeApplier, ManifestBundle};
use crate::credentials::{Credential, CredentialBroker, SecretStore};
use crate::crd::ClusterIdentity;
use crate::error::{Result, ShortcutError};

pub const ACCESS_ROLE: &str = "liqo-gatewayclients-reader";
pub const ACCESS_ROLE_BINDING: &str = "liqo-gatewayclients-reader-binding";

const API_GROUPS: &[&str] = &["ipam.liqo.io", "networking.liqo.io", "apps", ""];
const RESOURCES: &[&str] = &[
    "namespaces",
    "internalfabrics",
    "publickeies",
    "configmaps",
    "wggatewayservertemplates",
    "wggatewayclienttemplates",
    "secrets",
    "connections",
    "networks",
    "services",
    "deployments",
    "gatewayclients",
    "gatewayservers",
    "configurations",
];
const VERBS: &[&str] = &["get", "list", "watch", "delete", "create", "update", "patch"];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Render the access bundle bound to `subject`.
pub fn access_policy_bundle(subject: &str) -> Result<ManifestBundle> {
    let role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(ACCESS_ROLE.to_string()),
            ..ObjectMeta::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(strings(API_GROUPS)),
            resources: Some(strings(RESOURCES)),
            verbs: strings(VERBS),
            ..PolicyRule::default()
        }]),
        ..ClusterRole::default()
    };

    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(ACCESS_ROLE_BINDING.to_string()),
            ..ObjectMeta::default()
        },
        subjects: Some(vec![Subject {
            kind: "User".to_string(),
            name: subject.to_string(),
            ..Subject::default()
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: ACCESS_ROLE.to_string(),
        },
    };

    let render = |e: serde_json::Error| ShortcutError::remote_apply("access policy", e);
    Ok(ManifestBundle::Documents(vec![
        serde_json::to_value(&role).map_err(render)?,
        serde_json::to_value(&binding).map_err(render)?,
    ]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Apply,
    Remove,
}

/// Applies or removes the access bundle on foreign clusters
pub struct AccessPolicyDistributor<S> {
    broker: CredentialBroker<S>,
    applier: Arc<dyn DeclarativeApplier>,
}

impl<S: SecretStore> AccessPolicyDistributor<S> {
    pub fn new(broker: CredentialBroker<S>, applier: Arc<dyn DeclarativeApplier>) -> Self {
        Self { broker, applier }
    }

    /// Apply the bundle on the cluster addressed by `credential`.
    pub async fn apply_on(&self, credential: &Credential, subject: &str) -> Result<()> {
        let bundle = access_policy_bundle(subject)?;
        self.applier
            .apply(ApplyTarget::Remote(credential), &bundle)
            .await?;
        info!(cluster = %credential.cluster(), subject = %subject, "Access policy applied");
        Ok(())
    }

    /// Remove the bundle from the cluster addressed by `credential`.
    pub async fn remove_on(&self, credential: &Credential, subject: &str) -> Result<()> {
        let bundle = access_policy_bundle(subject)?;
        self.applier
            .remove(ApplyTarget::Remote(credential), &bundle)
            .await?;
        info!(cluster = %credential.cluster(), subject = %subject, "Access policy removed");
        Ok(())
    }

    /// Grant `subject` access on each cluster in order.
    ///
    /// Stops at the first failure; clusters already processed keep the
    /// policy. Returns the names of the processed clusters.
    pub async fn distribute(&self, clusters: &[ClusterIdentity], subject: &str) -> Result<Vec<String>> {
        self.for_each(Action::Apply, clusters, subject).await
    }

    /// Withdraw `subject`'s access from each cluster in order, stopping at the first failure.
    pub async fn revoke(&self, clusters: &[ClusterIdentity], subject: &str) -> Result<Vec<String>> {
        self.for_each(Action::Remove, clusters, subject).await
    }

    async fn for_each(
        &self,
        action: Action,
        clusters: &[ClusterIdentity],
        subject: &str,
    ) -> Result<Vec<String>> {
        let mut processed = Vec::with_capacity(clusters.len());

        for cluster in clusters {
            let outcome = {
                let credential = self.broker.fetch(&cluster.name).await;
                match credential {
                    Ok(credential) => match action {
                        Action::Apply => self.apply_on(&credential, subject).await,
                        Action::Remove => self.remove_on(&credential, subject).await,
                    },
                    Err(e) => Err(e),
                }
            };

            if let Err(e) = outcome {
                error!(
                    cluster = %cluster.name,
                    processed = processed.len(),
                    remaining = clusters.len() - processed.len() - 1,
                    error = %e,
                    "Aborting fleet access update"
                );
                return Err(e);
            }
            processed.push(cluster.name.clone());
        }

        Ok(processed)
    }
}
