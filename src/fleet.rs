//! Fleet-wide deploy and teardown
//!
//! Deploy installs the control plane on the primary cluster, then grants the
//! operator access on every foreign cluster. Teardown runs the same steps
//! in reverse direction. Clusters are processed one at a time in discovery
//! order and the first failure aborts the run.

use tracing::{info, warn};

use crate::access::AccessPolicyDistributor;
use crate::clusters::{ClusterRegistry, ForeignClusterStore};
use crate::credentials::SecretStore;
use crate::error::Result;
use crate::manifest::ManifestLifecycle;

/// What a fleet run touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport {
    /// Identity bound by the access policy
    pub subject: String,
    /// Foreign clusters found on the primary cluster
    pub discovered: Vec<String>,
    /// Clusters whose access policy was updated
    pub processed: Vec<String>,
}

/// The components a fleet run drives
pub struct Fleet<'a, C, S> {
    pub manifest: &'a ManifestLifecycle,
    pub clusters: &'a ClusterRegistry<C>,
    pub access: &'a AccessPolicyDistributor<S>,
}

impl<C: ForeignClusterStore, S: SecretStore> Fleet<'_, C, S> {
    /// Install the control plane and grant `subject` access fleet-wide.
    pub async fn deploy(&self, subject: &str) -> Result<FleetReport> {
        self.manifest.apply().await?;

        let discovered = self.clusters.discover_all().await?;
        if discovered.is_empty() {
            warn!("No foreign clusters found, skipping access policy");
        }
        let processed = self.access.distribute(&discovered, subject).await?;

        info!(subject = %subject, clusters = processed.len(), "Fleet deployed");
        Ok(FleetReport {
            subject: subject.to_string(),
            discovered: discovered.into_iter().map(|c| c.name).collect(),
            processed,
        })
    }

    /// Remove the control plane and revoke `subject`'s access fleet-wide.
    pub async fn teardown(&self, subject: &str) -> Result<FleetReport> {
        self.manifest.remove().await?;

        let discovered = self.clusters.discover_all().await?;
        if discovered.is_empty() {
            warn!("No foreign clusters found, skipping access policy");
        }
        let processed = self.access.revoke(&discovered, subject).await?;

        info!(subject = %subject, clusters = processed.len(), "Fleet torn down");
        Ok(FleetReport {
            subject: subject.to_string(),
            discovered: discovered.into_iter().map(|c| c.name).collect(),
            processed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::credentials::CredentialBroker;
    use crate::error::ShortcutError;
    use crate::testing::{
        kubeconfig_secret, settings_in, FakeApplier, FakeClusters, FakeSecrets, KUBECONFIG,
    };
    use std::path::Path;
    use std::sync::Arc;

    struct Harness {
        manifest: ManifestLifecycle,
        clusters: ClusterRegistry<FakeClusters>,
        access: AccessPolicyDistributor<FakeSecrets>,
    }

    impl Harness {
        fn new(applier: Arc<FakeApplier>, names: &[&str], scratch: &Path) -> Self {
            let secrets = FakeSecrets::default();
            for name in names {
                secrets.insert(kubeconfig_secret(name, KUBECONFIG));
            }
            let settings = settings_in(scratch);
            Self {
                manifest: ManifestLifecycle::new(applier.clone(), &Settings::default()),
                clusters: ClusterRegistry::new(FakeClusters::with(names)),
                access: AccessPolicyDistributor::new(CredentialBroker::new(secrets, &settings), applier),
            }
        }

        fn fleet(&self) -> Fleet<'_, FakeClusters, FakeSecrets> {
            Fleet {
                manifest: &self.manifest,
                clusters: &self.clusters,
                access: &self.access,
            }
        }
    }

    #[tokio::test]
    async fn test_deploy_applies_manifest_then_policies() {
        let scratch = tempfile::tempdir().unwrap();
        let applier = Arc::new(FakeApplier::default());
        let harness = Harness::new(applier.clone(), &["east", "west"], scratch.path());

        let report = harness.fleet().deploy("admin").await.unwrap();

        assert_eq!(report.subject, "admin");
        assert_eq!(report.discovered, vec!["east", "west"]);
        assert_eq!(report.processed, vec!["east", "west"]);
        let targets: Vec<String> = applier.calls().into_iter().map(|c| c.target).collect();
        assert_eq!(targets, vec!["primary", "east", "west"]);
    }

    #[tokio::test]
    async fn test_empty_fleet_still_succeeds() {
        let scratch = tempfile::tempdir().unwrap();
        let applier = Arc::new(FakeApplier::default());
        let harness = Harness::new(applier.clone(), &[], scratch.path());

        let report = harness.fleet().deploy("admin").await.unwrap();

        assert!(report.discovered.is_empty());
        assert!(report.processed.is_empty());
        assert_eq!(applier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_teardown_stops_at_first_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let applier = Arc::new(FakeApplier::default().failing_on("east"));
        let harness = Harness::new(applier.clone(), &["east", "west"], scratch.path());

        let result = harness.fleet().teardown("admin").await;

        assert!(matches!(result, Err(ShortcutError::RemoteApply { .. })));
        let calls = applier.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.action == "remove"));
        assert_eq!(calls[1].target, "east");
    }

    #[tokio::test]
    async fn test_manifest_failure_touches_no_cluster() {
        let scratch = tempfile::tempdir().unwrap();
        let applier = Arc::new(FakeApplier::default().failing_on("primary"));
        let harness = Harness::new(applier.clone(), &["east"], scratch.path());

        assert!(harness.fleet().deploy("admin").await.is_err());
        assert_eq!(applier.calls().len(), 1);
    }
}
