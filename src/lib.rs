//! Liqo shortcut orchestration
//!
//! Declares direct connections between pairs of Liqo foreign clusters, waits
//! for the connector controller to establish them, and distributes the
//! access policy the connector needs across the fleet.

pub mod access;
pub mod apply;
pub mod clusters;
pub mod config;
pub mod convergence;
pub mod crd;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod manifest;
pub mod shortcuts;

#[cfg(test)]
mod testing;

pub use access::AccessPolicyDistributor;
pub use apply::{DeclarativeApplier, KubeApplier, KubectlApplier, ManifestBundle};
pub use clusters::{ClusterRegistry, KubeForeignClusters};
pub use config::{Settings, ShortcutRequest};
pub use convergence::{Convergence, ConvergenceWatcher};
pub use credentials::{Credential, CredentialBroker, KubeSecrets};
pub use error::{Result, ShortcutError};
pub use fleet::{Fleet, FleetReport};
pub use manifest::ManifestLifecycle;
pub use shortcuts::{KubeConnections, ShortcutRegistry};
