//! Resource contracts
//!
//! `ForeignCluster` is owned by Liqo and only read here. `ForeignClusterConnection`
//! is the pairwise shortcut declaration: this crate writes its spec, the
//! connector controller writes its status. Schemas are installed by the
//! controller's own manifests, so generation is disabled.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label carrying the remote cluster identifier on ForeignCluster records
pub const REMOTE_CLUSTER_ID_LABEL: &str = "liqo.io/remote-cluster-id";

pub const DEFAULT_MTU: i32 = 1450;
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 120;
pub const DEFAULT_TEMPLATE_NAMESPACE: &str = "liqo";
pub const DEFAULT_GW_SERVER_TYPE: &str = "networking.liqo.io/v1beta1/wggatewayservertemplates";
pub const DEFAULT_GW_SERVER_TEMPLATE: &str = "wireguard-server";
pub const DEFAULT_GW_SERVER_PORT: i32 = 51840;
pub const DEFAULT_GW_CLIENT_TYPE: &str = "networking.liqo.io/v1beta1/wggatewayclienttemplates";
pub const DEFAULT_GW_CLIENT_TEMPLATE: &str = "wireguard-client";

/// Liqo ForeignCluster (read-only subset)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "core.liqo.io",
    version = "v1beta1",
    kind = "ForeignCluster",
    plural = "foreignclusters",
    schema = "disabled"
)]
pub struct ForeignClusterSpec {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
}

/// Identity of a foreign cluster as seen from the primary cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterIdentity {
    pub name: String,
    pub cluster_id: String,
    pub namespace: Option<String>,
}

impl From<&ForeignCluster> for ClusterIdentity {
    fn from(fc: &ForeignCluster) -> Self {
        Self {
            name: fc.name_any(),
            cluster_id: fc.spec.cluster_id.clone(),
            namespace: fc.namespace(),
        }
    }
}

/// Kubernetes service type exposing the gateway server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "ClusterIP")]
    ClusterIp,
    NodePort,
    #[default]
    LoadBalancer,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::ClusterIp => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ClusterIP" => Ok(ServiceType::ClusterIp),
            "NodePort" => Ok(ServiceType::NodePort),
            "LoadBalancer" => Ok(ServiceType::LoadBalancer),
            other => Err(format!(
                "invalid service type {:?} (expected ClusterIP, NodePort or LoadBalancer)",
                other
            )),
        }
    }
}

/// Gateway server side of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayServerConfig {
    pub gateway_type: String,
    pub template_name: String,
    pub template_namespace: String,
    pub service_type: ServiceType,
    pub service_port: i32,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            gateway_type: DEFAULT_GW_SERVER_TYPE.to_string(),
            template_name: DEFAULT_GW_SERVER_TEMPLATE.to_string(),
            template_namespace: DEFAULT_TEMPLATE_NAMESPACE.to_string(),
            service_type: ServiceType::default(),
            service_port: DEFAULT_GW_SERVER_PORT,
        }
    }
}

/// Gateway client side of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayClientConfig {
    pub gateway_type: String,
    pub template_name: String,
    pub template_namespace: String,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            gateway_type: DEFAULT_GW_CLIENT_TYPE.to_string(),
            template_name: DEFAULT_GW_CLIENT_TEMPLATE.to_string(),
            template_namespace: DEFAULT_TEMPLATE_NAMESPACE.to_string(),
        }
    }
}

/// Networking parameters copied into a declaration when it is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkingConfig {
    pub mtu: i32,
    pub disable_sharing: bool,
    pub server: GatewayServerConfig,
    pub client: GatewayClientConfig,
    pub timeout_seconds: u32,
    pub wait: bool,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            disable_sharing: false,
            server: GatewayServerConfig::default(),
            client: GatewayClientConfig::default(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            wait: true,
        }
    }
}

/// Pairwise shortcut between two foreign clusters
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "networking.liqo.io",
    version = "v1beta1",
    kind = "ForeignClusterConnection",
    plural = "foreignclusterconnections",
    namespaced,
    status = "ForeignClusterConnectionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterConnectionSpec {
    pub foreign_cluster_a: String,
    pub foreign_cluster_b: String,
    #[serde(default)]
    pub networking: NetworkingConfig,
}

/// Phase reported by the connector controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionPhase {
    #[default]
    Pending,
    Connecting,
    Connected,
    Failed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionPhase::Pending => "Pending",
            ConnectionPhase::Connecting => "Connecting",
            ConnectionPhase::Connected => "Connected",
            ConnectionPhase::Failed => "Failed",
            ConnectionPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignClusterConnectionStatus {
    #[serde(default)]
    pub phase: ConnectionPhase,
    #[serde(default)]
    pub is_connected: bool,
}

impl ForeignClusterConnection {
    /// True when this declaration links `a` and `b`, in either order.
    pub fn links(&self, a: &str, b: &str) -> bool {
        let (x, y) = (&self.spec.foreign_cluster_a, &self.spec.foreign_cluster_b);
        (x == a && y == b) || (x == b && y == a)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.status.as_ref().map(|s| s.is_connected).unwrap_or(false)
    }
}
