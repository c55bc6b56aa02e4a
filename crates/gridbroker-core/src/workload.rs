//! Workload payload types.
//!
//! A reservation carries typed lists of workload definitions. The core only
//! dispatches on the type tag for queue projection and per-node indexing;
//! everything else is generic over the tag.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for the workload content union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Network,
    Container,
    Volume,
    Zdb,
    Kubernetes,
    Proxy,
    ReverseProxy,
    Subdomain,
    DomainDelegate,
    Gateway4To6,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Network => "network",
            WorkloadType::Container => "container",
            WorkloadType::Volume => "volume",
            WorkloadType::Zdb => "zdb",
            WorkloadType::Kubernetes => "kubernetes",
            WorkloadType::Proxy => "proxy",
            WorkloadType::ReverseProxy => "reverse_proxy",
            WorkloadType::Subdomain => "subdomain",
            WorkloadType::DomainDelegate => "domain_delegate",
            WorkloadType::Gateway4To6 => "gateway4to6",
        }
    }

    /// Whether this type is served by a gateway rather than a compute node.
    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            WorkloadType::Proxy
                | WorkloadType::ReverseProxy
                | WorkloadType::Subdomain
                | WorkloadType::DomainDelegate
                | WorkloadType::Gateway4To6
        )
    }
}

impl std::str::FromStr for WorkloadType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(WorkloadType::Network),
            "container" => Ok(WorkloadType::Container),
            "volume" => Ok(WorkloadType::Volume),
            "zdb" => Ok(WorkloadType::Zdb),
            "kubernetes" => Ok(WorkloadType::Kubernetes),
            "proxy" => Ok(WorkloadType::Proxy),
            "reverse_proxy" => Ok(WorkloadType::ReverseProxy),
            "subdomain" => Ok(WorkloadType::Subdomain),
            "domain_delegate" => Ok(WorkloadType::DomainDelegate),
            "gateway4to6" => Ok(WorkloadType::Gateway4To6),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown workload type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-node slice of a virtual network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkResource {
    pub node_id: String,
    #[serde(default)]
    pub ip_range: String,
    #[serde(default)]
    pub wireguard_listen_port: i64,
    #[serde(default)]
    pub wireguard_public_key: String,
}

/// A virtual network spanning one or more nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub workload_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_range: String,
    #[serde(default)]
    pub network_resources: Vec<NetworkResource>,
}

/// Mount of a volume inside a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMount {
    pub volume_id: String,
    pub mountpoint: String,
}

/// Attachment of a container to a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConnection {
    pub network_id: String,
    #[serde(default)]
    pub ipaddress: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerCapacity {
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub memory: i64,
}

/// A container workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub flist: String,
    #[serde(default)]
    pub hub_url: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub secret_environment: HashMap<String, String>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub volumes: Vec<ContainerMount>,
    #[serde(default)]
    pub network_connection: Vec<NetworkConnection>,
    #[serde(default)]
    pub capacity: ContainerCapacity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiskType {
    #[default]
    Hdd,
    Ssd,
}

/// A raw storage volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub size: i64,
    #[serde(rename = "type", default)]
    pub disk_type: DiskType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZdbMode {
    #[default]
    Seq,
    User,
}

/// A 0-db object database namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Zdb {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub mode: ZdbMode,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub disk_type: DiskType,
    #[serde(default)]
    pub public: bool,
}

/// A kubernetes VM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct K8s {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub ipaddress: String,
    #[serde(default)]
    pub cluster_secret: String,
    #[serde(default)]
    pub master_ips: Vec<String>,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
}

/// HTTP(S) forward proxy on a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayProxy {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub port_tls: u32,
}

/// Reverse tunnel proxy on a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayReverseProxy {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub secret: String,
}

/// Managed subdomain on a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewaySubdomain {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Domain delegation to a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayDelegate {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub domain: String,
}

/// IPv4-to-IPv6 tunnel endpoint on a gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gateway4To6 {
    pub workload_id: i64,
    pub node_id: String,
    #[serde(default)]
    pub public_key: String,
}

/// A single dispatchable workload unit, addressed to one node.
///
/// This is both the queue row and the shape nodes see when polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWorkload {
    pub workload_id: String,
    pub node_id: String,
    pub user: String,
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,
    pub content: serde_json::Value,
    pub created: DateTime<Utc>,
    pub duration: i64,
    pub signature: String,
    pub to_delete: bool,
}
