//! Directory records: farms and the nodes they operate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A farmer wallet address for one asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub asset: String,
    pub address: String,
}

/// A farm: an operator owning one or more nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Farm {
    #[serde(default)]
    pub id: i64,
    pub threebot_id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub wallet_addresses: Vec<WalletAddress>,
}

/// Hardware proof reported by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub hardware: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub hardware_hash: String,
    #[serde(default)]
    pub disks: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub disk_hash: String,
    #[serde(default)]
    pub hypervisor: Vec<String>,
}

impl Proof {
    /// Build a proof, stamping the content hashes.
    pub fn new(
        hardware: serde_json::Map<String, serde_json::Value>,
        disks: serde_json::Map<String, serde_json::Value>,
        hypervisor: Vec<String>,
    ) -> Self {
        let hardware_hash = proof_hash(&hardware);
        let disk_hash = proof_hash(&disks);
        Self {
            created: Utc::now(),
            hardware,
            hardware_hash,
            disks,
            disk_hash,
            hypervisor,
        }
    }
}

/// A hardware node registered to a farm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub farm_id: i64,
    /// Hex encoded ed25519 public key, used to verify workload results.
    #[serde(default)]
    pub public_key: String,
    /// Permits payment in the FreeTFT currency.
    #[serde(default)]
    pub free_to_use: bool,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub proofs: Vec<Proof>,
}

/// Hex encoded hash over a proof section.
///
/// Sorts the map into a key/value list for a stable encoding, then appends
/// the digest of an *empty* md5 state to the JSON bytes before hex encoding.
/// The digest is never fed the content; existing clients depend on these
/// exact bytes, so the behavior is kept as is.
pub fn proof_hash(section: &serde_json::Map<String, serde_json::Value>) -> String {
    let mut kvs: Vec<(&String, &serde_json::Value)> = section.iter().collect();
    kvs.sort_by(|a, b| a.0.cmp(b.0));

    let mut bytes = serde_json::to_vec(&kvs).unwrap_or_default();
    let empty_digest = md5::compute(b"");
    bytes.extend_from_slice(&empty_digest.0);
    hex::encode(bytes)
}
