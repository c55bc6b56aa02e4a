//! Reservation data model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Error, Result};
use crate::id::global_workload_id;
use crate::workload::{
    Container, Gateway4To6, GatewayDelegate, GatewayProxy, GatewayReverseProxy, GatewaySubdomain,
    K8s, Network, QueuedWorkload, Volume, WorkloadType, Zdb,
};

/// Lifecycle state of a reservation.
///
/// Normal flow is `Create → Sign → Pay → Deploy → Delete → Deleted`;
/// `Invalid` is a sink. Transitions happen only inside the pipeline, escrow
/// flips `Pay → Deploy` out-of-band through the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    #[default]
    Create,
    Sign,
    Pay,
    Deploy,
    Delete,
    Invalid,
    Deleted,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Create => "create",
            NextAction::Sign => "sign",
            NextAction::Pay => "pay",
            NextAction::Deploy => "deploy",
            NextAction::Delete => "delete",
            NextAction::Invalid => "invalid",
            NextAction::Deleted => "deleted",
        }
    }

    /// Terminal states never leave the pipeline changed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NextAction::Delete | NextAction::Deleted)
    }
}

impl std::str::FromStr for NextAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(NextAction::Create),
            "sign" => Ok(NextAction::Sign),
            "pay" => Ok(NextAction::Pay),
            "deploy" => Ok(NextAction::Deploy),
            "delete" => Ok(NextAction::Delete),
            "invalid" => Ok(NextAction::Invalid),
            "deleted" => Ok(NextAction::Deleted),
            other => Err(Error::InvalidInput(format!("unknown next action '{other}'"))),
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quorum request: which tids may sign, and how many must.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningRequest {
    #[serde(default)]
    pub signers: Vec<i64>,
    #[serde(default)]
    pub quorum_min: i64,
}

/// A collected signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningSignature {
    pub tid: i64,
    pub signature: String,
    #[serde(default = "Utc::now")]
    pub epoch: DateTime<Utc>,
}

/// Terminal state reported by a node for one workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultState {
    #[default]
    Ok,
    Error,
    Deleted,
}

impl ResultState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultState::Ok => "ok",
            ResultState::Error => "error",
            ResultState::Deleted => "deleted",
        }
    }
}

/// A node-reported workload result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResult {
    #[serde(default)]
    pub workload_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default = "Utc::now")]
    pub epoch: DateTime<Utc>,
    #[serde(default)]
    pub state: ResultState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data_json: serde_json::Value,
    #[serde(default)]
    pub signature: String,
}

impl WorkloadResult {
    /// Canonical signing bytes:
    /// `workload_id | node_id | epoch(unix) | state | data_json`.
    pub fn challenge(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.workload_id.as_bytes());
        buf.extend_from_slice(self.node_id.as_bytes());
        buf.extend_from_slice(self.epoch.timestamp().to_string().as_bytes());
        buf.extend_from_slice(self.state.as_str().as_bytes());
        buf.extend_from_slice(self.data_json.to_string().as_bytes());
        buf
    }

    /// Verify the node signature against the node's public key.
    pub fn verify(&self, node_pubkey: &str) -> Result<()> {
        let key = crypto::key_from_hex(node_pubkey)?;
        let signature = crypto::signature_from_hex(&self.signature)?;
        crypto::verify(&key, &self.challenge(), &signature)
    }
}

/// Immutable payload of a reservation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataReservation {
    pub expiration_provisioning: DateTime<Utc>,
    pub expiration_reservation: DateTime<Utc>,
    #[serde(default)]
    pub signing_request_provision: SigningRequest,
    #[serde(default)]
    pub signing_request_delete: SigningRequest,
    #[serde(default)]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub zdbs: Vec<Zdb>,
    #[serde(default)]
    pub kubernetes: Vec<K8s>,
    #[serde(default)]
    pub proxies: Vec<GatewayProxy>,
    #[serde(default)]
    pub reverse_proxies: Vec<GatewayReverseProxy>,
    #[serde(default)]
    pub subdomains: Vec<GatewaySubdomain>,
    #[serde(default)]
    pub domain_delegates: Vec<GatewayDelegate>,
    #[serde(default)]
    pub gateway4to6: Vec<Gateway4To6>,
}

/// A signed request to deploy one or more workloads with an expiry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(default)]
    pub id: i64,
    /// The exact JSON bytes of `data_reservation` as produced by the client.
    /// These are the canonical signing input and must never be re-encoded.
    #[serde(default)]
    pub json: String,
    pub data_reservation: DataReservation,
    #[serde(default)]
    pub customer_tid: i64,
    #[serde(default)]
    pub customer_signature: String,
    #[serde(default)]
    pub next_action: NextAction,
    #[serde(default = "Utc::now")]
    pub epoch: DateTime<Utc>,
    #[serde(default)]
    pub signatures_provision: Vec<SigningSignature>,
    #[serde(default)]
    pub signatures_delete: Vec<SigningSignature>,
    #[serde(default)]
    pub signatures_farmer: Vec<SigningSignature>,
    #[serde(default)]
    pub results: Vec<WorkloadResult>,
}

impl Reservation {
    /// Structural validation on create.
    pub fn validate(&self) -> Result<()> {
        if self.customer_tid == 0 {
            return Err(Error::InvalidInput("customer_tid is required".to_string()));
        }
        if self.customer_signature.is_empty() {
            return Err(Error::InvalidInput(
                "customer_signature is required".to_string(),
            ));
        }
        if self.json.is_empty() {
            return Err(Error::InvalidInput("json is required".to_string()));
        }

        let data: DataReservation = serde_json::from_str(&self.json)
            .map_err(|e| Error::InvalidInput(format!("invalid json payload: {e}")))?;
        if data != self.data_reservation {
            return Err(Error::InvalidInput(
                "json data does not match the reservation data".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the reservation expiry has passed.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.data_reservation.expiration_reservation
    }

    pub fn is_any(&self, actions: &[NextAction]) -> bool {
        actions.contains(&self.next_action)
    }

    /// Canonical signing bytes: decimal customer tid, RFC3339 epoch, and the
    /// stored client-produced JSON of the payload.
    pub fn challenge(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.customer_tid.to_string().as_bytes());
        buf.extend_from_slice(self.epoch.to_rfc3339().as_bytes());
        buf.extend_from_slice(self.json.as_bytes());
        buf
    }

    /// Verify a signature over the canonical encoding against a hex key.
    pub fn signature_verify(&self, pubkey: &str, signature: &[u8]) -> Result<()> {
        let key = crypto::key_from_hex(pubkey)?;
        crypto::verify(&key, &self.challenge(), signature)
    }

    /// Project the reservation into dispatchable workload units, optionally
    /// filtered to one node. An empty filter returns all units.
    pub fn workloads(&self, node_id: Option<&str>) -> Vec<QueuedWorkload> {
        let data = &self.data_reservation;
        let to_delete = self.next_action.is_terminal();
        let duration = (data.expiration_reservation - self.epoch).num_seconds();

        let mut out = Vec::new();
        let mut push = |wid: i64, node: &str, typ: WorkloadType, content: serde_json::Value| {
            if let Some(filter) = node_id {
                if filter != node {
                    return;
                }
            }
            out.push(QueuedWorkload {
                workload_id: global_workload_id(self.id, wid),
                node_id: node.to_string(),
                user: self.customer_tid.to_string(),
                workload_type: typ,
                content,
                created: self.epoch,
                duration,
                signature: self.customer_signature.clone(),
                to_delete,
            });
        };

        for w in &data.networks {
            let content = serde_json::to_value(w).unwrap_or_default();
            for resource in &w.network_resources {
                push(
                    w.workload_id,
                    &resource.node_id,
                    WorkloadType::Network,
                    content.clone(),
                );
            }
        }
        for w in &data.containers {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Container,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.volumes {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Volume,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.zdbs {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Zdb,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.kubernetes {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Kubernetes,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.proxies {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Proxy,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.reverse_proxies {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::ReverseProxy,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.subdomains {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Subdomain,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.domain_delegates {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::DomainDelegate,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }
        for w in &data.gateway4to6 {
            push(
                w.workload_id,
                &w.node_id,
                WorkloadType::Gateway4To6,
                serde_json::to_value(w).unwrap_or_default(),
            );
        }

        out
    }

    /// Distinct compute node ids referenced by this reservation.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for w in self.workloads(None) {
            if !w.workload_type.is_gateway() {
                ids.insert(w.node_id);
            }
        }
        ids.into_iter().collect()
    }

    /// Distinct gateway ids referenced by this reservation.
    pub fn gateway_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for w in self.workloads(None) {
            if w.workload_type.is_gateway() {
                ids.insert(w.node_id);
            }
        }
        ids.into_iter().collect()
    }

    /// All node and gateway ids this reservation touches.
    pub fn all_node_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for w in self.workloads(None) {
            ids.insert(w.node_id);
        }
        ids.into_iter().collect()
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.workloads(None).iter().any(|w| w.node_id == node_id)
    }

    /// The recorded result for a global workload id, if any.
    pub fn result_of(&self, gwid: &str) -> Option<&WorkloadResult> {
        self.results.iter().find(|r| r.workload_id == gwid)
    }

    /// Every workload has an OK result.
    pub fn is_successfully_deployed(&self) -> bool {
        self.distinct_workload_ids()
            .iter()
            .all(|wid| self.results.iter().any(|r| {
                r.workload_id == *wid && r.state == ResultState::Ok
            }))
    }

    /// Every workload has reached a non-live terminal result.
    pub fn all_deleted(&self) -> bool {
        self.distinct_workload_ids()
            .iter()
            .all(|wid| self.results.iter().any(|r| {
                r.workload_id == *wid
                    && matches!(r.state, ResultState::Deleted | ResultState::Error)
            }))
    }

    fn distinct_workload_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for w in self.workloads(None) {
            ids.insert(w.workload_id);
        }
        ids.into_iter().collect()
    }
}
