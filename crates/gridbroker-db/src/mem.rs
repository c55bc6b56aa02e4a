//! In-memory store engine.
//!
//! Implements every repository trait with the exact semantics of the
//! PostgreSQL implementations: monotonic ids, signer dedup, per-workload
//! result replacement, FIFO queue order and (workload, node) uniqueness.
//! Used by integration tests and local experiments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use gridbroker_core::directory::{Farm, Node, Proof};
use gridbroker_core::phonebook::User;
use gridbroker_core::reservation::{NextAction, Reservation, SigningSignature, WorkloadResult};
use gridbroker_core::workload::QueuedWorkload;

use crate::error::{DbError, DbResult};
use crate::repo::{
    FarmStore, NodeStore, Page, ReservationFilter, ReservationStore, SignatureKind, UserFilter,
    UserStore, WorkloadQueue,
};

#[derive(Default)]
pub struct MemStore {
    reservations: Mutex<BTreeMap<i64, Reservation>>,
    queue: Mutex<Vec<QueuedWorkload>>,
    users: Mutex<BTreeMap<i64, User>>,
    nodes: Mutex<BTreeMap<String, Node>>,
    farms: Mutex<BTreeMap<i64, Farm>>,
    next_reservation_id: AtomicI64,
    next_user_id: AtomicI64,
    next_farm_id: AtomicI64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &ReservationFilter, r: &Reservation) -> bool {
        if let Some(tid) = filter.customer_tid {
            if r.customer_tid != tid {
                return false;
            }
        }
        if let Some(action) = filter.next_action {
            if r.next_action != action {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ReservationStore for MemStore {
    async fn create(&self, reservation: &Reservation) -> DbResult<i64> {
        let id = self.next_reservation_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = reservation.clone();
        stored.id = id;
        self.reservations.lock().unwrap().insert(id, stored);
        Ok(id)
    }

    async fn get(&self, id: i64) -> DbResult<Reservation> {
        self.reservations
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("reservation {id}")))
    }

    async fn list(
        &self,
        filter: &ReservationFilter,
        page: Page,
    ) -> DbResult<(Vec<Reservation>, i64)> {
        let reservations = self.reservations.lock().unwrap();
        let matching: Vec<Reservation> = reservations
            .values()
            .filter(|r| Self::matches(filter, r))
            .cloned()
            .collect();
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok((items, total))
    }

    async fn scan_from(&self, from: i64, node_id: &str) -> DbResult<Vec<Reservation>> {
        let reservations = self.reservations.lock().unwrap();
        Ok(reservations
            .range(from..)
            .map(|(_, r)| r)
            .filter(|r| r.touches(node_id))
            .cloned()
            .collect())
    }

    async fn push_signature(
        &self,
        id: i64,
        kind: SignatureKind,
        signature: &SigningSignature,
    ) -> DbResult<()> {
        let mut reservations = self.reservations.lock().unwrap();
        let reservation = reservations
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("reservation {id}")))?;
        let list = match kind {
            SignatureKind::Provision => &mut reservation.signatures_provision,
            SignatureKind::Delete => &mut reservation.signatures_delete,
            SignatureKind::Farmer => &mut reservation.signatures_farmer,
        };
        if list.iter().all(|s| s.tid != signature.tid) {
            list.push(signature.clone());
        }
        Ok(())
    }

    async fn push_result(&self, id: i64, result: &WorkloadResult) -> DbResult<()> {
        let mut reservations = self.reservations.lock().unwrap();
        let reservation = reservations
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("reservation {id}")))?;
        reservation
            .results
            .retain(|r| r.workload_id != result.workload_id);
        reservation.results.push(result.clone());
        Ok(())
    }

    async fn set_next_action(&self, id: i64, action: NextAction) -> DbResult<()> {
        let mut reservations = self.reservations.lock().unwrap();
        let reservation = reservations
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("reservation {id}")))?;
        reservation.next_action = action;
        Ok(())
    }

    async fn last_id(&self) -> DbResult<i64> {
        Ok(self.next_reservation_id.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl WorkloadQueue for MemStore {
    async fn push(&self, workloads: &[QueuedWorkload]) -> DbResult<()> {
        let mut queue = self.queue.lock().unwrap();
        for workload in workloads {
            let exists = queue.iter().any(|q| {
                q.workload_id == workload.workload_id && q.node_id == workload.node_id
            });
            if !exists {
                queue.push(workload.clone());
            }
        }
        Ok(())
    }

    async fn pop(&self, workload_id: &str, node_id: &str) -> DbResult<()> {
        self.queue
            .lock()
            .unwrap()
            .retain(|q| !(q.workload_id == workload_id && q.node_id == node_id));
        Ok(())
    }

    async fn list(&self, node_id: &str, limit: i64) -> DbResult<Vec<QueuedWorkload>> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.node_id == node_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemStore {
    async fn create(&self, user: &User) -> DbResult<User> {
        match self.get_by_name(&user.name).await {
            Ok(_) => {
                return Err(DbError::Duplicate(
                    "user with same name or email exists".to_string(),
                ))
            }
            Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = user.clone();
        stored.id = id;
        self.users.lock().unwrap().insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> DbResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {id}")))
    }

    async fn get_by_name(&self, name: &str) -> DbResult<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.name == name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user '{name}'")))
    }

    async fn list(&self, filter: &UserFilter) -> DbResult<Vec<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| filter.name.as_deref().map_or(true, |n| u.name == n))
            .filter(|u| filter.email.as_deref().map_or(true, |e| u.email == e))
            .cloned()
            .collect())
    }

    async fn update(&self, user: &User) -> DbResult<()> {
        let mut users = self.users.lock().unwrap();
        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| DbError::NotFound(format!("user {}", user.id)))?;
        *stored = user.clone();
        Ok(())
    }
}

#[async_trait]
impl NodeStore for MemStore {
    async fn upsert(&self, node: &Node) -> DbResult<()> {
        self.nodes
            .lock()
            .unwrap()
            .insert(node.node_id.clone(), node.clone());
        Ok(())
    }

    async fn get(&self, node_id: &str) -> DbResult<Node> {
        self.nodes
            .lock()
            .unwrap()
            .get(node_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("node '{node_id}'")))
    }

    async fn count_free_to_use(&self, node_ids: &[String]) -> DbResult<i64> {
        let nodes = self.nodes.lock().unwrap();
        Ok(node_ids
            .iter()
            .filter(|id| nodes.get(*id).map(|n| n.free_to_use).unwrap_or(false))
            .count() as i64)
    }

    async fn push_proof(&self, node_id: &str, proof: &Proof) -> DbResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| DbError::NotFound(format!("node '{node_id}'")))?;
        node.proofs.push(proof.clone());
        Ok(())
    }
}

#[async_trait]
impl FarmStore for MemStore {
    async fn create(&self, farm: &Farm) -> DbResult<i64> {
        let mut farms = self.farms.lock().unwrap();
        if farms.values().any(|f| f.name == farm.name) {
            return Err(DbError::Duplicate("farm with same name exists".to_string()));
        }
        let id = self.next_farm_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = farm.clone();
        stored.id = id;
        farms.insert(id, stored);
        Ok(id)
    }

    async fn get(&self, id: i64) -> DbResult<Farm> {
        self.farms
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("farm {id}")))
    }

    async fn farms_for_nodes(&self, node_ids: &[String]) -> DbResult<Vec<Farm>> {
        let nodes = self.nodes.lock().unwrap();
        let farm_ids: std::collections::BTreeSet<i64> = node_ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|n| n.farm_id))
            .collect();
        let farms = self.farms.lock().unwrap();
        Ok(farm_ids
            .iter()
            .filter_map(|id| farms.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unit(workload_id: &str, node_id: &str) -> QueuedWorkload {
        QueuedWorkload {
            workload_id: workload_id.to_string(),
            node_id: node_id.to_string(),
            user: "42".to_string(),
            workload_type: gridbroker_core::workload::WorkloadType::Volume,
            content: serde_json::Value::Null,
            created: Utc::now(),
            duration: 3600,
            signature: String::new(),
            to_delete: false,
        }
    }

    #[tokio::test]
    async fn queue_is_unique_per_workload_and_node() {
        let store = MemStore::new();
        WorkloadQueue::push(
            &store,
            &[unit("1-1", "node-a"), unit("1-1", "node-a"), unit("1-1", "node-b")],
        )
        .await
        .unwrap();
        WorkloadQueue::push(&store, &[unit("1-1", "node-a")]).await.unwrap();

        assert_eq!(WorkloadQueue::list(&store, "node-a", 200).await.unwrap().len(), 1);
        assert_eq!(WorkloadQueue::list(&store, "node-b", 200).await.unwrap().len(), 1);

        store.pop("1-1", "node-a").await.unwrap();
        assert!(WorkloadQueue::list(&store, "node-a", 200).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn signature_push_dedups_by_signer() {
        let store = MemStore::new();
        let id = ReservationStore::create(&store, &Reservation::default())
            .await
            .unwrap();

        let sig = SigningSignature {
            tid: 42,
            signature: "aa".to_string(),
            epoch: Utc::now(),
        };
        store
            .push_signature(id, SignatureKind::Provision, &sig)
            .await
            .unwrap();
        store
            .push_signature(id, SignatureKind::Provision, &sig)
            .await
            .unwrap();

        let stored = ReservationStore::get(&store, id).await.unwrap();
        assert_eq!(stored.signatures_provision.len(), 1);
    }

    #[tokio::test]
    async fn result_push_replaces_per_workload() {
        let store = MemStore::new();
        let id = ReservationStore::create(&store, &Reservation::default())
            .await
            .unwrap();

        let mut result = WorkloadResult {
            workload_id: "1-1".to_string(),
            ..Default::default()
        };
        store.push_result(id, &result).await.unwrap();
        result.state = gridbroker_core::reservation::ResultState::Deleted;
        store.push_result(id, &result).await.unwrap();

        let stored = ReservationStore::get(&store, id).await.unwrap();
        assert_eq!(stored.results.len(), 1);
        assert_eq!(
            stored.results[0].state,
            gridbroker_core::reservation::ResultState::Deleted
        );
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let store = MemStore::new();
        let first = ReservationStore::create(&store, &Reservation::default())
            .await
            .unwrap();
        let second = ReservationStore::create(&store, &Reservation::default())
            .await
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(store.last_id().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn user_create_guard() {
        let store = MemStore::new();
        let user = User {
            name: "alice".to_string(),
            pubkey: "aa".to_string(),
            ..Default::default()
        };
        let created = UserStore::create(&store, &user).await.unwrap();
        assert_eq!(created.id, 1);

        let err = UserStore::create(&store, &user).await.unwrap_err();
        assert!(matches!(err, DbError::Duplicate(_)));
    }
}
