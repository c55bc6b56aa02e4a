//! Shared test harness: an in-memory store, a recording escrow, and request
//! helpers for driving the router.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use tower::ServiceExt;

use gridbroker_api::{routes, AppState};
use gridbroker_core::config::Config;
use gridbroker_core::escrow::{CustomerEscrowInformation, Escrow, NetworkAddressValidator};
use gridbroker_core::reservation::Reservation;
use gridbroker_db::MemStore;

/// Escrow collaborator that records every call.
#[derive(Default)]
pub struct RecordingEscrow {
    pub registered: Mutex<Vec<(i64, Vec<String>)>>,
    pub deployed: Mutex<Vec<i64>>,
    pub canceled: Mutex<Vec<i64>>,
}

#[async_trait::async_trait]
impl Escrow for RecordingEscrow {
    async fn register_reservation(
        &self,
        reservation: &Reservation,
        supported_currencies: &[String],
    ) -> gridbroker_core::Result<CustomerEscrowInformation> {
        self.registered
            .lock()
            .unwrap()
            .push((reservation.id, supported_currencies.to_vec()));
        Ok(CustomerEscrowInformation {
            address: "GESCROW".to_string(),
            asset: "TFT".to_string(),
        })
    }

    async fn reservation_deployed(&self, reservation_id: i64) -> gridbroker_core::Result<()> {
        self.deployed.lock().unwrap().push(reservation_id);
        Ok(())
    }

    async fn reservation_canceled(&self, reservation_id: i64) -> gridbroker_core::Result<()> {
        self.canceled.lock().unwrap().push(reservation_id);
        Ok(())
    }
}

pub struct TestEnv {
    pub router: Router,
    pub store: Arc<MemStore>,
    pub escrow: Arc<RecordingEscrow>,
}

pub fn test_env() -> TestEnv {
    let store = Arc::new(MemStore::new());
    let escrow = Arc::new(RecordingEscrow::default());
    let config = Config {
        network: "testnet".to_string(),
        ..Default::default()
    };

    let state = AppState {
        reservations: store.clone(),
        queue: store.clone(),
        users: store.clone(),
        nodes: store.clone(),
        farms: store.clone(),
        escrow: escrow.clone(),
        address_validator: Arc::new(NetworkAddressValidator::new(config.assets.clone())),
        config: Arc::new(config),
    };

    TestEnv {
        router: routes::router(state),
        store,
        escrow,
    }
}

pub async fn request(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    let request = if let Some(payload) = body {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        builder
            .body(Body::from(serde_json::to_vec(&payload).expect("serialize body")))
            .expect("build request")
    } else {
        builder.body(Body::empty()).expect("build request")
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("route request");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read response body");

    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse response body")
    };
    (status, headers, parsed)
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn pubkey_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

pub fn sign_hex(key: &SigningKey, message: &[u8]) -> String {
    hex::encode(key.sign(message).to_bytes())
}

/// Register a phonebook user, returning its assigned tid.
pub async fn register_user(router: &Router, name: &str, key: &SigningKey) -> i64 {
    let (status, _, body) = request(
        router,
        Method::POST,
        "/users",
        Some(json!({
            "name": name,
            "email": format!("{name}@example.com"),
            "pubkey": pubkey_hex(key),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "user create failed: {body}");
    body["id"].as_i64().expect("user id")
}

/// Register a farm and a node owned by it.
pub async fn register_node(
    router: &Router,
    node_id: &str,
    node_key: &SigningKey,
    free_to_use: bool,
    wallets: Value,
) -> i64 {
    let (status, _, body) = request(
        router,
        Method::POST,
        "/farms",
        Some(json!({
            "threebot_id": 1,
            "name": format!("farm-{node_id}"),
            "wallet_addresses": wallets,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "farm create failed: {body}");
    let farm_id = body["id"].as_i64().expect("farm id");

    let (status, _, body) = request(
        router,
        Method::POST,
        "/nodes",
        Some(json!({
            "node_id": node_id,
            "farm_id": farm_id,
            "public_key": pubkey_hex(node_key),
            "free_to_use": free_to_use,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "node create failed: {body}");
    farm_id
}

/// Payload for one volume reservation on the given node.
pub fn volume_data(
    node_id: &str,
    signer: i64,
    now: DateTime<Utc>,
    currencies: Vec<&str>,
) -> Value {
    json!({
        "expiration_provisioning": now + Duration::minutes(30),
        "expiration_reservation": now + Duration::hours(2),
        "signing_request_provision": {"signers": [signer], "quorum_min": 1},
        "signing_request_delete": {"signers": [signer], "quorum_min": 1},
        "currencies": currencies,
        "volumes": [{
            "workload_id": 1,
            "node_id": node_id,
            "size": 10,
            "type": "SSD",
        }],
    })
}

/// Build a signed reservation body the way a client would: the `json` field
/// carries the exact payload bytes the signature covers.
pub fn signed_reservation(
    key: &SigningKey,
    tid: i64,
    epoch: DateTime<Utc>,
    data: &Value,
) -> Value {
    let data_json = serde_json::to_string(data).expect("serialize payload");
    let challenge = format!("{}{}{}", tid, epoch.to_rfc3339(), data_json);
    let signature = sign_hex(key, challenge.as_bytes());

    json!({
        "customer_tid": tid,
        "customer_signature": signature,
        "epoch": epoch,
        "json": data_json,
        "data_reservation": data,
    })
}
