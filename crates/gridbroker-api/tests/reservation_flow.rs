//! End-to-end reservation lifecycle scenarios.

mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use common::{
    register_node, register_user, request, sign_hex, signed_reservation, signing_key, test_env,
    volume_data,
};
use gridbroker_core::reservation::{NextAction, Reservation, ResultState, WorkloadResult};
use gridbroker_db::ReservationStore;

#[tokio::test]
async fn happy_path_deploys_and_notifies_escrow() {
    let env = test_env();
    let customer = signing_key(1);
    let node_key = signing_key(2);

    let tid = register_user(&env.router, "alice", &customer).await;
    register_node(&env.router, "N1", &node_key, false, json!([])).await;

    let now = Utc::now();
    let data = volume_data("N1", tid, now, vec!["TFT"]);
    let body = signed_reservation(&customer, tid, now, &data);

    let (status, _, created) =
        request(&env.router, Method::POST, "/reservations", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {created}");
    let rid = created["reservation_id"].as_i64().unwrap();
    assert_eq!(created["escrow_information"]["address"], "GESCROW");

    // created reservations sit in Sign until the provision quorum is met
    let (status, _, fetched) =
        request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["next_action"], "sign");

    // the customer is the only requested signer
    let challenge = format!(
        "{}{}{}",
        tid,
        now.to_rfc3339(),
        data_json_of(&fetched)
    );
    let (status, _, body) = request(
        &env.router,
        Method::POST,
        &format!("/reservations/{rid}/sign/provision"),
        Some(json!({
            "tid": tid,
            "signature": sign_hex(&customer, challenge.as_bytes()),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "sign failed: {body}");

    let (_, _, fetched) =
        request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(fetched["next_action"], "pay");

    // the escrow collaborator observes the payment and flips to deploy
    // out-of-band through the store
    env.store.set_next_action(rid, NextAction::Deploy).await.unwrap();

    // the node polls and receives its workload
    let (status, headers, polled) = request(
        &env.router,
        Method::GET,
        "/reservations/workloads/N1?from=0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-last-id").unwrap(), "1");
    let rows = polled.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["workload_id"], format!("{rid}-1"));
    assert_eq!(rows[0]["type"], "volume");
    assert_eq!(rows[0]["to_delete"], false);

    // the node reports success
    let mut result = WorkloadResult {
        workload_id: format!("{rid}-1"),
        node_id: "N1".to_string(),
        epoch: Utc::now(),
        state: ResultState::Ok,
        data_json: json!({"volume_id": "vol-1"}),
        ..Default::default()
    };
    result.signature = sign_hex(&node_key, &result.challenge());

    let (status, _, body) = request(
        &env.router,
        Method::PUT,
        &format!("/reservations/workloads/{rid}-1/N1"),
        Some(serde_json::to_value(&result).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "result failed: {body}");

    assert_eq!(env.escrow.deployed.lock().unwrap().as_slice(), &[rid]);
    assert!(env.escrow.canceled.lock().unwrap().is_empty());

    // the workload lookup now carries the result
    let (status, _, workload) = request(
        &env.router,
        Method::GET,
        &format!("/reservations/workloads/{rid}-1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(workload["result"][0]["state"], "ok");
}

#[tokio::test]
async fn error_result_poisons_the_reservation() {
    let env = test_env();
    let customer = signing_key(1);
    let node_key = signing_key(2);

    let tid = register_user(&env.router, "alice", &customer).await;
    register_node(&env.router, "N1", &node_key, false, json!([])).await;

    let now = Utc::now();
    let data = volume_data("N1", tid, now, vec!["TFT"]);
    let body = signed_reservation(&customer, tid, now, &data);
    let (_, _, created) = request(&env.router, Method::POST, "/reservations", Some(body)).await;
    let rid = created["reservation_id"].as_i64().unwrap();

    env.store.set_next_action(rid, NextAction::Deploy).await.unwrap();

    let mut result = WorkloadResult {
        workload_id: format!("{rid}-1"),
        node_id: "N1".to_string(),
        epoch: Utc::now(),
        state: ResultState::Error,
        message: "no space left".to_string(),
        data_json: Value::Null,
        ..Default::default()
    };
    result.signature = sign_hex(&node_key, &result.challenge());

    let (status, _, _) = request(
        &env.router,
        Method::PUT,
        &format!("/reservations/workloads/{rid}-1/N1"),
        Some(serde_json::to_value(&result).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // a single workload error moves the whole reservation to delete and
    // cancels the escrow
    let (_, _, fetched) =
        request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(fetched["next_action"], "delete");
    assert_eq!(env.escrow.canceled.lock().unwrap().as_slice(), &[rid]);

    // the delete row is dispatched to the node
    let (_, _, polled) = request(
        &env.router,
        Method::GET,
        "/reservations/workloads/N1?from=0",
        None,
    )
    .await;
    let rows = polled.as_array().unwrap();
    assert!(!rows.is_empty());
    assert_eq!(rows[0]["to_delete"], true);
}

#[tokio::test]
async fn deleted_results_finish_the_reservation() {
    let env = test_env();
    let customer = signing_key(1);
    let node_key = signing_key(2);

    let tid = register_user(&env.router, "alice", &customer).await;
    register_node(&env.router, "N1", &node_key, false, json!([])).await;

    let now = Utc::now();
    let data = volume_data("N1", tid, now, vec!["TFT"]);
    let body = signed_reservation(&customer, tid, now, &data);
    let (_, _, created) = request(&env.router, Method::POST, "/reservations", Some(body)).await;
    let rid = created["reservation_id"].as_i64().unwrap();

    env.store.set_next_action(rid, NextAction::Deploy).await.unwrap();

    // the node confirms removal; no signature is required on this endpoint
    let (status, _, _) = request(
        &env.router,
        Method::DELETE,
        &format!("/reservations/workloads/{rid}-1/N1"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, fetched) =
        request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(fetched["next_action"], "deleted");
    assert_eq!(fetched["results"][0]["state"], "deleted");
}

#[tokio::test]
async fn expired_reservation_is_deleted_on_read() {
    let env = test_env();
    let node_key = signing_key(2);
    register_node(&env.router, "N1", &node_key, false, json!([])).await;

    // a reservation whose expiry has already passed, as left behind by a
    // previous run
    let past = Utc::now() - Duration::hours(3);
    let data = volume_data("N1", 1, past, vec!["TFT"]);
    let reservation = Reservation {
        customer_tid: 1,
        customer_signature: "aa".to_string(),
        epoch: past,
        next_action: NextAction::Pay,
        json: serde_json::to_string(&data).unwrap(),
        data_reservation: serde_json::from_value(data).unwrap(),
        ..Default::default()
    };
    let rid = env.store.create(&reservation).await.unwrap();

    let (status, _, fetched) =
        request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["next_action"], "delete");

    // the transition fired escrow cancellation and emitted a delete row;
    // the poll reports it from the queue and from the reconciliation scan
    assert_eq!(env.escrow.canceled.lock().unwrap().as_slice(), &[rid]);
    let (_, _, polled) = request(
        &env.router,
        Method::GET,
        "/reservations/workloads/N1?from=0",
        None,
    )
    .await;
    let rows = polled.as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row["to_delete"] == true));

    // a second read does not re-fire the cancellation
    request(&env.router, Method::GET, &format!("/reservations/{rid}"), None).await;
    assert_eq!(env.escrow.canceled.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn list_reports_page_count() {
    let env = test_env();

    let future = Utc::now() + Duration::hours(4);
    for _ in 0..3 {
        let data = volume_data("N1", 1, Utc::now(), vec!["TFT"]);
        let reservation = Reservation {
            customer_tid: 1,
            customer_signature: "aa".to_string(),
            epoch: Utc::now(),
            next_action: NextAction::Sign,
            json: serde_json::to_string(&data).unwrap(),
            data_reservation: serde_json::from_value(data).unwrap(),
            ..Default::default()
        };
        let mut reservation = reservation;
        reservation.data_reservation.expiration_reservation = future;
        reservation.data_reservation.expiration_provisioning = future;
        reservation.json = serde_json::to_string(&reservation.data_reservation).unwrap();
        env.store.create(&reservation).await.unwrap();
    }

    let (status, headers, listed) = request(
        &env.router,
        Method::GET,
        "/reservations?page=1&size=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("pages").unwrap(), "2");
    assert_eq!(listed.as_array().unwrap().len(), 2);

    // filters narrow the listing
    let (_, _, listed) = request(
        &env.router,
        Method::GET,
        "/reservations?customer_tid=999",
        None,
    )
    .await;
    assert!(listed.as_array().unwrap().is_empty());
}

fn data_json_of(reservation: &Value) -> String {
    reservation["json"].as_str().unwrap().to_string()
}
