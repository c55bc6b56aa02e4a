//! Reservation lifecycle endpoints.
//!
//! Every document read from the store is run through the lifecycle pipeline
//! before it is acted on or returned, and any state the pipeline computes is
//! persisted first.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::HeaderValue;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::AppState;
use gridbroker_core::escrow::{AddressCheck, CustomerEscrowInformation, FREE_TFT};
use gridbroker_core::id::reservation_id_of;
use gridbroker_core::reservation::{
    NextAction, Reservation, ResultState, SigningSignature, WorkloadResult,
};
use gridbroker_core::workload::QueuedWorkload;
use gridbroker_core::{crypto, Pipeline};
use gridbroker_db::{Page, ReservationFilter};

const MAX_PAGE_SIZE: i64 = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_reservation).get(list_reservations))
        .route("/{res_id}", get(get_reservation))
        .route("/{res_id}/sign/provision", post(sign_provision))
        .route("/{res_id}/sign/delete", post(sign_delete))
        .route("/workloads/{id}", get(workloads))
        .route(
            "/workloads/{gwid}/{node_id}",
            put(put_result).delete(put_deleted),
        )
}

#[derive(Debug, Serialize)]
struct ReservationCreateResponse {
    reservation_id: i64,
    escrow_information: CustomerEscrowInformation,
}

// ============================================================================
// Pipeline plumbing
// ============================================================================

/// Apply the pipeline to a stored reservation and persist any transition.
///
/// A transition into Delete also cancels escrow and emits the delete queue
/// rows, so expiry behaves the same no matter which endpoint observes it.
async fn run_pipeline(state: &AppState, reservation: Reservation) -> Result<Reservation, ApiError> {
    let previous = reservation.next_action;
    let (reservation, changed) = Pipeline::new(reservation).next(Utc::now());
    if changed {
        if reservation.next_action == NextAction::Delete && previous != NextAction::Delete {
            set_reservation_deleted(state, &reservation).await?;
        } else {
            state
                .reservations
                .set_next_action(reservation.id, reservation.next_action)
                .await?;
        }
    }
    Ok(reservation)
}

/// Move a reservation to Delete: cancel escrow, persist the state, and queue
/// one delete row per workload.
async fn set_reservation_deleted(
    state: &AppState,
    reservation: &Reservation,
) -> Result<(), ApiError> {
    // cancel the escrow in case the reservation has not been deployed yet;
    // the collaborator is idempotent
    if let Err(err) = state.escrow.reservation_canceled(reservation.id).await {
        warn!(id = reservation.id, error = %err, "escrow cancellation failed");
    }

    state
        .reservations
        .set_next_action(reservation.id, NextAction::Delete)
        .await?;

    let mut rows = reservation.workloads(None);
    for row in &mut rows {
        row.to_delete = true;
    }
    state.queue.push(&rows).await?;
    Ok(())
}

async fn load(state: &AppState, id: i64) -> Result<Reservation, ApiError> {
    let reservation = state.reservations.get(id).await?;
    run_pipeline(state, reservation).await
}

// ============================================================================
// Create / read
// ============================================================================

/// Remove FreeTFT from the currency list in a single forward pass. An
/// adjacent duplicate slides into the removed slot and is skipped.
fn filter_free_currency(mut currencies: Vec<String>) -> Vec<String> {
    let mut i = 0;
    let mut remaining = currencies.len();
    while i < remaining {
        if currencies[i] == FREE_TFT {
            currencies.remove(i);
            remaining -= 1;
        }
        i += 1;
    }
    currencies
}

async fn valid_addresses(state: &AppState, reservation: &Reservation) -> Result<(), ApiError> {
    if !state.config.escrow_enabled() {
        info!("escrow disabled, no validation of farmer wallet address needed");
        return Ok(());
    }

    let nodes: Vec<String> = reservation
        .workloads(None)
        .into_iter()
        .map(|w| w.node_id)
        .collect();
    let farms = state.farms.farms_for_nodes(&nodes).await?;

    for farm in farms {
        for wallet in &farm.wallet_addresses {
            match state.address_validator.check(&wallet.asset, &wallet.address) {
                AddressCheck::Valid | AddressCheck::UnsupportedAsset => {}
                AddressCheck::Invalid(reason) => {
                    return Err(ApiError::FailedDependency(format!(
                        "farm {} has an invalid address for currency {}: {}",
                        farm.name, wallet.asset, reason
                    )));
                }
            }
        }
    }

    Ok(())
}

async fn create_reservation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut reservation: Reservation = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid reservation payload: {e}")))?;

    let now = Utc::now();
    if reservation.expired(now) {
        return Err(ApiError::BadRequest(
            "creating for a reservation that expires in the past".to_string(),
        ));
    }

    let duration = reservation.data_reservation.expiration_reservation - now;
    if duration < chrono::Duration::hours(1) {
        return Err(ApiError::BadRequest(format!(
            "the minimum duration for a reservation is 1 hour, you tried to reserve for {}m",
            duration.num_minutes()
        )));
    }

    // initialize the embedded arrays so in-place updates behave later on
    reservation.id = 0;
    reservation.signatures_provision = Vec::new();
    reservation.signatures_delete = Vec::new();
    reservation.signatures_farmer = Vec::new();
    reservation.results = Vec::new();

    reservation.validate()?;

    let (reservation, _) = Pipeline::new(reservation).next(now);
    if reservation.is_any(&[NextAction::Invalid, NextAction::Delete]) {
        return Err(ApiError::BadRequest(format!(
            "invalid request wrong status '{}'",
            reservation.next_action
        )));
    }

    valid_addresses(&state, &reservation).await?;

    // FreeTFT is only allowed when every referenced node and gateway is
    // marked free to use
    let used_nodes = reservation.node_ids();
    let used_gateways = reservation.gateway_ids();
    let paid_nodes = (used_nodes.len() + used_gateways.len()) as i64;
    let mut free_nodes = state.nodes.count_free_to_use(&used_nodes).await?;
    free_nodes += state.nodes.count_free_to_use(&used_gateways).await?;

    info!(
        paid_nodes,
        free_nodes,
        customer = reservation.customer_tid,
        "distribution of free nodes"
    );

    let mut currencies = reservation.data_reservation.currencies.clone();
    if free_nodes < paid_nodes {
        currencies = filter_free_currency(currencies);
    }

    let user = state.users.get(reservation.customer_tid).await.map_err(|_| {
        ApiError::BadRequest(format!(
            "cannot find user with id '{}'",
            reservation.customer_tid
        ))
    })?;

    let signature = crypto::signature_from_hex(&reservation.customer_signature)
        .map_err(|_| ApiError::BadRequest("invalid signature format, expecting hex encoded string".to_string()))?;

    reservation
        .signature_verify(&user.pubkey, &signature)
        .map_err(|e| ApiError::BadRequest(format!("failed to verify customer signature: {e}")))?;

    let id = match state.reservations.create(&reservation).await {
        Ok(id) => id,
        Err(err) if err.is_transient() => {
            warn!(error = %err, "transient store error on create, retrying once");
            state.reservations.create(&reservation).await?
        }
        Err(err) => return Err(err.into()),
    };

    let reservation = state.reservations.get(id).await?;

    let escrow_information = state
        .escrow
        .register_reservation(&reservation, &currencies)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(ReservationCreateResponse {
            reservation_id: id,
            escrow_information,
        }),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    customer_tid: Option<i64>,
    next_action: Option<NextAction>,
    page: Option<i64>,
    size: Option<i64>,
}

async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let filter = ReservationFilter {
        customer_tid: query.customer_tid,
        next_action: query.next_action,
    };
    let page = Page {
        page: query.page.unwrap_or(1),
        size: query.size.unwrap_or(Page::default().size),
    };

    let (items, total) = state.reservations.list(&filter, page).await?;

    let mut reservations = Vec::with_capacity(items.len());
    for reservation in items {
        reservations.push(run_pipeline(&state, reservation).await?);
    }

    let mut response = Json(reservations).into_response();
    response
        .headers_mut()
        .insert("pages", HeaderValue::from(page.pages(total)));
    Ok(response)
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(res_id): Path<i64>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = load(&state, res_id).await?;
    Ok(Json(reservation))
}

// ============================================================================
// Signatures
// ============================================================================

async fn sign_provision(
    State(state): State<AppState>,
    Path(res_id): Path<i64>,
    Json(mut signature): Json<SigningSignature>,
) -> Result<StatusCode, ApiError> {
    let raw = crypto::signature_from_hex(&signature.signature)
        .map_err(|_| ApiError::BadRequest("invalid signature expecting hex encoded string".to_string()))?;

    let reservation = load(&state, res_id).await?;

    if reservation.next_action != NextAction::Sign {
        return Err(ApiError::Unauthorized(
            "reservation not expecting signatures".to_string(),
        ));
    }

    let request = &reservation.data_reservation.signing_request_provision;
    if !request.signers.contains(&signature.tid) {
        return Err(ApiError::Unauthorized(format!(
            "signature not required for '{}'",
            signature.tid
        )));
    }

    let user = state
        .users
        .get(signature.tid)
        .await
        .map_err(|_| ApiError::NotFound("customer id not found".to_string()))?;

    reservation
        .signature_verify(&user.pubkey, &raw)
        .map_err(|_| ApiError::Unauthorized("failed to verify signature".to_string()))?;

    signature.epoch = Utc::now();
    state
        .reservations
        .push_signature(res_id, gridbroker_db::SignatureKind::Provision, &signature)
        .await?;

    let reservation = load(&state, res_id).await?;
    if reservation.next_action == NextAction::Deploy {
        state.queue.push(&reservation.workloads(None)).await?;
    }

    Ok(StatusCode::CREATED)
}

async fn sign_delete(
    State(state): State<AppState>,
    Path(res_id): Path<i64>,
    Json(mut signature): Json<SigningSignature>,
) -> Result<StatusCode, ApiError> {
    let raw = crypto::signature_from_hex(&signature.signature)
        .map_err(|_| ApiError::BadRequest("invalid signature expecting hex encoded string".to_string()))?;

    let reservation = load(&state, res_id).await?;

    let request = &reservation.data_reservation.signing_request_delete;
    if !request.signers.contains(&signature.tid) {
        return Err(ApiError::Unauthorized(format!(
            "signature not required for '{}'",
            signature.tid
        )));
    }

    let user = state
        .users
        .get(signature.tid)
        .await
        .map_err(|_| ApiError::NotFound("customer id not found".to_string()))?;

    reservation
        .signature_verify(&user.pubkey, &raw)
        .map_err(|_| ApiError::Unauthorized("failed to verify signature".to_string()))?;

    signature.epoch = Utc::now();
    state
        .reservations
        .push_signature(res_id, gridbroker_db::SignatureKind::Delete, &signature)
        .await?;

    // reload; the pipeline observes the delete quorum and run_pipeline
    // performs the whole delete edge (escrow cancel + delete queue rows)
    let _ = load(&state, res_id).await?;

    Ok(StatusCode::CREATED)
}

// ============================================================================
// Node-facing endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
struct WorkloadsQuery {
    from: Option<String>,
}

/// `GET /reservations/workloads/{id}` serves two shapes: with a `from`
/// query parameter the id is a node id and this is the node poll; without
/// it the id is a global workload id lookup.
async fn workloads(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WorkloadsQuery>,
) -> Result<Response, ApiError> {
    match query.from {
        Some(from) => {
            let from: i64 = from
                .parse()
                .map_err(|_| ApiError::BadRequest("invalid id format".to_string()))?;
            poll_workloads(&state, &id, from).await
        }
        None => get_workload(&state, &id).await,
    }
}

async fn poll_workloads(state: &AppState, node_id: &str, from: i64) -> Result<Response, ApiError> {
    let mut workloads = state.queue.list(node_id, MAX_PAGE_SIZE).await?;

    // when the queue alone fills the page there is no need to scan
    // reservations for missed rows
    if workloads.len() as i64 >= MAX_PAGE_SIZE {
        return Ok(Json(workloads).into_response());
    }

    let last_id = state.reservations.last_id().await?;

    for reservation in state.reservations.scan_from(from, node_id).await? {
        let reservation = run_pipeline(state, reservation).await?;

        if !reservation.is_any(&[NextAction::Deploy, NextAction::Delete]) {
            continue;
        }

        workloads.extend(reservation.workloads(Some(node_id)));

        if workloads.len() as i64 >= MAX_PAGE_SIZE {
            break;
        }
    }

    let mut response = Json(workloads).into_response();
    response
        .headers_mut()
        .insert("x-last-id", HeaderValue::from(last_id));
    Ok(response)
}

#[derive(Debug, Serialize)]
struct WorkloadWithResults {
    #[serde(flatten)]
    workload: QueuedWorkload,
    result: Vec<WorkloadResult>,
}

async fn get_workload(state: &AppState, gwid: &str) -> Result<Response, ApiError> {
    let rid = reservation_id_of(gwid)?;
    let reservation = load(state, rid).await?;

    let workload = reservation
        .workloads(None)
        .into_iter()
        .find(|w| w.workload_id == gwid)
        .ok_or_else(|| ApiError::NotFound("workload not found".to_string()))?;

    let result = reservation
        .results
        .iter()
        .filter(|r| r.workload_id == gwid)
        .cloned()
        .collect();

    Ok(Json(WorkloadWithResults { workload, result }).into_response())
}

async fn put_result(
    State(state): State<AppState>,
    Path((gwid, node_id)): Path<(String, String)>,
    Json(mut result): Json<WorkloadResult>,
) -> Result<StatusCode, ApiError> {
    let rid = reservation_id_of(&gwid)?;
    let reservation = load(&state, rid).await?;

    reservation
        .workloads(Some(&node_id))
        .into_iter()
        .find(|w| w.workload_id == gwid)
        .ok_or_else(|| ApiError::NotFound("workload not found".to_string()))?;

    result.node_id = node_id.clone();
    result.workload_id = gwid.clone();

    let node = state.nodes.get(&node_id).await?;
    result
        .verify(&node.public_key)
        .map_err(|_| ApiError::Unauthorized("invalid result signature".to_string()))?;

    result.epoch = Utc::now();

    state.reservations.push_result(rid, &result).await?;
    state.queue.pop(&gwid, &node_id).await?;

    if result.state == ResultState::Error {
        set_reservation_deleted(&state, &reservation).await?;
    } else if result.state == ResultState::Ok {
        // fetch the reservation again so the appended result is visible
        let reservation = load(&state, rid).await?;
        if reservation.is_successfully_deployed() {
            if let Err(err) = state.escrow.reservation_deployed(rid).await {
                warn!(id = rid, error = %err, "escrow deploy notification failed");
            }
        }
    }

    Ok(StatusCode::CREATED)
}

async fn put_deleted(
    State(state): State<AppState>,
    Path((gwid, node_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    // TODO: this endpoint does not verify a node signature because a delete
    // has no payload; a body carrying the reservation id and a signature
    // over it would close the gap

    let rid = reservation_id_of(&gwid)?;
    let reservation = load(&state, rid).await?;

    reservation
        .workloads(Some(&node_id))
        .into_iter()
        .find(|w| w.workload_id == gwid)
        .ok_or_else(|| ApiError::NotFound("workload not found".to_string()))?;

    let mut result = reservation.result_of(&gwid).cloned().unwrap_or_else(|| {
        WorkloadResult {
            workload_id: gwid.clone(),
            epoch: Utc::now(),
            ..Default::default()
        }
    });
    result.state = ResultState::Deleted;

    state.reservations.push_result(rid, &result).await?;
    state.queue.pop(&gwid, &node_id).await?;

    // make sure we are up to date before checking for full deletion
    let reservation = load(&state, rid).await?;
    if !reservation.all_deleted() {
        return Ok(StatusCode::OK);
    }

    state
        .reservations
        .set_next_action(rid, NextAction::Deleted)
        .await?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_currency_filter_is_single_pass() {
        let filtered = filter_free_currency(vec![
            FREE_TFT.to_string(),
            "TFT".to_string(),
            "BTC".to_string(),
        ]);
        assert_eq!(filtered, vec!["TFT", "BTC"]);

        // the second adjacent duplicate slides into the removed slot and
        // survives the pass
        let filtered = filter_free_currency(vec![
            FREE_TFT.to_string(),
            FREE_TFT.to_string(),
            "TFT".to_string(),
        ]);
        assert_eq!(filtered, vec![FREE_TFT, "TFT"]);
    }
}
