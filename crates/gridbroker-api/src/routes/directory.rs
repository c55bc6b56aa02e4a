//! Directory endpoints: node and farm registration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;
use gridbroker_core::directory::{Farm, Node, Proof};

pub fn nodes_router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_node))
        .route("/{node_id}", get(get_node))
        .route("/{node_id}/proofs", post(store_proof))
}

pub fn farms_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_farm))
        .route("/{id}", get(get_farm))
}

async fn register_node(
    State(state): State<AppState>,
    Json(node): Json<Node>,
) -> Result<StatusCode, ApiError> {
    if node.node_id.is_empty() {
        return Err(ApiError::BadRequest("node_id is required".to_string()));
    }
    state.nodes.upsert(&node).await?;
    Ok(StatusCode::CREATED)
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, ApiError> {
    let node = state.nodes.get(&node_id).await?;
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
struct StoreProofRequest {
    #[serde(default)]
    hardware: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    disks: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    hypervisor: Vec<String>,
}

async fn store_proof(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<StoreProofRequest>,
) -> Result<StatusCode, ApiError> {
    let proof = Proof::new(request.hardware, request.disks, request.hypervisor);
    state.nodes.push_proof(&node_id, &proof).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Serialize)]
struct FarmCreateResponse {
    id: i64,
}

async fn create_farm(
    State(state): State<AppState>,
    Json(farm): Json<Farm>,
) -> Result<(StatusCode, Json<FarmCreateResponse>), ApiError> {
    if farm.name.is_empty() {
        return Err(ApiError::BadRequest("farm name is required".to_string()));
    }
    let id = state.farms.create(&farm).await?;
    Ok((StatusCode::CREATED, Json(FarmCreateResponse { id })))
}

async fn get_farm(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Farm>, ApiError> {
    let farm = state.farms.get(id).await?;
    Ok(Json(farm))
}
