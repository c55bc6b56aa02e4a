//! Phonebook endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;
use gridbroker_core::crypto;
use gridbroker_core::phonebook::User;
use gridbroker_db::UserFilter;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_user).get(list_users))
        .route("/{tid}", get(get_user).put(update_user))
}

async fn create_user(
    State(state): State<AppState>,
    Json(user): Json<User>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    if user.name.is_empty() {
        return Err(ApiError::BadRequest("invalid name, can't be empty".to_string()));
    }

    crypto::key_from_hex(&user.pubkey)
        .map_err(|_| ApiError::BadRequest(format!("invalid public key {}", user.pubkey)))?;

    user.validate()?;

    let created = state.users.create(&user).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
struct UserUpdateRequest {
    #[serde(flatten)]
    update: User,
    signature: String,
}

async fn update_user(
    State(state): State<AppState>,
    Path(tid): Path<i64>,
    Json(request): Json<UserUpdateRequest>,
) -> Result<StatusCode, ApiError> {
    let signature = crypto::signature_from_hex(&request.signature)?;

    let current = state.users.get(tid).await?;
    let merged = current.apply_update(request.update, &signature)?;

    state.users.update(&merged).await?;
    Ok(StatusCode::OK)
}

async fn get_user(
    State(state): State<AppState>,
    Path(tid): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = state.users.get(tid).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    name: Option<String>,
    email: Option<String>,
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let filter = UserFilter {
        name: query.name,
        email: query.email,
    };
    let users = state.users.list(&filter).await?;
    Ok(Json(users))
}
