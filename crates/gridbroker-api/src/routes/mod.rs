//! API routes.

pub mod directory;
pub mod health;
pub mod reservations;
pub mod users;

use axum::Router;

use crate::AppState;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/reservations", reservations::router())
        .nest("/users", users::router())
        .nest("/nodes", directory::nodes_router())
        .nest("/farms", directory::farms_router())
        .merge(health::router())
        .with_state(state)
}
