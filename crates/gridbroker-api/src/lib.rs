//! HTTP API for the gridbroker reservation explorer.

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
