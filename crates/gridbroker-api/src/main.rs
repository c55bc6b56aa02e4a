//! gridbroker API server

use std::net::SocketAddr;
use std::sync::Arc;

use gridbroker_api::{routes, AppState};
use gridbroker_core::config::Config;
use gridbroker_core::escrow::DisabledEscrow;
use gridbroker_db::{create_pool, run_migrations};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    if config.escrow_enabled() {
        info!(network = %config.network, "payment network configured, escrow runs out-of-band");
    } else {
        info!("no payment network configured, escrow disabled");
    }

    info!("connecting to database");
    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    info!("database connected");

    let port = config.port;
    let state = AppState::new(pool, config, Arc::new(DisabledEscrow));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
