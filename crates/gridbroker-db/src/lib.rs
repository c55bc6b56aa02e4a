//! Store layer for gridbroker.
//!
//! Provides repository traits, PostgreSQL implementations, and an in-memory
//! engine with the same semantics used by tests.

pub mod error;
pub mod mem;
pub mod repo;

pub use error::{DbError, DbResult};
pub use mem::MemStore;
pub use repo::*;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
