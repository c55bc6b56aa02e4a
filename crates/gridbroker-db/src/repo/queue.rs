//! Per-node workload queue.
//!
//! One row per (workload, node) pair, FIFO by insertion order. Rows are
//! created when a reservation enters Deploy or Delete and removed when the
//! target node posts a terminal result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbroker_core::workload::{QueuedWorkload, WorkloadType};
use sqlx::PgPool;

use crate::error::DbResult;

#[async_trait]
pub trait WorkloadQueue: Send + Sync {
    /// Enqueue workload units. Re-pushing an existing (workload, node) pair
    /// is silently suppressed, which makes transition-time pushes exactly
    /// once.
    async fn push(&self, workloads: &[QueuedWorkload]) -> DbResult<()>;

    /// Remove one unit from the queue.
    async fn pop(&self, workload_id: &str, node_id: &str) -> DbResult<()>;

    /// Pending units for a node, oldest first.
    async fn list(&self, node_id: &str, limit: i64) -> DbResult<Vec<QueuedWorkload>>;
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    workload_id: String,
    node_id: String,
    username: String,
    workload_type: String,
    content: serde_json::Value,
    created: DateTime<Utc>,
    duration: i64,
    signature: String,
    to_delete: bool,
}

impl QueueRow {
    fn into_workload(self) -> DbResult<QueuedWorkload> {
        Ok(QueuedWorkload {
            workload_id: self.workload_id,
            node_id: self.node_id,
            user: self.username,
            workload_type: serde_json::from_value::<WorkloadType>(serde_json::Value::String(
                self.workload_type,
            ))?,
            content: self.content,
            created: self.created,
            duration: self.duration,
            signature: self.signature,
            to_delete: self.to_delete,
        })
    }
}

/// PostgreSQL implementation of WorkloadQueue.
pub struct PgWorkloadQueue {
    pool: PgPool,
}

impl PgWorkloadQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkloadQueue for PgWorkloadQueue {
    async fn push(&self, workloads: &[QueuedWorkload]) -> DbResult<()> {
        for workload in workloads {
            sqlx::query(
                r#"
                INSERT INTO workload_queue (
                    workload_id, node_id, username, workload_type, content,
                    created, duration, signature, to_delete
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (workload_id, node_id) DO NOTHING
                "#,
            )
            .bind(&workload.workload_id)
            .bind(&workload.node_id)
            .bind(&workload.user)
            .bind(workload.workload_type.as_str())
            .bind(&workload.content)
            .bind(workload.created)
            .bind(workload.duration)
            .bind(&workload.signature)
            .bind(workload.to_delete)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn pop(&self, workload_id: &str, node_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM workload_queue WHERE workload_id = $1 AND node_id = $2")
            .bind(workload_id)
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, node_id: &str, limit: i64) -> DbResult<Vec<QueuedWorkload>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT workload_id, node_id, username, workload_type, content,
                   created, duration, signature, to_delete
            FROM workload_queue
            WHERE node_id = $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(node_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueRow::into_workload).collect()
    }
}
