//! Directory store: nodes and farms.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbroker_core::directory::{Farm, Node, Proof};
use sqlx::PgPool;

use crate::error::{map_insert_err, DbError, DbResult};

#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Register a node, or refresh an existing registration.
    async fn upsert(&self, node: &Node) -> DbResult<()>;

    async fn get(&self, node_id: &str) -> DbResult<Node>;

    /// How many of the given nodes are flagged free to use.
    async fn count_free_to_use(&self, node_ids: &[String]) -> DbResult<i64>;

    /// Append a hardware proof to a node.
    async fn push_proof(&self, node_id: &str, proof: &Proof) -> DbResult<()>;
}

#[async_trait]
pub trait FarmStore: Send + Sync {
    async fn create(&self, farm: &Farm) -> DbResult<i64>;

    async fn get(&self, id: i64) -> DbResult<Farm>;

    /// Farms owning any of the given nodes.
    async fn farms_for_nodes(&self, node_ids: &[String]) -> DbResult<Vec<Farm>>;
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    node_id: String,
    farm_id: i64,
    public_key: String,
    free_to_use: bool,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    proofs: serde_json::Value,
}

impl NodeRow {
    fn into_node(self) -> DbResult<Node> {
        Ok(Node {
            node_id: self.node_id,
            farm_id: self.farm_id,
            public_key: self.public_key,
            free_to_use: self.free_to_use,
            created: self.created,
            updated: self.updated,
            proofs: serde_json::from_value(self.proofs)?,
        })
    }
}

/// PostgreSQL implementation of NodeStore.
pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn upsert(&self, node: &Node) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO node (node_id, farm_id, public_key, free_to_use, created, updated)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (node_id) DO UPDATE
            SET farm_id = EXCLUDED.farm_id,
                public_key = EXCLUDED.public_key,
                free_to_use = EXCLUDED.free_to_use,
                updated = NOW()
            "#,
        )
        .bind(&node.node_id)
        .bind(node.farm_id)
        .bind(&node.public_key)
        .bind(node.free_to_use)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, node_id: &str) -> DbResult<Node> {
        let row = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT node_id, farm_id, public_key, free_to_use, created, updated, proofs
            FROM node WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("node '{node_id}'")))?;
        row.into_node()
    }

    async fn count_free_to_use(&self, node_ids: &[String]) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM node WHERE node_id = ANY($1) AND free_to_use",
        )
        .bind(node_ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn push_proof(&self, node_id: &str, proof: &Proof) -> DbResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE node SET proofs = proofs || $2::jsonb, updated = NOW()
            WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .bind(serde_json::json!([proof]))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::NotFound(format!("node '{node_id}'")));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FarmRow {
    id: i64,
    threebot_id: i64,
    name: String,
    email: String,
    wallet_addresses: serde_json::Value,
}

impl FarmRow {
    fn into_farm(self) -> DbResult<Farm> {
        Ok(Farm {
            id: self.id,
            threebot_id: self.threebot_id,
            name: self.name,
            email: self.email,
            wallet_addresses: serde_json::from_value(self.wallet_addresses)?,
        })
    }
}

/// PostgreSQL implementation of FarmStore.
pub struct PgFarmStore {
    pool: PgPool,
}

impl PgFarmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FarmStore for PgFarmStore {
    async fn create(&self, farm: &Farm) -> DbResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO farm (threebot_id, name, email, wallet_addresses)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(farm.threebot_id)
        .bind(&farm.name)
        .bind(&farm.email)
        .bind(serde_json::to_value(&farm.wallet_addresses)?)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "farm with same name exists"))?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> DbResult<Farm> {
        let row = sqlx::query_as::<_, FarmRow>(
            "SELECT id, threebot_id, name, email, wallet_addresses FROM farm WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("farm {id}")))?;
        row.into_farm()
    }

    async fn farms_for_nodes(&self, node_ids: &[String]) -> DbResult<Vec<Farm>> {
        let rows = sqlx::query_as::<_, FarmRow>(
            r#"
            SELECT f.id, f.threebot_id, f.name, f.email, f.wallet_addresses
            FROM farm f
            WHERE f.id IN (SELECT DISTINCT farm_id FROM node WHERE node_id = ANY($1))
            ORDER BY f.id ASC
            "#,
        )
        .bind(node_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FarmRow::into_farm).collect()
    }
}
