//! Reservation store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbroker_core::reservation::{
    NextAction, Reservation, SigningSignature, WorkloadResult,
};
use sqlx::PgPool;

use crate::error::{map_insert_err, DbError, DbResult};

/// Which embedded signature list to append to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Provision,
    Delete,
    Farmer,
}

impl SignatureKind {
    fn column(&self) -> &'static str {
        match self {
            SignatureKind::Provision => "signatures_provision",
            SignatureKind::Delete => "signatures_delete",
            SignatureKind::Farmer => "signatures_farmer",
        }
    }
}

/// Filter for reservation listings.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub customer_tid: Option<i64>,
    pub next_action: Option<NextAction>,
}

/// Stable pagination by ascending id.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub size: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, size: 100 }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.size
    }

    /// Number of pages needed for `total` entries.
    pub fn pages(&self, total: i64) -> i64 {
        if self.size <= 0 {
            return 0;
        }
        (total + self.size - 1) / self.size
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Persist a new reservation, assigning the next monotonic id.
    async fn create(&self, reservation: &Reservation) -> DbResult<i64>;

    async fn get(&self, id: i64) -> DbResult<Reservation>;

    /// Filtered listing plus the total match count.
    async fn list(
        &self,
        filter: &ReservationFilter,
        page: Page,
    ) -> DbResult<(Vec<Reservation>, i64)>;

    /// Reservations with `id >= from` touching the given node, ascending.
    async fn scan_from(&self, from: i64, node_id: &str) -> DbResult<Vec<Reservation>>;

    /// Append a signature unless the signer already signed.
    async fn push_signature(
        &self,
        id: i64,
        kind: SignatureKind,
        signature: &SigningSignature,
    ) -> DbResult<()>;

    /// Record a workload result, replacing any earlier result for the same
    /// workload id.
    async fn push_result(&self, id: i64, result: &WorkloadResult) -> DbResult<()>;

    async fn set_next_action(&self, id: i64, action: NextAction) -> DbResult<()>;

    /// The highest assigned reservation id, used as the node polling cursor.
    async fn last_id(&self) -> DbResult<i64>;
}

#[derive(Debug, sqlx::FromRow)]
struct ReservationRow {
    id: i64,
    customer_tid: i64,
    customer_signature: String,
    epoch: DateTime<Utc>,
    next_action: String,
    json: String,
    data_reservation: serde_json::Value,
    signatures_provision: serde_json::Value,
    signatures_delete: serde_json::Value,
    signatures_farmer: serde_json::Value,
    results: serde_json::Value,
}

impl ReservationRow {
    fn into_reservation(self) -> DbResult<Reservation> {
        Ok(Reservation {
            id: self.id,
            customer_tid: self.customer_tid,
            customer_signature: self.customer_signature,
            epoch: self.epoch,
            next_action: self
                .next_action
                .parse()
                .map_err(|_| DbError::NotFound(format!("reservation {}", self.id)))?,
            json: self.json,
            data_reservation: serde_json::from_value(self.data_reservation)?,
            signatures_provision: serde_json::from_value(self.signatures_provision)?,
            signatures_delete: serde_json::from_value(self.signatures_delete)?,
            signatures_farmer: serde_json::from_value(self.signatures_farmer)?,
            results: serde_json::from_value(self.results)?,
        })
    }
}

/// PostgreSQL implementation of ReservationStore.
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn create(&self, reservation: &Reservation) -> DbResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO reservation (
                customer_tid, customer_signature, epoch, next_action, json,
                data_reservation, signatures_provision, signatures_delete,
                signatures_farmer, results, node_ids
            )
            VALUES ($1, $2, $3, $4, $5, $6, '[]'::jsonb, '[]'::jsonb, '[]'::jsonb, '[]'::jsonb, $7)
            RETURNING id
            "#,
        )
        .bind(reservation.customer_tid)
        .bind(&reservation.customer_signature)
        .bind(reservation.epoch)
        .bind(reservation.next_action.as_str())
        .bind(&reservation.json)
        .bind(serde_json::to_value(&reservation.data_reservation)?)
        .bind(reservation.all_node_ids())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "reservation"))?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> DbResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT id, customer_tid, customer_signature, epoch, next_action, json,
                   data_reservation, signatures_provision, signatures_delete,
                   signatures_farmer, results
            FROM reservation WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("reservation {id}")))?;
        row.into_reservation()
    }

    async fn list(
        &self,
        filter: &ReservationFilter,
        page: Page,
    ) -> DbResult<(Vec<Reservation>, i64)> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT id, customer_tid, customer_signature, epoch, next_action, json,
                   data_reservation, signatures_provision, signatures_delete,
                   signatures_farmer, results
            FROM reservation
            WHERE ($1::bigint IS NULL OR customer_tid = $1)
              AND ($2::text IS NULL OR next_action = $2)
            ORDER BY id ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.customer_tid)
        .bind(filter.next_action.map(|a| a.as_str()))
        .bind(page.size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM reservation
            WHERE ($1::bigint IS NULL OR customer_tid = $1)
              AND ($2::text IS NULL OR next_action = $2)
            "#,
        )
        .bind(filter.customer_tid)
        .bind(filter.next_action.map(|a| a.as_str()))
        .fetch_one(&self.pool)
        .await?;

        let reservations = rows
            .into_iter()
            .map(ReservationRow::into_reservation)
            .collect::<DbResult<Vec<_>>>()?;
        Ok((reservations, total))
    }

    async fn scan_from(&self, from: i64, node_id: &str) -> DbResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT id, customer_tid, customer_signature, epoch, next_action, json,
                   data_reservation, signatures_provision, signatures_delete,
                   signatures_farmer, results
            FROM reservation
            WHERE id >= $1 AND node_ids @> ARRAY[$2]
            ORDER BY id ASC
            "#,
        )
        .bind(from)
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(ReservationRow::into_reservation)
            .collect()
    }

    async fn push_signature(
        &self,
        id: i64,
        kind: SignatureKind,
        signature: &SigningSignature,
    ) -> DbResult<()> {
        let column = kind.column();
        // single-statement conditional append keeps the dedup atomic
        let query = format!(
            r#"
            UPDATE reservation
            SET {column} = {column} || $2::jsonb
            WHERE id = $1
              AND NOT EXISTS (
                SELECT 1 FROM jsonb_array_elements({column}) AS s
                WHERE (s->>'tid')::bigint = $3
              )
            "#
        );
        sqlx::query(&query)
            .bind(id)
            .bind(serde_json::to_value(signature)?)
            .bind(signature.tid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn push_result(&self, id: i64, result: &WorkloadResult) -> DbResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE reservation
            SET results = (
                SELECT COALESCE(jsonb_agg(r), '[]'::jsonb)
                FROM jsonb_array_elements(results) AS r
                WHERE r->>'workload_id' <> $3
            ) || $2::jsonb
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(serde_json::json!([result]))
        .bind(&result.workload_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::NotFound(format!("reservation {id}")));
        }
        Ok(())
    }

    async fn set_next_action(&self, id: i64, action: NextAction) -> DbResult<()> {
        let affected = sqlx::query("UPDATE reservation SET next_action = $2 WHERE id = $1")
            .bind(id)
            .bind(action.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(DbError::NotFound(format!("reservation {id}")));
        }
        Ok(())
    }

    async fn last_id(&self) -> DbResult<i64> {
        let (id,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM reservation")
            .fetch_one(&self.pool)
            .await?;
        Ok(id.unwrap_or(0))
    }
}
