//! Phonebook user store.

use async_trait::async_trait;
use gridbroker_core::phonebook::User;
use sqlx::PgPool;

use crate::error::{map_insert_err, DbError, DbResult};

/// Filter for user listings.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user, assigning the next id. Fails with `Duplicate` when a
    /// user with the same name exists.
    async fn create(&self, user: &User) -> DbResult<User>;

    async fn get(&self, id: i64) -> DbResult<User>;

    async fn get_by_name(&self, name: &str) -> DbResult<User>;

    async fn list(&self, filter: &UserFilter) -> DbResult<Vec<User>>;

    /// Overwrite a user record.
    async fn update(&self, user: &User) -> DbResult<()>;
}

/// PostgreSQL implementation of UserStore.
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    pubkey: String,
    host: String,
    description: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            email: row.email,
            pubkey: row.pubkey,
            host: row.host,
            description: row.description,
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> DbResult<User> {
        // an existing user with the same name wins over the insert; any
        // lookup failure other than not-found propagates
        match self.get_by_name(&user.name).await {
            Ok(_) => return Err(DbError::Duplicate("user with same name or email exists".to_string())),
            Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO phonebook_user (name, email, pubkey, host, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, pubkey, host, description
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.pubkey)
        .bind(&user.host)
        .bind(&user.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, "user with same name or email exists"))?;
        Ok(row.into())
    }

    async fn get(&self, id: i64) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, pubkey, host, description FROM phonebook_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("user {id}")))?;
        Ok(row.into())
    }

    async fn get_by_name(&self, name: &str) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, pubkey, host, description FROM phonebook_user WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("user '{name}'")))?;
        Ok(row.into())
    }

    async fn list(&self, filter: &UserFilter) -> DbResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, name, email, pubkey, host, description
            FROM phonebook_user
            WHERE ($1::text IS NULL OR name = $1)
              AND ($2::text IS NULL OR email = $2)
            ORDER BY id ASC
            "#,
        )
        .bind(filter.name.as_deref())
        .bind(filter.email.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn update(&self, user: &User) -> DbResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE phonebook_user
            SET email = $2, pubkey = $3, host = $4, description = $5
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.pubkey)
        .bind(&user.host)
        .bind(&user.description)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }
}
