use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{PaginationQuery, User, UserPage};
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Storage for user identities, keyed by a unique phone number.
///
/// Lookups return `Ok(None)` for absent users; `Err` is reserved for storage
/// failures. Inserting a second user with the same phone number fails with
/// `DatabaseError::Duplicate`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>>;
    async fn update(&self, user: &User) -> Result<()>;
    /// Returns false when no user had that id.
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn list(&self, query: &PaginationQuery) -> Result<UserPage>;
}

pub struct PgUserStore {
    pool: Arc<PgPool>,
}

impl PgUserStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &User) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, phone_number, created_at, updated_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, phone_number, created_at, updated_at, last_login_at
            "#,
        )
        .bind(user.id)
        .bind(&user.phone_number)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, phone_number, created_at, updated_at, last_login_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, phone_number, created_at, updated_at, last_login_at FROM users WHERE phone_number = $1",
        )
        .bind(phone_number)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<()> {
        sqlx::query(
            "UPDATE users SET phone_number = $2, updated_at = $3, last_login_at = $4 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.phone_number)
        .bind(user.updated_at)
        .bind(user.last_login_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &PaginationQuery) -> Result<UserPage> {
        let pattern = query.search_term().map(|term| format!("%{}%", term));

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE ($1::text IS NULL OR phone_number ILIKE $1)",
        )
        .bind(&pattern)
        .fetch_one(self.pool.as_ref())
        .await?;

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, phone_number, created_at, updated_at, last_login_at
            FROM users
            WHERE ($1::text IS NULL OR phone_number ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(query.page_size())
        .bind(query.offset())
        .fetch_all(self.pool.as_ref())
        .await?;

        let users = users.iter().map(User::to_public).collect();
        Ok(UserPage::new(users, total, query))
    }
}
