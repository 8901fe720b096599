use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::db::models::OtpChallenge;
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Storage for issued challenges.
///
/// Validity is decided at read time: a row is usable while `used` is false
/// and `expires_at` is in the future. Several rows may exist per phone number;
/// only the newest usable one is ever returned.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Inserts a challenge and returns it with its assigned id.
    async fn create(&self, challenge: &OtpChallenge) -> Result<OtpChallenge>;

    /// Newest unused, unexpired challenge for the phone number.
    async fn latest_valid(&self, phone_number: &str) -> Result<Option<OtpChallenge>>;

    /// Marks `challenge` used if it still is usable, then marks every other
    /// outstanding challenge for the same phone number used too.
    ///
    /// Returns the number of rows consumed. Zero means a concurrent caller
    /// got there first and the caller must not treat the challenge as won.
    async fn consume(&self, challenge: &OtpChallenge) -> Result<u64>;

    /// Challenges created at or after `since`, used or not.
    async fn count_since(&self, phone_number: &str, since: DateTime<Utc>) -> Result<i64>;

    /// Deletes expired rows. Safe to run repeatedly and concurrently.
    async fn purge_expired(&self) -> Result<u64>;
}

pub struct PgOtpStore {
    pool: Arc<PgPool>,
}

impl PgOtpStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn consume_in_transaction(&self, challenge: &OtpChallenge) -> sqlx::Result<u64> {
        let mut transaction = self.pool.begin().await?;

        // Every consumer locks the number's outstanding rows in id order
        // before writing, so two verifies that matched different rows queue
        // on the same first lock instead of deadlocking.
        sqlx::query(
            "SELECT id FROM otps WHERE phone_number = $1 AND used = false ORDER BY id FOR UPDATE",
        )
        .bind(&challenge.phone_number)
        .fetch_all(&mut *transaction)
        .await?;

        // Compare-and-set on the matched row: a caller that queued behind
        // the winner sees `used = true` and updates nothing.
        let claimed = sqlx::query(
            "UPDATE otps SET used = true WHERE id = $1 AND used = false AND expires_at > $2",
        )
        .bind(challenge.id)
        .bind(Utc::now())
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        if claimed == 0 {
            transaction.rollback().await?;
            return Ok(0);
        }

        let outstanding = sqlx::query(
            "UPDATE otps SET used = true WHERE phone_number = $1 AND used = false",
        )
        .bind(&challenge.phone_number)
        .execute(&mut *transaction)
        .await?
        .rows_affected();

        transaction.commit().await?;
        Ok(claimed + outstanding)
    }
}

/// SQLSTATE 40P01. Postgres rolled the transaction back, so nothing was consumed.
fn is_deadlock(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("40P01"))
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn create(&self, challenge: &OtpChallenge) -> Result<OtpChallenge> {
        let stored = sqlx::query_as::<_, OtpChallenge>(
            r#"
            INSERT INTO otps (phone_number, code, expires_at, created_at, used)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, phone_number, code, expires_at, created_at, used
            "#,
        )
        .bind(&challenge.phone_number)
        .bind(&challenge.code)
        .bind(challenge.expires_at)
        .bind(challenge.created_at)
        .bind(challenge.used)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(stored)
    }

    async fn latest_valid(&self, phone_number: &str) -> Result<Option<OtpChallenge>> {
        let challenge = sqlx::query_as::<_, OtpChallenge>(
            r#"
            SELECT id, phone_number, code, expires_at, created_at, used
            FROM otps
            WHERE phone_number = $1 AND used = false AND expires_at > $2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(phone_number)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(challenge)
    }

    async fn consume(&self, challenge: &OtpChallenge) -> Result<u64> {
        match self.consume_in_transaction(challenge).await {
            Err(e) if is_deadlock(&e) => {
                warn!("Consume of challenge {} aborted by deadlock", challenge.id);
                Ok(0)
            }
            other => Ok(other?),
        }
    }

    async fn count_since(&self, phone_number: &str, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM otps WHERE phone_number = $1 AND created_at >= $2",
        )
        .bind(phone_number)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM otps WHERE expires_at < $1")
            .bind(Utc::now())
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }
}
