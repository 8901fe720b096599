//! Persistence for users and OTP challenges.
//!
//! The auth core only sees the [`OtpStore`] and [`UserStore`] traits.
//! Postgres implementations back the server; the memory implementations
//! back tests and database-less local runs.

pub mod memory;
pub mod models;
pub mod otp_store;
pub mod user_store;

use std::future::Future;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{AppError, DatabaseError};

pub use memory::{MemoryOtpStore, MemoryUserStore};
pub use models::{OtpChallenge, PaginationQuery, PublicUser, User, UserPage};
pub use otp_store::{OtpStore, PgOtpStore};
pub use user_store::{PgUserStore, UserStore};

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

    info!("Connected to database (max {} connections)", config.max_connections);
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migration completed successfully");
    Ok(())
}

/// Runs one store call under `limit`; a call that overruns fails with
/// `DatabaseError::Timeout` and is dropped.
pub async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| AppError::DatabaseError(DatabaseError::Timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_results_through() {
        let ok = bounded(Duration::from_millis(50), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded(Duration::from_millis(50), async {
            Err::<(), _>(AppError::DatabaseError(DatabaseError::Duplicate))
        })
        .await;
        assert!(matches!(err, Err(AppError::DatabaseError(DatabaseError::Duplicate))));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::DatabaseError(DatabaseError::Timeout))));
    }
}
