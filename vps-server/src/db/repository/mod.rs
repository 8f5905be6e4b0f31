//! Repository Module
//!
//! Free async functions over SQLite. Single-statement functions are
//! generic over [`sqlx::SqliteExecutor`] so they run against the pool or
//! inside a transaction; functions issuing several statements take
//! `&mut SqliteConnection` (pass `&mut *tx`).

// Catalog & cart
pub mod cart;
pub mod catalog;

// Orders
pub mod event;
pub mod order;
pub mod order_item;
pub mod payment;

// Instances & queues
pub mod provision_job;
pub mod resize_task;
pub mod vps;

// Money
pub mod wallet;
pub mod wallet_order;

// Logs & configuration
pub mod audit;
pub mod automation_log;
pub mod payment_provider;
pub mod realname;
pub mod settings;
pub mod task_run;

use shared::AppError;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row not found".into()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Duplicate(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                RepoError::Validation(db.message().to_string())
            }
            _ => RepoError::Database(err.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::not_found(msg),
            RepoError::Duplicate(msg) => AppError::conflict(msg),
            RepoError::Validation(msg) => AppError::validation(msg),
            RepoError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                AppError::database(msg)
            }
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Shorthand for the transaction type used across services
pub type Tx<'c> = sqlx::Transaction<'c, sqlx::Sqlite>;

/// Begin a write transaction on the pool
pub async fn begin(pool: &sqlx::SqlitePool) -> RepoResult<Tx<'static>> {
    Ok(pool.begin().await?)
}

pub async fn commit(tx: Tx<'_>) -> RepoResult<()> {
    Ok(tx.commit().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ErrorCode;

    #[test]
    fn test_repo_error_mapping() {
        let e: AppError = RepoError::Duplicate("trade_no".into()).into();
        assert_eq!(e.code, ErrorCode::Conflict);
        let e: AppError = RepoError::NotFound("order 1".into()).into();
        assert_eq!(e.code, ErrorCode::NotFound);
        let e: AppError = RepoError::Database("disk".into()).into();
        assert_eq!(e.code, ErrorCode::DatabaseError);
    }
}
