//! Real-name Verification Repository

use super::RepoResult;
use shared::models::RealNameVerification;
use sqlx::SqliteExecutor;

/// Most recent verification row for the user
pub async fn find_latest<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
) -> RepoResult<Option<RealNameVerification>> {
    let row = sqlx::query_as::<_, RealNameVerification>(
        "SELECT id, user_id, status, created_at FROM realname_verification WHERE user_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

pub async fn insert<'e>(ex: impl SqliteExecutor<'e>, user_id: i64, status: &str, now: i64) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO realname_verification (user_id, status, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(status)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}
