//! Settings Repository

use super::RepoResult;
use shared::models::Setting;
use sqlx::SqliteExecutor;

pub async fn get<'e>(ex: impl SqliteExecutor<'e>, key: &str) -> RepoResult<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(ex)
        .await?;
    Ok(value)
}

pub async fn list<'e>(ex: impl SqliteExecutor<'e>) -> RepoResult<Vec<Setting>> {
    let rows = sqlx::query_as::<_, Setting>("SELECT key, value, updated_at FROM settings ORDER BY key")
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

pub async fn upsert<'e>(ex: impl SqliteExecutor<'e>, key: &str, value: &str, now: i64) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(ex)
    .await?;
    Ok(())
}
