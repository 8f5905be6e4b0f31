//! Payment Provider Config Repository

use super::RepoResult;
use shared::models::PaymentProviderConfig;
use sqlx::SqliteExecutor;

pub async fn find<'e>(ex: impl SqliteExecutor<'e>, key: &str) -> RepoResult<Option<PaymentProviderConfig>> {
    let row = sqlx::query_as::<_, PaymentProviderConfig>(
        "SELECT key, enabled, config_json, updated_at FROM payment_provider WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

pub async fn list<'e>(ex: impl SqliteExecutor<'e>) -> RepoResult<Vec<PaymentProviderConfig>> {
    let rows = sqlx::query_as::<_, PaymentProviderConfig>(
        "SELECT key, enabled, config_json, updated_at FROM payment_provider ORDER BY key",
    )
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

pub async fn upsert<'e>(
    ex: impl SqliteExecutor<'e>,
    key: &str,
    enabled: bool,
    config_json: &str,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO payment_provider (key, enabled, config_json, updated_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(key) DO UPDATE SET enabled = excluded.enabled, config_json = excluded.config_json, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(enabled)
    .bind(config_json)
    .bind(now)
    .execute(ex)
    .await?;
    Ok(())
}
