//! Admin Audit Log Repository

use super::RepoResult;
use shared::models::AdminAuditLog;
use sqlx::SqliteExecutor;

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    admin_id: i64,
    action: &str,
    target_type: &str,
    target_id: &str,
    detail_json: &str,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO admin_audit_log (admin_id, action, target_type, target_id, detail_json, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(admin_id)
    .bind(action)
    .bind(target_type)
    .bind(target_id)
    .bind(detail_json)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn list<'e>(
    ex: impl SqliteExecutor<'e>,
    action: Option<&str>,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<AdminAuditLog>> {
    let rows = sqlx::query_as::<_, AdminAuditLog>(
        "SELECT id, admin_id, action, target_type, target_id, detail_json, created_at FROM admin_audit_log WHERE (?1 IS NULL OR action = ?1) ORDER BY id DESC LIMIT ?2 OFFSET ?3",
    )
    .bind(action)
    .bind(limit)
    .bind(offset)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}
