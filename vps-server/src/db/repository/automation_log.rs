//! Automation Log Repository

use super::RepoResult;
use shared::models::AutomationLog;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone)]
pub struct NewAutomationLog<'a> {
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
    pub action: &'a str,
    pub request_json: String,
    pub response_json: String,
    pub success: bool,
    pub message: String,
}

pub async fn insert<'e>(ex: impl SqliteExecutor<'e>, log: &NewAutomationLog<'_>, now: i64) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO automation_log (order_id, order_item_id, action, request_json, response_json, success, message, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(log.order_id)
    .bind(log.order_item_id)
    .bind(log.action)
    .bind(&log.request_json)
    .bind(&log.response_json)
    .bind(log.success)
    .bind(&log.message)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn list<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: Option<i64>,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<AutomationLog>> {
    let rows = sqlx::query_as::<_, AutomationLog>(
        "SELECT id, order_id, order_item_id, action, request_json, response_json, success, message, created_at FROM automation_log WHERE (?1 IS NULL OR order_id = ?1) ORDER BY id DESC LIMIT ?2 OFFSET ?3",
    )
    .bind(order_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

pub async fn count_by_action<'e>(ex: impl SqliteExecutor<'e>, action: &str) -> RepoResult<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM automation_log WHERE action = ?")
        .bind(action)
        .fetch_one(ex)
        .await?;
    Ok(n)
}
