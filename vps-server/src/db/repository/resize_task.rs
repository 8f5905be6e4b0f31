//! Resize Task Repository

use super::RepoResult;
use shared::models::{ResizeTask, ResizeTaskStatus};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, vps_id, order_id, order_item_id, scheduled_at, status, started_at, finished_at, created_at, updated_at";

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    vps_id: i64,
    order_id: i64,
    order_item_id: i64,
    scheduled_at: Option<i64>,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO resize_task (vps_id, order_id, order_item_id, scheduled_at, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5) RETURNING id",
    )
    .bind(vps_id)
    .bind(order_id)
    .bind(order_item_id)
    .bind(scheduled_at)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<ResizeTask>> {
    let sql = format!("SELECT {COLUMNS} FROM resize_task WHERE id = ?");
    let row = sqlx::query_as::<_, ResizeTask>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_item<'e>(ex: impl SqliteExecutor<'e>, order_item_id: i64) -> RepoResult<Option<ResizeTask>> {
    let sql = format!("SELECT {COLUMNS} FROM resize_task WHERE order_item_id = ?");
    let row = sqlx::query_as::<_, ResizeTask>(&sql)
        .bind(order_item_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

/// Whether the VPS has a pending or running resize task (optionally ignoring one order)
pub async fn has_pending_for_vps<'e>(
    ex: impl SqliteExecutor<'e>,
    vps_id: i64,
    exclude_order_id: Option<i64>,
) -> RepoResult<bool> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM resize_task WHERE vps_id = ?1 AND status IN ('pending', 'running') AND (?2 IS NULL OR order_id <> ?2)",
    )
    .bind(vps_id)
    .bind(exclude_order_id)
    .fetch_one(ex)
    .await?;
    Ok(n > 0)
}

/// Pending tasks with `scheduled_at` null or due
pub async fn list_due<'e>(ex: impl SqliteExecutor<'e>, now: i64, limit: i64) -> RepoResult<Vec<ResizeTask>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM resize_task WHERE status = 'pending' AND (scheduled_at IS NULL OR scheduled_at <= ?) ORDER BY COALESCE(scheduled_at, 0), id LIMIT ?"
    );
    let rows = sqlx::query_as::<_, ResizeTask>(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Claim a pending task; false when another runner already started it
pub async fn claim<'e>(ex: impl SqliteExecutor<'e>, id: i64, now: i64) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE resize_task SET status = 'running', started_at = ?1, updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
    )
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn finish<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: ResizeTaskStatus,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE resize_task SET status = ?1, finished_at = ?2, updated_at = ?2 WHERE id = ?3")
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Reset a failed task for an admin retry
pub async fn rearm<'e>(ex: impl SqliteExecutor<'e>, id: i64, now: i64) -> RepoResult<()> {
    sqlx::query(
        "UPDATE resize_task SET status = 'pending', scheduled_at = NULL, started_at = NULL, finished_at = NULL, updated_at = ? WHERE id = ? AND status IN ('failed', 'running')",
    )
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

/// Tasks left `running` by a stopped process go back to `pending`
pub async fn requeue_running<'e>(ex: impl SqliteExecutor<'e>, now: i64) -> RepoResult<Vec<ResizeTask>> {
    let sql = format!(
        "UPDATE resize_task SET status = 'pending', started_at = NULL, updated_at = ? WHERE status = 'running' RETURNING {COLUMNS}"
    );
    let rows = sqlx::query_as::<_, ResizeTask>(&sql)
        .bind(now)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}
