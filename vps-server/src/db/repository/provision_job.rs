//! Provision Job Repository (watchdog queue)

use super::RepoResult;
use shared::models::ProvisionJob;
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, order_id, order_item_id, host_id, host_name, attempts, status, next_run_at, last_error, created_at, updated_at";

/// Enqueue (or re-arm) the job for an item. Re-arming restarts the lifetime clock.
pub async fn upsert<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    order_item_id: i64,
    host_id: i64,
    host_name: &str,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO provision_job (order_id, order_item_id, host_id, host_name, attempts, status, next_run_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 0, 'pending', ?5, ?5, ?5) \
         ON CONFLICT(order_item_id) DO UPDATE SET host_id = excluded.host_id, host_name = excluded.host_name, \
           attempts = 0, status = 'pending', next_run_at = excluded.next_run_at, last_error = NULL, \
           created_at = excluded.created_at, updated_at = excluded.updated_at \
         RETURNING id",
    )
    .bind(order_id)
    .bind(order_item_id)
    .bind(host_id)
    .bind(host_name)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_item<'e>(
    ex: impl SqliteExecutor<'e>,
    order_item_id: i64,
) -> RepoResult<Option<ProvisionJob>> {
    let sql = format!("SELECT {COLUMNS} FROM provision_job WHERE order_item_id = ?");
    let row = sqlx::query_as::<_, ProvisionJob>(&sql)
        .bind(order_item_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

/// Pending or retry jobs whose `next_run_at <= now`, oldest first
pub async fn list_due<'e>(ex: impl SqliteExecutor<'e>, now: i64, limit: i64) -> RepoResult<Vec<ProvisionJob>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM provision_job WHERE status IN ('pending', 'retry') AND next_run_at <= ? ORDER BY next_run_at, id LIMIT ?"
    );
    let rows = sqlx::query_as::<_, ProvisionJob>(&sql)
        .bind(now)
        .bind(limit)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Claim the job: bump attempts and set running. Returns the new attempt count,
/// or `None` when another runner already claimed it.
pub async fn claim<'e>(ex: impl SqliteExecutor<'e>, id: i64, now: i64) -> RepoResult<Option<i64>> {
    let attempts = sqlx::query_scalar::<_, i64>(
        "UPDATE provision_job SET attempts = attempts + 1, status = 'running', updated_at = ? WHERE id = ? AND status IN ('pending', 'retry') RETURNING attempts",
    )
    .bind(now)
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(attempts)
}

/// Jobs left `running` by a stopped process become due again right away
pub async fn requeue_running<'e>(ex: impl SqliteExecutor<'e>, now: i64) -> RepoResult<u64> {
    let rows = sqlx::query("UPDATE provision_job SET status = 'retry', next_run_at = ?1, updated_at = ?1 WHERE status = 'running'")
        .bind(now)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected())
}

pub async fn schedule_retry<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    next_run_at: i64,
    last_error: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE provision_job SET status = 'retry', next_run_at = ?, last_error = COALESCE(?, last_error), updated_at = ? WHERE id = ?",
    )
    .bind(next_run_at)
    .bind(last_error)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

/// Close the job. `next_run_at` is pushed far out so it never looks due.
pub async fn mark_done<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    last_error: Option<&str>,
    next_run_at: i64,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE provision_job SET status = 'done', last_error = COALESCE(?, last_error), next_run_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(last_error)
    .bind(next_run_at)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

/// Close any open job for the item (the executor completed it directly)
pub async fn close_for_item<'e>(
    ex: impl SqliteExecutor<'e>,
    order_item_id: i64,
    next_run_at: i64,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE provision_job SET status = 'done', next_run_at = ?, updated_at = ? WHERE order_item_id = ? AND status <> 'done'",
    )
    .bind(next_run_at)
    .bind(now)
    .bind(order_item_id)
    .execute(ex)
    .await?;
    Ok(())
}
