//! Scheduled Task Run Repository

use super::RepoResult;
use shared::models::ScheduledTaskRun;
use sqlx::SqliteExecutor;

pub async fn start<'e>(ex: impl SqliteExecutor<'e>, task_key: &str, now: i64) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO scheduled_task_run (task_key, status, started_at) VALUES (?, 'running', ?) RETURNING id",
    )
    .bind(task_key)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn finish<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: &str,
    message: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE scheduled_task_run SET status = ?, message = ?, finished_at = ? WHERE id = ?")
        .bind(status)
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn find_last<'e>(ex: impl SqliteExecutor<'e>, task_key: &str) -> RepoResult<Option<ScheduledTaskRun>> {
    let row = sqlx::query_as::<_, ScheduledTaskRun>(
        "SELECT id, task_key, status, message, started_at, finished_at FROM scheduled_task_run WHERE task_key = ? ORDER BY started_at DESC, id DESC LIMIT 1",
    )
    .bind(task_key)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

pub async fn list<'e>(ex: impl SqliteExecutor<'e>, task_key: &str, limit: i64) -> RepoResult<Vec<ScheduledTaskRun>> {
    let rows = sqlx::query_as::<_, ScheduledTaskRun>(
        "SELECT id, task_key, status, message, started_at, finished_at FROM scheduled_task_run WHERE task_key = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(task_key)
    .bind(limit)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}
