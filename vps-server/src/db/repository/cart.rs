//! Cart Repository

use super::RepoResult;
use shared::models::CartItem;
use sqlx::SqliteExecutor;

pub async fn list_by_user<'e>(ex: impl SqliteExecutor<'e>, user_id: i64) -> RepoResult<Vec<CartItem>> {
    let rows = sqlx::query_as::<_, CartItem>(
        "SELECT id, user_id, package_id, system_id, spec_json, qty, amount, created_at FROM cart_item WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(ex)
    .await?;
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    package_id: i64,
    system_id: i64,
    spec_json: &str,
    qty: i64,
    amount: i64,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO cart_item (user_id, package_id, system_id, spec_json, qty, amount, created_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(package_id)
    .bind(system_id)
    .bind(spec_json)
    .bind(qty)
    .bind(amount)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn clear_by_user<'e>(ex: impl SqliteExecutor<'e>, user_id: i64) -> RepoResult<u64> {
    let rows = sqlx::query("DELETE FROM cart_item WHERE user_id = ?")
        .bind(user_id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected())
}

pub async fn delete<'e>(ex: impl SqliteExecutor<'e>, user_id: i64, id: i64) -> RepoResult<bool> {
    let rows = sqlx::query("DELETE FROM cart_item WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected() > 0)
}
