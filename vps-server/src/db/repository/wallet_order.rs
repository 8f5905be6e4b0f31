//! Wallet Order Repository

use super::RepoResult;
use shared::models::{WalletOrder, WalletOrderStatus, WalletOrderType};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, user_id, order_type, amount, currency, status, note, meta_json, reviewed_by, review_reason, created_at, updated_at";

#[allow(clippy::too_many_arguments)]
pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    order_type: WalletOrderType,
    amount: i64,
    currency: &str,
    note: Option<&str>,
    meta_json: &str,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO wallet_order (user_id, order_type, amount, currency, status, note, meta_json, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'pending_review', ?5, ?6, ?7, ?7) RETURNING id",
    )
    .bind(user_id)
    .bind(order_type)
    .bind(amount)
    .bind(currency)
    .bind(note)
    .bind(meta_json)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<WalletOrder>> {
    let sql = format!("SELECT {COLUMNS} FROM wallet_order WHERE id = ?");
    let row = sqlx::query_as::<_, WalletOrder>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_by_user<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<WalletOrder>> {
    let sql = format!("SELECT {COLUMNS} FROM wallet_order WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?");
    let rows = sqlx::query_as::<_, WalletOrder>(&sql)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

pub async fn list_all<'e>(
    ex: impl SqliteExecutor<'e>,
    status: Option<WalletOrderStatus>,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<WalletOrder>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM wallet_order WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2 OFFSET ?3"
    );
    let rows = sqlx::query_as::<_, WalletOrder>(&sql)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Pending refund wallet order already filed for this VPS
pub async fn find_pending_refund_for_vps<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    vps_id: i64,
) -> RepoResult<Option<WalletOrder>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM wallet_order WHERE user_id = ? AND order_type = 'refund' AND status = 'pending_review' \
         AND CAST(json_extract(meta_json, '$.vps_id') AS INTEGER) = ? LIMIT 1"
    );
    let row = sqlx::query_as::<_, WalletOrder>(&sql)
        .bind(user_id)
        .bind(vps_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

/// Refund wallet order settling the given refund order, in any status
pub async fn find_refund_for_source_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
) -> RepoResult<Option<WalletOrder>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM wallet_order WHERE order_type = 'refund' \
         AND json_extract(meta_json, '$.source_order_id') = ? LIMIT 1"
    );
    let row = sqlx::query_as::<_, WalletOrder>(&sql)
        .bind(order_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

/// Compare-and-set review decision; false when no longer pending
pub async fn review<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: WalletOrderStatus,
    reviewed_by: Option<i64>,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE wallet_order SET status = ?, reviewed_by = ?, review_reason = ?, updated_at = ? WHERE id = ? AND status = 'pending_review'",
    )
    .bind(status)
    .bind(reviewed_by)
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn set_meta<'e>(ex: impl SqliteExecutor<'e>, id: i64, meta_json: &str, now: i64) -> RepoResult<()> {
    sqlx::query("UPDATE wallet_order SET meta_json = ?, updated_at = ? WHERE id = ?")
        .bind(meta_json)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}
