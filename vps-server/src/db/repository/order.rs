//! Order Repository

use super::RepoResult;
use shared::models::{ItemAction, Order, OrderStatus};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, user_id, order_no, status, total_amount, currency, idempotency_key, pending_reason, rejected_reason, approved_at, approved_by, created_at, updated_at";

/// Statuses in which an order still blocks another mutating order on the same VPS
pub const PENDING_SQL: &str = "('pending_payment','pending_review','approved','provisioning')";

#[derive(Debug, Clone)]
pub struct NewOrder<'a> {
    pub user_id: i64,
    pub order_no: &'a str,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub currency: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub pending_reason: Option<&'a str>,
}

pub async fn insert<'e>(ex: impl SqliteExecutor<'e>, order: &NewOrder<'_>, now: i64) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO orders (user_id, order_no, status, total_amount, currency, idempotency_key, pending_reason, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) RETURNING id",
    )
    .bind(order.user_id)
    .bind(order.order_no)
    .bind(order.status)
    .bind(order.total_amount)
    .bind(order.currency)
    .bind(order.idempotency_key)
    .bind(order.pending_reason)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<Order>> {
    let sql = format!("SELECT {COLUMNS} FROM orders WHERE id = ?");
    let row = sqlx::query_as::<_, Order>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_order_no<'e>(
    ex: impl SqliteExecutor<'e>,
    order_no: &str,
) -> RepoResult<Option<Order>> {
    let sql = format!("SELECT {COLUMNS} FROM orders WHERE order_no = ?");
    let row = sqlx::query_as::<_, Order>(&sql)
        .bind(order_no)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_idempotency_key<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    key: &str,
) -> RepoResult<Option<Order>> {
    let sql = format!("SELECT {COLUMNS} FROM orders WHERE user_id = ? AND idempotency_key = ?");
    let row = sqlx::query_as::<_, Order>(&sql)
        .bind(user_id)
        .bind(key)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_by_user<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<Order>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM orders WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query_as::<_, Order>(&sql)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

pub async fn list_all<'e>(
    ex: impl SqliteExecutor<'e>,
    status: Option<OrderStatus>,
    limit: i64,
    offset: i64,
) -> RepoResult<Vec<Order>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM orders WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    );
    let rows = sqlx::query_as::<_, Order>(&sql)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

fn in_list(statuses: &[OrderStatus]) -> String {
    let quoted: Vec<String> = statuses.iter().map(|s| format!("'{}'", s.as_str())).collect();
    format!("({})", quoted.join(","))
}

/// Compare-and-set status change. Returns false when the order is not in
/// one of `from` (the caller maps that to a conflict).
pub async fn transition<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    from: &[OrderStatus],
    to: OrderStatus,
    now: i64,
) -> RepoResult<bool> {
    let sql = format!(
        "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status IN {}",
        in_list(from)
    );
    let rows = sqlx::query(&sql)
        .bind(to)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn set_status<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: OrderStatus,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Approve from one of `from`; `approved_by` is NULL for system approvals
pub async fn mark_approved<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    from: &[OrderStatus],
    approved_by: Option<i64>,
    now: i64,
) -> RepoResult<bool> {
    let sql = format!(
        "UPDATE orders SET status = 'approved', approved_at = ?1, approved_by = ?2, rejected_reason = NULL, updated_at = ?1 WHERE id = ?3 AND status IN {}",
        in_list(from)
    );
    let rows = sqlx::query(&sql)
        .bind(now)
        .bind(approved_by)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn mark_rejected<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    from: &[OrderStatus],
    reason: &str,
    now: i64,
) -> RepoResult<bool> {
    let sql = format!(
        "UPDATE orders SET status = 'rejected', rejected_reason = ?1, updated_at = ?2 WHERE id = ?3 AND status IN {}",
        in_list(from)
    );
    let rows = sqlx::query(&sql)
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn set_pending_reason<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE orders SET pending_reason = ?, updated_at = ? WHERE id = ?")
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Whether a pending order of `actions` targets the VPS (items carry `vps_id` in spec_json)
pub async fn has_pending_for_vps<'e>(
    ex: impl SqliteExecutor<'e>,
    user_id: i64,
    vps_id: i64,
    actions: &[ItemAction],
    exclude_order_id: Option<i64>,
) -> RepoResult<bool> {
    let quoted: Vec<String> = actions.iter().map(|a| format!("'{}'", a.as_str())).collect();
    let sql = format!(
        "SELECT COUNT(1) FROM orders o JOIN order_item i ON i.order_id = o.id \
         WHERE o.user_id = ?1 AND o.status IN {PENDING_SQL} AND i.action IN ({}) \
         AND CAST(json_extract(i.spec_json, '$.vps_id') AS INTEGER) = ?2 \
         AND (?3 IS NULL OR o.id <> ?3)",
        quoted.join(",")
    );
    let count = sqlx::query_scalar::<_, i64>(&sql)
        .bind(user_id)
        .bind(vps_id)
        .bind(exclude_order_id)
        .fetch_one(ex)
        .await?;
    Ok(count > 0)
}
