//! Order Payment Repository

use super::RepoResult;
use shared::models::{OrderPayment, PaymentStatus};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, order_id, user_id, method, amount, currency, trade_no, idempotency_key, screenshot_url, note, status, reviewed_by, review_reason, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewPayment<'a> {
    pub order_id: i64,
    pub user_id: i64,
    pub method: &'a str,
    pub amount: i64,
    pub currency: &'a str,
    pub trade_no: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
    pub screenshot_url: Option<&'a str>,
    pub note: Option<&'a str>,
}

pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    p: &NewPayment<'_>,
    status: PaymentStatus,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO order_payment (order_id, user_id, method, amount, currency, trade_no, idempotency_key, screenshot_url, note, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11) RETURNING id",
    )
    .bind(p.order_id)
    .bind(p.user_id)
    .bind(p.method)
    .bind(p.amount)
    .bind(p.currency)
    .bind(p.trade_no)
    .bind(p.idempotency_key)
    .bind(p.screenshot_url)
    .bind(p.note)
    .bind(status)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<OrderPayment>> {
    let sql = format!("SELECT {COLUMNS} FROM order_payment WHERE id = ?");
    let row = sqlx::query_as::<_, OrderPayment>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_trade_no<'e>(
    ex: impl SqliteExecutor<'e>,
    trade_no: &str,
) -> RepoResult<Option<OrderPayment>> {
    let sql = format!("SELECT {COLUMNS} FROM order_payment WHERE trade_no = ?");
    let row = sqlx::query_as::<_, OrderPayment>(&sql)
        .bind(trade_no)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_idempotency_key<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    key: &str,
) -> RepoResult<Option<OrderPayment>> {
    let sql = format!("SELECT {COLUMNS} FROM order_payment WHERE order_id = ? AND idempotency_key = ?");
    let row = sqlx::query_as::<_, OrderPayment>(&sql)
        .bind(order_id)
        .bind(key)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

/// Latest payment of the order made with `method`
pub async fn find_latest_by_order_method<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    method: &str,
) -> RepoResult<Option<OrderPayment>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM order_payment WHERE order_id = ? AND method = ? ORDER BY id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, OrderPayment>(&sql)
        .bind(order_id)
        .bind(method)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_by_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
) -> RepoResult<Vec<OrderPayment>> {
    let sql = format!("SELECT {COLUMNS} FROM order_payment WHERE order_id = ? ORDER BY id");
    let rows = sqlx::query_as::<_, OrderPayment>(&sql)
        .bind(order_id)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Compare-and-set: only moves a payment that is not yet approved
pub async fn approve<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    trade_no: Option<&str>,
    now: i64,
) -> RepoResult<bool> {
    let rows = sqlx::query(
        "UPDATE order_payment SET status = 'approved', trade_no = COALESCE(?1, trade_no), updated_at = ?2 WHERE id = ?3 AND status <> 'approved'",
    )
    .bind(trade_no)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(rows.rows_affected() > 0)
}

pub async fn review<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: PaymentStatus,
    reviewed_by: Option<i64>,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE order_payment SET status = ?, reviewed_by = ?, review_reason = ?, updated_at = ? WHERE id = ?",
    )
    .bind(status)
    .bind(reviewed_by)
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

/// Review every pending-review payment of the order at once (admin approve/reject)
pub async fn review_pending_by_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    status: PaymentStatus,
    reviewed_by: Option<i64>,
    reason: Option<&str>,
    now: i64,
) -> RepoResult<u64> {
    let rows = sqlx::query(
        "UPDATE order_payment SET status = ?, reviewed_by = ?, review_reason = ?, updated_at = ? WHERE order_id = ? AND status = 'pending_review'",
    )
    .bind(status)
    .bind(reviewed_by)
    .bind(reason)
    .bind(now)
    .bind(order_id)
    .execute(ex)
    .await?;
    Ok(rows.rows_affected())
}
