//! Order Item Repository

use super::RepoResult;
use shared::models::{ItemAction, ItemStatus, OrderItem};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, order_id, action, package_id, system_id, spec_json, qty, amount, status, duration_months, automation_instance_id, goods_type_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub action: ItemAction,
    pub package_id: Option<i64>,
    pub system_id: Option<i64>,
    pub spec_json: String,
    pub amount: i64,
    pub status: ItemStatus,
    pub duration_months: i64,
    pub goods_type_id: i64,
}

/// Items are always stored with `qty = 1`
pub async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    item: &NewOrderItem,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO order_item (order_id, action, package_id, system_id, spec_json, qty, amount, status, duration_months, goods_type_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?10, ?10) RETURNING id",
    )
    .bind(order_id)
    .bind(item.action)
    .bind(item.package_id)
    .bind(item.system_id)
    .bind(&item.spec_json)
    .bind(item.amount)
    .bind(item.status)
    .bind(item.duration_months)
    .bind(item.goods_type_id)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<OrderItem>> {
    let sql = format!("SELECT {COLUMNS} FROM order_item WHERE id = ?");
    let row = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_by_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
) -> RepoResult<Vec<OrderItem>> {
    let sql = format!("SELECT {COLUMNS} FROM order_item WHERE order_id = ? ORDER BY id");
    let rows = sqlx::query_as::<_, OrderItem>(&sql)
        .bind(order_id)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

pub async fn set_status<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: ItemStatus,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE order_item SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Move every item of the order whose status is in `from` to `to`
pub async fn set_status_by_order<'e>(
    ex: impl SqliteExecutor<'e>,
    order_id: i64,
    from: &[ItemStatus],
    to: ItemStatus,
    now: i64,
) -> RepoResult<u64> {
    let quoted: Vec<String> = from.iter().map(|s| format!("'{}'", s.as_str())).collect();
    let sql = format!(
        "UPDATE order_item SET status = ?, updated_at = ? WHERE order_id = ? AND status IN ({})",
        quoted.join(",")
    );
    let rows = sqlx::query(&sql)
        .bind(to)
        .bind(now)
        .bind(order_id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected())
}

pub async fn set_automation_instance<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    host_id: &str,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE order_item SET automation_instance_id = ?, updated_at = ? WHERE id = ?")
        .bind(host_id)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn set_spec<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    spec_json: &str,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE order_item SET spec_json = ?, updated_at = ? WHERE id = ?")
        .bind(spec_json)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}
