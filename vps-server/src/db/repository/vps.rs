//! VPS Instance Repository

use super::RepoResult;
use shared::models::{AdminStatus, VpsInstance, VpsStatus};
use sqlx::SqliteExecutor;

const COLUMNS: &str = "id, user_id, order_item_id, automation_instance_id, goods_type_id, name, region, line_id, package_id, package_name, system_id, cpu, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price, status, admin_status, automation_state, expire_at, last_emergency_renew_at, spec_json, access_info_json, created_at, updated_at";

/// Full snapshot written when a create item becomes Ready (or its placeholder)
#[derive(Debug, Clone)]
pub struct VpsSnapshot {
    pub user_id: i64,
    pub order_item_id: i64,
    pub automation_instance_id: String,
    pub goods_type_id: i64,
    pub name: String,
    pub region: String,
    pub line_id: i64,
    pub package_id: Option<i64>,
    pub package_name: String,
    pub system_id: Option<i64>,
    pub cpu: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth_mbps: i64,
    pub port_num: i64,
    pub monthly_price: i64,
    pub status: VpsStatus,
    pub automation_state: i64,
    pub expire_at: Option<i64>,
    pub spec_json: String,
    pub access_info_json: String,
}

pub async fn find_by_id<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<VpsInstance>> {
    let sql = format!("SELECT {COLUMNS} FROM vps_instance WHERE id = ?");
    let row = sqlx::query_as::<_, VpsInstance>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_by_order_item<'e>(
    ex: impl SqliteExecutor<'e>,
    order_item_id: i64,
) -> RepoResult<Option<VpsInstance>> {
    let sql = format!("SELECT {COLUMNS} FROM vps_instance WHERE order_item_id = ?");
    let row = sqlx::query_as::<_, VpsInstance>(&sql)
        .bind(order_item_id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_by_user<'e>(ex: impl SqliteExecutor<'e>, user_id: i64) -> RepoResult<Vec<VpsInstance>> {
    let sql = format!("SELECT {COLUMNS} FROM vps_instance WHERE user_id = ? ORDER BY id");
    let rows = sqlx::query_as::<_, VpsInstance>(&sql)
        .bind(user_id)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Instances bound to an upstream host
pub async fn list_with_host<'e>(ex: impl SqliteExecutor<'e>) -> RepoResult<Vec<VpsInstance>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM vps_instance WHERE automation_instance_id <> '' AND automation_instance_id <> '0' ORDER BY id"
    );
    let rows = sqlx::query_as::<_, VpsInstance>(&sql).fetch_all(ex).await?;
    Ok(rows)
}

/// Instances whose `expire_at` lies in `[from, to)`
pub async fn list_expiring_between<'e>(
    ex: impl SqliteExecutor<'e>,
    from: i64,
    to: i64,
) -> RepoResult<Vec<VpsInstance>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM vps_instance WHERE expire_at IS NOT NULL AND expire_at >= ? AND expire_at < ? ORDER BY expire_at"
    );
    let rows = sqlx::query_as::<_, VpsInstance>(&sql)
        .bind(from)
        .bind(to)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

/// Insert or replace the row keyed by `order_item_id`
pub async fn upsert_snapshot<'e>(
    ex: impl SqliteExecutor<'e>,
    s: &VpsSnapshot,
    now: i64,
) -> RepoResult<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO vps_instance (user_id, order_item_id, automation_instance_id, goods_type_id, name, region, line_id, package_id, package_name, system_id, cpu, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price, status, automation_state, expire_at, spec_json, access_info_json, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?22) \
         ON CONFLICT(order_item_id) DO UPDATE SET \
           automation_instance_id = excluded.automation_instance_id, goods_type_id = excluded.goods_type_id, \
           name = excluded.name, region = excluded.region, line_id = excluded.line_id, \
           package_id = excluded.package_id, package_name = excluded.package_name, system_id = excluded.system_id, \
           cpu = excluded.cpu, memory_gb = excluded.memory_gb, disk_gb = excluded.disk_gb, \
           bandwidth_mbps = excluded.bandwidth_mbps, port_num = excluded.port_num, monthly_price = excluded.monthly_price, \
           status = excluded.status, automation_state = excluded.automation_state, \
           expire_at = COALESCE(excluded.expire_at, vps_instance.expire_at), \
           spec_json = excluded.spec_json, access_info_json = excluded.access_info_json, \
           updated_at = excluded.updated_at \
         RETURNING id",
    )
    .bind(s.user_id)
    .bind(s.order_item_id)
    .bind(&s.automation_instance_id)
    .bind(s.goods_type_id)
    .bind(&s.name)
    .bind(&s.region)
    .bind(s.line_id)
    .bind(s.package_id)
    .bind(&s.package_name)
    .bind(s.system_id)
    .bind(s.cpu)
    .bind(s.memory_gb)
    .bind(s.disk_gb)
    .bind(s.bandwidth_mbps)
    .bind(s.port_num)
    .bind(s.monthly_price)
    .bind(s.status)
    .bind(s.automation_state)
    .bind(s.expire_at)
    .bind(&s.spec_json)
    .bind(&s.access_info_json)
    .bind(now)
    .fetch_one(ex)
    .await?;
    Ok(id)
}

pub async fn set_status<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    status: VpsStatus,
    automation_state: i64,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE vps_instance SET status = ?, automation_state = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(automation_state)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn set_admin_status<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    admin_status: AdminStatus,
    now: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE vps_instance SET admin_status = ?, updated_at = ? WHERE id = ?")
        .bind(admin_status)
        .bind(now)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Renewal result: new expiry and rewritten current period
pub async fn set_expiry<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    expire_at: i64,
    status: VpsStatus,
    spec_json: &str,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE vps_instance SET expire_at = ?, status = ?, spec_json = ?, updated_at = ? WHERE id = ?",
    )
    .bind(expire_at)
    .bind(status)
    .bind(spec_json)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn set_last_emergency_renew<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    at: i64,
) -> RepoResult<()> {
    sqlx::query("UPDATE vps_instance SET last_emergency_renew_at = ?, updated_at = ? WHERE id = ?")
        .bind(at)
        .bind(at)
        .bind(id)
        .execute(ex)
        .await?;
    Ok(())
}

/// Local plan snapshot after an elastic update
#[derive(Debug, Clone)]
pub struct ResizeSnapshot {
    pub package_id: Option<i64>,
    pub package_name: String,
    pub cpu: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth_mbps: i64,
    pub port_num: i64,
    pub monthly_price: i64,
    pub spec_json: String,
}

pub async fn apply_resize<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    s: &ResizeSnapshot,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE vps_instance SET package_id = ?, package_name = ?, cpu = ?, memory_gb = ?, disk_gb = ?, bandwidth_mbps = ?, port_num = ?, monthly_price = ?, spec_json = ?, updated_at = ? WHERE id = ?",
    )
    .bind(s.package_id)
    .bind(&s.package_name)
    .bind(s.cpu)
    .bind(s.memory_gb)
    .bind(s.disk_gb)
    .bind(s.bandwidth_mbps)
    .bind(s.port_num)
    .bind(s.monthly_price)
    .bind(&s.spec_json)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

/// Mirror of upstream host info (refresh worker, resize follow-up)
#[derive(Debug, Clone)]
pub struct HostSync {
    pub status: VpsStatus,
    pub automation_state: i64,
    pub expire_at: Option<i64>,
    pub spec_json: String,
    pub access_info_json: String,
}

pub async fn apply_host_sync<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
    s: &HostSync,
    now: i64,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE vps_instance SET status = ?, automation_state = ?, expire_at = COALESCE(?, expire_at), spec_json = ?, access_info_json = ?, updated_at = ? WHERE id = ?",
    )
    .bind(s.status)
    .bind(s.automation_state)
    .bind(s.expire_at)
    .bind(&s.spec_json)
    .bind(&s.access_info_json)
    .bind(now)
    .bind(id)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn delete<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<bool> {
    let rows = sqlx::query("DELETE FROM vps_instance WHERE id = ?")
        .bind(id)
        .execute(ex)
        .await?;
    Ok(rows.rows_affected() > 0)
}
