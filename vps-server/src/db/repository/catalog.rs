//! Catalog Repository (read side used by pricing and provisioning)

use super::RepoResult;
use shared::models::{BillingCycle, Package, PlanGroup, Region, SystemImage};
use sqlx::SqliteExecutor;

const PLAN_GROUP_COLUMNS: &str = "id, region_id, name, line_id, goods_type_id, unit_core, unit_mem, unit_disk, unit_bw, add_core_min, add_core_max, add_core_step, add_mem_min, add_mem_max, add_mem_step, add_disk_min, add_disk_max, add_disk_step, add_bw_min, add_bw_max, add_bw_step, active";

const PACKAGE_COLUMNS: &str = "id, plan_group_id, product_id, name, cores, memory_gb, disk_gb, bandwidth_mbps, port_num, monthly_price, active";

pub async fn find_package<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<Package>> {
    let sql = format!("SELECT {PACKAGE_COLUMNS} FROM package WHERE id = ?");
    let row = sqlx::query_as::<_, Package>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn list_packages_by_group<'e>(
    ex: impl SqliteExecutor<'e>,
    plan_group_id: i64,
) -> RepoResult<Vec<Package>> {
    let sql = format!(
        "SELECT {PACKAGE_COLUMNS} FROM package WHERE plan_group_id = ? AND active = 1 ORDER BY monthly_price"
    );
    let rows = sqlx::query_as::<_, Package>(&sql)
        .bind(plan_group_id)
        .fetch_all(ex)
        .await?;
    Ok(rows)
}

pub async fn find_plan_group<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
) -> RepoResult<Option<PlanGroup>> {
    let sql = format!("SELECT {PLAN_GROUP_COLUMNS} FROM plan_group WHERE id = ?");
    let row = sqlx::query_as::<_, PlanGroup>(&sql)
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_region<'e>(ex: impl SqliteExecutor<'e>, id: i64) -> RepoResult<Option<Region>> {
    let row = sqlx::query_as::<_, Region>("SELECT id, code, name, active FROM region WHERE id = ?")
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row)
}

pub async fn find_system_image<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
) -> RepoResult<Option<SystemImage>> {
    let row = sqlx::query_as::<_, SystemImage>(
        "SELECT id, image_id, name, active FROM system_image WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}

pub async fn find_billing_cycle<'e>(
    ex: impl SqliteExecutor<'e>,
    id: i64,
) -> RepoResult<Option<BillingCycle>> {
    let row = sqlx::query_as::<_, BillingCycle>(
        "SELECT id, name, months, multiplier, min_qty, max_qty, active FROM billing_cycle WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(ex)
    .await?;
    Ok(row)
}
