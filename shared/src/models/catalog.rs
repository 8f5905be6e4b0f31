//! Catalog Model (region / plan group / package / image / billing cycle)

use serde::{Deserialize, Serialize};

/// Region (area) exposed in the storefront
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Region {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub active: bool,
}

/// Plan group: a line inside a region plus the addon pricing table
///
/// Addon bounds follow one rule per dimension: `0` is always legal,
/// `min = -1` (or `max = -1`) disables the addon, otherwise the value
/// must sit in `[min, max]` (a bound of `0` means unbounded) and be a
/// multiple of `step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct PlanGroup {
    pub id: i64,
    pub region_id: i64,
    pub name: String,
    /// Upstream line id passed to CreateHost
    pub line_id: i64,
    /// Selects the automation plugin
    pub goods_type_id: i64,
    pub unit_core: i64,
    pub unit_mem: i64,
    pub unit_disk: i64,
    pub unit_bw: i64,
    pub add_core_min: i64,
    pub add_core_max: i64,
    pub add_core_step: i64,
    pub add_mem_min: i64,
    pub add_mem_max: i64,
    pub add_mem_step: i64,
    pub add_disk_min: i64,
    pub add_disk_max: i64,
    pub add_disk_step: i64,
    pub add_bw_min: i64,
    pub add_bw_max: i64,
    pub add_bw_step: i64,
    pub active: bool,
}

/// Sellable package inside a plan group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Package {
    pub id: i64,
    pub plan_group_id: i64,
    /// Upstream product id; packages sharing a non-zero id are the same plan
    pub product_id: i64,
    pub name: String,
    pub cores: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth_mbps: i64,
    pub port_num: i64,
    /// Base monthly price in minor units
    pub monthly_price: i64,
    pub active: bool,
}

/// Operating system image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct SystemImage {
    pub id: i64,
    /// Upstream image identifier passed as `os`
    pub image_id: i64,
    pub name: String,
    pub active: bool,
}

/// Billing cycle: months per unit and a price multiplier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct BillingCycle {
    pub id: i64,
    pub name: String,
    pub months: i64,
    pub multiplier: f64,
    pub min_qty: i64,
    pub max_qty: i64,
    pub active: bool,
}
