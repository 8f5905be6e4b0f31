//! Pricing engine
//!
//! Unit price = round((base + Σ addon·unit) · cycle.multiplier · cycle_qty),
//! half away from zero, exact in minor units up to the one rounding.

use super::spec::CartSpec;
use crate::db::repository::catalog;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use shared::models::{BillingCycle, Package, PlanGroup};
use shared::{AppError, AppResult};
use sqlx::SqlitePool;

/// Cart line after validation and pricing
#[derive(Debug, Clone)]
pub struct PricedItem {
    pub package: Package,
    pub plan_group: PlanGroup,
    pub system_id: i64,
    /// Carries the resolved `duration_months`
    pub spec: CartSpec,
    /// Price of one instance for the whole duration
    pub unit_price: i64,
    pub monthly_price: i64,
    pub duration_months: i64,
    pub qty: i64,
}

impl PricedItem {
    pub fn total(&self) -> i64 {
        self.unit_price * self.qty
    }
}

/// `(min, max, step)` rule for one addon dimension
pub fn validate_addon(name: &str, value: i64, min: i64, max: i64, step: i64) -> AppResult<()> {
    if value == 0 {
        return Ok(());
    }
    if min == -1 || max == -1 {
        return Err(AppError::validation(format!("{name} addon is not available")));
    }
    if value < 0 {
        return Err(AppError::validation(format!("{name} addon must not be negative")));
    }
    if min > 0 && value < min {
        return Err(AppError::validation(format!("{name} addon below minimum {min}")));
    }
    if max > 0 && value > max {
        return Err(AppError::validation(format!("{name} addon above maximum {max}")));
    }
    if step > 1 && value % step != 0 {
        return Err(AppError::validation(format!("{name} addon must be a multiple of {step}")));
    }
    Ok(())
}

pub fn validate_addons(group: &PlanGroup, spec: &CartSpec) -> AppResult<()> {
    validate_addon("cpu", spec.add_cores, group.add_core_min, group.add_core_max, group.add_core_step)?;
    validate_addon("memory", spec.add_mem_gb, group.add_mem_min, group.add_mem_max, group.add_mem_step)?;
    validate_addon("disk", spec.add_disk_gb, group.add_disk_min, group.add_disk_max, group.add_disk_step)?;
    validate_addon("bandwidth", spec.add_bw_mbps, group.add_bw_min, group.add_bw_max, group.add_bw_step)?;
    Ok(())
}

/// Base plus addons for one month, before any cycle multiplier
pub fn monthly_price(package: &Package, group: &PlanGroup, spec: &CartSpec) -> i64 {
    package.monthly_price
        + spec.add_cores * group.unit_core
        + spec.add_mem_gb * group.unit_mem
        + spec.add_disk_gb * group.unit_disk
        + spec.add_bw_mbps * group.unit_bw
}

/// `(unit_price, duration_months)`
pub fn unit_price(
    package: &Package,
    group: &PlanGroup,
    spec: &CartSpec,
    cycle: Option<&BillingCycle>,
) -> AppResult<(i64, i64)> {
    validate_addons(group, spec)?;
    let cycle_qty = spec.cycle_qty.unwrap_or(1);
    if cycle_qty < 1 {
        return Err(AppError::validation("cycle_qty must be at least 1"));
    }

    let (multiplier, months) = match cycle {
        Some(c) => {
            if !c.active {
                return Err(AppError::validation(format!("billing cycle {} is not available", c.id)));
            }
            if (c.min_qty > 0 && cycle_qty < c.min_qty) || (c.max_qty > 0 && cycle_qty > c.max_qty) {
                return Err(AppError::validation(format!(
                    "cycle_qty must be within [{}, {}]",
                    c.min_qty, c.max_qty
                )));
            }
            let m = Decimal::from_f64_retain(c.multiplier)
                .ok_or_else(|| AppError::validation("invalid cycle multiplier"))?
                .round_dp(6);
            (m, c.months.max(1))
        }
        None => (Decimal::ONE, 1),
    };

    let monthly = Decimal::from_i64(monthly_price(package, group, spec)).unwrap_or(Decimal::ZERO);
    let price = (monthly * multiplier * Decimal::from(cycle_qty))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::validation("price out of range"))?;
    Ok((price, months * cycle_qty))
}

/// Validate a cart line against the catalog and price it
pub async fn price_item(
    pool: &SqlitePool,
    package_id: i64,
    system_id: i64,
    spec: &CartSpec,
    qty: i64,
) -> AppResult<PricedItem> {
    if qty < 1 {
        return Err(AppError::validation("qty must be at least 1"));
    }
    let package = catalog::find_package(pool, package_id)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::validation(format!("package {package_id} is not available")))?;
    let plan_group = catalog::find_plan_group(pool, package.plan_group_id)
        .await?
        .filter(|g| g.active)
        .ok_or_else(|| AppError::validation(format!("plan group {} is not available", package.plan_group_id)))?;
    catalog::find_system_image(pool, system_id)
        .await?
        .filter(|i| i.active)
        .ok_or_else(|| AppError::validation(format!("system image {system_id} is not available")))?;
    let cycle = match spec.billing_cycle_id {
        Some(id) => Some(
            catalog::find_billing_cycle(pool, id)
                .await?
                .ok_or_else(|| AppError::validation(format!("billing cycle {id} not found")))?,
        ),
        None => None,
    };

    let (unit_price, duration_months) = unit_price(&package, &plan_group, spec, cycle.as_ref())?;
    let monthly_price = monthly_price(&package, &plan_group, spec);
    let mut spec = spec.clone();
    spec.duration_months = Some(duration_months);
    Ok(PricedItem {
        package,
        plan_group,
        system_id,
        spec,
        unit_price,
        monthly_price,
        duration_months,
        qty,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn package(monthly: i64) -> Package {
        Package {
            id: 10,
            plan_group_id: 1,
            product_id: 100,
            name: "basic".into(),
            cores: 2,
            memory_gb: 4,
            disk_gb: 40,
            bandwidth_mbps: 10,
            port_num: 1,
            monthly_price: monthly,
            active: true,
        }
    }

    pub fn group() -> PlanGroup {
        PlanGroup {
            id: 1,
            region_id: 1,
            name: "hk".into(),
            line_id: 5,
            goods_type_id: 1,
            unit_core: 1000,
            unit_mem: 500,
            unit_disk: 10,
            unit_bw: 200,
            add_core_min: 1,
            add_core_max: 8,
            add_core_step: 1,
            add_mem_min: 2,
            add_mem_max: 32,
            add_mem_step: 2,
            add_disk_min: 10,
            add_disk_max: 500,
            add_disk_step: 10,
            add_bw_min: -1,
            add_bw_max: -1,
            add_bw_step: 1,
            active: true,
        }
    }

    fn cycle(months: i64, multiplier: f64) -> BillingCycle {
        BillingCycle {
            id: 3,
            name: "quarter".into(),
            months,
            multiplier,
            min_qty: 1,
            max_qty: 4,
            active: true,
        }
    }

    #[test]
    fn test_base_price_without_cycle() {
        let (price, months) = unit_price(&package(10_000), &group(), &CartSpec::default(), None).unwrap();
        assert_eq!((price, months), (10_000, 1));
    }

    #[test]
    fn test_addons_and_cycle() {
        let spec = CartSpec {
            add_cores: 2,
            add_mem_gb: 4,
            add_disk_gb: 20,
            cycle_qty: Some(2),
            ..Default::default()
        };
        // 10000 + 2000 + 2000 + 200 = 14200 per month
        let (price, months) = unit_price(&package(10_000), &group(), &spec, Some(&cycle(3, 2.85))).unwrap();
        // 14200 * 2.85 * 2 = 80940
        assert_eq!(price, 80_940);
        assert_eq!(months, 6);
    }

    #[test]
    fn test_half_away_from_zero() {
        let (price, _) = unit_price(&package(1), &group(), &CartSpec::default(), Some(&cycle(1, 2.5))).unwrap();
        assert_eq!(price, 3);
    }

    #[test]
    fn test_addon_rules() {
        assert!(validate_addon("cpu", 0, -1, -1, 1).is_ok());
        assert!(validate_addon("cpu", 1, -1, 8, 1).is_err());
        assert!(validate_addon("mem", 3, 2, 32, 2).is_err());
        assert!(validate_addon("mem", 34, 2, 32, 2).is_err());
        assert!(validate_addon("mem", 1, 2, 32, 2).is_err());
        assert!(validate_addon("disk", 1000, 0, 0, 10).is_ok());
        let spec = CartSpec {
            add_bw_mbps: 5,
            ..Default::default()
        };
        assert!(unit_price(&package(100), &group(), &spec, None).is_err());
    }

    #[test]
    fn test_inactive_cycle_and_qty_bounds() {
        let mut c = cycle(1, 1.0);
        c.active = false;
        assert!(unit_price(&package(100), &group(), &CartSpec::default(), Some(&c)).is_err());
        let spec = CartSpec {
            cycle_qty: Some(5),
            ..Default::default()
        };
        assert!(unit_price(&package(100), &group(), &spec, Some(&cycle(1, 1.0))).is_err());
    }

    #[test]
    fn test_price_is_deterministic() {
        let spec = CartSpec {
            add_cores: 3,
            ..Default::default()
        };
        let a = unit_price(&package(9_999), &group(), &spec, Some(&cycle(12, 10.0))).unwrap();
        let b = unit_price(&package(9_999), &group(), &spec, Some(&cycle(12, 10.0))).unwrap();
        assert_eq!(a, b);
    }
}
