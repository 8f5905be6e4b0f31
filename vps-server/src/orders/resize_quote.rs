//! Resize quoter
//!
//! Builds the target plan snapshot for an instance and prices the change
//! over the remaining part of the current period. Quoting has no side
//! effects; order creation runs it again to bind the price.

use super::pricing;
use super::proration::prorate;
use super::spec::{CartSpec, InstanceSpec, ResizeTarget, instance_period};
use crate::db::repository::catalog;
use crate::settings::{ResizePolicy, ResizePriceMode};
use crate::wallet::refund_policy::apply_ratio;
use serde::{Deserialize, Serialize};
use shared::models::{Package, PlanGroup, VpsInstance};
use shared::{AppError, AppResult};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResizeRequest {
    pub vps_id: i64,
    /// Target package inside the instance's plan group; current package when absent
    #[serde(default)]
    pub package_id: Option<i64>,
    /// New addon values; the current ones are kept when absent
    #[serde(default)]
    pub spec: Option<CartSpec>,
    #[serde(default)]
    pub reset_addons: bool,
    #[serde(default)]
    pub scheduled_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResizeQuote {
    pub vps_id: i64,
    pub target: ResizeTarget,
    pub current_monthly: i64,
    pub target_monthly: i64,
    /// Positive: amount to pay. Negative: value handed back.
    pub charge: i64,
    pub refund_amount: i64,
    pub refund_to_wallet: bool,
}

fn same_fingerprint(vps: &VpsInstance, t: &ResizeTarget) -> bool {
    vps.cpu == t.cpu
        && vps.memory_gb == t.memory_gb
        && vps.disk_gb == t.disk_gb
        && vps.bandwidth_mbps == t.bandwidth_mbps
        && vps.port_num == t.port_num
        && vps.monthly_price == t.monthly_price
}

/// Target snapshot from a package, its group and the addon values
pub fn target_of(package: &Package, group: &PlanGroup, addons: &CartSpec) -> ResizeTarget {
    ResizeTarget {
        package_id: Some(package.id),
        package_name: package.name.clone(),
        cpu: package.cores + addons.add_cores,
        memory_gb: package.memory_gb + addons.add_mem_gb,
        disk_gb: package.disk_gb + addons.add_disk_gb,
        bandwidth_mbps: package.bandwidth_mbps + addons.add_bw_mbps,
        port_num: package.port_num,
        monthly_price: pricing::monthly_price(package, group, addons),
        add_cores: addons.add_cores,
        add_mem_gb: addons.add_mem_gb,
        add_disk_gb: addons.add_disk_gb,
        add_bw_mbps: addons.add_bw_mbps,
    }
}

/// Plan-level checks shared by quoting and execution: same goods type,
/// same plan group, no disk shrink
pub fn check_target(
    vps: &VpsInstance,
    current_group_id: Option<i64>,
    group: &PlanGroup,
    target: &ResizeTarget,
) -> AppResult<()> {
    if group.goods_type_id != vps.goods_type_id {
        return Err(AppError::validation("target plan uses a different automation backend"));
    }
    if current_group_id.is_some_and(|id| id != group.id) {
        return Err(AppError::validation("target plan belongs to another plan group"));
    }
    if target.disk_gb < vps.disk_gb {
        return Err(AppError::validation("disk cannot shrink")
            .with_detail("current_disk_gb", vps.disk_gb)
            .with_detail("target_disk_gb", target.disk_gb));
    }
    Ok(())
}

pub async fn build_target(pool: &SqlitePool, vps: &VpsInstance, req: &ResizeRequest) -> AppResult<ResizeTarget> {
    let current = match vps.package_id {
        Some(id) => catalog::find_package(pool, id).await?,
        None => None,
    };
    let target_id = req
        .package_id
        .or(vps.package_id)
        .ok_or_else(|| AppError::validation("target package is required"))?;
    let package = catalog::find_package(pool, target_id)
        .await?
        .filter(|p| p.active || Some(p.id) == vps.package_id)
        .ok_or_else(|| AppError::validation(format!("package {target_id} is not available")))?;
    let group = catalog::find_plan_group(pool, package.plan_group_id)
        .await?
        .ok_or_else(|| AppError::validation(format!("plan group {} not found", package.plan_group_id)))?;

    if let Some(cur) = &current
        && cur.id != package.id
        && cur.product_id != 0
        && cur.product_id == package.product_id
    {
        return Err(AppError::resize_same_plan());
    }

    let addons = if req.reset_addons {
        CartSpec::default()
    } else if let Some(spec) = &req.spec {
        CartSpec {
            add_cores: spec.add_cores,
            add_mem_gb: spec.add_mem_gb,
            add_disk_gb: spec.add_disk_gb,
            add_bw_mbps: spec.add_bw_mbps,
            ..Default::default()
        }
    } else {
        let inst = InstanceSpec::parse(&vps.spec_json);
        CartSpec {
            add_cores: inst.add_cores,
            add_mem_gb: inst.add_mem_gb,
            add_disk_gb: inst.add_disk_gb,
            add_bw_mbps: inst.add_bw_mbps,
            ..Default::default()
        }
    };
    pricing::validate_addons(&group, &addons)?;

    let target = target_of(&package, &group, &addons);
    if same_fingerprint(vps, &target) {
        return Err(AppError::resize_same_plan());
    }
    check_target(vps, current.as_ref().map(|p| p.plan_group_id), &group, &target)?;
    Ok(target)
}

/// `(charge, refund_amount)` for moving `vps` to `target_monthly` at `now`
pub fn price_change(policy: &ResizePolicy, vps: &VpsInstance, target_monthly: i64, now: i64) -> (i64, i64) {
    let diff = target_monthly - vps.monthly_price;
    let mut charge = match policy.price_mode {
        ResizePriceMode::Full => diff,
        ResizePriceMode::Remaining => {
            let spec = InstanceSpec::parse(&vps.spec_json);
            match instance_period(&spec, vps.created_at, vps.expire_at) {
                Some((start, end)) => prorate(diff, end - now, end - start, policy.rounding),
                None => diff,
            }
        }
    };
    if charge > 0 && charge < policy.min_charge {
        charge = policy.min_charge;
    }
    let refund = if charge < 0 {
        let r = apply_ratio(-charge, policy.refund_ratio);
        if r < policy.min_refund { 0 } else { r }
    } else {
        0
    };
    (charge, refund)
}

pub async fn quote(
    pool: &SqlitePool,
    policy: &ResizePolicy,
    vps: &VpsInstance,
    req: &ResizeRequest,
    now: i64,
) -> AppResult<ResizeQuote> {
    let target = build_target(pool, vps, req).await?;
    let (charge, refund_amount) = price_change(policy, vps, target.monthly_price, now);
    Ok(ResizeQuote {
        vps_id: vps.id,
        current_monthly: vps.monthly_price,
        target_monthly: target.monthly_price,
        charge,
        refund_amount,
        refund_to_wallet: policy.refund_to_wallet,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::pricing::tests::{group, package};
    use crate::settings::Rounding;
    use shared::models::{AdminStatus, VpsStatus};
    use shared::util::DAY_MS;

    fn instance(monthly: i64, disk: i64, start: i64, end: i64) -> VpsInstance {
        let mut spec = InstanceSpec::default();
        spec.set_period(start, end);
        VpsInstance {
            id: 7,
            user_id: 1,
            order_item_id: Some(1),
            automation_instance_id: "501".into(),
            goods_type_id: 1,
            name: "ecs".into(),
            region: "hk".into(),
            line_id: 5,
            package_id: Some(10),
            package_name: "basic".into(),
            system_id: Some(1),
            cpu: 2,
            memory_gb: 4,
            disk_gb: disk,
            bandwidth_mbps: 10,
            port_num: 1,
            monthly_price: monthly,
            status: VpsStatus::Running,
            admin_status: AdminStatus::Normal,
            automation_state: 2,
            expire_at: Some(end),
            last_emergency_renew_at: None,
            spec_json: spec.to_json(),
            access_info_json: "{}".into(),
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_downgrade_full_period_refund() {
        let vps = instance(20_000, 40, 0, 30 * DAY_MS);
        let (charge, refund) = price_change(&ResizePolicy::default(), &vps, 10_000, 0);
        assert_eq!(charge, -10_000);
        assert_eq!(refund, 10_000);
    }

    #[test]
    fn test_upgrade_prorated_with_min_charge() {
        let vps = instance(10_000, 40, 0, 30 * DAY_MS);
        let policy = ResizePolicy::default();
        let (charge, refund) = price_change(&policy, &vps, 19_000, 20 * DAY_MS);
        assert_eq!((charge, refund), (3_000, 0));

        let policy = ResizePolicy {
            min_charge: 5_000,
            ..Default::default()
        };
        assert_eq!(price_change(&policy, &vps, 19_000, 20 * DAY_MS).0, 5_000);
    }

    #[test]
    fn test_refund_ratio_and_min_refund() {
        let vps = instance(20_000, 40, 0, 30 * DAY_MS);
        let policy = ResizePolicy {
            refund_ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(price_change(&policy, &vps, 10_000, 0), (-10_000, 5_000));
        let policy = ResizePolicy {
            min_refund: 6_000,
            refund_ratio: 0.5,
            ..Default::default()
        };
        assert_eq!(price_change(&policy, &vps, 10_000, 0).1, 0);
    }

    #[test]
    fn test_full_mode_and_rounding() {
        let vps = instance(10_000, 40, 0, 3);
        let full = ResizePolicy {
            price_mode: ResizePriceMode::Full,
            ..Default::default()
        };
        assert_eq!(price_change(&full, &vps, 11_000, 2).0, 1_000);

        // 1000 * 1 / 3 = 333.33
        let ceil = ResizePolicy {
            rounding: Rounding::Ceil,
            ..Default::default()
        };
        assert_eq!(price_change(&ceil, &vps, 11_000, 2).0, 334);
        assert_eq!(price_change(&ResizePolicy::default(), &vps, 11_000, 2).0, 333);
    }

    #[test]
    fn test_check_target_rejects_shrink_and_foreign_group() {
        let vps = instance(10_000, 40, 0, 30 * DAY_MS);
        let g = group();
        let mut small = target_of(&package(10_000), &g, &CartSpec::default());
        small.disk_gb = 20;
        assert!(check_target(&vps, Some(g.id), &g, &small).is_err());

        let ok = target_of(&package(12_000), &g, &CartSpec::default());
        assert!(check_target(&vps, Some(g.id), &g, &ok).is_ok());
        assert!(check_target(&vps, Some(99), &g, &ok).is_err());

        let mut other = g.clone();
        other.goods_type_id = 2;
        assert!(check_target(&vps, Some(g.id), &other, &ok).is_err());
    }
}
