//! Renew and emergency renew orders

use super::ApprovedBy;
use super::service::OrderService;
use super::spec::RenewItemSpec;
use crate::db::repository::{catalog, order as order_repo, order_item::NewOrderItem};
use crate::realname::ACTION_RENEW;
use crate::settings::EmergencyRenewPolicy;
use shared::models::{ItemAction, Order, OrderStatus, VpsInstance};
use shared::{AppError, AppResult};

const DAYS_PER_MONTH: i64 = 30;

/// Emergency gates shared by the constructor and the executor
pub fn check_emergency(policy: &EmergencyRenewPolicy, vps: &VpsInstance, now: i64) -> AppResult<()> {
    if !policy.enabled {
        return Err(AppError::forbidden("emergency renew is disabled"));
    }
    if !policy.in_window(now, vps.expire_at) {
        return Err(AppError::forbidden("instance is outside the emergency renew window"));
    }
    if !policy.cooldown_elapsed(now, vps.last_emergency_renew_at) {
        return Err(AppError::conflict("emergency renew was used recently")
            .with_detail("interval_hours", policy.interval_hours));
    }
    Ok(())
}

/// `(months, renew_days)` from whichever of the two the caller gave
pub fn renew_length(renew_days: Option<i64>, duration_months: Option<i64>) -> AppResult<(i64, i64)> {
    let months = match (duration_months, renew_days) {
        (Some(m), _) if m > 0 => m,
        (_, Some(d)) if d > 0 => (d + DAYS_PER_MONTH - 1) / DAYS_PER_MONTH,
        _ => return Err(AppError::validation("renew_days or duration_months must be positive")),
    };
    Ok((months, months * DAYS_PER_MONTH))
}

const RENEW_ACTIONS: &[ItemAction] = &[ItemAction::Renew, ItemAction::EmergencyRenew];

impl OrderService {
    async fn ensure_no_pending_renew(&self, user_id: i64, vps_id: i64) -> AppResult<()> {
        if order_repo::has_pending_for_vps(&self.ctx.pool, user_id, vps_id, RENEW_ACTIONS, None).await? {
            return Err(AppError::conflict("a renew order for this instance is already pending"));
        }
        Ok(())
    }

    pub async fn create_renew_order(
        &self,
        user_id: i64,
        vps_id: i64,
        renew_days: Option<i64>,
        duration_months: Option<i64>,
    ) -> AppResult<Order> {
        self.ctx.realname.require(user_id, ACTION_RENEW).await?;
        let vps = self.owned_instance(user_id, vps_id).await?;
        self.ensure_no_pending_renew(user_id, vps_id).await?;
        let (months, renew_days) = renew_length(renew_days, duration_months)?;

        let mut monthly = vps.monthly_price;
        if monthly <= 0
            && let Some(package_id) = vps.package_id
            && let Some(package) = catalog::find_package(&self.ctx.pool, package_id).await?
        {
            monthly = package.monthly_price;
        }
        let amount = monthly * months;

        let spec = RenewItemSpec {
            vps_id,
            renew_days,
            duration_months: months,
            emergency: false,
        };
        let item = NewOrderItem {
            action: ItemAction::Renew,
            package_id: vps.package_id,
            system_id: vps.system_id,
            spec_json: spec.to_json(),
            amount,
            status: OrderStatus::PendingPayment,
            duration_months: months,
            goods_type_id: vps.goods_type_id,
        };
        self.insert_single_item_order(user_id, OrderStatus::PendingPayment, amount, item)
            .await
    }

    /// Zero-cost short renew, approved by the system right away
    pub async fn create_emergency_renew_order(&self, user_id: i64, vps_id: i64) -> AppResult<Order> {
        let vps = self.owned_instance(user_id, vps_id).await?;
        let policy = EmergencyRenewPolicy::load(&self.ctx.settings).await;
        check_emergency(&policy, &vps, self.ctx.now())?;
        self.ensure_no_pending_renew(user_id, vps_id).await?;

        let spec = RenewItemSpec {
            vps_id,
            renew_days: policy.renew_days,
            duration_months: 0,
            emergency: true,
        };
        let item = NewOrderItem {
            action: ItemAction::EmergencyRenew,
            package_id: vps.package_id,
            system_id: vps.system_id,
            spec_json: spec.to_json(),
            amount: 0,
            status: OrderStatus::PendingReview,
            duration_months: 0,
            goods_type_id: vps.goods_type_id,
        };
        let order = self
            .insert_single_item_order(user_id, OrderStatus::PendingReview, 0, item)
            .await?;
        self.approve_order(order.id, ApprovedBy::System).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{AdminStatus, VpsStatus};
    use shared::util::{DAY_MS, HOUR_MS};

    fn instance(expire_at: Option<i64>, last: Option<i64>) -> VpsInstance {
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
            disk_gb: 40,
            bandwidth_mbps: 10,
            port_num: 1,
            monthly_price: 10_000,
            status: VpsStatus::Running,
            admin_status: AdminStatus::Normal,
            automation_state: 2,
            expire_at,
            last_emergency_renew_at: last,
            spec_json: "{}".into(),
            access_info_json: "{}".into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_renew_length() {
        assert_eq!(renew_length(Some(30), None).unwrap(), (1, 30));
        assert_eq!(renew_length(Some(31), None).unwrap(), (2, 60));
        assert_eq!(renew_length(Some(1), Some(3)).unwrap(), (3, 90));
        assert!(renew_length(None, None).is_err());
        assert!(renew_length(Some(0), Some(0)).is_err());
    }

    #[test]
    fn test_emergency_window_and_cooldown() {
        let policy = EmergencyRenewPolicy::default();
        let now = 100 * DAY_MS;

        assert!(check_emergency(&policy, &instance(Some(now + 2 * DAY_MS), None), now).is_ok());
        let far = check_emergency(&policy, &instance(Some(now + 30 * DAY_MS), None), now).unwrap_err();
        assert!(far.is(shared::ErrorCode::PermissionDenied));
        assert!(check_emergency(&policy, &instance(Some(now - 1), None), now).is_err());
        assert!(check_emergency(&policy, &instance(None, None), now).is_err());

        let recent = check_emergency(&policy, &instance(Some(now + DAY_MS), Some(now - HOUR_MS)), now).unwrap_err();
        assert!(recent.is(shared::ErrorCode::Conflict));
        let old = instance(Some(now + DAY_MS), Some(now - 721 * HOUR_MS));
        assert!(check_emergency(&policy, &old, now).is_ok());
    }

    #[test]
    fn test_emergency_disabled() {
        let policy = EmergencyRenewPolicy {
            enabled: false,
            ..Default::default()
        };
        assert!(check_emergency(&policy, &instance(Some(DAY_MS), None), 0).is_err());
    }
}
