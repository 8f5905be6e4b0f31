//! Refund orders

use super::ApprovedBy;
use super::service::OrderService;
use super::spec::RefundItemSpec;
use crate::audit::action;
use crate::automation::trace::LogTarget;
use crate::db::repository::{order as order_repo, order_item::NewOrderItem, resize_task, vps as vps_repo};
use crate::wallet::RefundPolicy;
use serde_json::json;
use shared::models::{ItemAction, Order, OrderStatus, WalletOrder};
use shared::{AppError, AppResult, ErrorCode};

const REASON_MAX: usize = 1000;

impl OrderService {
    /// Refund-and-destroy order for an instance. The total is negative.
    pub async fn create_refund_order(&self, user_id: i64, vps_id: i64, reason: &str) -> AppResult<Order> {
        let reason = reason.trim();
        if reason.chars().count() > REASON_MAX {
            return Err(AppError::validation("reason too long"));
        }
        let vps = self.owned_instance(user_id, vps_id).await?;
        if order_repo::has_pending_for_vps(&self.ctx.pool, user_id, vps_id, &[ItemAction::Resize], None).await?
            || resize_task::has_pending_for_vps(&self.ctx.pool, vps_id, None).await?
        {
            return Err(AppError::conflict("a resize for this instance is still pending"));
        }
        if order_repo::has_pending_for_vps(&self.ctx.pool, user_id, vps_id, &[ItemAction::Refund], None).await? {
            return Err(AppError::conflict("a refund for this instance is already pending"));
        }
        let amount = self.wallet.refund_quote(&vps).await?;
        if amount <= 0 {
            return Err(AppError::forbidden("instance is outside the refund window"));
        }

        let spec = RefundItemSpec {
            vps_id,
            reason: reason.to_string(),
            refund_amount: amount,
            refund_to_wallet: true,
            delete_on_approve: true,
        };
        let item = NewOrderItem {
            action: ItemAction::Refund,
            package_id: vps.package_id,
            system_id: vps.system_id,
            spec_json: spec.to_json(),
            amount: -amount,
            status: OrderStatus::PendingReview,
            duration_months: 0,
            goods_type_id: vps.goods_type_id,
        };
        let order = self
            .insert_single_item_order(user_id, OrderStatus::PendingReview, -amount, item)
            .await?;
        tracing::info!(order_id = order.id, vps_id, amount, "Refund order filed");

        let policy = RefundPolicy::load(&self.ctx.settings).await;
        if !policy.requires_approval {
            return self.approve_order(order.id, ApprovedBy::System).await;
        }
        Ok(order)
    }

    /// Admin removal of an instance: optional refund first (`refund_on_admin_delete`),
    /// then the upstream host and the row
    pub async fn admin_delete_instance(&self, admin_id: i64, vps_id: i64) -> AppResult<Option<WalletOrder>> {
        let vps = vps_repo::find_by_id(&self.ctx.pool, vps_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound).with_detail("vps_id", vps_id))?;
        let refund = self.wallet.auto_refund_on_admin_delete(&vps).await?;
        let target = LogTarget {
            order_id: None,
            order_item_id: vps.order_item_id,
        };
        self.ctx.destroy_instance(&vps, target).await?;
        self.ctx
            .audit
            .record(
                admin_id,
                action::VPS_DELETE,
                "vps",
                vps_id,
                json!({
                    "user_id": vps.user_id,
                    "host_id": vps.automation_instance_id,
                    "refund_wallet_order_id": refund.as_ref().map(|o| o.id),
                }),
            )
            .await;
        Ok(refund)
    }
}
