//! Resize orders

use super::ApprovedBy;
use super::resize_quote::{self, ResizeQuote, ResizeRequest};
use super::service::OrderService;
use super::spec::ResizeItemSpec;
use crate::db::repository::{order as order_repo, order_item::NewOrderItem, resize_task};
use crate::realname::ACTION_RESIZE;
use crate::settings::ResizePolicy;
use shared::models::{ItemAction, Order, OrderStatus, VpsInstance};
use shared::{AppError, AppResult};

impl OrderService {
    async fn resize_preflight(&self, user_id: i64, req: &ResizeRequest) -> AppResult<(VpsInstance, ResizePolicy)> {
        self.ctx.realname.require(user_id, ACTION_RESIZE).await?;
        let policy = ResizePolicy::load(&self.ctx.settings).await;
        if !policy.enabled {
            return Err(AppError::resize_disabled());
        }
        if req.scheduled_at.is_some() && !policy.scheduled_enabled {
            return Err(AppError::forbidden("scheduled resize is disabled"));
        }
        let vps = self.owned_instance(user_id, req.vps_id).await?;
        if vps.expire_at.is_some_and(|e| e <= self.ctx.now()) {
            return Err(AppError::forbidden("instance has expired"));
        }
        Ok((vps, policy))
    }

    /// Price a resize without creating anything
    pub async fn quote_resize_order(&self, user_id: i64, req: &ResizeRequest) -> AppResult<ResizeQuote> {
        let (vps, policy) = self.resize_preflight(user_id, req).await?;
        resize_quote::quote(&self.ctx.pool, &policy, &vps, req, self.ctx.now()).await
    }

    pub async fn create_resize_order(&self, user_id: i64, req: &ResizeRequest) -> AppResult<Order> {
        let (vps, policy) = self.resize_preflight(user_id, req).await?;
        if order_repo::has_pending_for_vps(&self.ctx.pool, user_id, vps.id, &[ItemAction::Resize], None).await?
            || resize_task::has_pending_for_vps(&self.ctx.pool, vps.id, None).await?
        {
            return Err(AppError::resize_in_progress());
        }
        let now = self.ctx.now();
        if req.scheduled_at.is_some_and(|at| at <= now) {
            return Err(AppError::validation("scheduled_at must be in the future"));
        }

        let quote = resize_quote::quote(&self.ctx.pool, &policy, &vps, req, now).await?;
        let spec = ResizeItemSpec {
            vps_id: vps.id,
            target: quote.target.clone(),
            reset_addons: req.reset_addons,
            scheduled_at: req.scheduled_at,
            current_monthly: quote.current_monthly,
            charge: quote.charge,
            refund_amount: quote.refund_amount,
            refund_to_wallet: quote.refund_to_wallet,
        };
        // Downgrades and free changes skip payment
        let status = if quote.charge <= 0 {
            OrderStatus::PendingReview
        } else {
            OrderStatus::PendingPayment
        };
        let item = NewOrderItem {
            action: ItemAction::Resize,
            package_id: quote.target.package_id,
            system_id: vps.system_id,
            spec_json: spec.to_json(),
            amount: quote.charge,
            status,
            duration_months: 0,
            goods_type_id: vps.goods_type_id,
        };
        let order = self
            .insert_single_item_order(user_id, status, quote.charge, item)
            .await?;
        if status == OrderStatus::PendingReview {
            return self.approve_order(order.id, ApprovedBy::System).await;
        }
        Ok(order)
    }
}
