//! Order service
//!
//! [`OrderService`] owns the order state machine. Its methods are split
//! by concern across the sibling modules (builder, renew, resize, refund,
//! approval, executor, watchdog ...); this file holds the struct, the
//! read side and the helpers they share.

use crate::core::context::CoreContext;
use crate::core::tasks::TaskPool;
use crate::db::repository::{self, order as order_repo, order_item, payment, vps as vps_repo};
use crate::events::OrderEventType;
use crate::wallet::WalletService;
use serde_json::json;
use shared::models::{Order, OrderDetail, OrderEvent, OrderStatus, VpsInstance};
use shared::{AppError, AppResult, ErrorCode};
use sqlx::SqliteConnection;
use std::sync::Arc;

pub(crate) const DEFAULT_CURRENCY: &str = "CNY";
const MAX_PAGE: i64 = 200;

/// `(limit, offset)` clamped to sane bounds
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (limit.unwrap_or(50).clamp(1, MAX_PAGE), offset.unwrap_or(0).max(0))
}

/// `PREFIX-{user}-{unix seconds}`, bumped by one second while taken
pub(crate) async fn next_order_no(
    conn: &mut SqliteConnection,
    prefix: &str,
    user_id: i64,
    now: i64,
) -> AppResult<String> {
    let mut secs = now / 1000;
    loop {
        let candidate = format!("{prefix}-{user_id}-{secs}");
        if order_repo::find_by_order_no(&mut *conn, &candidate).await?.is_none() {
            return Ok(candidate);
        }
        secs += 1;
    }
}

#[derive(Clone)]
pub struct OrderService {
    pub(crate) ctx: Arc<CoreContext>,
    pub(crate) wallet: WalletService,
    pub(crate) pool: TaskPool,
}

impl OrderService {
    pub fn new(ctx: Arc<CoreContext>, wallet: WalletService, pool: TaskPool) -> Self {
        Self { ctx, wallet, pool }
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    /// Wait for dispatched provisioning jobs to finish
    pub async fn wait_idle(&self) {
        self.pool.drain().await;
    }

    /// Stop polling loops and wait for in-flight jobs
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        self.pool.shutdown(timeout).await;
    }

    pub(crate) async fn load_order(&self, id: i64) -> AppResult<Order> {
        order_repo::find_by_id(&self.ctx.pool, id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::OrderNotFound))
    }

    pub(crate) async fn owned_order(&self, user_id: i64, id: i64) -> AppResult<Order> {
        let order = self.load_order(id).await?;
        if order.user_id != user_id {
            return Err(AppError::new(ErrorCode::OrderNotFound));
        }
        Ok(order)
    }

    pub(crate) async fn owned_instance(&self, user_id: i64, vps_id: i64) -> AppResult<VpsInstance> {
        vps_repo::find_by_id(&self.ctx.pool, vps_id)
            .await?
            .filter(|v| v.user_id == user_id)
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound))
    }

    pub async fn order_detail(&self, id: i64) -> AppResult<OrderDetail> {
        let order = self.load_order(id).await?;
        self.detail_of(order).await
    }

    pub async fn user_order(&self, user_id: i64, id: i64) -> AppResult<OrderDetail> {
        let order = self.owned_order(user_id, id).await?;
        self.detail_of(order).await
    }

    async fn detail_of(&self, order: Order) -> AppResult<OrderDetail> {
        let items = order_item::list_by_order(&self.ctx.pool, order.id).await?;
        let payments = payment::list_by_order(&self.ctx.pool, order.id).await?;
        Ok(OrderDetail { order, items, payments })
    }

    pub async fn list_user_orders(&self, user_id: i64, limit: i64, offset: i64) -> AppResult<Vec<Order>> {
        Ok(order_repo::list_by_user(&self.ctx.pool, user_id, limit, offset).await?)
    }

    pub async fn list_orders(&self, status: Option<OrderStatus>, limit: i64, offset: i64) -> AppResult<Vec<Order>> {
        Ok(order_repo::list_all(&self.ctx.pool, status, limit, offset).await?)
    }

    /// Event history after `after_seq`, for the owner only
    pub async fn user_events(&self, user_id: i64, order_id: i64, after_seq: i64) -> AppResult<Vec<OrderEvent>> {
        self.owned_order(user_id, order_id).await?;
        self.ctx.events.history(order_id, after_seq).await
    }

    /// Insert a one-item order (renew, resize, refund) in a single transaction
    pub(crate) async fn insert_single_item_order(
        &self,
        user_id: i64,
        status: OrderStatus,
        total_amount: i64,
        item: order_item::NewOrderItem,
    ) -> AppResult<Order> {
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        let order_no = next_order_no(&mut tx, item.action.order_prefix(), user_id, now).await?;
        let order_id = order_repo::insert(
            &mut *tx,
            &order_repo::NewOrder {
                user_id,
                order_no: &order_no,
                status,
                total_amount,
                currency: DEFAULT_CURRENCY,
                idempotency_key: None,
                pending_reason: None,
            },
            now,
        )
        .await?;
        order_item::insert(&mut *tx, order_id, &item, now).await?;
        repository::commit(tx).await?;

        tracing::info!(order_id, %order_no, user_id, action = item.action.as_str(), total_amount, "Order created");
        let event = match status {
            OrderStatus::PendingReview => OrderEventType::PendingReview,
            _ => OrderEventType::PendingPayment,
        };
        self.ctx
            .events
            .publish(order_id, event, json!({ "order_no": order_no, "total_amount": total_amount }))
            .await;
        self.load_order(order_id).await
    }

    /// Hand an approved order to the provisioning pool
    pub(crate) fn dispatch_provision(&self, order_id: i64) {
        let svc = self.clone();
        self.pool.spawn("provision_order", move |cancel| async move {
            if let Err(e) = svc.provision_order(order_id, cancel).await {
                tracing::error!(order_id, error = %e, "Provisioning run failed");
            }
        });
    }

    pub(crate) fn dispatch_resize(&self, task_id: i64) {
        let svc = self.clone();
        self.pool.spawn("resize_task", move |_cancel| async move {
            if let Err(e) = svc.run_resize_task(task_id).await {
                tracing::error!(task_id, error = %e, "Resize task run failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(page(None, None), (50, 0));
        assert_eq!(page(Some(0), Some(-3)), (1, 0));
        assert_eq!(page(Some(10_000), Some(20)), (200, 20));
    }
}
