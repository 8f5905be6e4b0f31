//! Approval state machine
//!
//! ```text
//! pending_payment ──pay──▶ pending_review ──approve──▶ approved ──▶ provisioning ──▶ active | failed
//!        └──cancel──▶ canceled     └──reject──▶ rejected ──approve──┘
//! ```
//!
//! Every transition is a compare-and-set on the current status inside a
//! transaction; losing a race surfaces as a conflict.

use super::ApprovedBy;
use super::service::OrderService;
use super::spec::ResizeItemSpec;
use crate::audit::action;
use crate::core::context::CoreContext;
use crate::db::repository::{self, order as order_repo, order_item, payment, resize_task};
use crate::events::OrderEventType;
use serde_json::{Value, json};
use shared::models::{ItemAction, Order, OrderItem, OrderStatus, PaymentStatus};
use shared::{AppError, AppResult};

const APPROVABLE: &[OrderStatus] = &[
    OrderStatus::PendingReview,
    OrderStatus::PendingPayment,
    OrderStatus::Rejected,
];
const REJECTABLE: &[OrderStatus] = &[OrderStatus::PendingReview, OrderStatus::PendingPayment];
const CANCELABLE: &[OrderStatus] = &[OrderStatus::PendingPayment, OrderStatus::PendingReview];
const RETRYABLE: &[OrderStatus] = &[OrderStatus::Approved, OrderStatus::Provisioning, OrderStatus::Failed];

/// `vps_id` carried by renew / resize / refund items
pub fn item_vps_id(item: &OrderItem) -> Option<i64> {
    serde_json::from_str::<Value>(&item.spec_json)
        .ok()?
        .get("vps_id")?
        .as_i64()
        .filter(|id| *id > 0)
}

fn not_in(order: &Order, what: &str) -> AppError {
    AppError::conflict(format!("order {} cannot be {what} while {}", order.order_no, order.status))
        .with_detail("status", order.status.as_str())
}

/// Payment received: `pending_payment` → `pending_review` for the order and
/// its items. Returns false when the order had already moved on.
pub async fn ensure_pending_review(ctx: &CoreContext, order_id: i64) -> AppResult<bool> {
    let now = ctx.now();
    let mut tx = repository::begin(&ctx.pool).await?;
    let moved = order_repo::transition(
        &mut *tx,
        order_id,
        &[OrderStatus::PendingPayment],
        OrderStatus::PendingReview,
        now,
    )
    .await?;
    if moved {
        order_item::set_status_by_order(
            &mut *tx,
            order_id,
            &[OrderStatus::PendingPayment],
            OrderStatus::PendingReview,
            now,
        )
        .await?;
    }
    repository::commit(tx).await?;
    if moved {
        ctx.events
            .publish(order_id, OrderEventType::PendingReview, json!({}))
            .await;
    }
    Ok(moved)
}

impl OrderService {
    /// Approve an order and hand its items to execution.
    ///
    /// Returns once the state is written; provisioning and immediate
    /// resize tasks run on the task pool.
    pub async fn approve_order(&self, order_id: i64, by: ApprovedBy) -> AppResult<Order> {
        let order = self.load_order(order_id).await?;
        if !APPROVABLE.contains(&order.status) {
            return Err(not_in(&order, "approved"));
        }
        let items = order_item::list_by_order(&self.ctx.pool, order_id).await?;

        let mut resize_items = Vec::new();
        for item in items.iter().filter(|i| i.action == ItemAction::Resize) {
            let spec = ResizeItemSpec::parse(&item.spec_json)?;
            if resize_task::has_pending_for_vps(&self.ctx.pool, spec.vps_id, Some(order_id)).await? {
                return Err(AppError::resize_in_progress().with_detail("vps_id", spec.vps_id));
            }
            resize_items.push((item.id, spec));
        }

        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        if !order_repo::mark_approved(&mut *tx, order_id, APPROVABLE, by.admin_id(), now).await? {
            return Err(AppError::conflict(format!("order {} changed concurrently", order.order_no)));
        }
        order_item::set_status_by_order(&mut *tx, order_id, APPROVABLE, OrderStatus::Approved, now).await?;
        payment::review_pending_by_order(&mut *tx, order_id, PaymentStatus::Approved, by.admin_id(), None, now)
            .await?;

        let mut immediate_tasks = Vec::new();
        for (item_id, spec) in &resize_items {
            let task_id = match resize_task::find_by_item(&mut *tx, *item_id).await? {
                Some(task) => {
                    resize_task::rearm(&mut *tx, task.id, now).await?;
                    task.id
                }
                None => resize_task::insert(&mut *tx, spec.vps_id, order_id, *item_id, spec.scheduled_at, now).await?,
            };
            if spec.scheduled_at.is_none_or(|at| at <= now) {
                immediate_tasks.push(task_id);
            }
        }
        repository::commit(tx).await?;

        tracing::info!(order_id, order_no = %order.order_no, approved_by = %by, "Order approved");
        self.ctx
            .events
            .publish(order_id, OrderEventType::Approved, json!({ "approved_by": by.to_string() }))
            .await;
        if let ApprovedBy::Admin(admin_id) = by {
            self.ctx
                .audit
                .record(admin_id, action::ORDER_APPROVE, "order", order_id, json!({ "order_no": order.order_no }))
                .await;
        }

        if items.iter().any(|i| i.action != ItemAction::Resize) {
            self.dispatch_provision(order_id);
        }
        for task_id in immediate_tasks {
            self.dispatch_resize(task_id);
        }
        self.load_order(order_id).await
    }

    pub async fn reject_order(&self, admin_id: i64, order_id: i64, reason: &str) -> AppResult<Order> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("reason is required"));
        }
        let order = self.load_order(order_id).await?;
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        if !order_repo::mark_rejected(&mut *tx, order_id, REJECTABLE, reason, now).await? {
            return Err(not_in(&order, "rejected"));
        }
        order_item::set_status_by_order(&mut *tx, order_id, REJECTABLE, OrderStatus::Rejected, now).await?;
        payment::review_pending_by_order(
            &mut *tx,
            order_id,
            PaymentStatus::Rejected,
            Some(admin_id),
            Some(reason),
            now,
        )
        .await?;
        repository::commit(tx).await?;

        tracing::info!(order_id, admin_id, reason, "Order rejected");
        self.ctx
            .events
            .publish(order_id, OrderEventType::Rejected, json!({ "reason": reason }))
            .await;
        self.ctx
            .audit
            .record(admin_id, action::ORDER_REJECT, "order", order_id, json!({ "reason": reason }))
            .await;
        self.load_order(order_id).await
    }

    pub async fn cancel_order(&self, user_id: i64, order_id: i64) -> AppResult<Order> {
        let order = self.owned_order(user_id, order_id).await?;
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        if !order_repo::transition(&mut *tx, order_id, CANCELABLE, OrderStatus::Canceled, now).await? {
            return Err(not_in(&order, "canceled"));
        }
        order_item::set_status_by_order(&mut *tx, order_id, CANCELABLE, OrderStatus::Canceled, now).await?;
        repository::commit(tx).await?;

        tracing::info!(order_id, user_id, "Order canceled");
        self.ctx
            .events
            .publish(order_id, OrderEventType::Canceled, json!({}))
            .await;
        self.load_order(order_id).await
    }

    /// Admin confirms an off-line payment
    pub async fn mark_paid(&self, admin_id: i64, order_id: i64) -> AppResult<Order> {
        let order = self.load_order(order_id).await?;
        if !ensure_pending_review(&self.ctx, order_id).await? {
            return Err(not_in(&order, "marked paid"));
        }
        self.ctx
            .audit
            .record(admin_id, action::ORDER_MARK_PAID, "order", order_id, json!({ "order_no": order.order_no }))
            .await;
        self.load_order(order_id).await
    }

    /// Re-run failed items of an approved order
    pub async fn retry_provision(&self, admin_id: i64, order_id: i64) -> AppResult<Order> {
        let order = self.load_order(order_id).await?;
        if !RETRYABLE.contains(&order.status) {
            return Err(not_in(&order, "retried"));
        }
        let items = order_item::list_by_order(&self.ctx.pool, order_id).await?;

        if order.status == OrderStatus::Failed {
            for item in &items {
                if !matches!(
                    item.action,
                    ItemAction::Renew | ItemAction::EmergencyRenew | ItemAction::Resize | ItemAction::Refund
                ) {
                    continue;
                }
                let Some(vps_id) = item_vps_id(item) else { continue };
                if order_repo::has_pending_for_vps(
                    &self.ctx.pool,
                    order.user_id,
                    vps_id,
                    &[ItemAction::Renew, ItemAction::EmergencyRenew],
                    Some(order_id),
                )
                .await?
                {
                    return Err(AppError::conflict("another renew order for this instance is pending")
                        .with_detail("vps_id", vps_id));
                }
            }
        }

        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        order_item::set_status_by_order(&mut *tx, order_id, &[OrderStatus::Failed], OrderStatus::Approved, now)
            .await?;
        if !order_repo::transition(&mut *tx, order_id, RETRYABLE, OrderStatus::Approved, now).await? {
            return Err(AppError::conflict(format!("order {} changed concurrently", order.order_no)));
        }
        let mut tasks = Vec::new();
        for item in items.iter().filter(|i| i.action == ItemAction::Resize) {
            if let Some(task) = resize_task::find_by_item(&mut *tx, item.id).await? {
                resize_task::rearm(&mut *tx, task.id, now).await?;
                tasks.push(task.id);
            }
        }
        repository::commit(tx).await?;

        tracing::info!(order_id, admin_id, "Provisioning retry requested");
        self.ctx
            .events
            .publish(order_id, OrderEventType::Approved, json!({ "retry": true }))
            .await;
        self.ctx
            .audit
            .record(admin_id, action::ORDER_RETRY, "order", order_id, json!({ "previous_status": order.status.as_str() }))
            .await;

        if items.iter().any(|i| i.action != ItemAction::Resize) {
            self.dispatch_provision(order_id);
        }
        for task_id in tasks {
            self.dispatch_resize(task_id);
        }
        self.load_order(order_id).await
    }
}
