//! Item → order status rollup

use super::service::OrderService;
use crate::db::repository::{order as order_repo, order_item};
use crate::events::OrderEventType;
use serde_json::json;
use shared::AppResult;
use shared::models::{OrderItem, OrderStatus};

/// Order status implied by its items, `None` when the items say nothing
/// (empty, or only canceled/rejected leftovers)
pub fn rollup_status(items: &[OrderItem]) -> Option<OrderStatus> {
    if items.is_empty() {
        return None;
    }
    if items.iter().all(|i| i.status == OrderStatus::Active) {
        return Some(OrderStatus::Active);
    }
    if items.iter().any(|i| i.status.is_pending()) {
        return Some(OrderStatus::Provisioning);
    }
    if items.iter().any(|i| i.status == OrderStatus::Failed) {
        return Some(OrderStatus::Failed);
    }
    None
}

const ROLLUP_FROM: &[OrderStatus] = &[
    OrderStatus::Approved,
    OrderStatus::Provisioning,
    OrderStatus::Active,
    OrderStatus::Failed,
];

impl OrderService {
    /// Recompute the order status after an item transition
    pub async fn rollup_order(&self, order_id: i64) -> AppResult<Option<OrderStatus>> {
        let Some(order) = order_repo::find_by_id(&self.ctx.pool, order_id).await? else {
            return Ok(None);
        };
        if !ROLLUP_FROM.contains(&order.status) {
            return Ok(None);
        }
        let items = order_item::list_by_order(&self.ctx.pool, order_id).await?;
        let Some(next) = rollup_status(&items) else {
            return Ok(None);
        };
        if next == order.status {
            return Ok(Some(next));
        }
        if !order_repo::transition(&self.ctx.pool, order_id, &[order.status], next, self.ctx.now()).await? {
            tracing::debug!(order_id, "Order moved during rollup, skipping");
            return Ok(None);
        }
        tracing::info!(order_id, from = %order.status, to = %next, "Order status rolled up");

        match next {
            OrderStatus::Active => {
                self.ctx
                    .events
                    .publish(order_id, OrderEventType::Completed, json!({ "items": items.len() }))
                    .await;
                if let Some(order) = order_repo::find_by_id(&self.ctx.pool, order_id).await? {
                    self.ctx.notify.order_active(&order).await;
                }
            }
            OrderStatus::Failed => {
                let failed = items.iter().filter(|i| i.status == OrderStatus::Failed).count();
                if let Some(order) = order_repo::find_by_id(&self.ctx.pool, order_id).await? {
                    self.ctx
                        .notify
                        .order_failed(&order, &format!("{failed} item(s) failed"))
                        .await;
                }
            }
            OrderStatus::Provisioning => {
                self.ctx
                    .events
                    .publish(order_id, OrderEventType::Provisioning, json!({}))
                    .await;
            }
            _ => {}
        }
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::ItemAction;

    fn item(status: OrderStatus) -> OrderItem {
        OrderItem {
            id: 1,
            order_id: 1,
            action: ItemAction::Create,
            package_id: Some(10),
            system_id: Some(1),
            spec_json: "{}".into(),
            qty: 1,
            amount: 100,
            status,
            duration_months: 1,
            automation_instance_id: None,
            goods_type_id: 1,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_rollup() {
        use OrderStatus::*;
        assert_eq!(rollup_status(&[]), None);
        assert_eq!(rollup_status(&[item(Active), item(Active)]), Some(Active));
        assert_eq!(rollup_status(&[item(Active), item(Provisioning)]), Some(Provisioning));
        assert_eq!(rollup_status(&[item(Failed), item(Provisioning)]), Some(Provisioning));
        assert_eq!(rollup_status(&[item(Failed), item(Active)]), Some(Failed));
        assert_eq!(rollup_status(&[item(Failed)]), Some(Failed));
        assert_eq!(rollup_status(&[item(Canceled)]), None);
    }
}
