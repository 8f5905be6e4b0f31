//! Resize task runner

use super::service::OrderService;
use crate::db::repository::{order as order_repo, order_item, resize_task};
use crate::events::OrderEventType;
use serde_json::json;
use shared::AppResult;
use shared::models::{OrderStatus, ResizeTask, ResizeTaskStatus};

const RESIZE_BATCH: i64 = 20;

impl OrderService {
    /// Run every due resize task. Returns how many were started.
    pub async fn run_resize_tasks_once(&self) -> AppResult<usize> {
        let due = resize_task::list_due(&self.ctx.pool, self.ctx.now(), RESIZE_BATCH).await?;
        let mut started = 0;
        for task in &due {
            let this = self.clone();
            let task_id = task.id;
            match tokio::spawn(async move { this.run_resize_task(task_id).await }).await {
                Ok(Ok(true)) => started += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::error!(task_id, error = %e, "Resize task errored"),
                Err(e) => {
                    tracing::error!(task_id, error = %e, "Resize task panicked, failing it");
                    self.fail_panicked_task(task).await?;
                    started += 1;
                }
            }
        }
        Ok(started)
    }

    async fn fail_panicked_task(&self, task: &ResizeTask) -> AppResult<()> {
        resize_task::finish(&self.ctx.pool, task.id, ResizeTaskStatus::Failed, self.ctx.now()).await?;
        if let Some(item) = order_item::find_by_id(&self.ctx.pool, task.order_item_id).await?
            && item.status.is_pending()
        {
            self.fail_item(task.order_id, item.id, "resize task panicked").await?;
        }
        self.rollup_order(task.order_id).await?;
        Ok(())
    }

    /// Claim and execute one task; false when someone else already has it
    pub async fn run_resize_task(&self, task_id: i64) -> AppResult<bool> {
        let Some(task) = resize_task::find_by_id(&self.ctx.pool, task_id).await? else {
            return Ok(false);
        };
        let now = self.ctx.now();
        if task.scheduled_at.is_some_and(|at| at > now) {
            return Ok(false);
        }
        if !resize_task::claim(&self.ctx.pool, task_id, now).await? {
            return Ok(false);
        }

        let order = self.load_order(task.order_id).await;
        let item = order_item::find_by_id(&self.ctx.pool, task.order_item_id).await;
        let (order, item) = match (order, item) {
            (Ok(o), Ok(Some(i))) if i.status == OrderStatus::Approved => (o, i),
            _ => {
                tracing::warn!(task_id, "Resize task lost its approved item, marking failed");
                resize_task::finish(&self.ctx.pool, task_id, ResizeTaskStatus::Failed, self.ctx.now()).await?;
                return Ok(true);
            }
        };

        order_item::set_status(&self.ctx.pool, item.id, OrderStatus::Provisioning, now).await?;
        if order_repo::transition(&self.ctx.pool, order.id, &[OrderStatus::Approved], OrderStatus::Provisioning, now)
            .await?
        {
            self.ctx
                .events
                .publish(order.id, OrderEventType::Provisioning, json!({ "resize_task_id": task_id }))
                .await;
        }

        let result = self.execute_resize(&order, &item).await;
        let status = if result.is_ok() {
            ResizeTaskStatus::Done
        } else {
            ResizeTaskStatus::Failed
        };
        self.settle_item(order.id, &item, result).await?;
        resize_task::finish(&self.ctx.pool, task_id, status, self.ctx.now()).await?;
        self.rollup_order(order.id).await?;
        Ok(true)
    }
}
