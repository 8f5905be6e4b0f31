//! Upstream re-sync: per order on demand, and for every bound instance
//! from the refresh worker

use super::executor::merge_access_info;
use super::service::OrderService;
use crate::automation::trace::LogTarget;
use crate::automation::{HostInfo, HostPhase, map_state, parse_host_id};
use crate::db::repository::{order as order_repo, order_item, provision_job, resize_task, vps as vps_repo};
use crate::events::OrderEventType;
use serde_json::json;
use shared::AppResult;
use shared::models::{ItemAction, Order, OrderItem, OrderStatus, ProvisionJobStatus, VpsInstance, VpsStatus};

/// Upstream state code for a locked host
const STATE_LOCKED: i64 = 10;

impl OrderService {
    /// Mirror host info into the instance row
    pub(crate) async fn sync_host(&self, vps: &VpsInstance, info: &HostInfo) -> AppResult<()> {
        let mut status = map_state(info.state);
        if vps.status == VpsStatus::ExpiredLocked && info.state == STATE_LOCKED {
            status = VpsStatus::ExpiredLocked;
        }
        let sync = vps_repo::HostSync {
            status,
            automation_state: info.state,
            expire_at: info.expire_at.filter(|e| *e > 0),
            spec_json: vps.spec_json.clone(),
            access_info_json: merge_access_info(&vps.access_info_json, info),
        };
        vps_repo::apply_host_sync(&self.ctx.pool, vps.id, &sync, self.ctx.now()).await?;
        Ok(())
    }

    /// User-triggered re-sync of an order's create items
    pub async fn refresh_order(&self, user_id: i64, order_id: i64) -> AppResult<Order> {
        let order = self.owned_order(user_id, order_id).await?;
        let items = order_item::list_by_order(&self.ctx.pool, order_id).await?;
        for item in items.iter().filter(|i| i.action == ItemAction::Create) {
            let host_id = parse_host_id(item.automation_instance_id.as_deref());
            if host_id <= 0 {
                continue;
            }
            let client = self.ctx.client_for(item.goods_type_id)?;
            let target = LogTarget::item(order_id, item.id);
            let info = match self
                .ctx
                .logged(target, "get_host_info", json!({ "host_id": host_id }), client.get_host_info(host_id))
                .await
            {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(order_id, item_id = item.id, error = %e, "Refresh failed");
                    continue;
                }
            };
            if HostPhase::of(info.state) == HostPhase::Ready && item.status != OrderStatus::Active {
                let host_name = if info.host_name.is_empty() {
                    format!("host-{host_id}")
                } else {
                    info.host_name.clone()
                };
                self.complete_create(&order, item, host_id, &host_name, &info).await?;
                self.ctx
                    .events
                    .publish(
                        order_id,
                        OrderEventType::ItemActive,
                        json!({ "item_id": item.id, "action": item.action.as_str() }),
                    )
                    .await;
            } else if let Some(vps) = vps_repo::find_by_order_item(&self.ctx.pool, item.id).await? {
                self.sync_host(&vps, &info).await?;
            }
        }
        self.rollup_order(order_id).await?;
        self.load_order(order_id).await
    }

    /// Pull host info for every bound instance. Returns how many were updated.
    pub async fn refresh_instances_once(&self) -> AppResult<usize> {
        let instances = vps_repo::list_with_host(&self.ctx.pool).await?;
        let mut updated = 0;
        for vps in &instances {
            let host_id = parse_host_id(Some(&vps.automation_instance_id));
            let client = match self.ctx.client_for(vps.goods_type_id) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(vps_id = vps.id, error = %e, "No automation client for instance");
                    continue;
                }
            };
            match client.get_host_info(host_id).await {
                Ok(info) => {
                    self.sync_host(vps, &info).await?;
                    updated += 1;
                }
                Err(e) => tracing::warn!(vps_id = vps.id, host_id, error = %e, "Instance refresh failed"),
            }
        }
        Ok(updated)
    }

    /// Recover work a previous process left behind.
    ///
    /// Running watchdog jobs and resize tasks are requeued, provisioning
    /// create items get their watchdog job back (or fail when no host was
    /// ever created), and orders with approved items are re-dispatched.
    pub async fn resume_interrupted(&self) -> AppResult<usize> {
        let now = self.ctx.now();
        let requeued_jobs = provision_job::requeue_running(&self.ctx.pool, now).await?;
        let requeued_tasks = resize_task::requeue_running(&self.ctx.pool, now).await?;
        for task in &requeued_tasks {
            if let Some(item) = order_item::find_by_id(&self.ctx.pool, task.order_item_id).await?
                && item.status == OrderStatus::Provisioning
            {
                order_item::set_status(&self.ctx.pool, item.id, OrderStatus::Approved, now).await?;
            }
        }
        if requeued_jobs > 0 || !requeued_tasks.is_empty() {
            tracing::info!(requeued_jobs, requeued_tasks = requeued_tasks.len(), "Requeued interrupted background work");
        }

        let mut resumed = 0;
        for status in [OrderStatus::Approved, OrderStatus::Provisioning] {
            let orders = order_repo::list_all(&self.ctx.pool, Some(status), 500, 0).await?;
            for order in orders {
                let items = order_item::list_by_order(&self.ctx.pool, order.id).await?;
                let mut failed_any = false;
                for item in items
                    .iter()
                    .filter(|i| i.action == ItemAction::Create && i.status == OrderStatus::Provisioning)
                {
                    failed_any |= !self.rewatch_create(&order, item).await?;
                }
                if failed_any {
                    self.rollup_order(order.id).await?;
                }
                if items
                    .iter()
                    .any(|i| i.action != ItemAction::Resize && i.status == OrderStatus::Approved)
                {
                    self.dispatch_provision(order.id);
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed interrupted provisioning");
        }
        Ok(resumed)
    }

    /// Make sure a provisioning create item is watched. Returns false when
    /// the item had no host and was failed instead.
    async fn rewatch_create(&self, order: &Order, item: &OrderItem) -> AppResult<bool> {
        let open = provision_job::find_by_item(&self.ctx.pool, item.id)
            .await?
            .is_some_and(|job| job.status != ProvisionJobStatus::Done);
        if open {
            return Ok(true);
        }
        let host_id = parse_host_id(item.automation_instance_id.as_deref());
        if host_id <= 0 {
            self.fail_item(order.id, item.id, "interrupted before a host was created").await?;
            return Ok(false);
        }
        let host_name = vps_repo::find_by_order_item(&self.ctx.pool, item.id)
            .await?
            .map(|v| v.name)
            .unwrap_or_default();
        provision_job::upsert(&self.ctx.pool, order.id, item.id, host_id, &host_name, self.ctx.now()).await?;
        tracing::info!(order_id = order.id, item_id = item.id, host_id, "Provisioning item handed back to watchdog");
        Ok(true)
    }
}
