//! Provision executor
//!
//! Runs the approved items of an order, one worker per action. A create
//! whose host does not become ready within the poll window is parked in
//! `provision_job` for the watchdog.

use super::pricing;
use super::renew::check_emergency;
use super::resize_quote::check_target;
use super::service::OrderService;
use super::spec::{CartSpec, InstanceSpec, RefundItemSpec, RenewItemSpec, ResizeItemSpec};
use crate::automation::trace::LogTarget;
use crate::automation::{CreateHostRequest, ElasticUpdateRequest, HostInfo, HostPhase, map_state, parse_host_id};
use crate::db::repository::{
    self, catalog, order as order_repo, order_item, provision_job,
    vps::{self as vps_repo, ResizeSnapshot, VpsSnapshot},
};
use crate::events::OrderEventType;
use crate::settings::EmergencyRenewPolicy;
use crate::utils::password::{SYS_PASSWORD_LEN, VNC_PASSWORD_LEN};
use crate::wallet::ref_type;
use serde_json::{Map, Value, json};
use shared::models::{AdminStatus, ItemAction, Order, OrderItem, OrderStatus, VpsStatus};
use shared::util::{DAY_MS, add_months_millis};
use shared::{AppError, AppResult, ErrorCode};
use tokio_util::sync::CancellationToken;

/// Closed jobs are pushed this far out so they never look due
pub(crate) const CLOSED_JOB_DELAY_MS: i64 = 365 * DAY_MS;

/// Merge non-empty credentials from the host into the stored access info
pub fn merge_access_info(existing: &str, info: &HostInfo) -> String {
    let mut map = serde_json::from_str::<Map<String, Value>>(existing).unwrap_or_default();
    for (key, value) in [
        ("remote_ip", &info.remote_ip),
        ("os_password", &info.os_password),
        ("vnc_password", &info.vnc_password),
        ("panel_password", &info.panel_password),
    ] {
        if !value.is_empty() {
            map.insert(key.to_string(), Value::String(value.clone()));
        }
    }
    Value::Object(map).to_string()
}

fn host_name_for(order: &Order, item: &OrderItem, now: i64) -> String {
    format!("ecs-{}-{}-{}", order.user_id, item.id, now / 1000)
}

impl OrderService {
    /// Execute every approved non-resize item of the order, then roll up
    pub async fn provision_order(&self, order_id: i64, cancel: CancellationToken) -> AppResult<()> {
        let order = self.load_order(order_id).await?;
        if !matches!(order.status, OrderStatus::Approved | OrderStatus::Provisioning) {
            tracing::debug!(order_id, status = %order.status, "Order not provisionable, skipping");
            return Ok(());
        }
        let items: Vec<OrderItem> = order_item::list_by_order(&self.ctx.pool, order_id)
            .await?
            .into_iter()
            .filter(|i| i.action != ItemAction::Resize && i.status == OrderStatus::Approved)
            .collect();
        if items.is_empty() {
            self.rollup_order(order_id).await?;
            return Ok(());
        }

        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        for item in &items {
            order_item::set_status(&mut *tx, item.id, OrderStatus::Provisioning, now).await?;
        }
        let moved = order_repo::transition(
            &mut *tx,
            order_id,
            &[OrderStatus::Approved],
            OrderStatus::Provisioning,
            now,
        )
        .await?;
        repository::commit(tx).await?;
        if moved {
            self.ctx
                .events
                .publish(order_id, OrderEventType::Provisioning, json!({ "items": items.len() }))
                .await;
        }

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                // Hand untouched items back; they are picked up again on restart
                for rest in &items[idx..] {
                    order_item::set_status(&self.ctx.pool, rest.id, OrderStatus::Approved, self.ctx.now()).await?;
                }
                tracing::info!(order_id, remaining = items.len() - idx, "Provisioning interrupted by shutdown");
                return Ok(());
            }
            let result = match item.action {
                ItemAction::Create => self.execute_create(&order, item, &cancel).await,
                ItemAction::Renew | ItemAction::EmergencyRenew => self.execute_renew(&order, item).await,
                ItemAction::Refund => self.execute_refund(&order, item).await,
                ItemAction::Resize => continue,
            };
            self.settle_item(order_id, item, result).await?;
        }
        self.rollup_order(order_id).await?;
        Ok(())
    }

    /// Record the outcome of one item.
    ///
    /// `Provisioning` errors leave the item to the watchdog.
    pub(crate) async fn settle_item(&self, order_id: i64, item: &OrderItem, result: AppResult<()>) -> AppResult<()> {
        let now = self.ctx.now();
        match result {
            Ok(()) => {
                order_item::set_status(&self.ctx.pool, item.id, OrderStatus::Active, now).await?;
                tracing::info!(order_id, item_id = item.id, action = item.action.as_str(), "Item active");
                self.ctx
                    .events
                    .publish(
                        order_id,
                        OrderEventType::ItemActive,
                        json!({ "item_id": item.id, "action": item.action.as_str() }),
                    )
                    .await;
            }
            Err(e) if e.is(ErrorCode::Provisioning) => {
                tracing::info!(order_id, item_id = item.id, "Host not ready yet, handed to watchdog");
            }
            Err(e) => self.fail_item(order_id, item.id, &e.message).await?,
        }
        Ok(())
    }

    pub(crate) async fn fail_item(&self, order_id: i64, item_id: i64, reason: &str) -> AppResult<()> {
        order_item::set_status(&self.ctx.pool, item_id, OrderStatus::Failed, self.ctx.now()).await?;
        tracing::warn!(order_id, item_id, reason, "Item failed");
        self.ctx
            .events
            .publish(order_id, OrderEventType::ItemFailed, json!({ "item_id": item_id, "reason": reason }))
            .await;
        Ok(())
    }

    async fn execute_create(&self, order: &Order, item: &OrderItem, cancel: &CancellationToken) -> AppResult<()> {
        let spec = CartSpec::parse(&item.spec_json)?;
        let package_id = item
            .package_id
            .ok_or_else(|| AppError::validation("create item has no package"))?;
        let package = catalog::find_package(&self.ctx.pool, package_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("package {package_id} not found")))?;
        let group = catalog::find_plan_group(&self.ctx.pool, package.plan_group_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("plan group {} not found", package.plan_group_id)))?;
        let system_id = item.system_id.unwrap_or_default();
        let image = catalog::find_system_image(&self.ctx.pool, system_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("system image {system_id} not found")))?;
        let client = self.ctx.client_for(item.goods_type_id)?;

        let now = self.ctx.now();
        let expire_time = add_months_millis(now, item.duration_months.max(1))
            .ok_or_else(|| AppError::validation("invalid duration"))?;
        let host_name = host_name_for(order, item, now);
        let req = CreateHostRequest {
            line_id: group.line_id,
            os: image.image_id.to_string(),
            cpu: package.cores + spec.add_cores,
            memory_gb: package.memory_gb + spec.add_mem_gb,
            disk_gb: package.disk_gb + spec.add_disk_gb,
            bandwidth: package.bandwidth_mbps + spec.add_bw_mbps,
            port_num: package.port_num,
            expire_time,
            host_name: host_name.clone(),
            sys_pwd: self.ctx.secrets.password(SYS_PASSWORD_LEN),
            vnc_pwd: self.ctx.secrets.password(VNC_PASSWORD_LEN),
        };
        let mut logged_req = serde_json::to_value(&req).unwrap_or(Value::Null);
        if let Some(obj) = logged_req.as_object_mut() {
            obj.insert("sys_pwd".into(), json!("***"));
            obj.insert("vnc_pwd".into(), json!("***"));
        }

        let target = LogTarget::item(order.id, item.id);
        let created = self
            .ctx
            .logged(target, "create_host", logged_req, client.create_host(&req))
            .await?;
        let mut host_id = created.host_id;
        if host_id <= 0 {
            let hosts = self
                .ctx
                .logged(
                    target,
                    "list_host_simple",
                    json!({ "search_tag": host_name }),
                    client.list_host_simple(&host_name),
                )
                .await?;
            host_id = hosts
                .iter()
                .find(|h| h.host_name == host_name)
                .map(|h| h.id)
                .unwrap_or(0);
        }
        if host_id <= 0 {
            return Err(AppError::automation(format!("no host id for {host_name}")));
        }
        order_item::set_automation_instance(&self.ctx.pool, item.id, &host_id.to_string(), self.ctx.now()).await?;
        tracing::info!(order_id = order.id, item_id = item.id, host_id, %host_name, "Host created");

        let attempts = self.ctx.provision.poll_attempts.max(1);
        let interval = self.ctx.provision.poll_interval;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            match self
                .ctx
                .logged(target, "get_host_info", json!({ "host_id": host_id }), client.get_host_info(host_id))
                .await
            {
                Ok(info) => match HostPhase::of(info.state) {
                    HostPhase::Ready => {
                        self.complete_create(order, item, host_id, &host_name, &info).await?;
                        return Ok(());
                    }
                    HostPhase::Failed => {
                        return Err(AppError::automation(format!(
                            "host {host_id} entered failed state {}",
                            info.state
                        )));
                    }
                    HostPhase::Provisioning | HostPhase::Other => {
                        tracing::debug!(host_id, state = info.state, attempt, "Host not ready");
                    }
                },
                Err(e) => tracing::warn!(host_id, attempt, error = %e, "Host poll failed"),
            }
        }

        self.park_for_watchdog(order, item, host_id, &host_name).await?;
        Err(AppError::provisioning(format!("host {host_id} still provisioning")))
    }

    /// Placeholder instance row plus a watchdog job
    async fn park_for_watchdog(&self, order: &Order, item: &OrderItem, host_id: i64, host_name: &str) -> AppResult<()> {
        let now = self.ctx.now();
        let mut tx = repository::begin(&self.ctx.pool).await?;
        match vps_repo::find_by_order_item(&mut *tx, item.id).await? {
            Some(vps) => vps_repo::set_status(&mut *tx, vps.id, VpsStatus::Provisioning, 0, now).await?,
            None => {
                let spec = CartSpec::parse(&item.spec_json).unwrap_or_default();
                let snapshot = VpsSnapshot {
                    user_id: order.user_id,
                    order_item_id: item.id,
                    automation_instance_id: host_id.to_string(),
                    goods_type_id: item.goods_type_id,
                    name: host_name.to_string(),
                    region: String::new(),
                    line_id: 0,
                    package_id: item.package_id,
                    package_name: String::new(),
                    system_id: item.system_id,
                    cpu: 0,
                    memory_gb: 0,
                    disk_gb: 0,
                    bandwidth_mbps: 0,
                    port_num: 0,
                    monthly_price: 0,
                    status: VpsStatus::Provisioning,
                    automation_state: 0,
                    expire_at: None,
                    spec_json: InstanceSpec::from_cart(&spec).to_json(),
                    access_info_json: "{}".into(),
                };
                vps_repo::upsert_snapshot(&mut *tx, &snapshot, now).await?;
            }
        }
        provision_job::upsert(&mut *tx, order.id, item.id, host_id, host_name, now).await?;
        repository::commit(tx).await?;
        tracing::info!(order_id = order.id, item_id = item.id, host_id, "Provisioning deferred to watchdog");
        Ok(())
    }

    /// Snapshot a ready host into `vps_instance` and mark the item active
    pub(crate) async fn complete_create(
        &self,
        order: &Order,
        item: &OrderItem,
        host_id: i64,
        host_name: &str,
        info: &HostInfo,
    ) -> AppResult<i64> {
        let spec = CartSpec::parse(&item.spec_json).unwrap_or_default();
        let package = match item.package_id {
            Some(id) => catalog::find_package(&self.ctx.pool, id).await?,
            None => None,
        };
        let group = match &package {
            Some(p) => catalog::find_plan_group(&self.ctx.pool, p.plan_group_id).await?,
            None => None,
        };
        let region = match &group {
            Some(g) => catalog::find_region(&self.ctx.pool, g.region_id)
                .await?
                .map(|r| r.name)
                .unwrap_or_default(),
            None => String::new(),
        };

        let now = self.ctx.now();
        let months = item.duration_months.max(1);
        let expire_at = info
            .expire_at
            .filter(|e| *e > now)
            .or_else(|| add_months_millis(now, months))
            .ok_or_else(|| AppError::validation("invalid duration"))?;

        let mut inst = InstanceSpec::from_cart(&spec);
        inst.set_period(now, expire_at);

        let pick = |reported: i64, planned: i64| if reported > 0 { reported } else { planned };
        let (cpu, mem, disk, bw, port) = match &package {
            Some(p) => (
                p.cores + spec.add_cores,
                p.memory_gb + spec.add_mem_gb,
                p.disk_gb + spec.add_disk_gb,
                p.bandwidth_mbps + spec.add_bw_mbps,
                p.port_num,
            ),
            None => (0, 0, 0, 0, 0),
        };
        let monthly_price = match (&package, &group) {
            (Some(p), Some(g)) => pricing::monthly_price(p, g, &spec),
            _ => item.amount / months,
        };

        let snapshot = VpsSnapshot {
            user_id: order.user_id,
            order_item_id: item.id,
            automation_instance_id: host_id.to_string(),
            goods_type_id: item.goods_type_id,
            name: if info.host_name.is_empty() {
                host_name.to_string()
            } else {
                info.host_name.clone()
            },
            region,
            line_id: group.as_ref().map(|g| g.line_id).unwrap_or_default(),
            package_id: item.package_id,
            package_name: package.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            system_id: item.system_id,
            cpu: pick(info.cpu, cpu),
            memory_gb: pick(info.memory_gb, mem),
            disk_gb: pick(info.disk_gb, disk),
            bandwidth_mbps: pick(info.bandwidth, bw),
            port_num: port,
            monthly_price,
            status: map_state(info.state),
            automation_state: info.state,
            expire_at: Some(expire_at),
            spec_json: inst.to_json(),
            access_info_json: merge_access_info("{}", info),
        };

        let mut tx = repository::begin(&self.ctx.pool).await?;
        let vps_id = vps_repo::upsert_snapshot(&mut *tx, &snapshot, now).await?;
        order_item::set_status(&mut *tx, item.id, OrderStatus::Active, now).await?;
        provision_job::close_for_item(&mut *tx, item.id, now + CLOSED_JOB_DELAY_MS, now).await?;
        repository::commit(tx).await?;
        tracing::info!(order_id = order.id, item_id = item.id, vps_id, host_id, "Instance ready");
        Ok(vps_id)
    }

    async fn execute_renew(&self, order: &Order, item: &OrderItem) -> AppResult<()> {
        let spec = RenewItemSpec::parse(&item.spec_json)?;
        let vps = vps_repo::find_by_id(&self.ctx.pool, spec.vps_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound))?;
        let now = self.ctx.now();
        let emergency = item.action == ItemAction::EmergencyRenew;
        if emergency {
            let policy = EmergencyRenewPolicy::load(&self.ctx.settings).await;
            check_emergency(&policy, &vps, now)?;
        }
        let host_id = parse_host_id(Some(&vps.automation_instance_id));
        if host_id <= 0 {
            return Err(AppError::validation("instance has no upstream host"));
        }
        let client = self.ctx.client_for(vps.goods_type_id)?;
        let target = LogTarget::item(order.id, item.id);

        let base = vps.expire_at.map_or(now, |e| e.max(now));
        let next = base + spec.renew_days.max(1) * DAY_MS;
        self.ctx
            .logged(
                target,
                "renew_host",
                json!({ "host_id": host_id, "next_due": next }),
                client.renew_host(host_id, next),
            )
            .await?;

        // Renewal lifts both the expiry lock and any admin lock
        let mut status = vps.status;
        let unlock = vps.admin_status != AdminStatus::Normal || vps.status == VpsStatus::ExpiredLocked;
        if unlock {
            self.ctx
                .logged(target, "unlock_host", json!({ "host_id": host_id }), client.unlock_host(host_id))
                .await?;
            if matches!(vps.status, VpsStatus::Locked | VpsStatus::ExpiredLocked) {
                status = VpsStatus::Running;
            }
        }

        let mut inst = InstanceSpec::parse(&vps.spec_json);
        inst.set_period(now, next);
        vps_repo::set_expiry(&self.ctx.pool, vps.id, next, status, &inst.to_json(), now).await?;
        if unlock && vps.admin_status != AdminStatus::Normal {
            vps_repo::set_admin_status(&self.ctx.pool, vps.id, AdminStatus::Normal, now).await?;
        }
        if emergency {
            vps_repo::set_last_emergency_renew(&self.ctx.pool, vps.id, now).await?;
        }
        tracing::info!(order_id = order.id, vps_id = vps.id, host_id, next, emergency, "Instance renewed");
        Ok(())
    }

    async fn execute_refund(&self, order: &Order, item: &OrderItem) -> AppResult<()> {
        let spec = RefundItemSpec::parse(&item.spec_json)?;
        if let Some(settled) = self.wallet.settle_order_refund(order, item, &spec).await? {
            tracing::debug!(order_id = order.id, wallet_order_id = settled.id, "Refund settled to wallet");
        }
        if !spec.delete_on_approve {
            return Ok(());
        }
        match vps_repo::find_by_id(&self.ctx.pool, spec.vps_id).await? {
            Some(vps) => {
                self.ctx
                    .destroy_instance(&vps, LogTarget::item(order.id, item.id))
                    .await
            }
            None => {
                tracing::debug!(order_id = order.id, vps_id = spec.vps_id, "Instance already gone");
                Ok(())
            }
        }
    }

    /// Elastic update to the item's target plan.
    ///
    /// Plan checks run before any upstream call.
    pub(crate) async fn execute_resize(&self, order: &Order, item: &OrderItem) -> AppResult<()> {
        let spec = ResizeItemSpec::parse(&item.spec_json)?;
        let vps = vps_repo::find_by_id(&self.ctx.pool, spec.vps_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound))?;
        let t = &spec.target;
        let package_id = t
            .package_id
            .ok_or_else(|| AppError::validation("resize target has no package"))?;
        let package = catalog::find_package(&self.ctx.pool, package_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("package {package_id} not found")))?;
        let group = catalog::find_plan_group(&self.ctx.pool, package.plan_group_id)
            .await?
            .ok_or_else(|| AppError::validation(format!("plan group {} not found", package.plan_group_id)))?;
        let current_group = match vps.package_id {
            Some(id) => catalog::find_package(&self.ctx.pool, id).await?.map(|p| p.plan_group_id),
            None => None,
        };
        check_target(&vps, current_group, &group, t)?;

        let host_id = parse_host_id(Some(&vps.automation_instance_id));
        if host_id <= 0 {
            return Err(AppError::validation("instance has no upstream host"));
        }
        let client = self.ctx.client_for(vps.goods_type_id)?;
        let target = LogTarget::item(order.id, item.id);

        let changed = |from: i64, to: i64| (from != to).then_some(to);
        let req = ElasticUpdateRequest {
            host_id,
            cpu: changed(vps.cpu, t.cpu),
            memory_gb: changed(vps.memory_gb, t.memory_gb),
            disk_gb: changed(vps.disk_gb, t.disk_gb),
            bandwidth: changed(vps.bandwidth_mbps, t.bandwidth_mbps),
            port_num: changed(vps.port_num, t.port_num),
        };
        let has_change = req.cpu.is_some()
            || req.memory_gb.is_some()
            || req.disk_gb.is_some()
            || req.bandwidth.is_some()
            || req.port_num.is_some();
        if has_change {
            let body = serde_json::to_value(&req).unwrap_or(Value::Null);
            self.ctx
                .logged(target, "elastic_update", body, client.elastic_update(&req))
                .await?;
        }

        let now = self.ctx.now();
        let mut inst = InstanceSpec::parse(&vps.spec_json);
        inst.add_cores = t.add_cores;
        inst.add_mem_gb = t.add_mem_gb;
        inst.add_disk_gb = t.add_disk_gb;
        inst.add_bw_mbps = t.add_bw_mbps;
        let snapshot = ResizeSnapshot {
            package_id: t.package_id,
            package_name: t.package_name.clone(),
            cpu: t.cpu,
            memory_gb: t.memory_gb,
            disk_gb: t.disk_gb,
            bandwidth_mbps: t.bandwidth_mbps,
            port_num: t.port_num,
            monthly_price: t.monthly_price,
            spec_json: inst.to_json(),
        };
        vps_repo::apply_resize(&self.ctx.pool, vps.id, &snapshot, now).await?;
        tracing::info!(order_id = order.id, vps_id = vps.id, host_id, "Instance resized");

        if spec.refund_to_wallet && spec.refund_amount > 0 {
            self.wallet
                .credit(order.user_id, spec.refund_amount, ref_type::RESIZE_REFUND, order.id, "resize refund")
                .await?;
        }

        match self
            .ctx
            .logged(target, "get_host_info", json!({ "host_id": host_id }), client.get_host_info(host_id))
            .await
        {
            Ok(info) => {
                if let Some(fresh) = vps_repo::find_by_id(&self.ctx.pool, vps.id).await? {
                    self.sync_host(&fresh, &info).await?;
                }
            }
            Err(e) => tracing::warn!(vps_id = vps.id, error = %e, "Post-resize refresh failed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_access_info_keeps_existing_keys() {
        let info = HostInfo {
            remote_ip: "10.0.0.2".into(),
            os_password: "pw".into(),
            ..Default::default()
        };
        let merged: Value = serde_json::from_str(&merge_access_info(r#"{"panel_password":"old","remote_ip":"1.1.1.1"}"#, &info)).unwrap();
        assert_eq!(merged["remote_ip"], "10.0.0.2");
        assert_eq!(merged["os_password"], "pw");
        assert_eq!(merged["panel_password"], "old");
        assert!(merged.get("vnc_password").is_none());
    }

    #[test]
    fn test_merge_access_info_tolerates_garbage() {
        let merged = merge_access_info("not json", &HostInfo::default());
        assert_eq!(merged, "{}");
    }
}
