//! Admin holds on instances

use super::service::OrderService;
use crate::audit::action;
use crate::automation::parse_host_id;
use crate::automation::trace::LogTarget;
use crate::db::repository::vps as vps_repo;
use serde_json::json;
use shared::models::{AdminStatus, VpsInstance};
use shared::{AppError, AppResult, ErrorCode};

const REASON_MAX: usize = 1000;

impl OrderService {
    /// Set the admin flag of an instance.
    ///
    /// `Normal` unlocks the upstream host, any other flag locks it. The
    /// flag is only written after the upstream call succeeds.
    pub async fn set_admin_status(
        &self,
        admin_id: i64,
        vps_id: i64,
        status: AdminStatus,
        reason: &str,
    ) -> AppResult<VpsInstance> {
        let reason = reason.trim();
        if reason.chars().count() > REASON_MAX {
            return Err(AppError::validation("reason too long"));
        }
        let vps = vps_repo::find_by_id(&self.ctx.pool, vps_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound).with_detail("vps_id", vps_id))?;
        let host_id = parse_host_id(Some(&vps.automation_instance_id));
        if host_id <= 0 {
            return Err(AppError::validation("instance has no upstream host"));
        }
        let client = self.ctx.client_for(vps.goods_type_id)?;
        let target = LogTarget {
            order_id: None,
            order_item_id: vps.order_item_id,
        };
        match status {
            AdminStatus::Normal => {
                self.ctx
                    .logged(target, "unlock_host", json!({ "host_id": host_id }), client.unlock_host(host_id))
                    .await?
            }
            AdminStatus::Abuse | AdminStatus::Fraud | AdminStatus::Locked => {
                self.ctx
                    .logged(target, "lock_host", json!({ "host_id": host_id }), client.lock_host(host_id))
                    .await?
            }
        }
        vps_repo::set_admin_status(&self.ctx.pool, vps_id, status, self.ctx.now()).await?;
        tracing::info!(vps_id, host_id, admin_id, ?status, "Instance admin status changed");

        self.ctx
            .audit
            .record(
                admin_id,
                action::VPS_ADMIN_STATUS,
                "vps",
                vps_id,
                json!({ "from": vps.admin_status, "to": status, "reason": reason }),
            )
            .await;
        vps_repo::find_by_id(&self.ctx.pool, vps_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::VpsNotFound))
    }
}
