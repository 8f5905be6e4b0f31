//! Admin audit trail
//!
//! Every admin mutation appends one `admin_audit_log` row. Writes are
//! best-effort: the mutation has already committed when the entry is
//! written, so a failure is logged and swallowed.

use crate::core::clock::Clock;
use crate::db::repository::audit as repo;
use serde_json::Value;
use shared::AppResult;
use shared::models::AdminAuditLog;
use sqlx::SqlitePool;
use std::fmt::Display;
use std::sync::Arc;

/// Audit actions
pub mod action {
    pub const ORDER_APPROVE: &str = "order.approve";
    pub const ORDER_REJECT: &str = "order.reject";
    pub const ORDER_MARK_PAID: &str = "order.mark_paid";
    pub const ORDER_RETRY: &str = "order.retry";
    pub const WALLET_ORDER_APPROVE: &str = "wallet_order.approve";
    pub const WALLET_ORDER_REJECT: &str = "wallet_order.reject";
    pub const WALLET_ADJUST: &str = "wallet.adjust";
    pub const VPS_DELETE: &str = "vps.delete";
    pub const VPS_ADMIN_STATUS: &str = "vps.admin_status";
    pub const SETTING_UPDATE: &str = "setting.update";
    pub const PAYMENT_PROVIDER_UPDATE: &str = "payment_provider.update";
}

#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn record(
        &self,
        admin_id: i64,
        action: &str,
        target_type: &str,
        target_id: impl Display,
        detail: Value,
    ) {
        let target_id = target_id.to_string();
        let now = self.clock.now_millis();
        match repo::insert(&self.pool, admin_id, action, target_type, &target_id, &detail.to_string(), now).await {
            Ok(_) => tracing::info!(admin_id, action, target_type, target_id = %target_id, "Admin action audited"),
            Err(e) => tracing::warn!(admin_id, action, target_id = %target_id, error = %e, "Failed to write audit log"),
        }
    }

    pub async fn list(&self, action: Option<&str>, limit: i64, offset: i64) -> AppResult<Vec<AdminAuditLog>> {
        Ok(repo::list(&self.pool, action, limit, offset).await?)
    }
}
