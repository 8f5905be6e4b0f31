//! Shared collaborators of the order core
//!
//! One [`CoreContext`] is built at startup and shared (behind `Arc`) by
//! the order, payment and wallet services and by the background workers.

use crate::audit::AuditLog;
use crate::automation::trace::LogTarget;
use crate::automation::{AutomationClient, AutomationLogger, AutomationResolver, is_host_missing, parse_host_id};
use crate::core::clock::Clock;
use crate::core::config::ProvisionConfig;
use crate::db::repository::vps as vps_repo;
use crate::events::EventBus;
use crate::notify::{Notifications, Notifier, TracingNotifier};
use crate::realname::RealNameGate;
use crate::settings::SettingsStore;
use crate::utils::password::{OsSecretSource, SecretSource};
use serde::Serialize;
use serde_json::{Value, json};
use shared::AppResult;
use shared::models::VpsInstance;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;

pub struct CoreContext {
    pub pool: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub settings: SettingsStore,
    pub events: EventBus,
    pub automation: Arc<AutomationResolver>,
    pub automation_log: AutomationLogger,
    pub audit: AuditLog,
    pub notify: Notifications,
    pub secrets: Arc<dyn SecretSource>,
    pub realname: RealNameGate,
    pub provision: ProvisionConfig,
}

impl CoreContext {
    /// Context with the tracing notifier and OS randomness
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        automation: Arc<AutomationResolver>,
        provision: ProvisionConfig,
    ) -> Self {
        let settings = SettingsStore::new(pool.clone());
        Self {
            events: EventBus::new(pool.clone(), clock.clone()),
            automation_log: AutomationLogger::new(pool.clone(), clock.clone()),
            audit: AuditLog::new(pool.clone(), clock.clone()),
            notify: Notifications::new(Arc::new(TracingNotifier), settings.clone()),
            secrets: Arc::new(OsSecretSource),
            realname: RealNameGate::new(pool.clone(), settings.clone()),
            settings,
            automation,
            provision,
            clock,
            pool,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notify = Notifications::new(notifier, self.settings.clone());
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn client_for(&self, goods_type_id: i64) -> AppResult<Arc<dyn AutomationClient>> {
        self.automation.resolve(goods_type_id)
    }

    /// Run one automation call and append its `automation_log` row
    pub async fn logged<T, F>(&self, target: LogTarget, action: &str, request: Value, call: F) -> AppResult<T>
    where
        T: Serialize,
        F: Future<Output = AppResult<T>>,
    {
        match call.await {
            Ok(resp) => {
                let body = serde_json::to_value(&resp).unwrap_or(Value::Null);
                self.automation_log.success(target, action, request, body).await;
                Ok(resp)
            }
            Err(e) => {
                tracing::warn!(action, order_id = ?target.order_id, error = %e, "Automation call failed");
                self.automation_log.failure(target, action, request, &e.message).await;
                Err(e)
            }
        }
    }

    /// Delete the upstream host (when bound) and then the local row.
    ///
    /// The row survives a failed delete so the caller can retry. A host
    /// the upstream no longer knows counts as deleted.
    pub async fn destroy_instance(&self, vps: &VpsInstance, target: LogTarget) -> AppResult<()> {
        let host_id = parse_host_id(Some(&vps.automation_instance_id));
        if host_id > 0 {
            let client = self.client_for(vps.goods_type_id)?;
            let deleted = self
                .logged(target, "delete_host", json!({ "host_id": host_id }), client.delete_host(host_id))
                .await;
            match deleted {
                Ok(()) => {}
                Err(e) if is_host_missing(&e) => {
                    tracing::warn!(vps_id = vps.id, host_id, error = %e, "Upstream host already gone");
                }
                Err(e) => return Err(e),
            }
        }
        vps_repo::delete(&self.pool, vps.id).await?;
        tracing::info!(vps_id = vps.id, user_id = vps.user_id, host_id, "Instance destroyed");
        Ok(())
    }
}
