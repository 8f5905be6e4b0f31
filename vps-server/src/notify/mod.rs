//! Outbound notifications
//!
//! Template rendering and delivery live outside the core; the core only
//! calls [`Notifier`]. [`Notifications`] applies the `email_enabled`
//! gate and swallows delivery errors.

use crate::settings::{NotifyPolicy, SettingsStore};
use async_trait::async_trait;
use shared::AppResult;
use shared::models::{Order, OrderPayment, VpsInstance};
use std::sync::Arc;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_active(&self, order: &Order) -> AppResult<()>;
    async fn order_failed(&self, order: &Order, reason: &str) -> AppResult<()>;
    async fn expire_reminder(&self, vps: &VpsInstance, days_left: i64) -> AppResult<()>;
    async fn admin_new_payment(&self, order: &Order, payment: &OrderPayment) -> AppResult<()>;
}

/// Default notifier: writes a structured log line per notification
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn order_active(&self, order: &Order) -> AppResult<()> {
        tracing::info!(user_id = order.user_id, order_no = %order.order_no, "notify: order active");
        Ok(())
    }

    async fn order_failed(&self, order: &Order, reason: &str) -> AppResult<()> {
        tracing::info!(user_id = order.user_id, order_no = %order.order_no, reason, "notify: order failed");
        Ok(())
    }

    async fn expire_reminder(&self, vps: &VpsInstance, days_left: i64) -> AppResult<()> {
        tracing::info!(user_id = vps.user_id, vps_id = vps.id, days_left, "notify: instance expiring");
        Ok(())
    }

    async fn admin_new_payment(&self, order: &Order, payment: &OrderPayment) -> AppResult<()> {
        tracing::info!(
            order_no = %order.order_no,
            payment_id = payment.id,
            method = %payment.method,
            amount = payment.amount,
            "notify: payment awaiting review"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifications {
    inner: Arc<dyn Notifier>,
    settings: SettingsStore,
}

impl Notifications {
    pub fn new(inner: Arc<dyn Notifier>, settings: SettingsStore) -> Self {
        Self { inner, settings }
    }

    async fn enabled(&self) -> bool {
        NotifyPolicy::load(&self.settings).await.email_enabled
    }

    pub async fn order_active(&self, order: &Order) {
        if !self.enabled().await {
            return;
        }
        if let Err(e) = self.inner.order_active(order).await {
            tracing::warn!(order_id = order.id, error = %e, "order_active notification failed");
        }
    }

    pub async fn order_failed(&self, order: &Order, reason: &str) {
        if !self.enabled().await {
            return;
        }
        if let Err(e) = self.inner.order_failed(order, reason).await {
            tracing::warn!(order_id = order.id, error = %e, "order_failed notification failed");
        }
    }

    /// Returns whether the reminder was delivered
    pub async fn expire_reminder(&self, vps: &VpsInstance, days_left: i64) -> bool {
        if !NotifyPolicy::load(&self.settings).await.expire_reminders() {
            return false;
        }
        match self.inner.expire_reminder(vps, days_left).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(vps_id = vps.id, error = %e, "expire_reminder notification failed");
                false
            }
        }
    }

    pub async fn admin_new_payment(&self, order: &Order, payment: &OrderPayment) {
        if !self.enabled().await {
            return;
        }
        if let Err(e) = self.inner.admin_new_payment(order, payment).await {
            tracing::warn!(order_id = order.id, error = %e, "admin_new_payment notification failed");
        }
    }
}
