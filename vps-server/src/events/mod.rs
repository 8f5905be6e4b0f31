//! Order event bus
//!
//! Events are appended to `order_event` with a per-order sequence and
//! then fanned out on a broadcast channel for realtime subscribers.
//! Publishing is best-effort: a failed write is logged and the caller
//! continues.

use crate::core::clock::Clock;
use crate::db::repository::event as repo;
use serde_json::Value;
use shared::models::OrderEvent;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderEventType {
    PendingPayment,
    PendingReview,
    Approved,
    Rejected,
    Canceled,
    Provisioning,
    ItemActive,
    ItemFailed,
    Completed,
    PaymentCreated,
    PaymentApproved,
    PaymentConfirmed,
    PaymentSubmitted,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "order.pending_payment",
            Self::PendingReview => "order.pending_review",
            Self::Approved => "order.approved",
            Self::Rejected => "order.rejected",
            Self::Canceled => "order.canceled",
            Self::Provisioning => "order.provisioning",
            Self::ItemActive => "order.item.active",
            Self::ItemFailed => "order.item.failed",
            Self::Completed => "order.completed",
            Self::PaymentCreated => "payment.created",
            Self::PaymentApproved => "payment.approved",
            Self::PaymentConfirmed => "payment.confirmed",
            Self::PaymentSubmitted => "payment.submitted",
        }
    }
}

impl fmt::Display for OrderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct EventBus {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    tx: broadcast::Sender<OrderEvent>,
}

impl EventBus {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { pool, clock, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.tx.subscribe()
    }

    /// Persist then broadcast. Must not be called while holding a write transaction.
    pub async fn publish(&self, order_id: i64, event_type: OrderEventType, data: Value) -> Option<OrderEvent> {
        let data_json = data.to_string();
        match repo::append(&self.pool, order_id, event_type.as_str(), &data_json, self.clock.now_millis()).await {
            Ok(event) => {
                tracing::debug!(order_id, seq = event.seq, event = %event_type, "Order event published");
                // No subscribers is fine
                let _ = self.tx.send(event.clone());
                Some(event)
            }
            Err(e) => {
                tracing::warn!(order_id, event = %event_type, error = %e, "Failed to persist order event");
                None
            }
        }
    }

    pub async fn history(&self, order_id: i64, after_seq: i64) -> shared::AppResult<Vec<OrderEvent>> {
        Ok(repo::list_by_order(&self.pool, order_id, after_seq).await?)
    }
}
