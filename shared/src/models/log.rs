//! Append-only logs: automation calls, admin audit, order events

use serde::{Deserialize, Serialize};

/// One outbound automation call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct AutomationLog {
    pub id: i64,
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
    pub action: String,
    pub request_json: String,
    pub response_json: String,
    pub success: bool,
    pub message: String,
    pub created_at: i64,
}

/// Admin mutation record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct AdminAuditLog {
    pub id: i64,
    pub admin_id: i64,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub detail_json: String,
    pub created_at: i64,
}

/// Persisted order event (fanned out to realtime subscribers)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: i64,
    pub seq: i64,
    pub event_type: String,
    pub data_json: String,
    pub created_at: i64,
}
