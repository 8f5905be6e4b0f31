//! Order Model (order / item / payment / cart)

use serde::{Deserialize, Serialize};

/// Order status
///
/// Items share the same vocabulary, see [`ItemStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum OrderStatus {
    PendingPayment,
    PendingReview,
    Rejected,
    Approved,
    Provisioning,
    Active,
    Failed,
    Canceled,
}

/// Item status mirrors the order status set
pub type ItemStatus = OrderStatus;

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::PendingReview => "pending_review",
            Self::Rejected => "rejected",
            Self::Approved => "approved",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Neither terminal nor active: counts as pending in the rollup
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingPayment | Self::PendingReview | Self::Approved | Self::Provisioning
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an order item does to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum ItemAction {
    Create,
    Renew,
    EmergencyRenew,
    Resize,
    Refund,
}

impl ItemAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Renew => "renew",
            Self::EmergencyRenew => "emergency_renew",
            Self::Resize => "resize",
            Self::Refund => "refund",
        }
    }

    /// Order number prefix for orders built around this action
    pub fn order_prefix(&self) -> &'static str {
        match self {
            Self::Create => "ORD",
            Self::Renew => "REN",
            Self::EmergencyRenew => "EMR",
            Self::Resize => "UPG",
            Self::Refund => "REF",
        }
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub order_no: String,
    pub status: OrderStatus,
    /// Signed; negative for refund orders
    pub total_amount: i64,
    pub currency: String,
    pub idempotency_key: Option<String>,
    pub pending_reason: Option<String>,
    pub rejected_reason: Option<String>,
    pub approved_at: Option<i64>,
    /// NULL for system approvals
    pub approved_by: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order item entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub action: ItemAction,
    pub package_id: Option<i64>,
    pub system_id: Option<i64>,
    /// Structured per-action payload, see the server's spec types
    pub spec_json: String,
    pub qty: i64,
    pub amount: i64,
    pub status: ItemStatus,
    pub duration_months: i64,
    pub automation_instance_id: Option<String>,
    pub goods_type_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Order together with its items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum PaymentStatus {
    PendingPayment,
    PendingReview,
    Approved,
    Rejected,
}

/// Payment attempt against an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct OrderPayment {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub method: String,
    pub amount: i64,
    pub currency: String,
    pub trade_no: Option<String>,
    pub idempotency_key: Option<String>,
    pub screenshot_url: Option<String>,
    pub note: Option<String>,
    pub status: PaymentStatus,
    pub reviewed_by: Option<i64>,
    pub review_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Cart line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct CartItem {
    pub id: i64,
    pub user_id: i64,
    pub package_id: i64,
    pub system_id: i64,
    pub spec_json: String,
    pub qty: i64,
    pub amount: i64,
    pub created_at: i64,
}
