//! Wallet Model (balance / ledger / wallet orders)

use serde::{Deserialize, Serialize};

/// Per-user balance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Wallet {
    pub user_id: i64,
    pub balance: i64,
    pub updated_at: i64,
}

/// Ledger direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum TransactionType {
    Credit,
    Debit,
}

/// Append-only ledger row, unique per `(user_id, ref_type, ref_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct WalletTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub tx_type: TransactionType,
    pub ref_type: String,
    pub ref_id: i64,
    pub note: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum WalletOrderType {
    Recharge,
    Withdraw,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum WalletOrderStatus {
    PendingReview,
    Approved,
    Rejected,
}

/// Reviewable money request (recharge, withdraw, refund)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct WalletOrder {
    pub id: i64,
    pub user_id: i64,
    pub order_type: WalletOrderType,
    /// Always positive
    pub amount: i64,
    pub currency: String,
    pub status: WalletOrderStatus,
    pub note: Option<String>,
    pub meta_json: String,
    pub reviewed_by: Option<i64>,
    pub review_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
