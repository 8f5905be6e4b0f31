//! Wallet & refund
//!
//! - [`WalletService`] owns every balance mutation and the wallet-order
//!   review flow (recharge, withdraw, refund)
//! - [`refund_policy`] / [`refund_curve`] compute refundable amounts

pub mod refund_curve;
pub mod refund_policy;
pub mod service;

pub use refund_curve::{CurvePoint, RefundCurve};
pub use refund_policy::{RefundBasis, RefundPolicy, calculate_refund};
pub use service::{WalletService, apply_adjustment};

/// Ledger reference types (`wallet_transaction.ref_type`)
pub mod ref_type {
    pub const ORDER: &str = "order";
    pub const VPS_REFUND: &str = "vps_refund";
    pub const RESIZE_REFUND: &str = "resize_refund";
    pub const WALLET_ORDER: &str = "wallet_order";
    pub const ADMIN_ADJUST: &str = "admin_adjust";
}
