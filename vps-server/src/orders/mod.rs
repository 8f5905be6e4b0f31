//! Order core: pricing, order builders, approval state machine,
//! provisioning and the background passes that drive items to a
//! terminal state.

pub mod admin;
pub mod approval;
pub mod builder;
pub mod executor;
pub mod pricing;
pub mod proration;
pub mod refresh;
pub mod refund;
pub mod renew;
pub mod resize;
pub mod resize_quote;
pub mod resize_runner;
pub mod rollup;
pub mod service;
pub mod spec;
pub mod watchdog;

pub use builder::OrderLine;
pub use resize_quote::{ResizeQuote, ResizeRequest};
pub use service::OrderService;
pub use watchdog::WatchdogReport;

use async_trait::async_trait;
use shared::AppResult;
use std::fmt;

/// Who approved an order. System approvals store `approved_by = NULL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovedBy {
    System,
    Admin(i64),
}

impl ApprovedBy {
    pub fn admin_id(&self) -> Option<i64> {
        match self {
            Self::System => None,
            Self::Admin(id) => Some(*id),
        }
    }
}

impl fmt::Display for ApprovedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Admin(id) => write!(f, "admin:{id}"),
        }
    }
}

/// Seam between payment capture and the approval state machine
#[async_trait]
pub trait OrderApprover: Send + Sync {
    async fn approve_order(&self, order_id: i64, by: ApprovedBy) -> AppResult<()>;
}

#[async_trait]
impl OrderApprover for OrderService {
    async fn approve_order(&self, order_id: i64, by: ApprovedBy) -> AppResult<()> {
        OrderService::approve_order(self, order_id, by).await.map(|_| ())
    }
}
