//! Payment capture
//!
//! - [`PaymentProvider`]: pluggable provider contract (create + verify notify)
//! - [`PaymentRegistry`]: in-process providers plus their persisted config
//! - [`PaymentService`]: balance, gateway and manual-proof capture paths

pub mod builtin;
pub mod registry;
pub mod service;
pub mod signed_gateway;

pub use builtin::{ApprovalProvider, BalanceProvider};
pub use registry::{PaymentRegistry, ProviderInfo, UserMethod};
pub use service::{PaymentOutcome, PaymentService, SubmitPayment};
pub use signed_gateway::SignedGatewayProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::AppResult;
use std::collections::HashMap;

pub const METHOD_BALANCE: &str = "balance";
pub const METHOD_APPROVAL: &str = "approval";

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub subject: String,
    pub return_url: String,
    pub notify_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePaymentResult {
    pub trade_no: String,
    pub pay_url: String,
    #[serde(default)]
    pub extra: Value,
}

/// Notify request as received, handed to the provider untouched
#[derive(Debug, Clone, Default)]
pub struct RawNotify {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyResult {
    pub order_no: String,
    pub trade_no: String,
    pub paid: bool,
    pub amount: i64,
    /// Body the provider expects back on success
    pub ack_body: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn key(&self) -> &str;

    fn name(&self) -> &str;

    /// JSON schema of the provider's config, rendered by the admin UI
    fn schema_json(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Apply persisted config; called at startup and on admin update
    fn set_config(&self, _config: &Value) -> AppResult<()> {
        Ok(())
    }

    async fn create_payment(&self, req: &CreatePaymentRequest) -> AppResult<CreatePaymentResult>;

    async fn verify_notify(&self, raw: &RawNotify) -> AppResult<NotifyResult>;
}
