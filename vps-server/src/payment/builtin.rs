//! In-process providers: wallet balance and manual approval

use super::{CreatePaymentRequest, CreatePaymentResult, METHOD_APPROVAL, METHOD_BALANCE, NotifyResult, PaymentProvider, RawNotify};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use shared::{AppError, AppResult};

fn not_remote(key: &str) -> AppError {
    AppError::invalid_request(format!("payment method '{key}' is settled in-process"))
}

/// Pays from the user's wallet
#[derive(Debug, Default)]
pub struct BalanceProvider;

#[async_trait]
impl PaymentProvider for BalanceProvider {
    fn key(&self) -> &str {
        METHOD_BALANCE
    }

    fn name(&self) -> &str {
        "Wallet balance"
    }

    async fn create_payment(&self, _req: &CreatePaymentRequest) -> AppResult<CreatePaymentResult> {
        Err(not_remote(METHOD_BALANCE))
    }

    async fn verify_notify(&self, _raw: &RawNotify) -> AppResult<NotifyResult> {
        Err(not_remote(METHOD_BALANCE))
    }
}

/// Off-line transfer with proof, reviewed by an admin
#[derive(Debug, Default)]
pub struct ApprovalProvider {
    instructions: RwLock<String>,
}

impl ApprovalProvider {
    pub fn instructions(&self) -> String {
        self.instructions.read().clone()
    }
}

#[async_trait]
impl PaymentProvider for ApprovalProvider {
    fn key(&self) -> &str {
        METHOD_APPROVAL
    }

    fn name(&self) -> &str {
        "Manual transfer"
    }

    fn schema_json(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "instructions": { "type": "string", "title": "Payment instructions shown to the user" }
            }
        })
    }

    fn set_config(&self, config: &Value) -> AppResult<()> {
        let text = config
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        *self.instructions.write() = text;
        Ok(())
    }

    async fn create_payment(&self, _req: &CreatePaymentRequest) -> AppResult<CreatePaymentResult> {
        Err(not_remote(METHOD_APPROVAL))
    }

    async fn verify_notify(&self, _raw: &RawNotify) -> AppResult<NotifyResult> {
        Err(not_remote(METHOD_APPROVAL))
    }
}
