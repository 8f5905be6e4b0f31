//! Generic redirect gateway with HMAC-SHA256 signed callbacks
//!
//! Outgoing pay URLs and incoming notifies carry a `sign` parameter:
//! hex(HMAC-SHA256(secret, "k1=v1&k2=v2...")) over every other non-empty
//! parameter sorted by key.

use super::{CreatePaymentRequest, CreatePaymentResult, NotifyResult, PaymentProvider, RawNotify};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::Sha256;
use shared::{AppError, AppResult, ErrorCode};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const ACK_BODY: &str = "success";
const PAID_STATUSES: [&str; 3] = ["paid", "success", "TRADE_SUCCESS"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway_url: String,
    #[serde(default)]
    pub merchant_id: String,
    #[serde(default)]
    pub secret: String,
}

/// `k=v` pairs joined by `&`, sorted, without `sign`/`sign_type` and empty values
pub fn canonical(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign" && k.as_str() != "sign_type")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(secret: &str, params: &BTreeMap<String, String>) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::config(format!("invalid gateway secret: {e}")))?;
    mac.update(canonical(params).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of `params["sign"]`
pub fn verify(secret: &str, params: &BTreeMap<String, String>) -> AppResult<()> {
    let provided = params
        .get("sign")
        .ok_or_else(|| AppError::with_message(ErrorCode::PaymentVerifyFailed, "missing sign"))?;
    let expected = hex::decode(provided)
        .map_err(|_| AppError::with_message(ErrorCode::PaymentVerifyFailed, "malformed sign"))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::config(format!("invalid gateway secret: {e}")))?;
    mac.update(canonical(params).as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| AppError::with_message(ErrorCode::PaymentVerifyFailed, "signature mismatch"))
}

/// Form body wins over the query string
fn notify_params(raw: &RawNotify) -> AppResult<BTreeMap<String, String>> {
    let encoded = if raw.body.trim().is_empty() { raw.query.as_str() } else { raw.body.trim() };
    let url = Url::parse(&format!("http://notify.local/?{encoded}"))
        .map_err(|e| AppError::with_message(ErrorCode::PaymentVerifyFailed, format!("unparseable notify: {e}")))?;
    Ok(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect())
}

pub struct SignedGatewayProvider {
    key: String,
    name: String,
    config: RwLock<GatewayConfig>,
}

impl SignedGatewayProvider {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            config: RwLock::new(GatewayConfig::default()),
        }
    }

    pub fn with_config(self, config: GatewayConfig) -> Self {
        *self.config.write() = config;
        self
    }

    fn ready_config(&self) -> AppResult<GatewayConfig> {
        let config = self.config.read().clone();
        if config.secret.is_empty() || config.gateway_url.is_empty() {
            return Err(AppError::config(format!("payment provider '{}' is not configured", self.key)));
        }
        Ok(config)
    }
}

#[async_trait]
impl PaymentProvider for SignedGatewayProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema_json(&self) -> Value {
        json!({
            "type": "object",
            "required": ["gateway_url", "secret"],
            "properties": {
                "gateway_url": { "type": "string", "title": "Gateway URL" },
                "merchant_id": { "type": "string", "title": "Merchant ID" },
                "secret": { "type": "string", "title": "Signing secret", "format": "password" }
            }
        })
    }

    fn set_config(&self, config: &Value) -> AppResult<()> {
        let parsed: GatewayConfig = serde_json::from_value(config.clone())
            .map_err(|e| AppError::validation(format!("invalid config for '{}': {e}", self.key)))?;
        if !parsed.gateway_url.is_empty() {
            Url::parse(&parsed.gateway_url)
                .map_err(|e| AppError::validation(format!("invalid gateway_url: {e}")))?;
        }
        *self.config.write() = parsed;
        Ok(())
    }

    async fn create_payment(&self, req: &CreatePaymentRequest) -> AppResult<CreatePaymentResult> {
        let config = self.ready_config()?;
        let trade_no = format!("{}-{}", req.order_no, &uuid::Uuid::new_v4().simple().to_string()[..8]);

        let mut params = BTreeMap::new();
        params.insert("merchant_id".to_string(), config.merchant_id.clone());
        params.insert("order_no".to_string(), req.order_no.clone());
        params.insert("trade_no".to_string(), trade_no.clone());
        params.insert("amount".to_string(), req.amount.to_string());
        params.insert("currency".to_string(), req.currency.clone());
        params.insert("subject".to_string(), req.subject.clone());
        params.insert("notify_url".to_string(), req.notify_url.clone());
        params.insert("return_url".to_string(), req.return_url.clone());
        let signature = sign(&config.secret, &params)?;

        let pay_url = Url::parse_with_params(
            &config.gateway_url,
            params
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .chain(std::iter::once(("sign", signature.as_str()))),
        )
        .map_err(|e| AppError::config(format!("invalid gateway_url: {e}")))?;

        tracing::debug!(provider = %self.key, order_no = %req.order_no, trade_no = %trade_no, "Gateway payment created");
        Ok(CreatePaymentResult {
            trade_no,
            pay_url: pay_url.to_string(),
            extra: json!({ "provider": self.key }),
        })
    }

    async fn verify_notify(&self, raw: &RawNotify) -> AppResult<NotifyResult> {
        let config = self.ready_config()?;
        let params = notify_params(raw)?;
        verify(&config.secret, &params)?;

        let field = |name: &str| params.get(name).cloned().unwrap_or_default();
        let order_no = field("order_no");
        if order_no.is_empty() {
            return Err(AppError::with_message(ErrorCode::PaymentVerifyFailed, "missing order_no"));
        }
        let amount = field("amount")
            .parse::<i64>()
            .map_err(|_| AppError::with_message(ErrorCode::PaymentVerifyFailed, "invalid amount"))?;
        let status = field("status");

        Ok(NotifyResult {
            order_no,
            trade_no: field("trade_no"),
            paid: PAID_STATUSES.contains(&status.as_str()),
            amount,
            ack_body: ACK_BODY.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn provider() -> SignedGatewayProvider {
        SignedGatewayProvider::new("gateway", "Gateway").with_config(GatewayConfig {
            gateway_url: "https://pay.example.com/checkout".to_string(),
            merchant_id: "m-1".to_string(),
            secret: SECRET.to_string(),
        })
    }

    fn notify_body(amount: &str, status: &str, signed_amount: &str) -> String {
        let mut params = BTreeMap::new();
        params.insert("order_no".to_string(), "ORD-1-100".to_string());
        params.insert("trade_no".to_string(), "T-9".to_string());
        params.insert("amount".to_string(), signed_amount.to_string());
        params.insert("status".to_string(), status.to_string());
        let signature = sign(SECRET, &params).unwrap();
        format!("order_no=ORD-1-100&trade_no=T-9&amount={amount}&status={status}&sign={signature}")
    }

    #[test]
    fn canonical_skips_sign_and_empty() {
        let mut params = BTreeMap::new();
        params.insert("b".to_string(), "2".to_string());
        params.insert("a".to_string(), "1".to_string());
        params.insert("sign".to_string(), "x".to_string());
        params.insert("empty".to_string(), String::new());
        assert_eq!(canonical(&params), "a=1&b=2");
    }

    #[tokio::test]
    async fn verifies_signed_body() {
        let raw = RawNotify {
            body: notify_body("2000", "paid", "2000"),
            ..Default::default()
        };
        let result = provider().verify_notify(&raw).await.unwrap();
        assert_eq!(result.order_no, "ORD-1-100");
        assert_eq!(result.trade_no, "T-9");
        assert_eq!(result.amount, 2000);
        assert!(result.paid);
        assert_eq!(result.ack_body, ACK_BODY);
    }

    #[tokio::test]
    async fn query_string_is_accepted() {
        let raw = RawNotify {
            query: notify_body("2000", "success", "2000"),
            ..Default::default()
        };
        assert!(provider().verify_notify(&raw).await.unwrap().paid);
    }

    #[tokio::test]
    async fn tampered_amount_is_rejected() {
        let raw = RawNotify {
            body: notify_body("1", "paid", "2000"),
            ..Default::default()
        };
        let err = provider().verify_notify(&raw).await.unwrap_err();
        assert!(err.is(ErrorCode::PaymentVerifyFailed));
    }

    #[tokio::test]
    async fn unpaid_status_is_reported() {
        let raw = RawNotify {
            body: notify_body("2000", "closed", "2000"),
            ..Default::default()
        };
        assert!(!provider().verify_notify(&raw).await.unwrap().paid);
    }

    #[tokio::test]
    async fn pay_url_carries_signature() {
        let req = CreatePaymentRequest {
            order_id: 1,
            order_no: "ORD-1-100".to_string(),
            user_id: 1,
            amount: 2000,
            currency: "CNY".to_string(),
            subject: "order".to_string(),
            return_url: "https://shop.example.com/orders/1".to_string(),
            notify_url: "https://shop.example.com/api/v1/payments/notify/gateway".to_string(),
        };
        let result = provider().create_payment(&req).await.unwrap();
        assert!(result.trade_no.starts_with("ORD-1-100-"));

        let url = Url::parse(&result.pay_url).unwrap();
        let params: BTreeMap<String, String> =
            url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        assert_eq!(params.get("amount").map(String::as_str), Some("2000"));
        assert!(verify(SECRET, &params).is_ok());
    }

    #[tokio::test]
    async fn unconfigured_provider_refuses() {
        let p = SignedGatewayProvider::new("gateway", "Gateway");
        let err = p.verify_notify(&RawNotify::default()).await.unwrap_err();
        assert!(err.is(ErrorCode::ConfigError));
    }
}
