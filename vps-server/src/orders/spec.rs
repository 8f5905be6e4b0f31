//! Typed `spec_json` payloads
//!
//! Each producer owns one record type. Reads are lenient (unknown keys
//! land in `extra` and are written back untouched); the fields the core
//! acts on are parsed strictly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{AppError, AppResult};

/// Below this a numeric timestamp is taken as Unix seconds
const SECONDS_CUTOFF: i64 = 10_000_000_000;

fn parse_strict<T: DeserializeOwned>(raw: &str, what: &str) -> AppResult<T> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| AppError::validation(format!("invalid {what} spec: {e}")))
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Addon selection and billing cycle, as stored on cart lines and create items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSpec {
    #[serde(default)]
    pub add_cores: i64,
    #[serde(default)]
    pub add_mem_gb: i64,
    #[serde(default)]
    pub add_disk_gb: i64,
    #[serde(default)]
    pub add_bw_mbps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_qty: Option<i64>,
    /// Filled in by the order builder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_months: Option<i64>,
}

impl CartSpec {
    pub fn parse(raw: &str) -> AppResult<Self> {
        parse_strict(raw, "cart")
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }

    pub fn has_addons(&self) -> bool {
        self.add_cores != 0 || self.add_mem_gb != 0 || self.add_disk_gb != 0 || self.add_bw_mbps != 0
    }
}

/// `vps_instance.spec_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub add_cores: i64,
    #[serde(default)]
    pub add_mem_gb: i64,
    #[serde(default)]
    pub add_disk_gb: i64,
    #[serde(default)]
    pub add_bw_mbps: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_months: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn timestamp_value(v: &Value) -> Option<i64> {
    let millis = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => shared::util::rfc3339_to_millis(s)?,
        },
        _ => return None,
    };
    if millis <= 0 {
        return None;
    }
    Some(if millis < SECONDS_CUTOFF { millis * 1000 } else { millis })
}

impl InstanceSpec {
    /// Lenient: a malformed document reads as empty
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(raw) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable instance spec, starting from empty");
                Self::default()
            }
        }
    }

    pub fn from_cart(cart: &CartSpec) -> Self {
        Self {
            add_cores: cart.add_cores,
            add_mem_gb: cart.add_mem_gb,
            add_disk_gb: cart.add_disk_gb,
            add_bw_mbps: cart.add_bw_mbps,
            duration_months: cart.duration_months,
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }

    fn extra_timestamp(&self, keys: &[&str]) -> Option<i64> {
        keys.iter().find_map(|k| self.extra.get(*k).and_then(timestamp_value))
    }

    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .filter(|v| *v > 0)
            .or_else(|| self.extra_timestamp(&["period_start", "last_renew_at", "purchase_at"]))
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .filter(|v| *v > 0)
            .or_else(|| self.extra_timestamp(&["period_end"]))
    }

    /// `(start, end)` when both ends are known and ordered
    pub fn period(&self) -> Option<(i64, i64)> {
        match (self.period_start(), self.period_end()) {
            (Some(start), Some(end)) if end > start => Some((start, end)),
            _ => None,
        }
    }

    pub fn set_period(&mut self, start: i64, end: i64) {
        self.current_period_start = Some(start);
        self.current_period_end = Some(end);
    }

    /// Merge upstream-reported keys without dropping local ones
    pub fn merge_extra(&mut self, other: Map<String, Value>) {
        for (k, v) in other {
            self.extra.insert(k, v);
        }
    }
}

/// Current period of an instance: explicit in its spec, else `[created_at, expire_at)`
pub fn instance_period(spec: &InstanceSpec, created_at: i64, expire_at: Option<i64>) -> Option<(i64, i64)> {
    spec.period().or(match expire_at {
        Some(end) if end > created_at => Some((created_at, end)),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewItemSpec {
    pub vps_id: i64,
    pub renew_days: i64,
    #[serde(default)]
    pub duration_months: i64,
    #[serde(default)]
    pub emergency: bool,
}

impl RenewItemSpec {
    pub fn parse(raw: &str) -> AppResult<Self> {
        parse_strict(raw, "renew")
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }
}

/// Plan snapshot a resize moves the instance to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeTarget {
    #[serde(default)]
    pub package_id: Option<i64>,
    #[serde(default)]
    pub package_name: String,
    pub cpu: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth_mbps: i64,
    #[serde(default)]
    pub port_num: i64,
    pub monthly_price: i64,
    #[serde(default)]
    pub add_cores: i64,
    #[serde(default)]
    pub add_mem_gb: i64,
    #[serde(default)]
    pub add_disk_gb: i64,
    #[serde(default)]
    pub add_bw_mbps: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResizeItemSpec {
    pub vps_id: i64,
    pub target: ResizeTarget,
    #[serde(default)]
    pub reset_addons: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
    pub current_monthly: i64,
    pub charge: i64,
    #[serde(default)]
    pub refund_amount: i64,
    #[serde(default)]
    pub refund_to_wallet: bool,
}

impl ResizeItemSpec {
    pub fn parse(raw: &str) -> AppResult<Self> {
        parse_strict(raw, "resize")
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundItemSpec {
    pub vps_id: i64,
    #[serde(default)]
    pub reason: String,
    pub refund_amount: i64,
    #[serde(default = "default_true")]
    pub refund_to_wallet: bool,
    #[serde(default = "default_true")]
    pub delete_on_approve: bool,
}

fn default_true() -> bool {
    true
}

impl RefundItemSpec {
    pub fn parse(raw: &str) -> AppResult<Self> {
        parse_strict(raw, "refund")
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }
}

/// `wallet_order.meta_json` for refund requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundMeta {
    #[serde(default)]
    pub vps_id: Option<i64>,
    #[serde(default)]
    pub order_item_id: Option<i64>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub delete_on_approve: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy_error: Option<String>,
    /// Refund order this wallet order settles; also the ledger key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_order_id: Option<i64>,
}

impl RefundMeta {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instance_spec_preserves_unknown_keys() {
        let raw = r#"{"current_period_start":1000,"current_period_end":2000,"os":"debian","add_cores":2}"#;
        let mut spec = InstanceSpec::parse(raw);
        assert_eq!(spec.period(), Some((1000, 2000)));
        spec.set_period(3000, 4000);
        let back: Value = serde_json::from_str(&spec.to_json()).unwrap();
        assert_eq!(back["os"], json!("debian"));
        assert_eq!(back["current_period_end"], json!(4000));
        assert_eq!(back["add_cores"], json!(2));
    }

    #[test]
    fn test_period_aliases_and_units() {
        let spec = InstanceSpec::parse(
            r#"{"purchase_at":"2025-01-01T00:00:00Z","period_end":1738368000}"#,
        );
        let start = shared::util::rfc3339_to_millis("2025-01-01T00:00:00Z").unwrap();
        assert_eq!(spec.period(), Some((start, 1_738_368_000_000)));
    }

    #[test]
    fn test_instance_period_fallback() {
        let spec = InstanceSpec::default();
        assert_eq!(instance_period(&spec, 10, Some(20)), Some((10, 20)));
        assert_eq!(instance_period(&spec, 10, None), None);
        assert_eq!(instance_period(&spec, 30, Some(20)), None);
    }

    #[test]
    fn test_malformed_instance_spec_reads_empty() {
        assert_eq!(InstanceSpec::parse("not json"), InstanceSpec::default());
    }

    #[test]
    fn test_cart_spec_strict() {
        let spec = CartSpec::parse(r#"{"add_cores":2,"billing_cycle_id":3,"cycle_qty":2}"#).unwrap();
        assert_eq!(spec.add_cores, 2);
        assert_eq!(spec.billing_cycle_id, Some(3));
        assert!(spec.has_addons());
        assert!(CartSpec::parse(r#"{"add_cores":"two"}"#).is_err());
        assert_eq!(CartSpec::parse("").unwrap(), CartSpec::default());
    }

    #[test]
    fn test_refund_item_defaults() {
        let spec = RefundItemSpec::parse(r#"{"vps_id":7,"refund_amount":500}"#).unwrap();
        assert!(spec.refund_to_wallet);
        assert!(spec.delete_on_approve);
    }
}
