//! Automation call log and the `http_trace=` error tail

use crate::core::clock::Clock;
use crate::db::repository::automation_log::{self, NewAutomationLog};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::sync::Arc;

pub const TRACE_MARKER: &str = "http_trace=";

/// Structured upstream exchange embedded at the end of an error message
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpTrace {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub message: String,
}

impl HttpTrace {
    /// `"<message> http_trace=<json>"`
    pub fn append_to(&self, message: &str) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{message} {TRACE_MARKER}{json}"),
            Err(_) => message.to_string(),
        }
    }
}

/// Parse the last `http_trace=<json>` tail, if any
pub fn parse_http_trace(message: &str) -> Option<HttpTrace> {
    let index = message.rfind(TRACE_MARKER)?;
    let raw = message[index + TRACE_MARKER.len()..].trim();
    if raw.is_empty() {
        return None;
    }
    serde_json::from_str(raw).ok()
}

/// Where an automation call belongs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTarget {
    pub order_id: Option<i64>,
    pub order_item_id: Option<i64>,
}

impl LogTarget {
    pub fn item(order_id: i64, order_item_id: i64) -> Self {
        Self {
            order_id: Some(order_id),
            order_item_id: Some(order_item_id),
        }
    }
}

/// Best-effort writer for `automation_log`
#[derive(Clone)]
pub struct AutomationLogger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl AutomationLogger {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn success(&self, target: LogTarget, action: &str, request: Value, response: Value) {
        self.write(target, action, request, Some(response), true, "ok".to_string())
            .await;
    }

    pub async fn failure(&self, target: LogTarget, action: &str, request: Value, message: &str) {
        self.write(target, action, request, None, false, message.to_string())
            .await;
    }

    async fn write(
        &self,
        target: LogTarget,
        action: &str,
        request: Value,
        response: Option<Value>,
        success: bool,
        message: String,
    ) {
        let entry = build_entry(target, action, request, response, success, message);
        let log = NewAutomationLog {
            order_id: entry.order_id,
            order_item_id: entry.order_item_id,
            action: &entry.action,
            request_json: entry.request_json,
            response_json: entry.response_json,
            success,
            message: entry.message,
        };
        if let Err(e) = automation_log::insert(&self.pool, &log, self.clock.now_millis()).await {
            tracing::warn!(action = %log.action, error = %e, "Failed to write automation log");
        }
    }
}

struct Entry {
    order_id: Option<i64>,
    order_item_id: Option<i64>,
    action: String,
    request_json: String,
    response_json: String,
    message: String,
}

fn build_entry(
    target: LogTarget,
    action: &str,
    mut request: Value,
    mut response: Option<Value>,
    success: bool,
    mut message: String,
) -> Entry {
    let mut action = action.to_string();
    if !success && let Some(trace) = parse_http_trace(&message) {
        if let Some(req) = trace.request {
            request = req;
        }
        if trace.response.is_some() {
            response = trace.response;
        }
        if !trace.action.trim().is_empty() {
            action = trace.action;
        }
        if !trace.message.trim().is_empty() {
            message = trace.message;
        }
    }

    let request_payload = json!({
        "method": "RPC",
        "url": action.trim(),
        "headers": {},
        "body": request,
    });
    let mut response_payload = json!({
        "status": if success { 200 } else { 500 },
        "headers": {},
        "duration_ms": 0,
    });
    match response {
        Some(body) => {
            response_payload["body"] = body.clone();
            response_payload["format"] = json!("json");
            response_payload["body_json"] = body;
        }
        None if !message.trim().is_empty() => {
            response_payload["body"] = json!(message);
            response_payload["format"] = json!("text");
        }
        None => {
            response_payload["body"] = json!({});
            response_payload["format"] = json!("json");
        }
    }

    Entry {
        order_id: target.order_id,
        order_item_id: target.order_item_id,
        action,
        request_json: request_payload.to_string(),
        response_json: response_payload.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace_tail() {
        let trace = HttpTrace {
            action: "create_host".into(),
            request: Some(json!({"url": "/create"})),
            response: Some(json!({"status": 502})),
            message: "bad gateway".into(),
        };
        let msg = trace.append_to("create_host failed");
        assert!(msg.starts_with("create_host failed http_trace="));
        assert_eq!(parse_http_trace(&msg), Some(trace));
        assert_eq!(parse_http_trace("plain error"), None);
        assert_eq!(parse_http_trace("x http_trace={broken"), None);
    }

    #[test]
    fn test_failure_entry_prefers_trace() {
        let trace = HttpTrace {
            action: "renew".into(),
            request: Some(json!({"host_id": 1})),
            response: Some(json!({"status": 500, "body": "boom"})),
            message: "upstream 500".into(),
        };
        let entry = build_entry(
            LogTarget::item(1, 2),
            "renew_host",
            json!({"ignored": true}),
            None,
            false,
            trace.append_to("renew_host failed"),
        );
        assert_eq!(entry.action, "renew");
        assert_eq!(entry.message, "upstream 500");
        let req: Value = serde_json::from_str(&entry.request_json).unwrap();
        assert_eq!(req["body"], json!({"host_id": 1}));
        let resp: Value = serde_json::from_str(&entry.response_json).unwrap();
        assert_eq!(resp["status"], json!(500));
        assert_eq!(resp["body_json"]["body"], json!("boom"));
    }

    #[test]
    fn test_plain_failure_is_text() {
        let entry = build_entry(
            LogTarget::default(),
            "delete_host",
            json!({"host_id": 3}),
            None,
            false,
            "timeout".into(),
        );
        let resp: Value = serde_json::from_str(&entry.response_json).unwrap();
        assert_eq!(resp["format"], json!("text"));
        assert_eq!(resp["body"], json!("timeout"));
        assert_eq!(entry.order_id, None);
    }
}
