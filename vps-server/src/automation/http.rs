//! JSON-RPC client for a goods-type automation plugin
//!
//! Every call is `POST {base_url}/{action}` with a bearer key and a JSON
//! body; the plugin answers `{code, message, data}` with `code = 0` on
//! success. Failures carry an `http_trace=` tail so the automation log
//! shows the real exchange.

use super::trace::HttpTrace;
use super::{
    AutomationClient, CatalogEntry, CreateHostRequest, CreateHostResult, ElasticUpdateRequest,
    HostInfo, HostSimple,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use shared::{AppError, AppResult};
use std::time::{Duration, Instant};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Clone)]
pub struct HttpAutomationClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpAutomationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAutomationClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpAutomationClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::config(format!("automation http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, body: Value) -> AppResult<T> {
        let url = format!("{}/{}", self.base_url, action);
        let started = Instant::now();
        let mut trace = HttpTrace {
            action: action.to_string(),
            request: Some(json!({
                "method": "POST",
                "url": url,
                "headers": {"content-type": "application/json"},
                "body": body,
            })),
            ..Default::default()
        };

        let resp = match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                trace.message = e.to_string();
                let msg = trace.append_to(&format!("{action} failed: {e}"));
                return Err(if e.is_timeout() {
                    AppError::automation_timeout(msg)
                } else {
                    AppError::automation(msg)
                });
            }
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                trace.message = e.to_string();
                return Err(AppError::automation(
                    trace.append_to(&format!("{action} failed reading body: {e}")),
                ));
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        let parsed: Option<Envelope> = serde_json::from_str(&text).ok();
        trace.response = Some(json!({
            "status": status.as_u16(),
            "headers": {},
            "duration_ms": duration_ms,
            "body": text,
        }));

        let envelope = match parsed {
            Some(env) if status.is_success() && env.code == 0 => env,
            Some(env) => {
                trace.message = env.message.clone();
                return Err(AppError::automation(trace.append_to(&format!(
                    "{action} failed: status {} code {}: {}",
                    status.as_u16(),
                    env.code,
                    env.message
                ))));
            }
            None => {
                trace.message = format!("unparseable response (status {})", status.as_u16());
                return Err(AppError::automation(
                    trace.append_to(&format!("{action} failed: {}", trace.message)),
                ));
            }
        };

        tracing::debug!(action, duration_ms, "Automation call succeeded");
        serde_json::from_value(envelope.data).map_err(|e| {
            trace.message = e.to_string();
            AppError::automation(trace.append_to(&format!("{action} returned unexpected data: {e}")))
        })
    }

    async fn call_unit(&self, action: &str, body: Value) -> AppResult<()> {
        let _: Value = self.call(action, body).await?;
        Ok(())
    }
}

#[async_trait]
impl AutomationClient for HttpAutomationClient {
    async fn create_host(&self, req: &CreateHostRequest) -> AppResult<CreateHostResult> {
        let body = serde_json::to_value(req)
            .map_err(|e| AppError::internal(format!("encode create_host: {e}")))?;
        let raw: Value = self.call("create_host", body).await?;
        let host_id = raw.get("host_id").and_then(Value::as_i64).unwrap_or(0);
        Ok(CreateHostResult { host_id, raw })
    }

    async fn get_host_info(&self, host_id: i64) -> AppResult<HostInfo> {
        self.call("get_host_info", json!({ "host_id": host_id })).await
    }

    async fn list_host_simple(&self, search_tag: &str) -> AppResult<Vec<HostSimple>> {
        self.call("list_host_simple", json!({ "search_tag": search_tag }))
            .await
    }

    async fn elastic_update(&self, req: &ElasticUpdateRequest) -> AppResult<()> {
        let body = serde_json::to_value(req)
            .map_err(|e| AppError::internal(format!("encode elastic_update: {e}")))?;
        self.call_unit("elastic_update", body).await
    }

    async fn renew_host(&self, host_id: i64, next_due: i64) -> AppResult<()> {
        self.call_unit("renew_host", json!({ "host_id": host_id, "next_due": next_due }))
            .await
    }

    async fn lock_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("lock_host", json!({ "host_id": host_id })).await
    }

    async fn unlock_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("unlock_host", json!({ "host_id": host_id })).await
    }

    async fn delete_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("delete_host", json!({ "host_id": host_id })).await
    }

    async fn start_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("start_host", json!({ "host_id": host_id })).await
    }

    async fn shutdown_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("shutdown_host", json!({ "host_id": host_id })).await
    }

    async fn reboot_host(&self, host_id: i64) -> AppResult<()> {
        self.call_unit("reboot_host", json!({ "host_id": host_id })).await
    }

    async fn get_vnc_url(&self, host_id: i64) -> AppResult<String> {
        self.call("get_vnc_url", json!({ "host_id": host_id })).await
    }

    async fn list_lines(&self) -> AppResult<Vec<CatalogEntry>> {
        self.call("list_lines", json!({})).await
    }

    async fn list_images(&self, line_id: i64) -> AppResult<Vec<CatalogEntry>> {
        self.call("list_images", json!({ "line_id": line_id })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client =
            HttpAutomationClient::new("http://plugin.local/7/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://plugin.local/7");
    }

    #[tokio::test]
    async fn test_connection_error_carries_trace() {
        // Port 9 (discard) on localhost is closed in test environments
        let client =
            HttpAutomationClient::new("http://127.0.0.1:9", "key", Duration::from_millis(500)).unwrap();
        let err = client.lock_host(1).await.unwrap_err();
        let trace = super::super::parse_http_trace(&err.message).expect("trace tail");
        assert_eq!(trace.action, "lock_host");
        assert_eq!(trace.request.unwrap()["body"]["host_id"], json!(1));
    }
}
