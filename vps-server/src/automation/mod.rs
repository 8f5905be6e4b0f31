//! Automation backend contract
//!
//! One client per goods type drives the upstream host platform. The
//! order core needs the lifecycle calls; the rest of the surface has
//! default bodies that report "not supported" so plugin clients only
//! implement what their platform offers.

pub mod http;
pub mod resolver;
pub mod trace;

pub use http::HttpAutomationClient;
pub use resolver::AutomationResolver;
pub use trace::{AutomationLogger, HttpTrace, parse_http_trace};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::models::VpsStatus;
use shared::{AppError, AppResult, ErrorCode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateHostRequest {
    pub line_id: i64,
    pub os: String,
    pub cpu: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth: i64,
    pub port_num: i64,
    /// Unix millis
    pub expire_time: i64,
    pub host_name: String,
    pub sys_pwd: String,
    pub vnc_pwd: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateHostResult {
    /// `0` when the backend did not report one
    #[serde(default)]
    pub host_id: i64,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub host_id: i64,
    #[serde(default)]
    pub host_name: String,
    pub state: i64,
    #[serde(default)]
    pub cpu: i64,
    #[serde(default)]
    pub memory_gb: i64,
    #[serde(default)]
    pub disk_gb: i64,
    #[serde(default)]
    pub bandwidth: i64,
    #[serde(default)]
    pub panel_password: String,
    #[serde(default)]
    pub vnc_password: String,
    #[serde(default)]
    pub os_password: String,
    #[serde(default)]
    pub remote_ip: String,
    /// Unix millis
    #[serde(default)]
    pub expire_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostSimple {
    pub id: i64,
    pub host_name: String,
    #[serde(default)]
    pub ip: String,
}

/// Only the populated dimensions are sent upstream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElasticUpdateRequest {
    pub host_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_num: Option<i64>,
}

/// Catalog entry returned by the listers (area, line, product, image)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: i64,
}

fn unsupported(op: &str) -> AppError {
    AppError::automation(format!("{op} is not supported by this automation backend"))
}

#[async_trait]
pub trait AutomationClient: Send + Sync {
    async fn create_host(&self, req: &CreateHostRequest) -> AppResult<CreateHostResult>;
    async fn get_host_info(&self, host_id: i64) -> AppResult<HostInfo>;
    async fn list_host_simple(&self, search_tag: &str) -> AppResult<Vec<HostSimple>>;
    async fn elastic_update(&self, req: &ElasticUpdateRequest) -> AppResult<()>;
    /// `next_due` in Unix millis
    async fn renew_host(&self, host_id: i64, next_due: i64) -> AppResult<()>;
    async fn lock_host(&self, host_id: i64) -> AppResult<()>;
    async fn unlock_host(&self, host_id: i64) -> AppResult<()>;
    async fn delete_host(&self, host_id: i64) -> AppResult<()>;

    async fn start_host(&self, _host_id: i64) -> AppResult<()> {
        Err(unsupported("start_host"))
    }
    async fn shutdown_host(&self, _host_id: i64) -> AppResult<()> {
        Err(unsupported("shutdown_host"))
    }
    async fn reboot_host(&self, _host_id: i64) -> AppResult<()> {
        Err(unsupported("reboot_host"))
    }
    async fn reset_os(&self, _host_id: i64, _template_id: i64, _password: &str) -> AppResult<()> {
        Err(unsupported("reset_os"))
    }
    async fn get_panel_url(&self, _host_name: &str, _panel_password: &str) -> AppResult<String> {
        Err(unsupported("get_panel_url"))
    }
    async fn get_vnc_url(&self, _host_id: i64) -> AppResult<String> {
        Err(unsupported("get_vnc_url"))
    }
    async fn list_areas(&self) -> AppResult<Vec<CatalogEntry>> {
        Err(unsupported("list_areas"))
    }
    async fn list_lines(&self) -> AppResult<Vec<CatalogEntry>> {
        Err(unsupported("list_lines"))
    }
    async fn list_products(&self, _line_id: i64) -> AppResult<Vec<CatalogEntry>> {
        Err(unsupported("list_products"))
    }
    async fn list_images(&self, _line_id: i64) -> AppResult<Vec<CatalogEntry>> {
        Err(unsupported("list_images"))
    }
}

/// Coarse host lifecycle derived from the upstream state code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// 2 running, 3 stopped, 10 locked
    Ready,
    /// 0, 1, 13
    Provisioning,
    /// 5, 11
    Failed,
    /// Anything else; pollers keep waiting
    Other,
}

impl HostPhase {
    pub fn of(state: i64) -> Self {
        match state {
            2 | 3 | 10 => Self::Ready,
            0 | 1 | 13 => Self::Provisioning,
            5 | 11 => Self::Failed,
            _ => Self::Other,
        }
    }
}

/// Fixed mapping from upstream state code to instance status
pub fn map_state(state: i64) -> VpsStatus {
    match state {
        0 | 1 | 13 => VpsStatus::Provisioning,
        2 => VpsStatus::Running,
        3 => VpsStatus::Stopped,
        4 => VpsStatus::Reinstalling,
        5 => VpsStatus::ReinstallFailed,
        10 => VpsStatus::Locked,
        _ => VpsStatus::Unknown,
    }
}

/// Instances store the host id as text; `0` means "not bound"
pub fn parse_host_id(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .unwrap_or(0)
}

/// Upstream reports the host is already gone
pub fn is_host_missing(err: &AppError) -> bool {
    if matches!(err.code, ErrorCode::NotFound | ErrorCode::VpsNotFound) {
        return true;
    }
    let msg = err.message.to_lowercase();
    ["not found", "not exist", "no such host", "不存在"]
        .iter()
        .any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_phase() {
        for s in [2, 3, 10] {
            assert_eq!(HostPhase::of(s), HostPhase::Ready);
        }
        for s in [0, 1, 13] {
            assert_eq!(HostPhase::of(s), HostPhase::Provisioning);
        }
        for s in [5, 11] {
            assert_eq!(HostPhase::of(s), HostPhase::Failed);
        }
        assert_eq!(HostPhase::of(4), HostPhase::Other);
    }

    #[test]
    fn test_map_state() {
        assert_eq!(map_state(0), VpsStatus::Provisioning);
        assert_eq!(map_state(2), VpsStatus::Running);
        assert_eq!(map_state(3), VpsStatus::Stopped);
        assert_eq!(map_state(5), VpsStatus::ReinstallFailed);
        assert_eq!(map_state(10), VpsStatus::Locked);
        assert_eq!(map_state(99), VpsStatus::Unknown);
    }

    #[test]
    fn test_parse_host_id() {
        assert_eq!(parse_host_id(Some(" 42 ")), 42);
        assert_eq!(parse_host_id(Some("0")), 0);
        assert_eq!(parse_host_id(Some("abc")), 0);
        assert_eq!(parse_host_id(None), 0);
    }

    #[test]
    fn test_is_host_missing() {
        assert!(is_host_missing(&AppError::automation("delete_host failed: status 200 code 404: Host Not Found")));
        assert!(is_host_missing(&AppError::automation("delete_host failed: 主机不存在")));
        assert!(is_host_missing(&AppError::new(ErrorCode::VpsNotFound)));
        assert!(!is_host_missing(&AppError::automation("delete_host failed: connection refused")));
        assert!(!is_host_missing(&AppError::automation_timeout("delete_host timed out")));
    }

    #[test]
    fn test_elastic_update_skips_unset_dims() {
        let req = ElasticUpdateRequest {
            host_id: 7,
            cpu: Some(4),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"host_id": 7, "cpu": 4}));
    }
}
