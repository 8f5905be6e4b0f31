//! VPS Instance Model

use serde::{Deserialize, Serialize};

/// Instance status, derived from the upstream automation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum VpsStatus {
    Unknown,
    Provisioning,
    Running,
    Stopped,
    Reinstalling,
    ReinstallFailed,
    Locked,
    ExpiredLocked,
}

impl VpsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Reinstalling => "reinstalling",
            Self::ReinstallFailed => "reinstall_failed",
            Self::Locked => "locked",
            Self::ExpiredLocked => "expired_locked",
        }
    }
}

/// Administrative flag independent from the upstream state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum AdminStatus {
    #[default]
    Normal,
    Abuse,
    Fraud,
    Locked,
}

/// Provisioned (or provisioning) virtual machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct VpsInstance {
    pub id: i64,
    pub user_id: i64,
    pub order_item_id: Option<i64>,
    /// Stringified upstream host id
    pub automation_instance_id: String,
    pub goods_type_id: i64,
    pub name: String,
    pub region: String,
    pub line_id: i64,
    pub package_id: Option<i64>,
    pub package_name: String,
    pub system_id: Option<i64>,
    pub cpu: i64,
    pub memory_gb: i64,
    pub disk_gb: i64,
    pub bandwidth_mbps: i64,
    pub port_num: i64,
    pub monthly_price: i64,
    pub status: VpsStatus,
    pub admin_status: AdminStatus,
    pub automation_state: i64,
    pub expire_at: Option<i64>,
    pub last_emergency_renew_at: Option<i64>,
    pub spec_json: String,
    pub access_info_json: String,
    pub created_at: i64,
    pub updated_at: i64,
}
