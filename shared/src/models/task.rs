//! Background work queues (provision jobs, resize tasks, scheduled task runs)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum ProvisionJobStatus {
    Pending,
    Running,
    Retry,
    Done,
}

/// Watchdog record for a host that was not Ready after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ProvisionJob {
    pub id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    pub host_id: i64,
    pub host_name: String,
    pub attempts: i64,
    pub status: ProvisionJobStatus,
    pub next_run_at: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum ResizeTaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Deferred elastic update
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ResizeTask {
    pub id: i64,
    pub vps_id: i64,
    pub order_id: i64,
    pub order_item_id: i64,
    /// NULL runs on the next tick
    pub scheduled_at: Option<i64>,
    pub status: ResizeTaskStatus,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// History row written by the scheduled-task supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct ScheduledTaskRun {
    pub id: i64,
    pub task_key: String,
    pub status: String,
    pub message: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}
