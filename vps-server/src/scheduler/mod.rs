//! 定时任务调度
//!
//! 每个任务一个循环，按 interval 或每日固定时间 (UTC) 触发。
//! 配置可通过 settings 键 `task.<key>` 覆盖：
//! `{"enabled": true, "strategy": "interval", "interval_sec": 300, "daily_at": "03:00"}`。
//! 运行历史写入 `scheduled_task_run`，空跑的 interval 任务不记录。

pub mod tasks;

use crate::core::context::CoreContext;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::db::repository::task_run;
use crate::orders::OrderService;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use shared::AppResult;
use shared::models::ScheduledTaskRun;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    VpsRefresh,
    ProvisionWatchdog,
    ResizeRunner,
    ExpireReminder,
    ExpireLock,
    ExpireCleanup,
}

impl TaskKey {
    pub const ALL: [TaskKey; 6] = [
        TaskKey::VpsRefresh,
        TaskKey::ProvisionWatchdog,
        TaskKey::ResizeRunner,
        TaskKey::ExpireReminder,
        TaskKey::ExpireLock,
        TaskKey::ExpireCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VpsRefresh => "vps_refresh",
            Self::ProvisionWatchdog => "order_provision_watchdog",
            Self::ResizeRunner => "resize_task_runner",
            Self::ExpireReminder => "expire_reminder",
            Self::ExpireLock => "vps_expire_lock",
            Self::ExpireCleanup => "vps_expire_cleanup",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Interval,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskConfig {
    pub enabled: bool,
    pub strategy: Strategy,
    pub interval_sec: u64,
    /// `HH:MM`, UTC
    pub daily_at: String,
}

/// Partial config stored under `task.<key>`
#[derive(Debug, Clone, Default, Deserialize)]
struct TaskOverride {
    enabled: Option<bool>,
    strategy: Option<Strategy>,
    interval_sec: Option<u64>,
    daily_at: Option<String>,
}

impl TaskConfig {
    fn interval(secs: u64) -> Self {
        Self {
            enabled: true,
            strategy: Strategy::Interval,
            interval_sec: secs,
            daily_at: String::new(),
        }
    }

    fn daily(at: &str) -> Self {
        Self {
            enabled: true,
            strategy: Strategy::Daily,
            interval_sec: 0,
            daily_at: at.to_string(),
        }
    }

    fn merged(mut self, o: TaskOverride) -> Self {
        if let Some(enabled) = o.enabled {
            self.enabled = enabled;
        }
        if let Some(strategy) = o.strategy {
            self.strategy = strategy;
        }
        if let Some(secs) = o.interval_sec.filter(|s| *s > 0) {
            self.interval_sec = secs;
        }
        if let Some(at) = o.daily_at.filter(|a| parse_daily_at(a).is_some()) {
            self.daily_at = at;
        }
        self
    }
}

pub fn parse_daily_at(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Today's slot (UTC) in millis
fn daily_slot(now: i64, at: NaiveTime) -> Option<i64> {
    let today = DateTime::<Utc>::from_timestamp_millis(now)?.date_naive();
    Some(today.and_time(at).and_utc().timestamp_millis())
}

/// Due once today's slot has passed and no run started since
pub fn daily_due(now: i64, daily_at: &str, last_started: Option<i64>) -> bool {
    let Some(slot) = parse_daily_at(daily_at).and_then(|at| daily_slot(now, at)) else {
        return false;
    };
    now >= slot && last_started.is_none_or(|last| last < slot)
}

pub fn interval_due(now: i64, interval_sec: u64, last_run: Option<i64>) -> bool {
    let interval_ms = (interval_sec.max(1) as i64).saturating_mul(1000);
    last_run.is_none_or(|last| now - last >= interval_ms)
}

/// Result of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub processed: usize,
}

impl TaskOutcome {
    pub fn is_idle(&self) -> bool {
        self.processed == 0
    }
}

pub struct Scheduler {
    orders: OrderService,
    ctx: Arc<CoreContext>,
    /// Wake-up period for daily tasks
    tick: Duration,
    watchdog_tick: Duration,
    resize_tick: Duration,
}

impl Scheduler {
    pub fn new(orders: OrderService, tick: Duration, watchdog_tick: Duration, resize_tick: Duration) -> Self {
        Self {
            ctx: orders.context().clone(),
            orders,
            tick,
            watchdog_tick,
            resize_tick,
        }
    }

    pub fn default_config(&self, key: TaskKey) -> TaskConfig {
        match key {
            TaskKey::VpsRefresh => TaskConfig::interval(300),
            TaskKey::ProvisionWatchdog => TaskConfig::interval(self.watchdog_tick.as_secs().max(1)),
            TaskKey::ResizeRunner => TaskConfig::interval(self.resize_tick.as_secs().max(1)),
            TaskKey::ExpireReminder => TaskConfig::daily("09:00"),
            TaskKey::ExpireLock => TaskConfig::interval(600),
            TaskKey::ExpireCleanup => TaskConfig::daily("03:00"),
        }
    }

    pub async fn config(&self, key: TaskKey) -> TaskConfig {
        let over = self
            .ctx
            .settings
            .get_json::<TaskOverride>(&format!("task.{}", key.as_str()))
            .await
            .unwrap_or_default();
        self.default_config(key).merged(over)
    }

    /// Execute one task body
    pub async fn run_task(&self, key: TaskKey) -> AppResult<TaskOutcome> {
        let processed = match key {
            TaskKey::VpsRefresh => self.orders.refresh_instances_once().await?,
            TaskKey::ProvisionWatchdog => {
                let report = self.orders.run_watchdog_once().await?;
                report.completed + report.failed + report.retried + report.closed
            }
            TaskKey::ResizeRunner => self.orders.run_resize_tasks_once().await?,
            TaskKey::ExpireReminder => tasks::send_expire_reminders(&self.ctx).await?,
            TaskKey::ExpireLock => tasks::lock_expired(&self.ctx).await?,
            TaskKey::ExpireCleanup => tasks::cleanup_expired(&self.ctx).await?,
        };
        Ok(TaskOutcome { processed })
    }

    /// Run and record history
    pub async fn run_recorded(&self, key: TaskKey, config: &TaskConfig) -> AppResult<TaskOutcome> {
        let started = self.ctx.now();
        let result = self.run_task(key).await;
        let finished = self.ctx.now();

        let (status, message) = match &result {
            Ok(outcome) if outcome.is_idle() && config.strategy == Strategy::Interval => return result,
            Ok(outcome) => ("success", format!("processed {}", outcome.processed)),
            Err(e) => ("failed", e.message.clone()),
        };
        match task_run::start(&self.ctx.pool, key.as_str(), started).await {
            Ok(id) => {
                if let Err(e) = task_run::finish(&self.ctx.pool, id, status, Some(&message), finished).await {
                    tracing::warn!(task = key.as_str(), error = %e, "Failed to finish task run record");
                }
            }
            Err(e) => tracing::warn!(task = key.as_str(), error = %e, "Failed to record task run"),
        }
        result
    }

    pub async fn history(&self, key: TaskKey, limit: i64) -> AppResult<Vec<ScheduledTaskRun>> {
        Ok(task_run::list(&self.ctx.pool, key.as_str(), limit).await?)
    }

    async fn is_due(&self, key: TaskKey, config: &TaskConfig, now: i64, last_run: Option<i64>) -> bool {
        match config.strategy {
            Strategy::Interval => interval_due(now, config.interval_sec, last_run),
            Strategy::Daily => {
                let last = match task_run::find_last(&self.ctx.pool, key.as_str()).await {
                    Ok(row) => row.map(|r| r.started_at),
                    Err(e) => {
                        tracing::warn!(task = key.as_str(), error = %e, "Failed to read last task run");
                        return false;
                    }
                };
                daily_due(now, &config.daily_at, last)
            }
        }
    }

    async fn run_loop(self: Arc<Self>, key: TaskKey, cancel: CancellationToken) {
        tracing::info!(task = key.as_str(), "Scheduled task loop started");
        let mut last_run = None;
        loop {
            let config = self.config(key).await;
            let now = self.ctx.now();
            if config.enabled && self.is_due(key, &config, now, last_run).await {
                last_run = Some(now);
                // Run on its own task so a panic ends this run, not the loop
                let run = {
                    let scheduler = self.clone();
                    let config = config.clone();
                    tokio::spawn(async move { scheduler.run_recorded(key, &config).await }).await
                };
                match run {
                    Ok(Ok(outcome)) if !outcome.is_idle() => {
                        tracing::info!(task = key.as_str(), processed = outcome.processed, "Scheduled task ran");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::error!(task = key.as_str(), error = %e, "Scheduled task failed"),
                    Err(e) => tracing::error!(task = key.as_str(), error = %e, "Scheduled task panicked"),
                }
            }

            let wait = match config.strategy {
                Strategy::Interval if config.enabled => Duration::from_secs(config.interval_sec.max(1)),
                _ => self.tick,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!(task = key.as_str(), "Scheduled task loop stopped");
    }

    /// Register one loop per task
    pub fn spawn_all(self: Arc<Self>, tasks: &mut BackgroundTasks) {
        for key in TaskKey::ALL {
            let cancel = tasks.shutdown_token();
            let scheduler = self.clone();
            tasks.spawn(key.as_str(), TaskKind::Periodic, scheduler.run_loop(key, cancel));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::util::{DAY_MS, HOUR_MS, MINUTE_MS};

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200_000;

    #[test]
    fn test_task_key_round_trip() {
        for key in TaskKey::ALL {
            assert_eq!(TaskKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(TaskKey::parse("nope"), None);
    }

    #[test]
    fn test_daily_due_after_slot_once() {
        let slot = MIDNIGHT + 3 * HOUR_MS;
        assert!(!daily_due(slot - MINUTE_MS, "03:00", None));
        assert!(daily_due(slot, "03:00", None));
        assert!(daily_due(slot + HOUR_MS, "03:00", Some(slot - DAY_MS)));
        assert!(!daily_due(slot + HOUR_MS, "03:00", Some(slot + MINUTE_MS)));
    }

    #[test]
    fn test_daily_due_rejects_bad_time() {
        assert!(!daily_due(MIDNIGHT + HOUR_MS, "25:99", None));
        assert!(parse_daily_at(" 09:30 ").is_some());
    }

    #[test]
    fn test_interval_due() {
        assert!(interval_due(MIDNIGHT, 60, None));
        assert!(!interval_due(MIDNIGHT + 59_000, 60, Some(MIDNIGHT)));
        assert!(interval_due(MIDNIGHT + 60_000, 60, Some(MIDNIGHT)));
        // zero interval behaves as one second
        assert!(interval_due(MIDNIGHT + 1_000, 0, Some(MIDNIGHT)));
    }

    #[test]
    fn test_override_merge() {
        let base = TaskConfig::interval(300);
        let merged = base.clone().merged(TaskOverride {
            enabled: Some(false),
            interval_sec: Some(0),
            daily_at: Some("bad".into()),
            ..Default::default()
        });
        assert!(!merged.enabled);
        assert_eq!(merged.interval_sec, 300);
        assert_eq!(merged.daily_at, "");

        let daily = base.merged(TaskOverride {
            strategy: Some(Strategy::Daily),
            daily_at: Some("04:15".into()),
            ..Default::default()
        });
        assert_eq!(daily.strategy, Strategy::Daily);
        assert_eq!(daily.daily_at, "04:15");
    }
}
