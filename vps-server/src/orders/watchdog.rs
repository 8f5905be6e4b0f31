//! Provision watchdog
//!
//! Picks up hosts that were not ready within the executor's poll window
//! and drives their items to `active` or `failed`. Each pass is bounded by
//! `provision_watchdog_max_jobs`; a job older than
//! `provision_watchdog_max_minutes` fails its item.

use super::executor::CLOSED_JOB_DELAY_MS;
use super::service::OrderService;
use crate::automation::trace::LogTarget;
use crate::automation::{HostInfo, HostPhase, map_state};
use crate::db::repository::{order as order_repo, order_item, provision_job, vps as vps_repo};
use crate::events::OrderEventType;
use crate::settings::WatchdogPolicy;
use serde::Serialize;
use serde_json::json;
use shared::{AppError, AppResult};
use shared::models::{Order, OrderItem, OrderStatus, ProvisionJob, VpsStatus};
use shared::util::{MINUTE_MS, SECOND_MS};

/// Back-off by attempt count: 5 s, 10 s after 6 attempts, 15 s after 12
pub fn retry_delay_ms(attempts: i64) -> i64 {
    if attempts > 12 {
        15 * SECOND_MS
    } else if attempts > 6 {
        10 * SECOND_MS
    } else {
        5 * SECOND_MS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Skipped,
    Completed,
    Failed,
    Retried,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    pub closed: usize,
}

impl WatchdogReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Skipped => {}
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Retried => self.retried += 1,
            JobOutcome::Closed => self.closed += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.scanned == 0
    }
}

impl OrderService {
    /// One watchdog pass over due jobs
    pub async fn run_watchdog_once(&self) -> AppResult<WatchdogReport> {
        let policy = WatchdogPolicy::load(&self.ctx.settings).await;
        let jobs = provision_job::list_due(&self.ctx.pool, self.ctx.now(), policy.max_jobs).await?;
        let mut report = WatchdogReport {
            scanned: jobs.len(),
            ..Default::default()
        };
        for job in &jobs {
            // A panicking job is retried like an errored one
            let watched = {
                let this = self.clone();
                let job = job.clone();
                tokio::spawn(async move { this.watch_job(&job, &policy).await }).await
            };
            let result = watched.unwrap_or_else(|e| Err(AppError::internal(format!("watchdog job panicked: {e}"))));
            match result {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(job_id = job.id, order_item_id = job.order_item_id, error = %e, "Watchdog job errored");
                    let now = self.ctx.now();
                    provision_job::schedule_retry(
                        &self.ctx.pool,
                        job.id,
                        now + retry_delay_ms(job.attempts + 1),
                        Some(&e.message),
                        now,
                    )
                    .await?;
                    report.retried += 1;
                }
            }
        }
        if !report.is_idle() {
            tracing::info!(
                scanned = report.scanned,
                completed = report.completed,
                failed = report.failed,
                retried = report.retried,
                closed = report.closed,
                "Watchdog pass finished"
            );
        }
        Ok(report)
    }

    async fn close_job(&self, job: &ProvisionJob, note: Option<&str>) -> AppResult<()> {
        let now = self.ctx.now();
        provision_job::mark_done(&self.ctx.pool, job.id, note, now + CLOSED_JOB_DELAY_MS, now).await?;
        Ok(())
    }

    async fn watch_job(&self, job: &ProvisionJob, policy: &WatchdogPolicy) -> AppResult<JobOutcome> {
        let now = self.ctx.now();
        let Some(attempts) = provision_job::claim(&self.ctx.pool, job.id, now).await? else {
            return Ok(JobOutcome::Skipped);
        };

        let order = order_repo::find_by_id(&self.ctx.pool, job.order_id).await?;
        let item = order_item::find_by_id(&self.ctx.pool, job.order_item_id).await?;
        let (order, item) = match (order, item) {
            (Some(o), Some(i))
                if !matches!(o.status, OrderStatus::Canceled | OrderStatus::Rejected)
                    && i.status == OrderStatus::Provisioning =>
            {
                (o, i)
            }
            _ => {
                self.close_job(job, Some("order or item no longer provisioning")).await?;
                return Ok(JobOutcome::Closed);
            }
        };

        if now - job.created_at > policy.max_minutes * MINUTE_MS {
            let reason = format!("host not ready after {} minutes", policy.max_minutes);
            self.fail_watched(&order, &item, &reason, VpsStatus::Unknown, 0).await?;
            self.close_job(job, Some(&reason)).await?;
            self.rollup_order(order.id).await?;
            return Ok(JobOutcome::Failed);
        }

        let client = self.ctx.client_for(item.goods_type_id)?;
        let target = LogTarget::item(order.id, item.id);
        let info = match self
            .ctx
            .logged(target, "get_host_info", json!({ "host_id": job.host_id }), client.get_host_info(job.host_id))
            .await
        {
            Ok(info) => info,
            Err(e) => {
                provision_job::schedule_retry(&self.ctx.pool, job.id, now + retry_delay_ms(attempts), Some(&e.message), now)
                    .await?;
                return Ok(JobOutcome::Retried);
            }
        };

        match HostPhase::of(info.state) {
            HostPhase::Ready => {
                self.complete_watched(&order, &item, job, &info).await?;
                Ok(JobOutcome::Completed)
            }
            HostPhase::Failed => {
                let reason = format!("host {} entered failed state {}", job.host_id, info.state);
                self.fail_watched(&order, &item, &reason, map_state(info.state), info.state)
                    .await?;
                self.close_job(job, Some(&reason)).await?;
                self.rollup_order(order.id).await?;
                Ok(JobOutcome::Failed)
            }
            HostPhase::Provisioning | HostPhase::Other => {
                if let Some(vps) = vps_repo::find_by_order_item(&self.ctx.pool, item.id).await? {
                    vps_repo::set_status(&self.ctx.pool, vps.id, VpsStatus::Provisioning, 0, now).await?;
                }
                provision_job::schedule_retry(&self.ctx.pool, job.id, now + retry_delay_ms(attempts), None, now)
                    .await?;
                Ok(JobOutcome::Retried)
            }
        }
    }

    async fn complete_watched(&self, order: &Order, item: &OrderItem, job: &ProvisionJob, info: &HostInfo) -> AppResult<()> {
        self.complete_create(order, item, job.host_id, &job.host_name, info).await?;
        self.ctx
            .events
            .publish(
                order.id,
                OrderEventType::ItemActive,
                json!({ "item_id": item.id, "action": item.action.as_str() }),
            )
            .await;
        self.close_job(job, None).await?;
        self.rollup_order(order.id).await?;
        Ok(())
    }

    async fn fail_watched(
        &self,
        order: &Order,
        item: &OrderItem,
        reason: &str,
        status: VpsStatus,
        state: i64,
    ) -> AppResult<()> {
        self.fail_item(order.id, item.id, reason).await?;
        if let Some(vps) = vps_repo::find_by_order_item(&self.ctx.pool, item.id).await? {
            vps_repo::set_status(&self.ctx.pool, vps.id, status, state, self.ctx.now()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_steps() {
        assert_eq!(retry_delay_ms(1), 5_000);
        assert_eq!(retry_delay_ms(6), 5_000);
        assert_eq!(retry_delay_ms(7), 10_000);
        assert_eq!(retry_delay_ms(12), 10_000);
        assert_eq!(retry_delay_ms(13), 15_000);
    }
}
