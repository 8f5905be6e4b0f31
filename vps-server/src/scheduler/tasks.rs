//! Expiry task bodies: reminders, lock on expiry, post-expiry deletion

use crate::automation::parse_host_id;
use crate::automation::trace::LogTarget;
use crate::core::context::CoreContext;
use crate::db::repository::vps as vps_repo;
use crate::settings::policy::{AutoDeletePolicy, NotifyPolicy};
use serde_json::json;
use shared::AppResult;
use shared::models::{VpsInstance, VpsStatus};
use shared::util::DAY_MS;

/// Whole days until `expire_at`, rounded up
pub fn days_left(now: i64, expire_at: i64) -> i64 {
    let remaining = expire_at - now;
    if remaining <= 0 {
        return 0;
    }
    (remaining + DAY_MS - 1) / DAY_MS
}

fn target_of(vps: &VpsInstance) -> LogTarget {
    LogTarget {
        order_id: None,
        order_item_id: vps.order_item_id,
    }
}

/// Remind owners of instances expiring within `expire_reminder_days`
pub async fn send_expire_reminders(ctx: &CoreContext) -> AppResult<usize> {
    let policy = NotifyPolicy::load(&ctx.settings).await;
    if !policy.expire_reminders() {
        return Ok(0);
    }
    let now = ctx.now();
    let expiring = vps_repo::list_expiring_between(&ctx.pool, now, now + policy.expire_reminder_days * DAY_MS).await?;
    let mut sent = 0;
    for vps in &expiring {
        let Some(expire_at) = vps.expire_at else { continue };
        if ctx.notify.expire_reminder(vps, days_left(now, expire_at)).await {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Lock expired instances upstream and mark them `expired_locked`
pub async fn lock_expired(ctx: &CoreContext) -> AppResult<usize> {
    let now = ctx.now();
    let expired = vps_repo::list_expiring_between(&ctx.pool, 0, now).await?;
    let mut locked = 0;
    for vps in expired.iter().filter(|v| v.status != VpsStatus::ExpiredLocked) {
        let host_id = parse_host_id(Some(&vps.automation_instance_id));
        if host_id <= 0 {
            continue;
        }
        let result = async {
            let client = ctx.client_for(vps.goods_type_id)?;
            ctx.logged(target_of(vps), "lock_host", json!({ "host_id": host_id }), client.lock_host(host_id))
                .await
        }
        .await;
        match result {
            Ok(()) => {
                vps_repo::set_status(&ctx.pool, vps.id, VpsStatus::ExpiredLocked, vps.automation_state, ctx.now())
                    .await?;
                tracing::info!(vps_id = vps.id, host_id, "Expired instance locked");
                locked += 1;
            }
            Err(e) => tracing::warn!(vps_id = vps.id, host_id, error = %e, "Failed to lock expired instance"),
        }
    }
    Ok(locked)
}

/// Delete instances expired for more than `auto_delete_days`
pub async fn cleanup_expired(ctx: &CoreContext) -> AppResult<usize> {
    let policy = AutoDeletePolicy::load(&ctx.settings).await;
    if !policy.enabled {
        return Ok(0);
    }
    let cutoff = ctx.now() - policy.days * DAY_MS;
    let stale = vps_repo::list_expiring_between(&ctx.pool, 0, cutoff).await?;
    let mut deleted = 0;
    for vps in &stale {
        match ctx.destroy_instance(vps, target_of(vps)).await {
            Ok(()) => deleted += 1,
            Err(e) => tracing::warn!(vps_id = vps.id, error = %e, "Failed to delete expired instance"),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_left_rounds_up() {
        assert_eq!(days_left(0, DAY_MS), 1);
        assert_eq!(days_left(0, DAY_MS + 1), 2);
        assert_eq!(days_left(0, 1), 1);
        assert_eq!(days_left(DAY_MS, DAY_MS), 0);
        assert_eq!(days_left(2 * DAY_MS, DAY_MS), 0);
    }
}
