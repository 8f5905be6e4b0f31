//! Real-name verification gate

use crate::db::repository::realname as repo;
use crate::settings::{RealNamePolicy, SettingsStore};
use shared::{AppError, AppResult};
use sqlx::SqlitePool;

pub const ACTION_PURCHASE: &str = "purchase_vps";
pub const ACTION_RENEW: &str = "renew_vps";
pub const ACTION_RESIZE: &str = "resize_vps";

const VERIFIED: &str = "verified";

#[derive(Clone)]
pub struct RealNameGate {
    pool: SqlitePool,
    settings: SettingsStore,
}

impl RealNameGate {
    pub fn new(pool: SqlitePool, settings: SettingsStore) -> Self {
        Self { pool, settings }
    }

    /// Fails `RealNameRequired` when the action is blocked and the user's
    /// latest verification is not `verified`
    pub async fn require(&self, user_id: i64, action: &str) -> AppResult<()> {
        let policy = RealNamePolicy::load(&self.settings).await;
        if !policy.blocks(action) {
            return Ok(());
        }
        let latest = repo::find_latest(&self.pool, user_id).await?;
        match latest {
            Some(v) if v.status == VERIFIED => Ok(()),
            _ => {
                tracing::info!(user_id, action, "Blocked by real-name gate");
                Err(AppError::real_name_required())
            }
        }
    }
}
