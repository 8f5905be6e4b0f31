//! Typed policy views over the settings table

use super::SettingsStore;
use shared::util::{DAY_MS, HOUR_MS};

/// Emergency renew gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyRenewPolicy {
    pub enabled: bool,
    /// `0` means any time before expiry
    pub window_days: i64,
    pub renew_days: i64,
    pub interval_hours: i64,
}

impl Default for EmergencyRenewPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            window_days: 7,
            renew_days: 1,
            interval_hours: 720,
        }
    }
}

impl EmergencyRenewPolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let d = Self::default();
        Self {
            enabled: settings.get_bool("emergency_renew_enabled", d.enabled).await,
            window_days: settings
                .get_i64("emergency_renew_window_days", d.window_days)
                .await,
            renew_days: settings.get_i64("emergency_renew_days", d.renew_days).await,
            interval_hours: settings
                .get_i64("emergency_renew_interval_hours", d.interval_hours)
                .await,
        }
        .normalized()
    }

    pub fn normalized(mut self) -> Self {
        if self.window_days < 0 {
            self.window_days = 0;
        }
        if self.renew_days <= 0 {
            self.renew_days = 1;
        }
        if self.interval_hours <= 0 {
            self.interval_hours = 24;
        }
        self
    }

    /// `now ∈ [expire_at - window_days, expire_at]`
    pub fn in_window(&self, now: i64, expire_at: Option<i64>) -> bool {
        let Some(expire_at) = expire_at else {
            return false;
        };
        if now > expire_at {
            return false;
        }
        if self.window_days == 0 {
            return true;
        }
        now >= expire_at - self.window_days * DAY_MS
    }

    pub fn cooldown_elapsed(&self, now: i64, last: Option<i64>) -> bool {
        match last {
            None => true,
            Some(last) => now - last >= self.interval_hours * HOUR_MS,
        }
    }
}

/// Proration rounding for resize quotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Half-to-even on the exact rational
    #[default]
    Round,
    Ceil,
    Floor,
}

impl Rounding {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ceil" => Self::Ceil,
            "floor" => Self::Floor,
            _ => Self::Round,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizePriceMode {
    /// Prorate the monthly difference over the remaining period
    #[default]
    Remaining,
    /// Charge or refund the whole monthly difference
    Full,
}

impl ResizePriceMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Self::Full,
            _ => Self::Remaining,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizePolicy {
    pub enabled: bool,
    pub scheduled_enabled: bool,
    pub price_mode: ResizePriceMode,
    /// Clamped to `[0, 1]`
    pub refund_ratio: f64,
    pub rounding: Rounding,
    pub min_charge: i64,
    pub min_refund: i64,
    pub refund_to_wallet: bool,
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            scheduled_enabled: true,
            price_mode: ResizePriceMode::Remaining,
            refund_ratio: 1.0,
            rounding: Rounding::Round,
            min_charge: 0,
            min_refund: 0,
            refund_to_wallet: true,
        }
    }
}

impl ResizePolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let d = Self::default();
        Self {
            enabled: settings.get_bool("resize_enabled", d.enabled).await,
            scheduled_enabled: settings
                .get_bool("resize_scheduled_enabled", d.scheduled_enabled)
                .await,
            price_mode: ResizePriceMode::parse(&settings.get_string("resize_price_mode", "remaining").await),
            refund_ratio: settings
                .get_f64("resize_refund_ratio", d.refund_ratio)
                .await
                .clamp(0.0, 1.0),
            rounding: Rounding::parse(&settings.get_string("resize_rounding", "round").await),
            min_charge: settings.get_cents("resize_min_charge", d.min_charge).await,
            min_refund: settings.get_cents("resize_min_refund", d.min_refund).await,
            refund_to_wallet: settings
                .get_bool("resize_refund_to_wallet", d.refund_to_wallet)
                .await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPolicy {
    pub max_jobs: i64,
    pub max_minutes: i64,
}

/// Upper bound on jobs per watchdog pass regardless of settings
pub const WATCHDOG_HARD_LIMIT: i64 = 20;

impl WatchdogPolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let max_jobs = settings.get_i64("provision_watchdog_max_jobs", 8).await;
        let max_minutes = settings.get_i64("provision_watchdog_max_minutes", 20).await;
        Self {
            max_jobs: if max_jobs <= 0 { 8 } else { max_jobs.min(WATCHDOG_HARD_LIMIT) },
            max_minutes: if max_minutes <= 0 { 20 } else { max_minutes },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyPolicy {
    pub email_enabled: bool,
    pub email_expire_enabled: bool,
    pub expire_reminder_days: i64,
}

impl NotifyPolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let days = settings.get_i64("expire_reminder_days", 3).await;
        Self {
            email_enabled: settings.get_bool("email_enabled", false).await,
            email_expire_enabled: settings.get_bool("email_expire_enabled", false).await,
            expire_reminder_days: if days <= 0 { 3 } else { days },
        }
    }

    pub fn expire_reminders(&self) -> bool {
        self.email_enabled && self.email_expire_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoDeletePolicy {
    pub enabled: bool,
    pub days: i64,
}

impl AutoDeletePolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let days = settings.get_i64("auto_delete_days", 7).await;
        Self {
            enabled: settings.get_bool("auto_delete_enabled", false).await,
            days: days.max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RealNamePolicy {
    pub enabled: bool,
    pub block_actions: Vec<String>,
}

impl RealNamePolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        let raw = settings.get_string("realname_block_actions", "").await;
        Self {
            enabled: settings.get_bool("realname_enabled", false).await,
            block_actions: parse_action_list(&raw),
        }
    }

    pub fn blocks(&self, action: &str) -> bool {
        self.enabled && self.block_actions.iter().any(|a| a == action)
    }
}

fn parse_action_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_policy_normalization() {
        let p = EmergencyRenewPolicy {
            enabled: true,
            window_days: -3,
            renew_days: 0,
            interval_hours: -1,
        }
        .normalized();
        assert_eq!(p.window_days, 0);
        assert_eq!(p.renew_days, 1);
        assert_eq!(p.interval_hours, 24);
    }

    #[test]
    fn test_emergency_window_bounds() {
        let p = EmergencyRenewPolicy::default();
        let expire = 100 * DAY_MS;
        assert!(p.in_window(expire, Some(expire)));
        assert!(p.in_window(expire - 7 * DAY_MS, Some(expire)));
        assert!(!p.in_window(expire - 7 * DAY_MS - 1, Some(expire)));
        assert!(!p.in_window(expire + 1, Some(expire)));
        assert!(!p.in_window(expire, None));
    }

    #[test]
    fn test_emergency_cooldown() {
        let p = EmergencyRenewPolicy::default();
        assert!(p.cooldown_elapsed(0, None));
        assert!(!p.cooldown_elapsed(HOUR_MS, Some(0)));
        assert!(p.cooldown_elapsed(720 * HOUR_MS, Some(0)));
    }

    #[test]
    fn test_rounding_parse() {
        assert_eq!(Rounding::parse("CEIL"), Rounding::Ceil);
        assert_eq!(Rounding::parse("floor"), Rounding::Floor);
        assert_eq!(Rounding::parse("whatever"), Rounding::Round);
    }

    #[test]
    fn test_action_list() {
        let policy = RealNamePolicy {
            enabled: true,
            block_actions: parse_action_list(" purchase_vps, RENEW_VPS ,,"),
        };
        assert!(policy.blocks("purchase_vps"));
        assert!(policy.blocks("renew_vps"));
        assert!(!policy.blocks("resize_vps"));
    }
}
