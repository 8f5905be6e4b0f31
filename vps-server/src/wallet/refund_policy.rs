//! Refund amount calculation

use super::refund_curve::RefundCurve;
use crate::settings::SettingsStore;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use shared::util::HOUR_MS;

#[derive(Debug, Clone, PartialEq)]
pub struct RefundPolicy {
    pub full_hours: i64,
    pub prorate_hours: i64,
    pub no_refund_hours: i64,
    pub curve: Option<RefundCurve>,
    pub requires_approval: bool,
    pub refund_on_admin_delete: bool,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_hours: 24,
            prorate_hours: 7 * 24,
            no_refund_hours: 30 * 24,
            curve: None,
            requires_approval: true,
            refund_on_admin_delete: false,
        }
    }
}

impl RefundPolicy {
    pub async fn load(settings: &SettingsStore) -> Self {
        Self {
            full_hours: window_hours(settings, "refund_full", 1).await,
            prorate_hours: window_hours(settings, "refund_prorate", 7).await,
            no_refund_hours: window_hours(settings, "refund_no_refund", 30).await,
            curve: RefundCurve::parse(&settings.get_string("refund_curve_json", "").await),
            requires_approval: settings.get_bool("refund_requires_approval", true).await,
            refund_on_admin_delete: settings.get_bool("refund_on_admin_delete", false).await,
        }
    }
}

/// `<prefix>_hours` wins when positive, otherwise `<prefix>_days` × 24
async fn window_hours(settings: &SettingsStore, prefix: &str, default_days: i64) -> i64 {
    let hours = settings.get_i64(&format!("{prefix}_hours"), 0).await;
    if hours > 0 {
        return hours;
    }
    settings
        .get_i64(&format!("{prefix}_days"), default_days)
        .await
        .max(0)
        * 24
}

/// What the refund is computed against
#[derive(Debug, Clone, Copy)]
pub struct RefundBasis {
    pub amount: i64,
    pub created_at: i64,
    pub expire_at: Option<i64>,
    /// Current billing period, when known
    pub period: Option<(i64, i64)>,
}

pub fn apply_ratio(amount: i64, ratio: f64) -> i64 {
    let ratio = Decimal::from_f64(ratio.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
    (Decimal::from(amount) * ratio)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

pub fn calculate_refund(policy: &RefundPolicy, basis: &RefundBasis, now: i64) -> i64 {
    let amount = basis.amount;
    if amount <= 0 {
        return 0;
    }
    if basis.expire_at.is_some_and(|e| now >= e) {
        return 0;
    }

    let period = basis
        .period
        .or_else(|| basis.expire_at.map(|e| (basis.created_at, e)))
        .filter(|(start, end)| end > start);

    let Some((start, end)) = period else {
        return by_age(policy, amount, now - basis.created_at);
    };

    let total = (end - start) as f64;
    let elapsed = ((now - start) as f64 / total).clamp(0.0, 1.0);

    if let Some(curve) = &policy.curve {
        return apply_ratio(amount, curve.ratio_at(elapsed * 100.0));
    }

    let total_hours = total / HOUR_MS as f64;
    let share = |hours: i64| (hours as f64 / total_hours).clamp(0.0, 1.0);
    let no_refund = share(policy.no_refund_hours);
    let full = share(policy.full_hours);
    let prorate = share(policy.prorate_hours);

    if policy.no_refund_hours > 0 && elapsed > no_refund {
        return 0;
    }
    if elapsed <= full {
        return amount;
    }
    if prorate > 0.0 && elapsed <= prorate {
        return apply_ratio(amount, (prorate - elapsed) / prorate);
    }
    0
}

/// No billing period: thresholds apply to the instance age
fn by_age(policy: &RefundPolicy, amount: i64, age_ms: i64) -> i64 {
    let age_hours = age_ms.max(0) as f64 / HOUR_MS as f64;
    if policy.no_refund_hours > 0 && age_hours > policy.no_refund_hours as f64 {
        return 0;
    }
    if policy.full_hours > 0 && age_hours <= policy.full_hours as f64 {
        return amount;
    }
    if policy.prorate_hours > 0 && age_hours <= policy.prorate_hours as f64 {
        let p = policy.prorate_hours as f64;
        return apply_ratio(amount, (p - age_hours) / p);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::refund_curve::CurvePoint;
    use shared::util::DAY_MS;

    fn basis(amount: i64, expire_days: Option<i64>) -> RefundBasis {
        RefundBasis {
            amount,
            created_at: 0,
            expire_at: expire_days.map(|d| d * DAY_MS),
            period: None,
        }
    }

    #[test]
    fn test_full_refund_inside_full_window() {
        let policy = RefundPolicy::default();
        assert_eq!(calculate_refund(&policy, &basis(10_000, Some(30)), 0), 10_000);
        assert_eq!(calculate_refund(&policy, &basis(10_000, Some(30)), 12 * HOUR_MS), 10_000);
    }

    #[test]
    fn test_prorated_and_zero_windows() {
        let policy = RefundPolicy {
            full_hours: 0,
            prorate_hours: 10 * 24,
            no_refund_hours: 20 * 24,
            ..RefundPolicy::default()
        };
        let b = basis(10_000, Some(20));
        // period 20d, prorate share 0.5, elapsed 0.25 → (0.5-0.25)/0.5
        assert_eq!(calculate_refund(&policy, &b, 5 * DAY_MS), 5_000);
        assert_eq!(calculate_refund(&policy, &b, 15 * DAY_MS), 0);
    }

    #[test]
    fn test_expired_or_empty_amount() {
        let policy = RefundPolicy::default();
        assert_eq!(calculate_refund(&policy, &basis(10_000, Some(1)), DAY_MS), 0);
        assert_eq!(calculate_refund(&policy, &basis(0, Some(30)), 0), 0);
    }

    #[test]
    fn test_age_based_without_period() {
        let policy = RefundPolicy::default();
        let b = basis(7_000, None);
        assert_eq!(calculate_refund(&policy, &b, HOUR_MS), 7_000);
        // prorate window 168h, age 84h → half
        assert_eq!(calculate_refund(&policy, &b, 84 * HOUR_MS), 3_500);
        assert_eq!(calculate_refund(&policy, &b, 31 * DAY_MS), 0);
    }

    #[test]
    fn test_curve_overrides_thresholds() {
        let policy = RefundPolicy {
            curve: Some(RefundCurve::from_points(vec![
                CurvePoint { percent: 0.0, ratio: 1.0 },
                CurvePoint { percent: 100.0, ratio: 0.0 },
            ])),
            ..RefundPolicy::default()
        };
        assert_eq!(calculate_refund(&policy, &basis(10_000, Some(10)), 5 * DAY_MS), 5_000);
    }

    #[test]
    fn test_apply_ratio_rounds_half_away() {
        assert_eq!(apply_ratio(5, 0.5), 3);
        assert_eq!(apply_ratio(100, 2.0), 100);
    }
}
