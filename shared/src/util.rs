//! Time helpers (Unix milliseconds)

use chrono::{DateTime, Months, Utc};

pub const SECOND_MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Add calendar months to a millisecond timestamp.
///
/// Day-of-month overflow clamps to the last day (Jan 31 + 1 month = Feb 28/29).
/// Returns `None` when the result leaves chrono's representable range.
pub fn add_months_millis(ts: i64, months: i64) -> Option<i64> {
    let dt = DateTime::<Utc>::from_timestamp_millis(ts)?;
    let shifted = if months >= 0 {
        dt.checked_add_months(Months::new(u32::try_from(months).ok()?))?
    } else {
        dt.checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
    };
    Some(shifted.timestamp_millis())
}

/// Format a millisecond timestamp as RFC 3339 (UTC)
pub fn millis_to_rfc3339(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Parse RFC 3339 into milliseconds
pub fn rfc3339_to_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_months_clamps_day() {
        let jan31 = rfc3339_to_millis("2025-01-31T10:00:00Z").unwrap();
        let feb = add_months_millis(jan31, 1).unwrap();
        assert_eq!(millis_to_rfc3339(feb), "2025-02-28T10:00:00+00:00");
    }

    #[test]
    fn test_add_months_year_boundary() {
        let nov = rfc3339_to_millis("2025-11-15T00:00:00Z").unwrap();
        let next = add_months_millis(nov, 3).unwrap();
        assert_eq!(millis_to_rfc3339(next), "2026-02-15T00:00:00+00:00");
        assert_eq!(add_months_millis(next, -3), Some(nov));
    }

    #[test]
    fn test_rfc3339_roundtrip_value() {
        assert_eq!(rfc3339_to_millis("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(rfc3339_to_millis("not a date"), None);
    }
}
