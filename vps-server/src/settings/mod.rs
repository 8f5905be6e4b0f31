//! Persisted business settings
//!
//! Values live in the `settings` table as strings and are read on every
//! use; each getter falls back to its default when the key is missing or
//! does not parse.

pub mod policy;

pub use policy::{
    AutoDeletePolicy, EmergencyRenewPolicy, NotifyPolicy, RealNamePolicy, ResizePolicy,
    ResizePriceMode, Rounding, WatchdogPolicy,
};

use crate::db::repository::{RepoResult, settings as repo};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct SettingsStore {
    pool: SqlitePool,
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// "12.34" → 1234 minor units
pub(crate) fn parse_cents(raw: &str) -> Option<i64> {
    let value = Decimal::from_str(raw.trim()).ok()?;
    (value * Decimal::ONE_HUNDRED).round().to_i64()
}

impl SettingsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Raw value; database errors read as missing and are logged
    pub async fn raw(&self, key: &str) -> Option<String> {
        match repo::get(&self.pool, key).await {
            Ok(v) => v.filter(|s| !s.trim().is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read setting, using default");
                None
            }
        }
    }

    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key)
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| default.to_string())
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.raw(key)
            .await
            .and_then(|s| parse_bool(&s))
            .unwrap_or(default)
    }

    pub async fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.raw(key)
            .await
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    pub async fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.raw(key)
            .await
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// Decimal major-unit amount stored as text, returned in minor units
    pub async fn get_cents(&self, key: &str, default: i64) -> i64 {
        self.raw(key)
            .await
            .and_then(|s| parse_cents(&s))
            .unwrap_or(default)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "Setting is not valid JSON, ignoring");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str, now: i64) -> RepoResult<()> {
        repo::upsert(&self.pool, key, value, now).await
    }

    pub async fn list(&self) -> RepoResult<Vec<shared::models::Setting>> {
        repo::list(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("12.34"), Some(1234));
        assert_eq!(parse_cents("5"), Some(500));
        assert_eq!(parse_cents("0.005"), Some(0));
        assert_eq!(parse_cents("abc"), None);
    }
}
