//! Persisted settings, payment provider config, real-name verification

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// Enable flag and JSON config for one payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct PaymentProviderConfig {
    pub key: String,
    pub enabled: bool,
    pub config_json: String,
    pub updated_at: i64,
}

/// Latest verification state per user is what gates blocked actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct RealNameVerification {
    pub id: i64,
    pub user_id: i64,
    /// `pending`, `verified` or `failed`
    pub status: String,
    pub created_at: i64,
}
