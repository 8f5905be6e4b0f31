//! Provider registry
//!
//! Providers live in memory; `payment_provider` rows hold the enabled
//! flag and config JSON. A provider without a row is enabled only when it
//! is one of the built-in methods.

use super::{METHOD_APPROVAL, METHOD_BALANCE, PaymentProvider};
use crate::audit::{AuditLog, action};
use crate::core::clock::Clock;
use crate::db::repository::payment_provider as repo;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use shared::{AppError, AppResult, ErrorCode};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub schema: Value,
    pub config: Value,
}

/// Method offered to a user at checkout
#[derive(Debug, Clone, Serialize)]
pub struct UserMethod {
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

fn enabled_by_default(key: &str) -> bool {
    key == METHOD_BALANCE || key == METHOD_APPROVAL
}

fn parse_config(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

pub struct PaymentRegistry {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    providers: DashMap<String, Arc<dyn PaymentProvider>>,
}

impl PaymentRegistry {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, audit: AuditLog) -> Self {
        Self {
            pool,
            clock,
            audit,
            providers: DashMap::new(),
        }
    }

    pub fn register(&self, provider: Arc<dyn PaymentProvider>) {
        tracing::info!(provider = provider.key(), "Payment provider registered");
        self.providers.insert(provider.key().to_string(), provider);
    }

    pub fn get(&self, key: &str) -> AppResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(key)
            .map(|p| p.value().clone())
            .ok_or_else(|| {
                AppError::with_message(ErrorCode::PaymentProviderNotFound, format!("unknown payment method '{key}'"))
            })
    }

    /// Push persisted configs into registered providers (startup)
    pub async fn load_configs(&self) -> AppResult<()> {
        for row in repo::list(&self.pool).await? {
            let Some(provider) = self.providers.get(&row.key).map(|p| p.value().clone()) else {
                tracing::warn!(provider = %row.key, "Config stored for unregistered payment provider");
                continue;
            };
            if let Err(e) = provider.set_config(&parse_config(&row.config_json)) {
                tracing::warn!(provider = %row.key, error = %e, "Stored payment provider config rejected");
            }
        }
        Ok(())
    }

    pub async fn is_enabled(&self, key: &str) -> AppResult<bool> {
        Ok(match repo::find(&self.pool, key).await? {
            Some(row) => row.enabled,
            None => enabled_by_default(key),
        })
    }

    /// Registered and enabled provider
    pub async fn enabled(&self, key: &str) -> AppResult<Arc<dyn PaymentProvider>> {
        let provider = self.get(key)?;
        if !self.is_enabled(key).await? {
            return Err(AppError::with_message(
                ErrorCode::PaymentProviderDisabled,
                format!("payment method '{key}' is disabled"),
            ));
        }
        Ok(provider)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.iter().map(|p| p.key().clone()).collect();
        keys.sort();
        keys
    }

    pub async fn list_providers(&self) -> AppResult<Vec<ProviderInfo>> {
        let rows = repo::list(&self.pool).await?;
        let mut out = Vec::new();
        for key in self.keys() {
            let provider = self.get(&key)?;
            let row = rows.iter().find(|r| r.key == key);
            out.push(ProviderInfo {
                name: provider.name().to_string(),
                enabled: row.map_or_else(|| enabled_by_default(&key), |r| r.enabled),
                schema: provider.schema_json(),
                config: row.map_or_else(|| json!({}), |r| parse_config(&r.config_json)),
                key,
            });
        }
        Ok(out)
    }

    pub async fn update_provider(
        &self,
        admin_id: i64,
        key: &str,
        enabled: bool,
        config: Value,
    ) -> AppResult<ProviderInfo> {
        let provider = self.get(key)?;
        if !config.is_object() {
            return Err(AppError::validation("config must be a JSON object"));
        }
        provider.set_config(&config)?;
        repo::upsert(&self.pool, key, enabled, &config.to_string(), self.clock.now_millis()).await?;

        // Values may be secrets; only the field names are audited
        let fields: Vec<&String> = config.as_object().map(|m| m.keys().collect()).unwrap_or_default();
        self.audit
            .record(
                admin_id,
                action::PAYMENT_PROVIDER_UPDATE,
                "payment_provider",
                key,
                json!({ "enabled": enabled, "fields": fields }),
            )
            .await;

        Ok(ProviderInfo {
            key: key.to_string(),
            name: provider.name().to_string(),
            enabled,
            schema: provider.schema_json(),
            config,
        })
    }

    /// Enabled methods, the wallet balance attached to `balance`
    pub async fn user_methods(&self, balance: i64) -> AppResult<Vec<UserMethod>> {
        let mut out = Vec::new();
        for key in self.keys() {
            if !self.is_enabled(&key).await? {
                continue;
            }
            let provider = self.get(&key)?;
            out.push(UserMethod {
                balance: (key == METHOD_BALANCE).then_some(balance),
                name: provider.name().to_string(),
                key,
            });
        }
        Ok(out)
    }
}
