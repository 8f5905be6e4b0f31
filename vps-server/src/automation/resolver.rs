//! goods_type_id → automation client

use super::{AutomationClient, HttpAutomationClient};
use crate::core::config::AutomationConfig;
use dashmap::DashMap;
use shared::{AppError, AppResult};
use std::sync::Arc;

/// Clients are built lazily from config and cached per goods type.
/// Explicit registrations (plugins, tests) take precedence.
pub struct AutomationResolver {
    clients: DashMap<i64, Arc<dyn AutomationClient>>,
    fallback: Option<Arc<dyn AutomationClient>>,
    config: Option<AutomationConfig>,
}

impl AutomationResolver {
    pub fn from_config(config: AutomationConfig) -> Self {
        Self {
            clients: DashMap::new(),
            fallback: None,
            config: Some(config).filter(|c| !c.base_url.trim().is_empty()),
        }
    }

    /// Every goods type resolves to `client`
    pub fn single(client: Arc<dyn AutomationClient>) -> Self {
        Self {
            clients: DashMap::new(),
            fallback: Some(client),
            config: None,
        }
    }

    pub fn register(&self, goods_type_id: i64, client: Arc<dyn AutomationClient>) {
        self.clients.insert(goods_type_id, client);
    }

    pub fn resolve(&self, goods_type_id: i64) -> AppResult<Arc<dyn AutomationClient>> {
        if let Some(client) = self.clients.get(&goods_type_id) {
            return Ok(client.clone());
        }
        if let Some(config) = &self.config {
            let base = format!("{}/{}", config.base_url.trim_end_matches('/'), goods_type_id);
            let client: Arc<dyn AutomationClient> = Arc::new(HttpAutomationClient::new(
                base,
                config.api_key.clone(),
                config.timeout,
            )?);
            self.clients.insert(goods_type_id, client.clone());
            return Ok(client);
        }
        self.fallback.clone().ok_or_else(|| {
            AppError::config(format!("no automation client for goods type {goods_type_id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unconfigured_resolver_fails() {
        let resolver = AutomationResolver::from_config(AutomationConfig {
            base_url: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(1),
        });
        let err = resolver.resolve(1).err().unwrap();
        assert_eq!(err.code, shared::ErrorCode::ConfigError);
    }

    #[test]
    fn test_http_clients_are_cached() {
        let resolver = AutomationResolver::from_config(AutomationConfig {
            base_url: "http://plugins.local".into(),
            api_key: "k".into(),
            timeout: Duration::from_secs(1),
        });
        let a = resolver.resolve(3).unwrap();
        let b = resolver.resolve(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
