// Process configuration and collaborator wiring
// Everything is read from WATCHER_* environment variables, e.g.
//   WATCHER_SEARCH__API_KEY=...  WATCHER_NOTIFIER__RECIPIENTS=a@x.com,b@y.com

use serde::Deserialize;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

use crate::notifier::{EmailNotifier, LogNotifier, Notifier, NotifierBackend, NotifierConfig};
use crate::search::{RouteConfig, SearchClient, SearchConfig, SerpApiClient};
use crate::store::{FlightStore, InMemoryFlightStore, RedisFlightStore, StoreBackend, StoreConfig};
use crate::watcher::Watcher;

pub const ENV_PREFIX: &str = "WATCHER";

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl From<config::ConfigError> for BootstrapError {
    fn from(e: config::ConfigError) -> Self {
        BootstrapError::ConfigError(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub route: RouteConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, BootstrapError> {
        let source = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("notifier.recipients")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = source.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        if matches!(self.store.backend, StoreBackend::Redis)
            && self.store.redis_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(BootstrapError::ConfigError(
                "store.redis_url is required for the redis backend".to_string(),
            ));
        }

        if matches!(self.notifier.backend, NotifierBackend::Email) {
            if self.notifier.endpoint.is_empty() {
                return Err(BootstrapError::ConfigError(
                    "notifier.endpoint is required for email".to_string(),
                ));
            }
            if self.notifier.from.is_empty() {
                return Err(BootstrapError::ConfigError(
                    "notifier.from is required for email".to_string(),
                ));
            }
            if self.notifier.recipients.iter().all(|r| r.trim().is_empty()) {
                return Err(BootstrapError::ConfigError(
                    "notifier.recipients must list at least one address".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Live provider client. Requires an API key.
    pub fn build_search(&self) -> Result<Arc<dyn SearchClient>, BootstrapError> {
        if self.search.api_key.is_empty() {
            return Err(BootstrapError::ConfigError(
                "search.api_key is required".to_string(),
            ));
        }
        let client = SerpApiClient::new(self.search.clone())
            .map_err(|e| BootstrapError::InitError(e.to_string()))?;
        Ok(Arc::new(client))
    }

    pub fn build_store(&self) -> Result<Arc<dyn FlightStore>, BootstrapError> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryFlightStore::new())),
            StoreBackend::Redis => {
                let url = self.store.redis_url.as_deref().unwrap_or_default();
                let store = RedisFlightStore::new(
                    url,
                    &self.store.key_prefix,
                    self.store.history_ttl_seconds,
                )
                .map_err(|e| BootstrapError::InitError(e.to_string()))?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn build_notifier(&self) -> Result<Arc<dyn Notifier>, BootstrapError> {
        match self.notifier.backend {
            NotifierBackend::Log => Ok(Arc::new(LogNotifier)),
            NotifierBackend::Email => {
                let notifier = EmailNotifier::new(&self.notifier)
                    .map_err(|e| BootstrapError::InitError(e.to_string()))?;
                Ok(Arc::new(notifier))
            }
        }
    }

    /// Wire a watcher around `search` using the configured store and notifier.
    pub fn build_watcher(&self, search: Arc<dyn SearchClient>) -> Result<Watcher, BootstrapError> {
        let watcher = Watcher::new(
            search,
            self.build_store()?,
            self.build_notifier()?,
            self.route.clone(),
        );

        Ok(match &self.dump_dir {
            Some(dir) => watcher.with_dump_dir(dir),
            None => watcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.route.arrival_id, "FOR");
        assert!(config.build_store().is_ok());
        assert!(config.build_notifier().is_ok());
    }

    #[test]
    fn test_live_search_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            config.build_search(),
            Err(BootstrapError::ConfigError(_))
        ));

        let mut config = AppConfig::default();
        config.search.api_key = "secret".to_string();
        assert!(config.build_search().is_ok());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Redis;
        assert!(config.validate().is_err());

        config.store.redis_url = Some("redis://127.0.0.1:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_email_backend_requires_sender_and_recipients() {
        let mut config = AppConfig::default();
        config.notifier.backend = NotifierBackend::Email;
        config.notifier.endpoint = "https://mail.example.com/emails".to_string();
        assert!(config.validate().is_err());

        config.notifier.from = "alerts@example.com".to_string();
        assert!(config.validate().is_err());

        config.notifier.recipients = vec!["me@example.com".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_nested_sections() {
        let source = config::Config::builder()
            .set_override("search.api_key", "k")
            .unwrap()
            .set_override("store.backend", "redis")
            .unwrap()
            .set_override("store.redis_url", "redis://localhost")
            .unwrap()
            .set_override("route.currency", "USD")
            .unwrap()
            .build()
            .unwrap();

        let config: AppConfig = source.try_deserialize().unwrap();
        assert_eq!(config.search.api_key, "k");
        assert!(matches!(config.store.backend, StoreBackend::Redis));
        assert_eq!(config.route.currency, "USD");
        assert_eq!(config.route.adults, "2");
        assert_eq!(config.store.key_prefix, "flight-watcher");
    }
}
