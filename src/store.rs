// Flight store
// Two kinds of records: an append-only history of every valid offer seen, and a single
// "current minimum" record that is overwritten in place under a fixed key

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use redis::AsyncCommands;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::FlightOption;

pub const FLIGHT_TAG: &str = "FLIGHT";
pub const MINIMUM_KEY: &str = "LOWEST_PRICE";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::BackendError(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::SerializationError(e.to_string())
    }
}

/// Unique key for one history record: `<timestamp>#FLIGHT#<uuid>`.
pub fn history_key(at: DateTime<Utc>) -> String {
    format!(
        "{}#{}#{}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        FLIGHT_TAG,
        Uuid::new_v4()
    )
}

// Overlapping runs against the same store race on the minimum record: both may read the
// same baseline and both may write. Serialize runs upstream if the trigger can overlap.
#[async_trait]
pub trait FlightStore: Send + Sync + 'static {
    /// Record an observed offer under a fresh key.
    async fn append_flight(&self, flight: &FlightOption) -> Result<(), StoreError>;

    async fn current_minimum(&self) -> Result<Option<FlightOption>, StoreError>;

    /// Overwrite the single current-minimum record.
    async fn set_current_minimum(&self, flight: &FlightOption) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub history_ttl_seconds: Option<u64>,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_key_prefix() -> String {
    "flight-watcher".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: None,
            key_prefix: default_key_prefix(),
            history_ttl_seconds: None,
        }
    }
}

/// Process-local store. Nothing survives a restart, so every process starts without a baseline.
#[derive(Default)]
pub struct InMemoryFlightStore {
    history: DashMap<String, FlightOption>,
    minimum: RwLock<Option<FlightOption>>,
    minimum_writes: AtomicUsize,
    fail_next_writes: AtomicUsize,
    reject_minimum_writes: AtomicBool,
}

impl InMemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_minimum(flight: FlightOption) -> Self {
        let store = Self::default();
        *store.minimum.write() = Some(flight);
        store
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> Vec<(String, FlightOption)> {
        let mut records: Vec<(String, FlightOption)> = self
            .history
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    /// Number of times the minimum record has been written.
    pub fn minimum_writes(&self) -> usize {
        self.minimum_writes.load(Ordering::SeqCst)
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Make every minimum write fail while leaving history appends alone.
    pub fn reject_minimum_writes(&self, reject: bool) {
        self.reject_minimum_writes.store(reject, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let failing = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::BackendError("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FlightStore for InMemoryFlightStore {
    async fn append_flight(&self, flight: &FlightOption) -> Result<(), StoreError> {
        self.check_write()?;
        self.history.insert(history_key(Utc::now()), flight.clone());
        Ok(())
    }

    async fn current_minimum(&self) -> Result<Option<FlightOption>, StoreError> {
        Ok(self.minimum.read().clone())
    }

    async fn set_current_minimum(&self, flight: &FlightOption) -> Result<(), StoreError> {
        if self.reject_minimum_writes.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError("minimum write rejected".to_string()));
        }
        self.check_write()?;
        *self.minimum.write() = Some(flight.clone());
        self.minimum_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Redis-backed store. Records are JSON strings under `<prefix>:<key>`.
#[derive(Clone)]
pub struct RedisFlightStore {
    client: redis::Client,
    key_prefix: String,
    history_ttl_seconds: Option<u64>,
}

impl RedisFlightStore {
    pub fn new(
        connection_string: &str,
        key_prefix: &str,
        history_ttl_seconds: Option<u64>,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            history_ttl_seconds,
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

#[async_trait]
impl FlightStore for RedisFlightStore {
    async fn append_flight(&self, flight: &FlightOption) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = self.key(&history_key(Utc::now()));
        let value = serde_json::to_string(flight)?;

        match self.history_ttl_seconds {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl)
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => conn.set::<_, _, ()>(&key, value).await?,
        }

        debug!(%key, price = flight.price, "flight recorded");
        Ok(())
    }

    async fn current_minimum(&self) -> Result<Option<FlightOption>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.key(MINIMUM_KEY)).await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_current_minimum(&self, flight: &FlightOption) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = serde_json::to_string(flight)?;
        conn.set::<_, _, ()>(self.key(MINIMUM_KEY), value).await?;
        info!(price = flight.price, "current minimum updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn flight(price: i64) -> FlightOption {
        FlightOption {
            departure_token: format!("token-{}", price),
            price,
            ..Default::default()
        }
    }

    #[test]
    fn test_history_keys_are_unique() {
        let at = Utc.with_ymd_and_hms(2025, 9, 10, 12, 0, 0).unwrap();
        let first = history_key(at);
        let second = history_key(at);

        assert!(first.starts_with("2025-09-10T12:00:00Z#FLIGHT#"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_history_accumulates() {
        let store = InMemoryFlightStore::new();
        store.append_flight(&flight(500)).await.unwrap();
        store.append_flight(&flight(500)).await.unwrap();
        store.append_flight(&flight(300)).await.unwrap();

        assert_eq!(store.history_len(), 3);
        assert!(store.history().iter().all(|(k, _)| k.contains("#FLIGHT#")));
    }

    #[tokio::test]
    async fn test_minimum_is_overwritten_in_place() {
        let store = InMemoryFlightStore::new();
        assert!(store.current_minimum().await.unwrap().is_none());

        store.set_current_minimum(&flight(500)).await.unwrap();
        store.set_current_minimum(&flight(300)).await.unwrap();

        assert_eq!(store.current_minimum().await.unwrap(), Some(flight(300)));
        assert_eq!(store.minimum_writes(), 2);
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let store = InMemoryFlightStore::with_minimum(flight(400));
        store.fail_next_writes(1);

        assert!(store.set_current_minimum(&flight(100)).await.is_err());
        assert_eq!(store.current_minimum().await.unwrap(), Some(flight(400)));

        store.set_current_minimum(&flight(100)).await.unwrap();
        assert_eq!(store.current_minimum().await.unwrap(), Some(flight(100)));
    }

    #[tokio::test]
    async fn test_rejected_minimum_write_keeps_history_writable() {
        let store = InMemoryFlightStore::new();
        store.reject_minimum_writes(true);

        store.append_flight(&flight(300)).await.unwrap();
        assert!(matches!(
            store.set_current_minimum(&flight(300)).await,
            Err(StoreError::BackendError(_))
        ));
        assert_eq!(store.history_len(), 1);
        assert_eq!(store.minimum_writes(), 0);
        assert!(store.current_minimum().await.unwrap().is_none());
    }

    #[test]
    fn test_redis_store_rejects_bad_url() {
        let result = RedisFlightStore::new("not a url", "prefix", None);
        assert!(matches!(result, Err(StoreError::BackendError(_))));
    }
}
