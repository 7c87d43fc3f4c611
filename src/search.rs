// Flight search provider client
// The watcher only needs one call: send the query parameters, get the raw payload back

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

use crate::salting::LookupWindow;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Replay error: {0}")]
    ReplayError(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "https://serpapi.com/search.json".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Fixed parts of the watched route. Only the departure airport and the dates vary per run.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(default = "default_arrival_id")]
    pub arrival_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_travel_class")]
    pub travel_class: String,
    #[serde(default = "default_adults")]
    pub adults: String,
    #[serde(default = "default_children")]
    pub children: String,
}

fn default_arrival_id() -> String {
    "FOR".to_string()
}
fn default_currency() -> String {
    "BRL".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_country() -> String {
    "br".to_string()
}
// 2 = price
fn default_sort_by() -> String {
    "2".to_string()
}
// 1 = economy
fn default_travel_class() -> String {
    "1".to_string()
}
fn default_adults() -> String {
    "2".to_string()
}
fn default_children() -> String {
    "1".to_string()
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            arrival_id: default_arrival_id(),
            currency: default_currency(),
            language: default_language(),
            country: default_country(),
            sort_by: default_sort_by(),
            travel_class: default_travel_class(),
            adults: default_adults(),
            children: default_children(),
        }
    }
}

/// Query parameters sent to the provider, kept ordered so logs and requests are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters(BTreeMap<String, String>);

impl SearchFilters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub const SEARCH_ENGINE: &str = "google_flights";

pub fn build_search_filters(
    departure_id: &str,
    window: &LookupWindow,
    route: &RouteConfig,
) -> SearchFilters {
    let mut filters = SearchFilters::default();
    filters.insert("engine", SEARCH_ENGINE);
    filters.insert("hl", route.language.as_str());
    filters.insert("gl", route.country.as_str());
    filters.insert("departure_id", departure_id);
    filters.insert("arrival_id", route.arrival_id.as_str());
    filters.insert("outbound_date", window.outbound_date());
    filters.insert("return_date", window.return_date());
    filters.insert("currency", route.currency.as_str());
    filters.insert("sort_by", route.sort_by.as_str());
    filters.insert("travel_class", route.travel_class.as_str());
    filters.insert("adults", route.adults.as_str());
    filters.insert("children", route.children.as_str());
    filters
}

#[async_trait]
pub trait SearchClient: Send + Sync + 'static {
    /// Run one search and return the provider's payload untouched.
    async fn search(&self, filters: &SearchFilters) -> Result<Value, SearchError>;
}

pub struct SerpApiClient {
    http: reqwest::Client,
    config: SearchConfig,
}

impl SerpApiClient {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> SearchError {
        if e.is_timeout() {
            SearchError::Timeout(self.config.timeout_ms)
        } else {
            SearchError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl SearchClient for SerpApiClient {
    async fn search(&self, filters: &SearchFilters) -> Result<Value, SearchError> {
        let mut query: Vec<(&str, &str)> = filters.iter().collect();
        query.push(("api_key", self.config.api_key.as_str()));

        debug!(url = %self.config.base_url, params = filters.len(), "querying flight provider");

        let response = self
            .http
            .get(&self.config.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiResponseError {
                status_code: status.as_u16(),
                message,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SearchError::DecodeError(e.to_string()))?;

        // The provider reports some failures in-band with a 200
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(SearchError::ProviderError(message.to_string()));
        }

        Ok(payload)
    }
}

/// Serves a recorded payload instead of calling the provider.
pub struct ReplaySearchClient {
    payload: Value,
    fail_next_requests: AtomicUsize,
    requests: Mutex<Vec<SearchFilters>>,
}

impl ReplaySearchClient {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            fail_next_requests: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SearchError::ReplayError(format!("{}: {}", path.display(), e)))?;
        let payload = serde_json::from_str(&content)
            .map_err(|e| SearchError::ReplayError(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(payload))
    }

    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    /// Filters of every search received so far, oldest first.
    pub fn requests(&self) -> Vec<SearchFilters> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SearchClient for ReplaySearchClient {
    async fn search(&self, filters: &SearchFilters) -> Result<Value, SearchError> {
        self.requests.lock().push(filters.clone());

        let failing = self
            .fail_next_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SearchError::ApiResponseError {
                status_code: 500,
                message: "Internal Server Error".to_string(),
            });
        }

        Ok(self.payload.clone())
    }
}
