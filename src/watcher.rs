// Price watcher decision engine
// One run: salt dates -> search -> parse -> filter -> record history -> read baseline ->
// decide -> (persist new minimum + alert) or idle

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{any::Any, panic::AssertUnwindSafe, path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::models::FlightOption;
use crate::notifier::{Notifier, NotifyError};
use crate::processor::{filter_valid, min_by_price, parse_flight_options, ProcessingError};
use crate::salting::{LookupDate, LookupWindow, RandomSource, RngSource};
use crate::search::{build_search_filters, RouteConfig, SearchClient, SearchError, SearchFilters};
use crate::store::{FlightStore, StoreError};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Upstream structure error: {0}")]
    UpstreamStructure(#[from] ProcessingError),

    #[error("Search failed: {0}")]
    Search(#[from] SearchError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Run panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    UpstreamStructure,
    Collaborator,
}

impl WatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WatchError::Input(_) => ErrorKind::Input,
            WatchError::UpstreamStructure(_) => ErrorKind::UpstreamStructure,
            WatchError::Search(_)
            | WatchError::Store(_)
            | WatchError::Notify(_)
            | WatchError::Panicked(_) => ErrorKind::Collaborator,
        }
    }
}

/// Caller payload for one run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WatchRequest {
    pub departure_id: String,
    pub lookup_date: LookupDate,
}

impl WatchRequest {
    /// Accepts the request itself, or an envelope carrying it in `body` either as an object
    /// or as a JSON-encoded string.
    pub fn from_event(event: &Value) -> Result<Self, WatchError> {
        let body = match event.get("body") {
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .map_err(|e| WatchError::Input(format!("body is not valid JSON: {}", e)))?,
            Some(body @ Value::Object(_)) => body.clone(),
            _ => event.clone(),
        };

        let request: WatchRequest = serde_json::from_value(body)
            .map_err(|e| WatchError::Input(format!("malformed request: {}", e)))?;

        if request.departure_id.trim().is_empty() {
            return Err(WatchError::Input("departure_id is required".to_string()));
        }

        Ok(request)
    }
}

/// Successful end states of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    NoValidOffers,
    NoImprovement { best_price: i64, recorded_price: i64 },
    NewMinimum(FlightOption),
}

/// Strict: matching the recorded price is not a new low.
pub fn is_new_minimum(recorded: Option<&FlightOption>, best: &FlightOption) -> bool {
    match recorded {
        None => true,
        Some(recorded) => best.price < recorded.price,
    }
}

pub struct Watcher {
    search: Arc<dyn SearchClient>,
    store: Arc<dyn FlightStore>,
    notifier: Arc<dyn Notifier>,
    route: RouteConfig,
    random: Mutex<Box<dyn RandomSource + Send>>,
    dump_dir: Option<PathBuf>,
}

impl Watcher {
    pub fn new(
        search: Arc<dyn SearchClient>,
        store: Arc<dyn FlightStore>,
        notifier: Arc<dyn Notifier>,
        route: RouteConfig,
    ) -> Self {
        Self {
            search,
            store,
            notifier,
            route,
            random: Mutex::new(Box::new(RngSource::from_entropy())),
            dump_dir: None,
        }
    }

    pub fn with_random_source(mut self, random: impl RandomSource + Send + 'static) -> Self {
        self.random = Mutex::new(Box::new(random));
        self
    }

    /// Write every raw search payload into `dir` before it is parsed.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    fn salt(&self, window: &LookupWindow) -> LookupWindow {
        let mut random = self.random.lock();
        window.apply_salt(random.as_mut())
    }

    async fn dump_raw(&self, raw: &Value) {
        let Some(dir) = &self.dump_dir else {
            return;
        };

        let path = dir.join(format!(
            "results-{}-{}.json",
            chrono::Local::now().format("%Y-%m-%d-%H-%M-%S"),
            uuid::Uuid::new_v4()
        ));

        let result = match serde_json::to_vec_pretty(raw) {
            Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => debug!(path = %path.display(), "raw results saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "could not save raw results"),
        }
    }

    /// Execute one watch run. Any error aborts the run at the step that failed; history
    /// records appended before the failure stay written.
    pub async fn run(&self, request: &WatchRequest) -> Result<RunOutcome, WatchError> {
        let window = LookupWindow::from_lookup_date(&request.lookup_date);
        let salted = self.salt(&window);
        info!(
            departure_id = %request.departure_id,
            outbound = %salted.outbound_date(),
            inbound = %salted.return_date(),
            salt_left = salted.salt_budget,
            "lookup dates after salt"
        );

        let filters = build_search_filters(&request.departure_id, &salted, &self.route);
        let raw = self.search.search(&filters).await?;
        self.dump_raw(&raw).await;

        let offers = parse_flight_options(&raw)?;
        let valid = filter_valid(&offers);
        info!(found = offers.len(), valid = valid.len(), "flights parsed");

        let Some(best) = min_by_price(&valid) else {
            return Ok(RunOutcome::NoValidOffers);
        };

        for flight in &valid {
            debug!(token = %flight.departure_token, price = flight.price, "recording flight");
            self.store.append_flight(flight).await?;
        }

        let recorded = self.store.current_minimum().await?;
        info!(
            recorded_price = recorded.as_ref().map(|r| r.price),
            best_price = best.price,
            "comparing against recorded minimum"
        );

        self.decide(&filters, recorded, best).await
    }

    async fn decide(
        &self,
        filters: &SearchFilters,
        recorded: Option<FlightOption>,
        best: &FlightOption,
    ) -> Result<RunOutcome, WatchError> {
        if !is_new_minimum(recorded.as_ref(), best) {
            let recorded_price = recorded.map(|r| r.price).unwrap_or_default();
            return Ok(RunOutcome::NoImprovement {
                best_price: best.price,
                recorded_price,
            });
        }

        info!(price = best.price, token = %best.departure_token, "new lowest price");
        self.store.set_current_minimum(best).await?;
        self.notifier.notify_new_minimum(filters, best).await?;

        Ok(RunOutcome::NewMinimum(best.clone()))
    }

    /// Trigger boundary: decode the event, run, and report any failure (including a panic)
    /// to recipients before returning it.
    pub async fn handle(&self, event: &Value) -> Result<RunOutcome, WatchError> {
        let attempt = async {
            let request = WatchRequest::from_event(event)?;
            info!(?request, "watch requested");
            self.run(&request).await
        };

        let result = AssertUnwindSafe(attempt)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(WatchError::Panicked(panic_message(panic.as_ref()))));

        if let Err(e) = &result {
            error!(error = %e, kind = ?e.kind(), "watch run failed");
            if let Err(notify_error) = self.notifier.notify_failure(e).await {
                error!(error = %notify_error, "could not report failure");
            }
        }

        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
