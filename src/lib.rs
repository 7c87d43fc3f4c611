// Flight price watcher: tracks the lowest round-trip price seen for one route and alerts
// recipients when a search undercuts it

pub mod config;
pub mod models;
pub mod notifier;
pub mod processor;
pub mod salting;
pub mod search;
pub mod store;
pub mod watcher;

// Re-export key types for convenience
pub use config::{AppConfig, BootstrapError};
pub use models::{Airport, FlightLeg, FlightOption, FlightOptionSet};
pub use notifier::{EmailNotifier, LogNotifier, Notifier, NotifyError};
pub use processor::{filter_valid, min_by_price, parse_flight_options, ProcessingError};
pub use salting::{LookupDate, LookupWindow, RandomSource, RngSource};
pub use search::{ReplaySearchClient, SearchClient, SearchError, SearchFilters, SerpApiClient};
pub use store::{FlightStore, InMemoryFlightStore, RedisFlightStore, StoreError};
pub use watcher::{ErrorKind, RunOutcome, WatchError, WatchRequest, Watcher};
