use anyhow::Context;
use clap::Parser;
use flight_price_watcher::{AppConfig, ReplaySearchClient, RunOutcome, SearchClient};
use serde_json::{json, Value};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

/// Runs one flight price check and exits.
#[derive(clap::Parser, Debug)]
struct Args {
    /// Trigger payload as JSON. Defaults to the CGH -> FOR sample request.
    #[clap(long, env = "WATCHER_PAYLOAD")]
    payload: Option<String>,
    /// Read the trigger payload from a file instead.
    #[clap(long, conflicts_with = "payload")]
    payload_file: Option<PathBuf>,
    /// Serve a recorded provider response instead of calling the provider.
    #[clap(long)]
    replay: Option<PathBuf>,
}

fn default_payload() -> Value {
    json!({
        "departure_id": "CGH",
        "lookup_date": {
            "outbound_date": "2025-09-10",
            "return_date": "2025-09-20",
            "salty_days": 3
        }
    })
}

fn init_tracing(config: &AppConfig) {
    let default_level = if config.debug {
        "flight_price_watcher=debug"
    } else {
        "flight_price_watcher=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_payload(args: &Args) -> anyhow::Result<Value> {
    let raw = match (&args.payload, &args.payload_file) {
        (Some(raw), _) => raw.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading payload from {}", path.display()))?,
        (None, None) => return Ok(default_payload()),
    };
    serde_json::from_str(&raw).context("payload is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load().context("loading configuration")?;
    init_tracing(&config);

    let search: Arc<dyn SearchClient> = match &args.replay {
        Some(path) => Arc::new(ReplaySearchClient::from_file(path).await?),
        None => config.build_search()?,
    };
    let watcher = config.build_watcher(search)?;
    let event = read_payload(&args).await?;

    let outcome = tokio::select! {
        outcome = watcher.handle(&event) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, abandoning run");
            anyhow::bail!("run cancelled");
        }
    };

    match outcome {
        RunOutcome::NewMinimum(flight) => {
            tracing::info!(price = flight.price, "run finished with a new minimum")
        }
        RunOutcome::NoImprovement {
            best_price,
            recorded_price,
        } => tracing::info!(best_price, recorded_price, "run finished, no new minimum"),
        RunOutcome::NoValidOffers => tracing::info!("run finished, no valid offers"),
    }

    Ok(())
}
