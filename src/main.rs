//! Run-once catalog collection entry point.
//!
//! Triggered by an external scheduler. Exits zero whenever the run completed
//! fetching and processing the enumerated pages; individual skipped pages or
//! records do not fail the run. Only unusable configuration (or a store
//! client that cannot be built at all) exits nonzero.

mod collector;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use collector::store::RestStore;
use collector::{Collector, CollectorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match CollectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match RestStore::new(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(catalog = %config.catalog_base_url, "starting collection run");
    let collector = Collector::new(config, store);
    let stats = collector.run().await;
    info!(%stats, "done");

    ExitCode::SUCCESS
}
