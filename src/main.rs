use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod delegations_watcher;
mod error;
mod metrics;
mod models;
mod repositories;
mod services;
mod utils;

use crate::config::Config;
use crate::delegations_watcher::DelegationsWatcher;
use crate::repositories::{DelegationStore, MongoDelegationStore};
use crate::services::{database, DelegationSource, TzktClient, TzktEventsClient};
use crate::utils::helpers::events_hub_url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("Starting tezos delegation indexer");
    let config = Config::from_env()?;

    let db = database::connect_to_database(&config.db).await?;
    let mongo_store = MongoDelegationStore::new(&db);
    mongo_store.ensure_indexes().await?;
    let store: Arc<dyn DelegationStore> = Arc::new(mongo_store);

    let tzkt = TzktClient::new(&config.tzkt.url, config.tzkt.page_size, config.http_timeout())?;
    let source: Arc<dyn DelegationSource> = Arc::new(tzkt);

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;
    let events = TzktEventsClient::new(&events_hub_url(&config.tzkt.url), http);

    let cancel = CancellationToken::new();
    let watcher = DelegationsWatcher::new(source, store.clone());
    let watcher_handle = match watcher.start(events, cancel.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to backfill delegations: {}", e);
            return Err(e.into());
        }
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    let served = api::start_server(&config.server, store, cancel.clone()).await;
    cancel.cancel();
    if let Err(e) = watcher_handle.await {
        error!("Watcher task failed: {}", e);
    }

    served?;
    info!("Shut down cleanly");
    Ok(())
}
