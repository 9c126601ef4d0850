use crate::error::WatcherError;
use crate::metrics;
use crate::models::{Delegation, LevelFilter, TzktEvent};
use crate::repositories::DelegationStore;
use crate::services::backfill::store_batch;
use crate::services::tzkt_rest::{fetch_all_delegations, DelegationSource};
use log::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Not a head notification, or no numeric level in it.
    Ignored,
    Empty(u64),
    /// `count` rows were newly stored; re-delivered rows are not counted.
    Inserted { level: u64, count: usize },
    Failed(u64),
}

/// Fetches everything `filter` selects and stores it. `None` when the source
/// had nothing.
async fn ingest(
    source: &dyn DelegationSource,
    store: &dyn DelegationStore,
    filter: LevelFilter,
) -> Result<Option<usize>, WatcherError> {
    let delegations: Vec<Delegation> = fetch_all_delegations(source, filter)
        .await?
        .into_iter()
        .map(Delegation::from)
        .collect();

    if delegations.is_empty() {
        return Ok(None);
    }

    info!(
        "Number of delegations: {}, inserting into database ({:?})",
        delegations.len(),
        filter
    );
    let inserted = store_batch(store, &delegations).await?;
    let highest = delegations.iter().map(|d| d.block).max();
    metrics::record_inserted("live", inserted, highest);
    Ok(Some(inserted))
}

/// Fetches and stores the delegations of the block a notification announces.
///
/// Failures are terminal for this notification only: they are logged and the
/// level goes into the gap ledger for the next backfill to repair.
pub async fn handle_event(
    source: &dyn DelegationSource,
    store: &dyn DelegationStore,
    event: &TzktEvent,
) -> BlockOutcome {
    let Some(level) = event.level() else {
        return BlockOutcome::Ignored;
    };
    info!("New block received: {}, getting delegations", level);

    match ingest(source, store, LevelFilter::Exact(level)).await {
        Ok(None) => {
            info!("No delegations found for block: {}", level);
            BlockOutcome::Empty(level)
        }
        Ok(Some(count)) => {
            info!("{} delegations newly stored for block {}", count, level);
            BlockOutcome::Inserted { level, count }
        }
        Err(e) => {
            error!("Failed to ingest delegations for block {}: {}", level, e);
            metrics::LIVE_TAIL_FAILURES.inc();
            if let Err(e) = store.record_gap(level).await {
                warn!("Failed to record gap at block {}: {}", level, e);
            }
            BlockOutcome::Failed(level)
        }
    }
}

/// Ingests the levels strictly between `after` and `before`, which no
/// notification announced (the hub does not replay heads sent while
/// disconnected). On failure every level of the range becomes a gap.
pub async fn catch_up(
    source: &dyn DelegationSource,
    store: &dyn DelegationStore,
    after: u64,
    before: u64,
) -> Result<usize, WatcherError> {
    if before <= after + 1 {
        return Ok(0);
    }
    info!("Catching up on blocks {} to {}", after + 1, before - 1);

    match ingest(source, store, LevelFilter::Between(after, before)).await {
        Ok(inserted) => Ok(inserted.unwrap_or(0)),
        Err(e) => {
            error!(
                "Failed to catch up on blocks {} to {}: {}",
                after + 1,
                before - 1,
                e
            );
            metrics::LIVE_TAIL_FAILURES.inc();
            let levels: Vec<u64> = (after + 1..before).collect();
            let _ = store.record_gaps(&levels).await;
            Err(e)
        }
    }
}
