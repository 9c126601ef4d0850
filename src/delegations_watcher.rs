use crate::error::WatcherError;
use crate::repositories::DelegationStore;
use crate::services::backfill::run_backfill;
use crate::services::supervisor::Supervisor;
use crate::services::{DelegationSource, EventSubscription};
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ingests delegations: a one-shot backfill, then supervised live-tailing.
///
/// The two phases never overlap; live-tailing only starts after the backfill
/// has committed.
pub struct DelegationsWatcher {
    source: Arc<dyn DelegationSource>,
    store: Arc<dyn DelegationStore>,
}

impl DelegationsWatcher {
    pub fn new(source: Arc<dyn DelegationSource>, store: Arc<dyn DelegationStore>) -> Self {
        Self { source, store }
    }

    /// Runs the backfill to completion, then spawns live-tailing in the
    /// background. A backfill error is returned and nothing is spawned.
    pub async fn start<S>(
        self,
        subscription: S,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, WatcherError>
    where
        S: EventSubscription + 'static,
    {
        info!("Delegations watcher started");

        let report = run_backfill(self.source.as_ref(), self.store.as_ref()).await?;
        info!(
            "Backfill complete from block {}: {} delegations inserted, {} levels repaired",
            report.start_position,
            report.inserted,
            report.repaired_levels.len()
        );

        let supervisor = Supervisor::new(subscription, self.source, self.store);
        Ok(tokio::spawn(supervisor.run(cancel)))
    }
}
