use crate::error::SubscriptionError;
use crate::metrics;
use crate::models::TzktEvent;
use crate::repositories::DelegationStore;
use crate::services::live_tail::{catch_up, handle_event};
use crate::services::tzkt_events::EventSubscription;
use crate::services::tzkt_rest::DelegationSource;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Fixed wait between reconnect attempts and after a dropped connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Sleeps for `delay`. Returns `false` if cancelled meanwhile.
async fn back_off(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

/// Keeps live-tailing running across connection drops until cancelled.
///
/// Connect and subscribe failures share one retry path: wait
/// [`RECONNECT_DELAY`] and start over from connect. Notifications are handled
/// one at a time, in the order they arrive. When a head skips ahead of the
/// last level seen, the levels in between are caught up first.
pub struct Supervisor<S> {
    subscription: S,
    source: Arc<dyn DelegationSource>,
    store: Arc<dyn DelegationStore>,
    retry_delay: Duration,
    /// Highest level ingested or marked as a gap so far.
    last_level: Option<u64>,
}

impl<S: EventSubscription> Supervisor<S> {
    pub fn new(
        subscription: S,
        source: Arc<dyn DelegationSource>,
        store: Arc<dyn DelegationStore>,
    ) -> Self {
        Self {
            subscription,
            source,
            store,
            retry_delay: RECONNECT_DELAY,
            last_level: None,
        }
    }

    /// Starts from the highest stored block, so blocks produced between the
    /// backfill and the first notification are not skipped.
    async fn resume_position(&mut self) {
        match self.store.get_last_block().await {
            Ok(0) => {}
            Ok(block) => self.last_level = Some(block),
            Err(e) => warn!(
                "Could not read the stored position, no catch-up before the first head: {}",
                e
            ),
        }
    }

    async fn dispatch(&mut self, event: &TzktEvent) {
        let Some(level) = event.level() else {
            return;
        };
        if let Some(last) = self.last_level {
            // errors are logged and the range is already in the gap ledger
            let _ = catch_up(self.source.as_ref(), self.store.as_ref(), last, level).await;
        }
        handle_event(self.source.as_ref(), self.store.as_ref(), event).await;
        self.last_level = Some(self.last_level.map_or(level, |last| last.max(level)));
    }

    async fn establish(&mut self) -> Result<(), SubscriptionError> {
        self.subscription.connect().await?;
        info!("Connected to tzkt events hub");
        self.subscription.subscribe_to_head().await?;
        info!("Subscribed to head events");
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Start watching for new blocks...");
        self.resume_position().await;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let established = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.establish() => result,
            };
            if let Err(e) = established {
                error!("{}, retrying in {:?}", e, self.retry_delay);
                metrics::SUBSCRIPTION_RETRIES
                    .with_label_values(&[e.cause()])
                    .inc();
                if !back_off(self.retry_delay, &cancel).await {
                    break;
                }
                continue;
            }

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => None,
                    event = self.subscription.next_event() => event,
                };
                let Some(event) = event else {
                    break;
                };
                self.dispatch(&event).await;
            }

            if cancel.is_cancelled() {
                break;
            }
            warn!("Disconnected from tzkt events hub, retrying in {:?}", self.retry_delay);
            metrics::SUBSCRIPTION_RETRIES
                .with_label_values(&[SubscriptionError::Closed.cause()])
                .inc();
            if !back_off(self.retry_delay, &cancel).await {
                break;
            }
        }

        info!("Stopped watching for new blocks");
    }
}
