use crate::error::WatcherError;
use crate::metrics;
use crate::models::{Delegation, LevelFilter};
use crate::repositories::DelegationStore;
use crate::services::tzkt_rest::{fetch_all_delegations, DelegationSource};
use log::{error, info};
use std::collections::BTreeSet;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Stored position the catch-up started from.
    pub start_position: u64,
    pub repaired_levels: Vec<u64>,
    pub inserted: usize,
}

/// Bulk-inserts `delegations`, returning how many rows were newly stored.
///
/// A failed insert may have written any subset of the batch, which would
/// move the derived position past rows that never landed. Every level in the
/// batch is therefore recorded as a gap before the error is returned, and
/// the next backfill re-fetches them.
pub(crate) async fn store_batch(
    store: &dyn DelegationStore,
    delegations: &[Delegation],
) -> Result<usize, WatcherError> {
    match store.bulk_insert(delegations).await {
        Ok(inserted) => Ok(inserted),
        Err(e) => {
            let levels: Vec<u64> = delegations
                .iter()
                .map(|d| d.block)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            error!(
                "Bulk insert of {} delegations failed, marking {} levels for repair: {}",
                delegations.len(),
                levels.len(),
                e
            );
            // Best effort; the insert error is what the caller needs to see.
            let _ = store.record_gaps(&levels).await;
            Err(e.into())
        }
    }
}

/// Re-fetches levels whose ingestion failed earlier.
async fn repair_gaps(
    source: &dyn DelegationSource,
    store: &dyn DelegationStore,
) -> Result<Vec<u64>, WatcherError> {
    let gaps = store.pending_gaps().await?;
    if !gaps.is_empty() {
        info!("Repairing {} block levels missed earlier", gaps.len());
    }

    for &level in &gaps {
        let delegations: Vec<Delegation> =
            fetch_all_delegations(source, LevelFilter::Exact(level))
                .await?
                .into_iter()
                .map(Delegation::from)
                .collect();
        if !delegations.is_empty() {
            let inserted = store_batch(store, &delegations).await?;
            metrics::record_inserted("backfill", inserted, Some(level));
        }
        store.resolve_gap(level).await?;
        info!("Repaired level {} with {} delegations", level, delegations.len());
    }

    Ok(gaps)
}

/// Brings the store up to the source's current state.
///
/// Recorded gaps are repaired first. Everything above the stored position is
/// then fetched into memory and written with one bulk insert, so a fetch
/// failure leaves the store untouched and an insert failure leaves every
/// level of the batch in the gap ledger.
pub async fn run_backfill(
    source: &dyn DelegationSource,
    store: &dyn DelegationStore,
) -> Result<BackfillReport, WatcherError> {
    let repaired_levels = repair_gaps(source, store).await?;

    let start_position = store.get_last_block().await?;
    let filter = if start_position == 0 {
        info!("No blocks recorded in the database, fetching all delegations");
        LevelFilter::All
    } else {
        info!(
            "Last block recorded in the database: {}, fetching newer delegations",
            start_position
        );
        LevelFilter::Above(start_position)
    };

    let delegations: Vec<Delegation> = fetch_all_delegations(source, filter)
        .await?
        .into_iter()
        .map(Delegation::from)
        .collect();

    let mut inserted = 0;
    if delegations.is_empty() {
        info!("No new delegations to insert");
    } else {
        info!("Inserting {} delegations into database", delegations.len());
        inserted = store_batch(store, &delegations).await?;
        let highest = delegations.iter().map(|d| d.block).max();
        metrics::record_inserted("backfill", inserted, highest);
        info!("{} of {} delegations newly stored", inserted, delegations.len());
    }

    Ok(BackfillReport {
        start_position,
        repaired_levels,
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TzktError;
    use crate::utils::testing::{raw_delegation, MemoryStore, PagedSource};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn empty_store_inserts_single_record_once() {
        let source = PagedSource::new(10_000, vec![raw_delegation("tz1A", 109, 25079312620)]);
        let store = MemoryStore::default();

        let report = run_backfill(&source, &store).await.unwrap();

        let expected = Delegation {
            delegator: "tz1A".to_string(),
            timestamp: Utc.with_ymd_and_hms(2018, 6, 30, 19, 30, 27).unwrap(),
            block: 109,
            amount: 25079312620,
        };
        assert_eq!(store.insert_calls(), vec![vec![expected]]);
        assert_eq!(store.get_last_block().await.unwrap(), 109);
        assert_eq!(report.start_position, 0);
        assert_eq!(report.inserted, 1);
        assert_eq!(source.requested_filters()[0], LevelFilter::All);
    }

    #[tokio::test]
    async fn empty_store_pages_through_everything() {
        let items = (1..=25).map(|l| raw_delegation("tz1A", l, 1)).collect();
        let source = PagedSource::new(10, items);
        let store = MemoryStore::default();

        let report = run_backfill(&source, &store).await.unwrap();

        assert_eq!(report.inserted, 25);
        assert_eq!(store.insert_calls().len(), 1);
        assert_eq!(store.rows().len(), 25);
        assert_eq!(source.requested_offsets(), vec![0, 10, 20, 30]);
    }

    #[tokio::test]
    async fn full_last_page_still_requests_next_page() {
        let items = (1..=10).map(|l| raw_delegation("tz1A", l, 1)).collect();
        let source = PagedSource::new(10, items);
        let store = MemoryStore::default();

        run_backfill(&source, &store).await.unwrap();

        assert_eq!(source.requested_offsets(), vec![0, 10]);
        assert_eq!(store.rows().len(), 10);
    }

    #[tokio::test]
    async fn resumes_strictly_above_stored_position() {
        let items = (1..=8).map(|l| raw_delegation("tz1A", l, 1)).collect();
        let source = PagedSource::new(3, items);
        let store = MemoryStore::default();

        run_backfill(&source, &store).await.unwrap();
        assert_eq!(store.get_last_block().await.unwrap(), 8);

        source.push(raw_delegation("tz1B", 9, 5));
        source.push(raw_delegation("tz1C", 10, 5));
        let report = run_backfill(&source, &store).await.unwrap();

        assert_eq!(report.start_position, 8);
        assert_eq!(report.inserted, 2);
        assert_eq!(store.rows().len(), 10);
        assert_eq!(store.get_last_block().await.unwrap(), 10);
        assert_eq!(*source.requested_filters().last().unwrap(), LevelFilter::Above(8));

        let report = run_backfill(&source, &store).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(store.insert_calls().len(), 2);
        assert_eq!(store.get_last_block().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn fetch_error_aborts_without_partial_insert() {
        let items = (1..=5).map(|l| raw_delegation("tz1A", l, 1)).collect();
        let source = PagedSource::new(2, items);
        source.fail_at_offset(4);
        let store = MemoryStore::default();

        let err = run_backfill(&source, &store).await.unwrap_err();

        assert!(matches!(err, WatcherError::Fetch(TzktError::Status(500))));
        assert!(store.insert_calls().is_empty());
        assert_eq!(store.get_last_block().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_errors_are_fatal() {
        let source = PagedSource::new(10, vec![raw_delegation("tz1A", 1, 1)]);
        let store = MemoryStore::default();
        store.set_fail_inserts(true);

        let err = run_backfill(&source, &store).await.unwrap_err();
        assert!(matches!(err, WatcherError::Store(_)));

        store.set_fail_inserts(false);
        store.set_fail_reads(true);
        let err = run_backfill(&source, &store).await.unwrap_err();
        assert!(matches!(err, WatcherError::Store(_)));
    }

    #[tokio::test]
    async fn repairs_recorded_gaps_before_resuming() {
        let source = PagedSource::new(
            10,
            vec![
                raw_delegation("tz1A", 5, 1),
                raw_delegation("tz1B", 7, 1),
                raw_delegation("tz1C", 9, 1),
            ],
        );
        let store = MemoryStore::with_rows(vec![
            Delegation::from(raw_delegation("tz1A", 5, 1)),
            Delegation::from(raw_delegation("tz1C", 9, 1)),
        ]);
        store.record_gap(7).await.unwrap();

        let report = run_backfill(&source, &store).await.unwrap();

        assert_eq!(report.repaired_levels, vec![7]);
        assert_eq!(report.inserted, 0);
        assert!(store.gaps().is_empty());
        assert_eq!(store.rows().len(), 3);
        assert_eq!(source.requested_filters()[0], LevelFilter::Exact(7));
    }

    #[tokio::test]
    async fn failed_gap_repair_keeps_the_gap() {
        let source = PagedSource::new(10, vec![raw_delegation("tz1B", 7, 1)]);
        source.fail_level(7);
        let store = MemoryStore::default();
        store.record_gap(7).await.unwrap();

        assert!(run_backfill(&source, &store).await.is_err());
        assert_eq!(store.gaps(), vec![7]);

        source.heal_level(7);
        let report = run_backfill(&source, &store).await.unwrap();
        assert_eq!(report.repaired_levels, vec![7]);
        assert!(store.gaps().is_empty());
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_insert_marks_batch_levels_for_repair() {
        let items = (1..=6).map(|l| raw_delegation("tz1A", l, 1)).collect();
        let source = PagedSource::new(10, items);
        let store = MemoryStore::default();
        store.fail_after_writing(Some(2));

        let err = run_backfill(&source, &store).await.unwrap_err();

        assert!(matches!(err, WatcherError::Store(_)));
        // the highest levels landed, so the derived position already reads 6
        assert_eq!(store.get_last_block().await.unwrap(), 6);
        assert_eq!(store.gaps(), vec![1, 2, 3, 4, 5, 6]);

        store.fail_after_writing(None);
        let report = run_backfill(&source, &store).await.unwrap();

        assert_eq!(report.repaired_levels, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(report.start_position, 6);
        assert!(store.gaps().is_empty());
        let mut blocks: Vec<u64> = store.rows().iter().map(|d| d.block).collect();
        blocks.sort_unstable();
        assert_eq!(blocks, vec![1, 2, 3, 4, 5, 6]);
    }
}
