use crate::error::StoreError;
use crate::models::{year_bounds, Delegation};
use async_trait::async_trait;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use log::{info, warn};
use mongodb::bson::{self, doc, Bson};
use mongodb::error::ErrorKind;
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

const DELEGATIONS: &str = "delegations";
const LEVEL_GAPS: &str = "level_gaps";
const DUPLICATE_KEY: i32 = 11000;

/// Persistence consumed by the watcher and the read API.
///
/// The ingestion position is derived: `get_last_block` is the highest stored
/// block, `0` when nothing is stored. Levels whose live ingestion failed are
/// kept in a separate gap ledger so a later backfill can repair them.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    async fn get_last_block(&self) -> Result<u64, StoreError>;

    /// Persists `delegations` as one batch and returns how many rows were
    /// newly stored. Rows already stored are skipped, so re-delivering a batch
    /// is a no-op. Empty input is a no-op.
    ///
    /// On error an arbitrary subset of the batch may have been written;
    /// callers record the batch's levels as gaps so they get re-fetched.
    async fn bulk_insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError>;

    async fn get_all(&self, limit: i64) -> Result<Vec<Delegation>, StoreError>;

    async fn get_by_year(&self, year: i32, limit: i64) -> Result<Vec<Delegation>, StoreError>;

    async fn record_gap(&self, level: u64) -> Result<(), StoreError>;

    /// Gap levels in ascending order.
    async fn pending_gaps(&self) -> Result<Vec<u64>, StoreError>;

    async fn resolve_gap(&self, level: u64) -> Result<(), StoreError>;

    /// Records every level, carrying on past failures. Returns the first
    /// error, if any.
    async fn record_gaps(&self, levels: &[u64]) -> Result<(), StoreError> {
        let mut first_error = None;
        for &level in levels {
            if let Err(e) = self.record_gap(level).await {
                warn!("Failed to record gap at block {}: {}", level, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LevelGap {
    level: u64,
}

#[derive(Clone)]
pub struct MongoDelegationStore {
    delegations: Collection<Delegation>,
    gaps: Collection<LevelGap>,
}

impl MongoDelegationStore {
    pub fn new(db: &Database) -> Self {
        Self {
            delegations: db.collection(DELEGATIONS),
            gaps: db.collection(LEVEL_GAPS),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let identity = IndexModel::builder()
            .keys(doc! { "delegator": 1, "block": 1, "timestamp": 1, "amount": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_block = IndexModel::builder().keys(doc! { "block": -1 }).build();
        self.delegations
            .create_indexes(vec![identity, by_block])
            .await?;

        let gap_level = IndexModel::builder()
            .keys(doc! { "level": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.gaps.create_index(gap_level).await?;

        info!("Database indexes ensured");
        Ok(())
    }
}

/// Whether a batch's write errors are all duplicate-key rejections.
fn all_duplicate_keys(codes: &[i32]) -> bool {
    !codes.is_empty() && codes.iter().all(|&code| code == DUPLICATE_KEY)
}

/// Number of rows an unordered insert skipped, when every failure in it was
/// a duplicate key. `None` means the batch failed for another reason.
fn skipped_duplicates(err: &mongodb::error::Error) -> Option<usize> {
    let ErrorKind::InsertMany(failure) = err.kind.as_ref() else {
        return None;
    };
    if failure.write_concern_error.is_some() {
        return None;
    }
    let codes: Vec<i32> = failure
        .write_errors
        .iter()
        .flatten()
        .map(|e| e.code)
        .collect();
    all_duplicate_keys(&codes).then_some(codes.len())
}

#[async_trait]
impl DelegationStore for MongoDelegationStore {
    async fn get_last_block(&self) -> Result<u64, StoreError> {
        let mut cursor = self
            .delegations
            .find(doc! {})
            .sort(doc! { "block": -1 })
            .limit(1)
            .await?;
        let latest = cursor.next().await.transpose()?;
        Ok(latest.map(|d| d.block).unwrap_or(0))
    }

    async fn bulk_insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError> {
        if delegations.is_empty() {
            return Ok(0);
        }

        match self.delegations.insert_many(delegations).ordered(false).await {
            Ok(result) => {
                info!("Inserted {} delegations", result.inserted_ids.len());
                Ok(result.inserted_ids.len())
            }
            Err(e) => match skipped_duplicates(&e) {
                Some(skipped) => {
                    warn!(
                        "Skipped {} already stored delegations in batch of {}",
                        skipped,
                        delegations.len()
                    );
                    Ok(delegations.len().saturating_sub(skipped))
                }
                None => Err(e.into()),
            },
        }
    }

    async fn get_all(&self, limit: i64) -> Result<Vec<Delegation>, StoreError> {
        let cursor = self
            .delegations
            .find(doc! {})
            .sort(doc! { "block": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_by_year(&self, year: i32, limit: i64) -> Result<Vec<Delegation>, StoreError> {
        let Some((start, end)) = year_bounds(year) else {
            return Ok(Vec::new());
        };
        let cursor = self
            .delegations
            .find(doc! { "timestamp": { "$gte": start, "$lt": end } })
            .sort(doc! { "block": -1 })
            .limit(limit)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn record_gap(&self, level: u64) -> Result<(), StoreError> {
        let level = Bson::Int64(level as i64);
        self.gaps
            .update_one(
                doc! { "level": level.clone() },
                doc! { "$set": {
                    "level": level,
                    "recordedAt": bson::DateTime::from_millis(Utc::now().timestamp_millis()),
                } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn pending_gaps(&self) -> Result<Vec<u64>, StoreError> {
        let gaps: Vec<LevelGap> = self
            .gaps
            .find(doc! {})
            .sort(doc! { "level": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(gaps.into_iter().map(|g| g.level).collect())
    }

    async fn resolve_gap(&self, level: u64) -> Result<(), StoreError> {
        self.gaps
            .delete_one(doc! { "level": Bson::Int64(level as i64) })
            .await?;
        Ok(())
    }
}
