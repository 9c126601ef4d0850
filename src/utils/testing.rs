//! In-memory stand-ins for the store, the REST source and the events hub.

use crate::error::{StoreError, SubscriptionError, TzktError};
use crate::models::{Delegation, LevelFilter, RawDelegation, TzktEvent};
use crate::repositories::DelegationStore;
use crate::services::{DelegationSource, EventSubscription};
use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Utc};
use serde_json::json;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn raw_delegation(delegator: &str, level: u64, amount: i64) -> RawDelegation {
    serde_json::from_value(json!({
        "level": level,
        "timestamp": Utc.with_ymd_and_hms(2018, 6, 30, 19, 30, 27).unwrap().to_rfc3339(),
        "sender": { "address": delegator },
        "amount": amount,
    }))
    .unwrap()
}

pub fn head(level: u64) -> TzktEvent {
    TzktEvent::head(json!({ "level": level, "hash": format!("BL{}", level) }))
}

fn store_failure() -> StoreError {
    StoreError::Database(mongodb::error::Error::from(std::io::Error::new(
        std::io::ErrorKind::Other,
        "store unavailable",
    )))
}

/// Serves a fixed list of delegations in pages, honouring level filters.
pub struct PagedSource {
    page_size: u64,
    items: Mutex<Vec<RawDelegation>>,
    offsets: Mutex<Vec<u64>>,
    filters: Mutex<Vec<LevelFilter>>,
    fail_offset: Mutex<Option<u64>>,
    fail_levels: Mutex<HashSet<u64>>,
}

impl PagedSource {
    pub fn new(page_size: u64, items: Vec<RawDelegation>) -> Self {
        Self {
            page_size,
            items: Mutex::new(items),
            offsets: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            fail_offset: Mutex::new(None),
            fail_levels: Mutex::new(HashSet::new()),
        }
    }

    pub fn push(&self, item: RawDelegation) {
        self.items.lock().unwrap().push(item);
    }

    pub fn fail_at_offset(&self, offset: u64) {
        *self.fail_offset.lock().unwrap() = Some(offset);
    }

    /// Requests whose filter covers `level` fail until `heal_level` is called.
    pub fn fail_level(&self, level: u64) {
        self.fail_levels.lock().unwrap().insert(level);
    }

    pub fn heal_level(&self, level: u64) {
        self.fail_levels.lock().unwrap().remove(&level);
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }

    pub fn requested_filters(&self) -> Vec<LevelFilter> {
        self.filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DelegationSource for PagedSource {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    async fn fetch_page(
        &self,
        offset: u64,
        filter: LevelFilter,
    ) -> Result<Vec<RawDelegation>, TzktError> {
        self.offsets.lock().unwrap().push(offset);
        self.filters.lock().unwrap().push(filter);

        if *self.fail_offset.lock().unwrap() == Some(offset) {
            return Err(TzktError::Status(500));
        }
        if self
            .fail_levels
            .lock()
            .unwrap()
            .iter()
            .any(|&level| filter.matches(level))
        {
            return Err(TzktError::Status(500));
        }

        let matching: Vec<RawDelegation> = self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|d| filter.matches(d.level))
            .cloned()
            .collect();

        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(self.page_size as usize)
            .collect())
    }
}

/// Store that keeps rows in memory and records every bulk insert call.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Delegation>>,
    insert_calls: Mutex<Vec<Vec<Delegation>>>,
    gaps: Mutex<BTreeSet<u64>>,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
    partial_writes: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<Delegation>) -> Self {
        let store = Self::default();
        *store.rows.lock().unwrap() = rows;
        store
    }

    pub fn rows(&self) -> Vec<Delegation> {
        self.rows.lock().unwrap().clone()
    }

    pub fn insert_calls(&self) -> Vec<Vec<Delegation>> {
        self.insert_calls.lock().unwrap().clone()
    }

    pub fn gaps(&self) -> Vec<u64> {
        self.gaps.lock().unwrap().iter().copied().collect()
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Inserts write the last `rows` rows of each batch and then fail, the
    /// way an interrupted unordered insert leaves the collection.
    pub fn fail_after_writing(&self, rows: Option<usize>) {
        *self.partial_writes.lock().unwrap() = rows;
    }

    fn latest_first(&self, keep: impl Fn(&Delegation) -> bool, limit: i64) -> Vec<Delegation> {
        let mut rows: Vec<Delegation> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|d| keep(d))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.block.cmp(&a.block));
        rows.truncate(limit as usize);
        rows
    }
}

#[async_trait]
impl DelegationStore for MemoryStore {
    async fn get_last_block(&self) -> Result<u64, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.block)
            .max()
            .unwrap_or(0))
    }

    async fn bulk_insert(&self, delegations: &[Delegation]) -> Result<usize, StoreError> {
        self.insert_calls.lock().unwrap().push(delegations.to_vec());
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        let partial = *self.partial_writes.lock().unwrap();
        let written = match partial {
            Some(rows) => &delegations[delegations.len().saturating_sub(rows)..],
            None => delegations,
        };

        let mut rows = self.rows.lock().unwrap();
        let mut inserted = 0;
        for delegation in written {
            if !rows.contains(delegation) {
                rows.push(delegation.clone());
                inserted += 1;
            }
        }
        match partial {
            Some(_) => Err(store_failure()),
            None => Ok(inserted),
        }
    }

    async fn get_all(&self, limit: i64) -> Result<Vec<Delegation>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        Ok(self.latest_first(|_| true, limit))
    }

    async fn get_by_year(&self, year: i32, limit: i64) -> Result<Vec<Delegation>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(store_failure());
        }
        Ok(self.latest_first(|d| d.timestamp.year() == year, limit))
    }

    async fn record_gap(&self, level: u64) -> Result<(), StoreError> {
        self.gaps.lock().unwrap().insert(level);
        Ok(())
    }

    async fn pending_gaps(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.gaps())
    }

    async fn resolve_gap(&self, level: u64) -> Result<(), StoreError> {
        self.gaps.lock().unwrap().remove(&level);
        Ok(())
    }
}

/// One scripted connection attempt.
pub enum Session {
    ConnectFails,
    SubscribeFails(Vec<TzktEvent>),
    /// Connects, subscribes, yields the events, then drops.
    Events(Vec<TzktEvent>),
}

#[derive(Default)]
pub struct SubscriptionStats {
    pub connects: AtomicUsize,
    pub subscribes: AtomicUsize,
}

/// Plays back sessions in order. Once the script is exhausted the next
/// `connect` cancels `cancel`, which ends the supervisor under test.
pub struct ScriptedSubscription {
    sessions: VecDeque<Session>,
    current: VecDeque<TzktEvent>,
    subscribe_fails: bool,
    cancel: CancellationToken,
    pub stats: Arc<SubscriptionStats>,
}

impl ScriptedSubscription {
    pub fn new(sessions: Vec<Session>, cancel: CancellationToken) -> Self {
        Self {
            sessions: sessions.into(),
            current: VecDeque::new(),
            subscribe_fails: false,
            cancel,
            stats: Arc::new(SubscriptionStats::default()),
        }
    }
}

#[async_trait]
impl EventSubscription for ScriptedSubscription {
    async fn connect(&mut self) -> Result<(), SubscriptionError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.current.clear();
        self.subscribe_fails = false;

        match self.sessions.pop_front() {
            None => {
                self.cancel.cancel();
                Err(SubscriptionError::Closed)
            }
            Some(Session::ConnectFails) => {
                Err(SubscriptionError::Handshake("scripted failure".to_string()))
            }
            Some(Session::SubscribeFails(events)) => {
                self.subscribe_fails = true;
                self.current = events.into();
                Ok(())
            }
            Some(Session::Events(events)) => {
                self.current = events.into();
                Ok(())
            }
        }
    }

    async fn subscribe_to_head(&mut self) -> Result<(), SubscriptionError> {
        self.stats.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.subscribe_fails {
            return Err(SubscriptionError::Subscribe("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TzktEvent> {
        self.current.pop_front()
    }
}
