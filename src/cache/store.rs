//! Process-wide keyed cache store.
//!
//! `CacheStore` is a cheap handle; clones share one underlying map. Writes
//! notify the subscribers of exactly the written key once the lock is
//! released.
//!
//! Every in-flight fetch remembers the invalidation generation of its key
//! when it started. A fetch that started before an invalidation is never
//! joined by later readers, and if it still lands it leaves the entry
//! invalidated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{CacheEntry, ErrorInfo, FetchStatus, MutationSnapshot};
use super::keys::{QueryKey, canonical_json};
use super::lock::{mutex_lock, rw_read, rw_write};
use crate::error::{FetchError, RollbackOutcome};
use crate::record::{CachedData, PaginatedResult};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_HIT: &str = "query_sync_cache_hit_total";
const METRIC_CACHE_MISS: &str = "query_sync_cache_miss_total";
const METRIC_FETCH_DEDUP: &str = "query_sync_fetch_dedup_total";
const METRIC_FETCH_MS: &str = "query_sync_fetch_ms";

type FetchResult = Result<CachedData, FetchError>;
type PageResult = Result<PaginatedResult, FetchError>;
type Callback = Arc<dyn Fn() + Send + Sync>;

/// One infinite-list page request: the list key plus the canonical request.
type PageSlot = (QueryKey, String);

struct InFlight<T: Clone> {
    id: u64,
    generation: u64,
    future: Shared<BoxFuture<'static, Result<T, FetchError>>>,
}

struct StoreInner {
    config: CacheConfig,
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    inflight: Mutex<HashMap<QueryKey, InFlight<CachedData>>>,
    page_inflight: Mutex<HashMap<PageSlot, InFlight<PaginatedResult>>>,
    subscribers: RwLock<HashMap<QueryKey, Vec<(u64, Callback)>>>,
    next_id: AtomicU64,
    epoch: AtomicU64,
}

impl StoreInner {
    fn unsubscribe(&self, key: &QueryKey, id: u64) {
        let mut subscribers = rw_write(&self.subscribers, SOURCE, "unsubscribe");
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }
}

/// Shared store of cache entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                entries: RwLock::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                page_inflight: Mutex::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Copy of the current entry.
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        rw_read(&self.inner.entries, SOURCE, "get").get(key).cloned()
    }

    /// Replace the entry for `entry.key` with an authoritative value.
    ///
    /// `data` becomes the confirmed payload too, and the version moves past
    /// the replaced entry's so a pending rollback leaves the new value alone.
    pub fn set(&self, mut entry: CacheEntry) {
        entry.confirmed.clone_from(&entry.data);
        let key = entry.key.clone();
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "set");
            if let Some(previous) = entries.get(&key) {
                entry.version = entry.version.max(previous.version + 1);
                entry.generation = entry.generation.max(previous.generation);
            }
            entries.insert(key.clone(), entry);
        }
        self.notify(&key);
    }

    /// Drop the entry along with any fetch still running for it; that
    /// fetch settles its waiters but no longer writes.
    pub fn remove(&self, key: &QueryKey) -> Option<CacheEntry> {
        mutex_lock(&self.inner.inflight, SOURCE, "remove.inflight").remove(key);
        let removed = rw_write(&self.inner.entries, SOURCE, "remove.entries").remove(key);
        if removed.is_some() {
            self.notify(key);
        }
        removed
    }

    /// Register `callback` to run after every write to `key`.
    ///
    /// The callback receives nothing; re-read with [`CacheStore::get`].
    pub fn subscribe<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        rw_write(&self.inner.subscribers, SOURCE, "subscribe")
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    pub fn has_subscribers(&self, key: &QueryKey) -> bool {
        rw_read(&self.inner.subscribers, SOURCE, "has_subscribers").contains_key(key)
    }

    /// Keys of every entry owned by `resource`.
    pub fn keys_for_resource(&self, resource: &str) -> Vec<QueryKey> {
        rw_read(&self.inner.entries, SOURCE, "keys_for_resource")
            .keys()
            .filter(|key| key.resource() == resource)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of [`CacheStore::reset`] calls so far.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        mutex_lock(&self.inner.inflight, SOURCE, "is_fetching").contains_key(key)
    }

    /// Invalidation generation of `key`; zero when nothing is cached.
    pub(crate) fn generation(&self, key: &QueryKey) -> u64 {
        rw_read(&self.inner.entries, SOURCE, "generation")
            .get(key)
            .map_or(0, |entry| entry.generation)
    }

    /// Serve `key` from cache when fresh, otherwise fetch it once.
    pub async fn read<F>(&self, key: QueryKey, fetch: F) -> Result<CachedData, FetchError>
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        let cached = self
            .get(&key)
            .filter(CacheEntry::is_servable)
            .and_then(|entry| entry.data);
        if let Some(data) = cached {
            counter!(METRIC_CACHE_HIT).increment(1);
            debug!(%key, "Cache hit");
            return Ok(data);
        }

        counter!(METRIC_CACHE_MISS).increment(1);
        debug!(%key, "Cache miss");
        self.fetch_deduplicated(key, fetch).await
    }

    /// Run `fetch` for `key` unless a fetch started under the key's current
    /// generation is already in flight, in which case wait for that one.
    ///
    /// The fetch is driven on its own task, so it completes and lands in the
    /// cache even if every caller stops waiting.
    pub async fn fetch_deduplicated<F>(
        &self,
        key: QueryKey,
        fetch: F,
    ) -> Result<CachedData, FetchError>
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        self.join_or_start(key, fetch).await
    }

    fn join_or_start<F>(&self, key: QueryKey, fetch: F) -> Shared<BoxFuture<'static, FetchResult>>
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "join_or_start");
        let generation = self.generation(&key);
        if let Some(existing) = inflight.get(&key) {
            if existing.generation == generation {
                counter!(METRIC_FETCH_DEDUP).increment(1);
                debug!(%key, "Attached to in-flight fetch");
                return existing.future.clone();
            }
            debug!(%key, "In-flight fetch predates an invalidation; starting another");
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let store = self.clone();
        let settle_key = key.clone();
        let future = async move {
            let started_at = Instant::now();
            let result = fetch.await;
            store.settle(&settle_key, id, generation, &result);
            record_latency(started_at, result.is_ok());
            result
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            InFlight {
                id,
                generation,
                future: future.clone(),
            },
        );
        drop(inflight);

        self.update(&key, |entry| entry.status = FetchStatus::Fetching);
        tokio::spawn(future.clone());
        future
    }

    /// Write a finished fetch, but only while it is still the current one
    /// for its key.
    fn settle(&self, key: &QueryKey, id: u64, generation: u64, result: &FetchResult) {
        let written = {
            let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "settle");
            if inflight.get(key).is_some_and(|current| current.id == id) {
                inflight.remove(key);
                let mut entries = rw_write(&self.inner.entries, SOURCE, "settle");
                match entries.get_mut(key) {
                    Some(entry) => {
                        match result {
                            Ok(data) => {
                                entry.store_confirmed(data.clone());
                                if entry.generation != generation {
                                    entry.invalidated = true;
                                }
                            }
                            Err(err) => {
                                entry.status = FetchStatus::Error;
                                entry.error = Some(ErrorInfo::from(err));
                            }
                        }
                        true
                    }
                    None => false,
                }
            } else {
                false
            }
        };

        if written {
            self.notify(key);
            debug!(%key, ok = result.is_ok(), "Fetch settled");
        } else {
            debug!(%key, "Dropping result of a superseded fetch");
        }
    }

    /// Fetch one page of the infinite list behind `key`, sharing the request
    /// with every session that asks for the same page meanwhile.
    ///
    /// The entry shows `Fetching` while the request runs and records the
    /// error if it fails. Storing the page is up to the caller, which knows
    /// the sequence it belongs to.
    pub async fn fetch_page_deduplicated<F>(
        &self,
        key: QueryKey,
        request: &Value,
        fetch: F,
    ) -> Result<PaginatedResult, FetchError>
    where
        F: Future<Output = PageResult> + Send + 'static,
    {
        let slot = (key.clone(), canonical_json(request));
        let (future, started) = {
            let mut pages = mutex_lock(&self.inner.page_inflight, SOURCE, "fetch_page");
            let generation = self.generation(&key);
            let joined = pages
                .get(&slot)
                .filter(|existing| existing.generation == generation)
                .map(|existing| existing.future.clone());
            match joined {
                Some(future) => {
                    counter!(METRIC_FETCH_DEDUP).increment(1);
                    debug!(%key, request = %slot.1, "Attached to in-flight page fetch");
                    (future, false)
                }
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let store = self.clone();
                    let settle_slot = slot.clone();
                    let future = async move {
                        let started_at = Instant::now();
                        let result = fetch.await;
                        store.settle_page(&settle_slot, id, &result);
                        record_latency(started_at, result.is_ok());
                        result
                    }
                    .boxed()
                    .shared();
                    pages.insert(
                        slot,
                        InFlight {
                            id,
                            generation,
                            future: future.clone(),
                        },
                    );
                    (future, true)
                }
            }
        };

        if started {
            self.update(&key, |entry| entry.status = FetchStatus::Fetching);
            tokio::spawn(future.clone());
        }
        future.await
    }

    fn settle_page(&self, slot: &PageSlot, id: u64, result: &PageResult) {
        {
            let mut pages = mutex_lock(&self.inner.page_inflight, SOURCE, "settle_page");
            if !pages.get(slot).is_some_and(|current| current.id == id) {
                debug!(key = %slot.0, "Dropping result of a superseded page fetch");
                return;
            }
            pages.remove(slot);
        }

        let key = &slot.0;
        match result {
            Err(err) => {
                self.update_existing(key, |entry| {
                    entry.status = FetchStatus::Error;
                    entry.error = Some(ErrorInfo::from(err));
                });
            }
            Ok(_) if !self.is_fetching(key) => {
                self.update_existing(key, |entry| {
                    if entry.status == FetchStatus::Fetching {
                        entry.status = if entry.confirmed.is_some() {
                            FetchStatus::Success
                        } else {
                            FetchStatus::Idle
                        };
                    }
                });
            }
            Ok(_) => {}
        }
    }

    /// Apply `change` to the entry for `key`, creating it if missing.
    pub(crate) fn update<R>(&self, key: &QueryKey, change: impl FnOnce(&mut CacheEntry) -> R) -> R {
        let stale_after = self.inner.config.stale_after();
        let result = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "update");
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), stale_after));
            change(entry)
        };
        self.notify(key);
        result
    }

    /// Apply `change` only if `key` has an entry.
    fn update_existing(&self, key: &QueryKey, change: impl FnOnce(&mut CacheEntry)) -> bool {
        let changed = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "update_existing");
            entries.get_mut(key).map(change).is_some()
        };
        if changed {
            self.notify(key);
        }
        changed
    }

    /// Authoritative write; returns the new version.
    pub fn commit(&self, key: &QueryKey, data: CachedData) -> u64 {
        self.update(key, |entry| {
            entry.store_confirmed(data);
            entry.version
        })
    }

    /// Start a de-duplicated fetch for `key` without waiting on it.
    pub(crate) fn refresh<F>(&self, key: QueryKey, fetch: F)
    where
        F: Future<Output = FetchResult> + Send + 'static,
    {
        drop(self.join_or_start(key, fetch));
    }

    /// Snapshot `key` and show an optimistic value in its place, under one
    /// lock. The version is untouched.
    ///
    /// `overlay` receives the current entry and returns the data to display;
    /// `None` leaves the entry alone and takes no snapshot.
    pub(crate) fn stage<F>(&self, key: &QueryKey, overlay: F) -> Option<MutationSnapshot>
    where
        F: FnOnce(&CacheEntry) -> Option<CachedData>,
    {
        let snapshot = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "stage");
            let entry = entries.get_mut(key)?;
            let data = overlay(entry)?;
            let snapshot = MutationSnapshot {
                key: key.clone(),
                previous_data: entry.confirmed.clone(),
                previous_version: entry.version,
            };
            entry.data = Some(data);
            entry.status = FetchStatus::Fetching;
            snapshot
        };
        self.notify(key);
        Some(snapshot)
    }

    /// Force the entry's staleness window to elapse, keeping its data.
    pub fn mark_stale(&self, key: &QueryKey) -> bool {
        self.update_existing(key, |entry| {
            entry.invalidated = true;
            entry.generation += 1;
        })
    }

    /// Capture the last confirmed state of `key` for a later rollback.
    pub fn snapshot(&self, key: &QueryKey) -> Option<MutationSnapshot> {
        self.get(key).map(|entry| MutationSnapshot {
            key: key.clone(),
            previous_data: entry.confirmed,
            previous_version: entry.version,
        })
    }

    /// Put the snapshot back only if no authoritative write happened since
    /// it was taken. Check and write happen under one lock.
    pub fn restore_if_version(
        &self,
        snapshot: &MutationSnapshot,
        err: &FetchError,
    ) -> RollbackOutcome {
        let outcome = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "restore_if_version");
            match entries.get_mut(&snapshot.key) {
                Some(entry) if entry.version == snapshot.previous_version => {
                    entry.data.clone_from(&snapshot.previous_data);
                    entry.confirmed.clone_from(&snapshot.previous_data);
                    entry.status = FetchStatus::Error;
                    entry.error = Some(ErrorInfo::from(err));
                    RollbackOutcome::Restored
                }
                _ => RollbackOutcome::Skipped,
            }
        };
        if outcome == RollbackOutcome::Restored {
            self.notify(&snapshot.key);
        }
        outcome
    }

    /// Drop every entry and in-flight fetch. Fetches started before the
    /// reset still finish but no longer write.
    pub fn reset(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        mutex_lock(&self.inner.inflight, SOURCE, "reset.inflight").clear();
        mutex_lock(&self.inner.page_inflight, SOURCE, "reset.page_inflight").clear();
        let removed: Vec<QueryKey> = rw_write(&self.inner.entries, SOURCE, "reset.entries")
            .drain()
            .map(|(key, _)| key)
            .collect();
        debug!(removed = removed.len(), "Cache store reset");
        for key in &removed {
            self.notify(key);
        }
    }

    /// End-of-session teardown: reset and forget all subscribers.
    pub fn teardown(&self) {
        self.reset();
        rw_write(&self.inner.subscribers, SOURCE, "teardown").clear();
    }

    fn notify(&self, key: &QueryKey) {
        let callbacks: Vec<Callback> = rw_read(&self.inner.subscribers, SOURCE, "notify")
            .get(key)
            .map(|list| list.iter().map(|(_, callback)| Arc::clone(callback)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn record_latency(started_at: Instant, ok: bool) {
    histogram!(METRIC_FETCH_MS, "outcome" => if ok { "ok" } else { "error" })
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}

/// Live subscription; dropping it unsubscribes.
pub struct Subscription {
    store: Weak<StoreInner>,
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.unsubscribe(&self.key, self.id);
        }
    }
}
