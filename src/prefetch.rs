//! Speculative cache warm-up.
//!
//! A prefetch is skipped when the key is already fresh, when the same key
//! was prefetched within the cool-down window, or when every prefetch slot
//! is busy. Failures are logged and go nowhere else.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheStore, QueryKey};
use crate::error::FetchError;
use crate::record::CachedData;

const METRIC_PREFETCH_SKIPPED: &str = "query_sync_prefetch_skipped_total";

/// Cool-down marks kept before `schedule` sweeps out expired ones.
const PRUNE_AFTER: usize = 256;

/// Result of [`PrefetchScheduler::schedule`].
#[derive(Debug)]
pub enum PrefetchDecision {
    /// The fetch is running on this task.
    Spawned(JoinHandle<()>),
    Fresh,
    CoolingDown,
    Saturated,
}

impl PrefetchDecision {
    pub fn is_spawned(&self) -> bool {
        matches!(self, Self::Spawned(_))
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Spawned(_) => "spawned",
            Self::Fresh => "fresh",
            Self::CoolingDown => "cooling_down",
            Self::Saturated => "saturated",
        }
    }
}

#[derive(Clone)]
pub struct PrefetchScheduler {
    store: CacheStore,
    last_run: Arc<DashMap<QueryKey, Instant>>,
    permits: Arc<Semaphore>,
    cooldown: Duration,
}

impl PrefetchScheduler {
    pub fn new(store: CacheStore) -> Self {
        let cooldown = store.config().prefetch_cooldown();
        let permits = Arc::new(Semaphore::new(store.config().prefetch_permits()));
        Self {
            store,
            last_run: Arc::new(DashMap::new()),
            permits,
            cooldown,
        }
    }

    /// Warm `key` by running `fetcher` through the de-duplicated read path.
    ///
    /// Expired cool-down marks are swept once more than a few hundred
    /// accumulate. Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: QueryKey, fetcher: F) -> PrefetchDecision
    where
        F: Future<Output = Result<CachedData, FetchError>> + Send + 'static,
    {
        if self.last_run.len() > PRUNE_AFTER {
            self.prune();
        }
        if self.store.get(&key).is_some_and(|entry| entry.is_fresh_success()) {
            return skipped(&key, PrefetchDecision::Fresh);
        }

        let permit = match self.last_run.entry(key.clone()) {
            Entry::Occupied(last) if last.get().elapsed() < self.cooldown => {
                return skipped(&key, PrefetchDecision::CoolingDown);
            }
            entry => {
                let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                    return skipped(&key, PrefetchDecision::Saturated);
                };
                entry.insert(Instant::now());
                permit
            }
        };

        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            match store.fetch_deduplicated(key.clone(), fetcher).await {
                Ok(_) => debug!(%key, "Prefetch completed"),
                Err(err) => warn!(%key, error = %err, "Prefetch failed"),
            }
        });
        PrefetchDecision::Spawned(handle)
    }

    /// Forget cool-down marks older than the window.
    pub fn prune(&self) {
        let cooldown = self.cooldown;
        self.last_run.retain(|_, last| last.elapsed() < cooldown);
    }
}

fn skipped(key: &QueryKey, decision: PrefetchDecision) -> PrefetchDecision {
    let reason = decision.reason();
    counter!(METRIC_PREFETCH_SKIPPED, "reason" => reason).increment(1);
    debug!(%key, reason, "Prefetch skipped");
    decision
}
