//! Pattern-based invalidation for one resource.

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::cache::{CacheStore, OperationKind, QueryKey};
use crate::fetch::FetchExecutor;
use crate::record::RecordId;

/// Which entries of a resource to invalidate.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidationPattern {
    All,
    /// `list` and `infiniteList` entries.
    ListsOnly,
    DetailsOnly,
    SpecificList(Value),
    SpecificDetail(RecordId),
}

impl InvalidationPattern {
    fn label(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ListsOnly => "lists_only",
            Self::DetailsOnly => "details_only",
            Self::SpecificList(_) => "specific_list",
            Self::SpecificDetail(_) => "specific_detail",
        }
    }
}

/// Keys touched by one `apply` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationReport {
    /// Entries now stale.
    pub marked: Vec<QueryKey>,
    /// Stale entries somebody is watching; refetch these right away.
    pub refetch: Vec<QueryKey>,
}

/// Marks a resource's entries stale. Data stays in place for display.
///
/// Stale entries that somebody is subscribed to are refetched right away
/// through the store's de-duplicated read path.
#[derive(Clone)]
pub struct InvalidationEngine {
    store: CacheStore,
    executor: FetchExecutor,
}

impl InvalidationEngine {
    pub fn new(store: CacheStore, executor: FetchExecutor) -> Self {
        Self { store, executor }
    }

    pub fn apply(&self, pattern: &InvalidationPattern) -> InvalidationReport {
        let keys = self.executor.keys();
        let targets = match pattern {
            InvalidationPattern::All => self.store.keys_for_resource(keys.resource()),
            InvalidationPattern::ListsOnly => self.keys_where(OperationKind::is_list),
            InvalidationPattern::DetailsOnly => {
                self.keys_where(|kind| kind == OperationKind::Detail)
            }
            InvalidationPattern::SpecificList(params) => vec![keys.list(params)],
            InvalidationPattern::SpecificDetail(id) => vec![keys.detail(id)],
        };

        let mut report = InvalidationReport::default();
        for key in targets {
            if !self.store.mark_stale(&key) {
                continue;
            }
            if self.store.has_subscribers(&key) {
                report.refetch.push(key.clone());
            }
            report.marked.push(key);
        }

        info!(
            resource = keys.resource(),
            pattern = pattern.label(),
            marked = report.marked.len(),
            refetch = report.refetch.len(),
            "Cache invalidation applied"
        );
        self.refetch_watched(&report.refetch);
        report
    }

    fn refetch_watched(&self, keys: &[QueryKey]) {
        if keys.is_empty() {
            return;
        }
        if Handle::try_current().is_err() {
            debug!(count = keys.len(), "No async runtime; watched entries refetch on next read");
            return;
        }
        for key in keys {
            if key.kind() == OperationKind::All {
                continue;
            }
            self.store
                .refresh(key.clone(), self.executor.clone().refetch(key.clone()));
        }
    }

    fn keys_where(&self, keep: impl Fn(OperationKind) -> bool) -> Vec<QueryKey> {
        self.store
            .keys_for_resource(self.executor.keys().resource())
            .into_iter()
            .filter(|key| keep(key.kind()))
            .collect()
    }
}
