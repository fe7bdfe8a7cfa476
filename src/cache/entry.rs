//! Cache entry state.

use std::time::Duration;

use time::OffsetDateTime;

use super::keys::QueryKey;
use crate::error::FetchError;
use crate::record::CachedData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    Success,
    Error,
}

/// Last failure recorded on an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub http_status: Option<u16>,
}

impl From<&FetchError> for ErrorInfo {
    fn from(err: &FetchError) -> Self {
        Self {
            message: err.to_string(),
            http_status: err.http_status(),
        }
    }
}

/// One cached query result.
///
/// `version` only moves on authoritative writes (fetch completion or mutation
/// reconciliation); optimistic values never bump it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub data: Option<CachedData>,
    pub fetched_at: Option<OffsetDateTime>,
    pub stale_after: Duration,
    pub status: FetchStatus,
    pub error: Option<ErrorInfo>,
    pub version: u64,
    pub(crate) confirmed: Option<CachedData>,
    pub(crate) invalidated: bool,
    /// Bumped by every invalidation; fetches remember the value they
    /// started under.
    pub(crate) generation: u64,
}

impl CacheEntry {
    pub fn new(key: QueryKey, stale_after: Duration) -> Self {
        Self {
            key,
            data: None,
            fetched_at: None,
            stale_after,
            status: FetchStatus::Idle,
            error: None,
            version: 0,
            confirmed: None,
            invalidated: false,
            generation: 0,
        }
    }

    /// An entry holding freshly fetched data.
    pub fn success(key: QueryKey, data: CachedData, stale_after: Duration) -> Self {
        let mut entry = Self::new(key, stale_after);
        entry.store_confirmed(data);
        entry
    }

    pub(crate) fn store_confirmed(&mut self, data: CachedData) {
        self.data = Some(data.clone());
        self.confirmed = Some(data);
        self.fetched_at = Some(OffsetDateTime::now_utc());
        self.status = FetchStatus::Success;
        self.error = None;
        self.invalidated = false;
        self.version += 1;
    }

    /// Last value written by the server, ignoring any optimistic overlay.
    pub fn confirmed_data(&self) -> Option<&CachedData> {
        self.confirmed.as_ref()
    }

    /// True once invalidation has forced the staleness window to elapse.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_stale(&self) -> bool {
        if self.invalidated {
            return true;
        }
        let Some(fetched_at) = self.fetched_at else {
            return true;
        };
        let age = OffsetDateTime::now_utc() - fetched_at;
        let window = i128::try_from(self.stale_after.as_millis()).unwrap_or(i128::MAX);
        age.whole_milliseconds() >= window
    }

    /// Data can be served without a fetch.
    pub fn is_servable(&self) -> bool {
        self.data.is_some() && self.status != FetchStatus::Error && !self.is_stale()
    }

    pub fn is_fresh_success(&self) -> bool {
        self.status == FetchStatus::Success && !self.is_stale()
    }
}

/// Entry state captured when a mutation starts.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSnapshot {
    pub key: QueryKey,
    pub previous_data: Option<CachedData>,
    pub previous_version: u64,
}
