//! Cache tuning knobs.
//!
//! Both windows are fixed durations; nothing adapts them at runtime.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_STALE_AFTER_MS: u64 = 30_000;
const DEFAULT_PREFETCH_COOLDOWN_MS: u64 = 1_000;
const DEFAULT_PREFETCH_MAX_CONCURRENT: usize = 4;
const DEFAULT_CURSOR_PARAM: &str = "cursor";
const DEFAULT_PAGE_PARAM: &str = "page";

/// Cache configuration, usually the `[cache]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a successful entry is refetched on the next read.
    pub stale_after_ms: u64,
    /// Minimum spacing between two prefetches of the same key.
    pub prefetch_cooldown_ms: u64,
    /// Upper bound on prefetches running at the same time.
    pub prefetch_max_concurrent: usize,
    /// Query parameter carrying a server-issued cursor token.
    pub cursor_param: String,
    /// Query parameter carrying a derived page number.
    pub page_param: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            prefetch_cooldown_ms: DEFAULT_PREFETCH_COOLDOWN_MS,
            prefetch_max_concurrent: DEFAULT_PREFETCH_MAX_CONCURRENT,
            cursor_param: DEFAULT_CURSOR_PARAM.to_string(),
            page_param: DEFAULT_PAGE_PARAM.to_string(),
        }
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn prefetch_cooldown(&self) -> Duration {
        Duration::from_millis(self.prefetch_cooldown_ms)
    }

    /// Prefetch concurrency, clamped to at least one.
    pub fn prefetch_permits(&self) -> usize {
        self.prefetch_max_concurrent.max(1)
    }
}
