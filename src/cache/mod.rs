//! Query cache primitives.
//!
//! - **Keys**: canonical `(resource, operation, params)` identities
//! - **Store**: the shared entry map with in-flight de-duplication and
//!   per-key subscriptions
//!
//! ## Configuration
//!
//! Behavior is tuned from the `[cache]` section of `query-sync.toml`:
//!
//! ```toml
//! [cache]
//! stale_after_ms = 30000
//! prefetch_cooldown_ms = 1000
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use entry::{CacheEntry, ErrorInfo, FetchStatus, MutationSnapshot};
pub use keys::{OperationKind, QueryKey, QueryKeyRegistry, build_key, canonical_json};
pub use store::{CacheStore, Subscription};
