//! Generic resource cache and synchronization layer for REST-backed
//! frontends.
//!
//! A [`ResourceServiceFactory`] binds one shared [`CacheStore`] and one
//! [`Transport`] to any number of named resources. Each [`ResourceService`]
//! gets the same behavior:
//!
//! - de-duplicated, staleness-aware reads for lists and details
//! - optimistic mutations with version-checked rollback
//! - pattern-based invalidation with eager refetch of watched entries
//! - cursor-driven infinite lists
//! - rate-limited prefetching

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod invalidation;
pub mod mutation;
pub mod pagination;
pub mod prefetch;
pub mod record;
pub mod service;
pub mod telemetry;
pub mod transport;

pub use cache::{CacheConfig, CacheStore, FetchStatus, Subscription};
pub use error::{FetchError, MutationError, RollbackOutcome};
pub use invalidation::{InvalidationPattern, InvalidationReport};
pub use pagination::{Cursor, CursorState, PageOutcome};
pub use prefetch::PrefetchDecision;
pub use record::{CachedData, PaginatedResult, Record, RecordId};
pub use service::{ResourceService, ResourceServiceFactory};
pub use transport::{HttpTransport, Transport, TransportError};
