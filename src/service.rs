//! Per-resource service built from the shared cache primitives.
//!
//! [`ResourceServiceFactory`] owns the store and transport; every
//! [`ResourceService`] it creates runs the same read, mutation, pagination
//! and prefetch logic against its own endpoint.

use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::cache::{CacheStore, QueryKey, QueryKeyRegistry, Subscription};
use crate::error::{FetchError, MutationError};
use crate::fetch::FetchExecutor;
use crate::invalidation::{InvalidationEngine, InvalidationPattern, InvalidationReport};
use crate::mutation::MutationCoordinator;
use crate::pagination::{CursorState, PageOutcome, PaginationCursorManager};
use crate::prefetch::{PrefetchDecision, PrefetchScheduler};
use crate::record::{CachedData, DEFAULT_ID_FIELD, PaginatedResult, Record, RecordId};
use crate::transport::Transport;

/// Hands out resource services that share one store and one transport.
#[derive(Clone)]
pub struct ResourceServiceFactory {
    store: CacheStore,
    transport: Arc<dyn Transport>,
}

impl ResourceServiceFactory {
    pub fn new(store: CacheStore, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Bind the cache layer to `endpoint` under the name `resource`.
    pub fn create(&self, resource: &str, endpoint: &str) -> ResourceService {
        let keys = QueryKeyRegistry::new(resource);
        let executor = FetchExecutor::new(Arc::clone(&self.transport), endpoint, keys.clone());
        let invalidation = InvalidationEngine::new(self.store.clone(), executor.clone());
        let mutations = MutationCoordinator::new(
            self.store.clone(),
            executor.clone(),
            invalidation.clone(),
            DEFAULT_ID_FIELD,
        );

        ResourceService {
            store: self.store.clone(),
            keys,
            pagination: PaginationCursorManager::new(self.store.clone(), executor.clone()),
            prefetch: PrefetchScheduler::new(self.store.clone()),
            executor,
            invalidation,
            mutations,
        }
    }
}

/// Uniform operation set for one remote resource.
#[derive(Clone)]
pub struct ResourceService {
    store: CacheStore,
    keys: QueryKeyRegistry,
    executor: FetchExecutor,
    invalidation: InvalidationEngine,
    mutations: MutationCoordinator,
    pagination: PaginationCursorManager,
    prefetch: PrefetchScheduler,
}

impl ResourceService {
    /// Read record identity from `field` instead of `id`.
    pub fn with_id_field(mut self, field: &str) -> Self {
        self.mutations = MutationCoordinator::new(
            self.store.clone(),
            self.executor.clone(),
            self.invalidation.clone(),
            field,
        );
        self
    }

    pub fn resource(&self) -> &str {
        self.keys.resource()
    }

    pub fn endpoint(&self) -> &str {
        self.executor.endpoint()
    }

    pub fn id_field(&self) -> &str {
        self.mutations.id_field()
    }

    #[instrument(skip(self, params), fields(resource = self.resource()))]
    pub async fn list(&self, params: &Value) -> Result<PaginatedResult, FetchError> {
        let key = self.keys.list(params);
        let data = self.read(key.clone()).await?;
        match data {
            CachedData::Page(page) => Ok(page),
            _ => Err(FetchError::mismatch(key, "cached entry is not a page")),
        }
    }

    /// Pages accumulated so far for an infinite list, loading the first one
    /// if nothing is cached.
    #[instrument(skip(self, params), fields(resource = self.resource()))]
    pub async fn infinite_list(&self, params: &Value) -> Result<Vec<PaginatedResult>, FetchError> {
        let key = self.keys.infinite(params);
        let data = self.read(key.clone()).await?;
        match data {
            CachedData::Pages(pages) => Ok(pages),
            _ => Err(FetchError::mismatch(key, "cached entry is not a page sequence")),
        }
    }

    #[instrument(skip(self), fields(resource = self.resource()))]
    pub async fn detail(&self, id: &RecordId) -> Result<Record, FetchError> {
        let key = self.keys.detail(id);
        let data = self.read(key.clone()).await?;
        match data {
            CachedData::Record(record) => Ok(record),
            _ => Err(FetchError::mismatch(key, "cached entry is not a record")),
        }
    }

    pub async fn create(&self, data: &Value) -> Result<Record, MutationError> {
        self.mutations.create(data).await
    }

    pub async fn update(&self, id: &RecordId, data: &Value) -> Result<Record, MutationError> {
        self.mutations.update(id, data).await
    }

    pub async fn partial_update(
        &self,
        id: &RecordId,
        data: &Value,
    ) -> Result<Record, MutationError> {
        self.mutations.partial_update(id, data).await
    }

    pub async fn remove(&self, id: &RecordId) -> Result<(), MutationError> {
        self.mutations.remove(id).await
    }

    /// A fresh cursor for an infinite list over `params`.
    pub fn cursor(&self, params: &Value) -> CursorState {
        CursorState::new(params.clone())
    }

    pub async fn next_page(&self, state: &mut CursorState) -> Result<PageOutcome, FetchError> {
        let params = state.params().clone();
        self.pagination.next_page(&params, state).await
    }

    pub fn has_more(&self, state: &CursorState) -> bool {
        self.pagination.has_more(state)
    }

    pub fn prefetch_list(&self, params: &Value) -> PrefetchDecision {
        self.prefetch_key(self.keys.list(params))
    }

    pub fn prefetch_detail(&self, id: &RecordId) -> PrefetchDecision {
        self.prefetch_key(self.keys.detail(id))
    }

    /// Mark matching entries stale; watched ones refetch immediately.
    pub fn invalidate(&self, pattern: &InvalidationPattern) -> InvalidationReport {
        self.invalidation.apply(pattern)
    }

    /// Last known list page, stale or not, without fetching.
    pub fn cached_list(&self, params: &Value) -> Option<PaginatedResult> {
        self.cached(&self.keys.list(params)).and_then(|data| match data {
            CachedData::Page(page) => Some(page),
            _ => None,
        })
    }

    /// Last known record, stale or optimistic, without fetching.
    pub fn cached_detail(&self, id: &RecordId) -> Option<Record> {
        self.cached(&self.keys.detail(id)).and_then(|data| match data {
            CachedData::Record(record) => Some(record),
            _ => None,
        })
    }

    pub fn subscribe_list<F>(&self, params: &Value, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.subscribe(self.keys.list(params), callback)
    }

    pub fn subscribe_infinite<F>(&self, params: &Value, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.subscribe(self.keys.infinite(params), callback)
    }

    pub fn subscribe_detail<F>(&self, id: &RecordId, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.subscribe(self.keys.detail(id), callback)
    }

    async fn read(&self, key: QueryKey) -> Result<CachedData, FetchError> {
        let fetch = self.executor.clone().refetch(key.clone());
        self.store.read(key, fetch).await
    }

    fn prefetch_key(&self, key: QueryKey) -> PrefetchDecision {
        let fetch = self.executor.clone().refetch(key.clone());
        self.prefetch.schedule(key, fetch)
    }

    fn cached(&self, key: &QueryKey) -> Option<CachedData> {
        self.store.get(key).and_then(|entry| entry.data)
    }
}
