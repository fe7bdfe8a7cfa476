//! Optimistic create/update/delete with version-checked rollback.
//!
//! Every mutation walks the same path: stage (snapshot + optimistic value),
//! invoke the transport, then either reconcile and invalidate the resource's
//! lists, or roll back. Rollback only restores the snapshot when no
//! authoritative write landed on the key in the meantime.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, MutationSnapshot, QueryKey};
use crate::error::{FetchError, MutationError, RollbackOutcome};
use crate::fetch::FetchExecutor;
use crate::invalidation::{InvalidationEngine, InvalidationPattern};
use crate::record::{CachedData, Record, RecordId};

const METRIC_MUTATION_ROLLBACK: &str = "query_sync_mutation_rollback_total";

/// Applies writes for one resource and keeps its cache consistent with them.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: CacheStore,
    executor: FetchExecutor,
    invalidation: InvalidationEngine,
    id_field: Arc<str>,
}

impl MutationCoordinator {
    pub fn new(
        store: CacheStore,
        executor: FetchExecutor,
        invalidation: InvalidationEngine,
        id_field: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            executor,
            invalidation,
            id_field: id_field.into(),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Nothing is shown optimistically: the new id is unknown until the
    /// server answers.
    #[instrument(
        skip(self, data),
        fields(resource = self.executor.keys().resource(), mutation_id = %Uuid::new_v4())
    )]
    pub async fn create(&self, data: &Value) -> Result<Record, MutationError> {
        let record = match self.executor.create(data).await {
            Ok(record) => record,
            Err(error) => return Err(self.unwind(error, None)),
        };

        match record.id(&self.id_field) {
            Some(id) => {
                let key = self.executor.keys().detail(&id);
                let version = self.store.commit(&key, CachedData::Record(record.clone()));
                info!(%key, version, "Created record committed");
            }
            None => warn!(
                id_field = %self.id_field,
                "Created record has no id; detail entry not written"
            ),
        }

        self.invalidate_lists();
        Ok(record)
    }

    /// Full replacement (`PUT`).
    #[instrument(
        skip(self, data),
        fields(resource = self.executor.keys().resource(), mutation_id = %Uuid::new_v4())
    )]
    pub async fn update(&self, id: &RecordId, data: &Value) -> Result<Record, MutationError> {
        let key = self.executor.keys().detail(id);
        let snapshot = self.stage_merge(&key, data);
        let result = self.executor.update(id, data).await;
        self.reconcile(key, snapshot, result)
    }

    /// Field-level update (`PATCH`).
    #[instrument(
        skip(self, data),
        fields(resource = self.executor.keys().resource(), mutation_id = %Uuid::new_v4())
    )]
    pub async fn partial_update(
        &self,
        id: &RecordId,
        data: &Value,
    ) -> Result<Record, MutationError> {
        let key = self.executor.keys().detail(id);
        let snapshot = self.stage_merge(&key, data);
        let result = self.executor.partial_update(id, data).await;
        self.reconcile(key, snapshot, result)
    }

    /// The detail entry keeps its data while the delete is pending and is
    /// dropped once the server confirms.
    #[instrument(
        skip(self),
        fields(resource = self.executor.keys().resource(), mutation_id = %Uuid::new_v4())
    )]
    pub async fn remove(&self, id: &RecordId) -> Result<(), MutationError> {
        let key = self.executor.keys().detail(id);
        let snapshot = self.store.stage(&key, |entry| entry.data.clone());

        if let Err(error) = self.executor.remove(id).await {
            return Err(self.unwind(error, snapshot));
        }

        self.store.remove(&key);
        info!(%key, "Deleted record removed from cache");
        self.invalidate_lists();
        Ok(())
    }

    /// Shallow-merge `data` over the cached record, if there is one.
    fn stage_merge(&self, key: &QueryKey, data: &Value) -> Option<MutationSnapshot> {
        let Value::Object(patch) = data else {
            debug!(%key, "Payload is not an object; nothing to show optimistically");
            return None;
        };
        let snapshot = self.store.stage(key, |entry| {
            entry
                .data
                .as_ref()
                .and_then(CachedData::as_record)
                .map(|record| CachedData::Record(record.merged(patch)))
        });
        match &snapshot {
            Some(snapshot) => {
                debug!(%key, version = snapshot.previous_version, "Optimistic value applied");
            }
            None => debug!(%key, "No cached record; skipping optimistic value"),
        }
        snapshot
    }

    fn reconcile(
        &self,
        key: QueryKey,
        snapshot: Option<MutationSnapshot>,
        result: Result<Record, FetchError>,
    ) -> Result<Record, MutationError> {
        let record = result.map_err(|error| self.unwind(error, snapshot))?;
        let version = self.store.commit(&key, CachedData::Record(record.clone()));
        info!(%key, version, "Mutation reconciled");
        self.invalidate_lists();
        Ok(record)
    }

    fn unwind(&self, error: FetchError, snapshot: Option<MutationSnapshot>) -> MutationError {
        let rollback = match &snapshot {
            Some(snapshot) => self.store.restore_if_version(snapshot, &error),
            None => RollbackOutcome::NotApplicable,
        };

        match rollback {
            RollbackOutcome::Restored => warn!(
                key = %error.key(),
                error = %error,
                "Mutation failed; cache rolled back"
            ),
            RollbackOutcome::Skipped => warn!(
                key = %error.key(),
                error = %error,
                "Mutation failed; newer data kept, rollback skipped"
            ),
            RollbackOutcome::NotApplicable => {
                warn!(key = %error.key(), error = %error, "Mutation failed");
            }
        }
        counter!(METRIC_MUTATION_ROLLBACK, "outcome" => rollback.as_str()).increment(1);

        MutationError { error, rollback }
    }

    fn invalidate_lists(&self) {
        self.invalidation.apply(&InvalidationPattern::ListsOnly);
    }
}
