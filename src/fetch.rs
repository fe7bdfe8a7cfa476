//! Remote operations for one resource, with response normalization.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::cache::{OperationKind, QueryKey, QueryKeyRegistry};
use crate::error::FetchError;
use crate::record::{CachedData, PaginatedResult, Record, RecordId};
use crate::transport::Transport;

static ITEMS_FIELDS: [&str; 2] = ["items", "results"];
static TOTAL_FIELDS: [&str; 4] = ["totalCount", "total_count", "count", "total"];
static CURSOR_FIELDS: [&str; 3] = ["nextCursor", "next_cursor", "next"];

/// The response shapes the executor accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    BareArray(Vec<Value>),
    PaginatedEnvelope {
        items: Vec<Value>,
        total_count: Option<u64>,
        next_cursor: Option<String>,
    },
    SingleRecord(Map<String, Value>),
}

impl ResponseShape {
    /// Sort a raw response into one of the accepted shapes.
    ///
    /// An object counts as an envelope only if it has an item array *and* a
    /// total or cursor field, so records that happen to own an `items`
    /// array stay records.
    pub fn classify(value: Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => Ok(Self::BareArray(items)),
            Value::Object(mut map) => {
                let has_meta = TOTAL_FIELDS
                    .iter()
                    .chain(CURSOR_FIELDS.iter())
                    .any(|field| map.contains_key(*field));
                let items_field = ITEMS_FIELDS
                    .iter()
                    .find(|field| map.get(**field).is_some_and(Value::is_array));

                match items_field {
                    Some(field) if has_meta => {
                        let Some(Value::Array(items)) = map.remove(*field) else {
                            return Err(format!("`{field}` is not an array"));
                        };
                        Ok(Self::PaginatedEnvelope {
                            items,
                            total_count: first_field(&map, &TOTAL_FIELDS).and_then(Value::as_u64),
                            next_cursor: first_field(&map, &CURSOR_FIELDS).and_then(cursor_token),
                        })
                    }
                    _ => Ok(Self::SingleRecord(map)),
                }
            }
            Value::Null => Err("empty response body".to_string()),
            other => Err(format!("expected array or object, got `{other}`")),
        }
    }

    pub fn into_page(self) -> Result<PaginatedResult, String> {
        match self {
            Self::BareArray(items) => {
                let items = into_records(items)?;
                let total = items.len() as u64;
                Ok(PaginatedResult::new(items, total, None))
            }
            Self::PaginatedEnvelope {
                items,
                total_count,
                next_cursor,
            } => {
                let items = into_records(items)?;
                let total = total_count.unwrap_or(items.len() as u64);
                Ok(PaginatedResult::new(items, total, next_cursor))
            }
            Self::SingleRecord(_) => Err("expected a list, got a single record".to_string()),
        }
    }

    pub fn into_record(self) -> Result<Record, String> {
        match self {
            Self::SingleRecord(map) => Ok(Record::new(map)),
            Self::BareArray(_) | Self::PaginatedEnvelope { .. } => {
                Err("expected a single record, got a list".to_string())
            }
        }
    }
}

fn first_field<'a>(map: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|field| map.get(*field))
}

fn cursor_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn into_records(items: Vec<Value>) -> Result<Vec<Record>, String> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(Record::new(map)),
            other => Err(format!("item {index} is not an object: `{other}`")),
        })
        .collect()
}

/// Executes remote operations for one endpoint through the injected transport.
///
/// Transport errors come back untouched, tagged with the query key; nothing
/// here retries.
#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    endpoint: Arc<str>,
    keys: QueryKeyRegistry,
}

impl FetchExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<Arc<str>>,
        keys: QueryKeyRegistry,
    ) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
            keys,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn keys(&self) -> &QueryKeyRegistry {
        &self.keys
    }

    /// Re-run the query behind `key`. Infinite lists restart at their first
    /// page.
    pub async fn refetch(self, key: QueryKey) -> Result<CachedData, FetchError> {
        let Some(params) = key.params_value() else {
            return Err(FetchError::mismatch(key, "key params are not JSON"));
        };
        match key.kind() {
            OperationKind::List => self.fetch_page(key, &params).await.map(CachedData::Page),
            OperationKind::InfiniteList => self
                .fetch_page(key, &params)
                .await
                .map(|page| CachedData::Pages(vec![page])),
            OperationKind::Detail => match RecordId::from_value(&params) {
                Some(id) => self.fetch_by_id(&id).await.map(CachedData::Record),
                None => Err(FetchError::mismatch(key, "detail key carries no record id")),
            },
            OperationKind::All => Err(FetchError::mismatch(key, "`all` keys hold no data")),
        }
    }

    pub async fn fetch_list(&self, params: &Value) -> Result<PaginatedResult, FetchError> {
        self.fetch_page(self.keys.list(params), params).await
    }

    /// Fetch one page, attributing failures to `key`.
    #[instrument(skip(self, key, params), fields(key = %key))]
    pub async fn fetch_page(
        &self,
        key: QueryKey,
        params: &Value,
    ) -> Result<PaginatedResult, FetchError> {
        let raw = self
            .transport
            .get_list(&self.endpoint, params)
            .await
            .map_err(|source| FetchError::transport(key.clone(), source))?;
        let page = normalize_page(&key, raw)?;
        debug!(items = page.items.len(), total = page.total_count, "Fetched page");
        Ok(page)
    }

    #[instrument(skip(self), fields(resource = self.keys.resource()))]
    pub async fn fetch_by_id(&self, id: &RecordId) -> Result<Record, FetchError> {
        let key = self.keys.detail(id);
        let raw = self
            .transport
            .get_by_id(&self.endpoint, id)
            .await
            .map_err(|source| FetchError::transport(key.clone(), source))?;
        normalize_record(&key, raw)
    }

    #[instrument(skip(self, data), fields(resource = self.keys.resource()))]
    pub async fn create(&self, data: &Value) -> Result<Record, FetchError> {
        let key = self.keys.all();
        let raw = self
            .transport
            .post(&self.endpoint, data)
            .await
            .map_err(|source| FetchError::transport(key.clone(), source))?;
        normalize_record(&key, raw)
    }

    #[instrument(skip(self, data), fields(resource = self.keys.resource()))]
    pub async fn update(&self, id: &RecordId, data: &Value) -> Result<Record, FetchError> {
        let key = self.keys.detail(id);
        let raw = self
            .transport
            .put(&self.endpoint, id, data)
            .await
            .map_err(|source| FetchError::transport(key.clone(), source))?;
        normalize_record(&key, raw)
    }

    #[instrument(skip(self, data), fields(resource = self.keys.resource()))]
    pub async fn partial_update(&self, id: &RecordId, data: &Value) -> Result<Record, FetchError> {
        let key = self.keys.detail(id);
        let raw = self
            .transport
            .patch(&self.endpoint, id, data)
            .await
            .map_err(|source| FetchError::transport(key.clone(), source))?;
        normalize_record(&key, raw)
    }

    #[instrument(skip(self), fields(resource = self.keys.resource()))]
    pub async fn remove(&self, id: &RecordId) -> Result<(), FetchError> {
        let key = self.keys.detail(id);
        self.transport
            .delete(&self.endpoint, id)
            .await
            .map_err(|source| FetchError::transport(key, source))
    }
}

fn normalize_page(key: &QueryKey, raw: Value) -> Result<PaginatedResult, FetchError> {
    ResponseShape::classify(raw)
        .and_then(ResponseShape::into_page)
        .map_err(|detail| FetchError::mismatch(key.clone(), detail))
}

fn normalize_record(key: &QueryKey, raw: Value) -> Result<Record, FetchError> {
    ResponseShape::classify(raw)
        .and_then(ResponseShape::into_record)
        .map_err(|detail| FetchError::mismatch(key.clone(), detail))
}
