//! Generic record and result shapes held by the cache.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding a record's identity unless a resource overrides it.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Record identifier in string form; integer ids are rendered in decimal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a JSON value; only strings and integers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// One resource record as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn id(&self, id_field: &str) -> Option<RecordId> {
        self.0.get(id_field).and_then(RecordId::from_value)
    }

    /// Shallow merge: every top-level field of `patch` replaces ours.
    pub fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut fields = self.0.clone();
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        Self(fields)
    }

    /// Deserialize into a caller-defined resource type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult {
    pub items: Vec<Record>,
    pub total_count: u64,
    pub next_cursor: Option<String>,
}

impl PaginatedResult {
    pub fn new(items: Vec<Record>, total_count: u64, next_cursor: Option<String>) -> Self {
        Self {
            items,
            total_count,
            next_cursor,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, None)
    }

    /// True if any item carries `id` under `id_field`.
    pub fn contains_id(&self, id_field: &str, id: &RecordId) -> bool {
        self.items
            .iter()
            .any(|item| item.id(id_field).as_ref() == Some(id))
    }
}

/// Everything a cache entry can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    Record(Record),
    Page(PaginatedResult),
    /// Accumulated pages of an infinite list, in request order.
    Pages(Vec<PaginatedResult>),
}

impl CachedData {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_page(&self) -> Option<&PaginatedResult> {
        match self {
            Self::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_pages(&self) -> Option<&[PaginatedResult]> {
        match self {
            Self::Pages(pages) => Some(pages),
            _ => None,
        }
    }
}
