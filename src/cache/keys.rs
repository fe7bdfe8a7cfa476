//! Query key derivation.
//!
//! A `QueryKey` is the structural identity of one cached query:
//! `(resource, operation kind, canonical params)`. Parameter objects are
//! rendered with sorted object keys so insertion order never splits the cache.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::record::RecordId;

/// Operation families that own cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    List,
    InfiniteList,
    Detail,
    All,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::InfiniteList => "infiniteList",
            Self::Detail => "detail",
            Self::All => "all",
        }
    }

    /// True for `list` and `infiniteList`.
    pub fn is_list(self) -> bool {
        matches!(self, Self::List | Self::InfiniteList)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identifier for one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: Arc<str>,
    kind: OperationKind,
    params: Arc<str>,
}

impl QueryKey {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Canonical serialized parameters.
    pub fn params(&self) -> &str {
        &self.params
    }

    /// Parse the canonical params back into JSON.
    ///
    /// Returns `None` for keys built from the unserializable fallback.
    pub fn params_value(&self) -> Option<Value> {
        serde_json::from_str(&self.params).ok()
    }

    pub fn list<P: Serialize + ?Sized>(resource: &str, params: &P) -> Self {
        build_key(resource, OperationKind::List, params)
    }

    pub fn infinite<P: Serialize + ?Sized>(resource: &str, params: &P) -> Self {
        build_key(resource, OperationKind::InfiniteList, params)
    }

    pub fn detail(resource: &str, id: &RecordId) -> Self {
        build_key(resource, OperationKind::Detail, id)
    }

    pub fn all(resource: &str) -> Self {
        build_key(resource, OperationKind::All, &Value::Null)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource, self.kind, self.params)
    }
}

/// Derive the key for `(resource, kind, params)`.
///
/// Never fails: params that cannot be represented as JSON collapse to a
/// per-type placeholder, trading a possible key collision for a working read.
pub fn build_key<P: Serialize + ?Sized>(
    resource: &str,
    kind: OperationKind,
    params: &P,
) -> QueryKey {
    let params = match serde_json::to_value(params) {
        Ok(value) => canonical_json(&value),
        Err(err) => {
            let type_name = std::any::type_name::<P>();
            debug!(
                resource,
                kind = kind.as_str(),
                type_name,
                error = %err,
                "Query params not serializable; using fallback key"
            );
            format!("!unserializable:{type_name}")
        }
    };

    QueryKey {
        resource: Arc::from(resource),
        kind,
        params: Arc::from(params),
    }
}

/// Render JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Key builder bound to one resource name.
#[derive(Debug, Clone)]
pub struct QueryKeyRegistry {
    resource: Arc<str>,
}

impl QueryKeyRegistry {
    pub fn new(resource: impl Into<Arc<str>>) -> Self {
        Self {
            resource: resource.into(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn build<P: Serialize + ?Sized>(&self, kind: OperationKind, params: &P) -> QueryKey {
        build_key(&self.resource, kind, params)
    }

    pub fn list<P: Serialize + ?Sized>(&self, params: &P) -> QueryKey {
        QueryKey::list(&self.resource, params)
    }

    pub fn infinite<P: Serialize + ?Sized>(&self, params: &P) -> QueryKey {
        QueryKey::infinite(&self.resource, params)
    }

    pub fn detail(&self, id: &RecordId) -> QueryKey {
        QueryKey::detail(&self.resource, id)
    }

    pub fn all(&self) -> QueryKey {
        QueryKey::all(&self.resource)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn param_order_does_not_change_key() {
        let a = serde_json::from_str::<Value>(r#"{"a":1,"b":2}"#).expect("json");
        let b = serde_json::from_str::<Value>(r#"{"b":2,"a":1}"#).expect("json");

        assert_eq!(
            build_key("briefs", OperationKind::List, &a),
            build_key("briefs", OperationKind::List, &b)
        );
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = json!({"filter": {"status": "open", "owner": 3}, "page": [1, {"z": 1, "y": 2}]});
        assert_eq!(
            canonical_json(&a),
            r#"{"filter":{"owner":3,"status":"open"},"page":[1,{"y":2,"z":1}]}"#
        );
    }

    #[test]
    fn struct_and_map_params_agree() {
        #[derive(Serialize)]
        struct Filter {
            status: &'static str,
            page: u32,
        }

        let from_struct = QueryKey::list("products", &Filter { status: "active", page: 2 });
        let from_map = QueryKey::list("products", &json!({"page": 2, "status": "active"}));
        assert_eq!(from_struct, from_map);
    }

    #[test]
    fn components_distinguish_keys() {
        let params = json!({"q": "x"});
        let list = QueryKey::list("briefs", &params);
        assert_ne!(list, QueryKey::infinite("briefs", &params));
        assert_ne!(list, QueryKey::list("products", &params));
        assert_ne!(list, QueryKey::list("briefs", &json!({"q": "y"})));
    }

    #[test]
    fn unserializable_params_fall_back() {
        let mut params = HashMap::new();
        params.insert((1_u8, 2_u8), "tuple keys are not valid JSON keys");

        let key = build_key("briefs", OperationKind::List, &params);
        assert!(key.params().starts_with("!unserializable:"));
        assert!(key.params_value().is_none());
        assert_eq!(key, build_key("briefs", OperationKind::List, &params));
    }

    #[test]
    fn detail_keys_round_trip_params() {
        let key = QueryKey::detail("institutions", &RecordId::from("42"));
        assert_eq!(key.kind(), OperationKind::Detail);
        assert_eq!(key.params_value(), Some(json!("42")));
        assert_eq!(key.to_string(), r#"institutions/detail/"42""#);
    }

    #[test]
    fn registry_binds_resource() {
        let registry = QueryKeyRegistry::new("briefs");
        assert_eq!(registry.all().resource(), "briefs");
        assert!(registry.list(&json!({})).kind().is_list());
        assert!(registry.infinite(&json!({})).kind().is_list());
        assert!(!registry.detail(&RecordId::from("1")).kind().is_list());
    }
}
