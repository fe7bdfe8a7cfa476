//! In-memory backend used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use query_sync::{
    CacheStore, RecordId, ResourceService, ResourceServiceFactory, Transport, TransportError,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Get,
    Create,
    Update,
    Patch,
    Delete,
}

/// A tiny REST resource: numeric ids, optional page size, scripted failures
/// and gates that hold the next call of an operation until released.
#[derive(Default)]
pub struct FakeBackend {
    records: Mutex<BTreeMap<u64, Value>>,
    next_id: AtomicU64,
    page_size: Mutex<Option<usize>>,
    calls: Mutex<Vec<(Op, Value)>>,
    gates: Mutex<HashMap<Op, Arc<Notify>>>,
    failures: Mutex<HashMap<Op, TransportError>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.next_id.store(1, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn seed(&self, count: u64) {
        for _ in 0..count {
            self.insert(json!({ "title": "seeded" }));
        }
    }

    pub fn insert(&self, mut fields: Value) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        fields["id"] = json!(id);
        self.records.lock().unwrap().insert(id, fields);
        id
    }

    /// Change a record behind the cache's back.
    pub fn overwrite(&self, id: u64, mut fields: Value) {
        fields["id"] = json!(id);
        self.records.lock().unwrap().insert(id, fields);
    }

    pub fn set_page_size(&self, size: usize) {
        *self.page_size.lock().unwrap() = Some(size);
    }

    /// The next call of `op` waits until the returned handle is notified.
    pub fn hold(&self, op: Op) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(op, Arc::clone(&gate));
        gate
    }

    /// The next call of `op` fails with `err`.
    pub fn fail(&self, op: Op, err: TransportError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    pub fn calls(&self, op: Op) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == op)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.calls(op).len()
    }

    async fn enter(&self, op: Op, args: Value) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push((op, args));
        let gate = self.gates.lock().unwrap().remove(&op);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.failures.lock().unwrap().remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn numeric(id: &RecordId) -> Result<u64, TransportError> {
        id.as_str()
            .parse()
            .map_err(|_| TransportError::with_status(400, format!("bad id {id}")))
    }

    fn not_found(id: &RecordId) -> TransportError {
        TransportError::with_status(404, format!("record {id} not found"))
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn get_list(&self, _url: &str, params: &Value) -> Result<Value, TransportError> {
        // Read before the gate so a held call answers with what it saw on arrival.
        let records: Vec<Value> = self.records.lock().unwrap().values().cloned().collect();
        self.enter(Op::List, params.clone()).await?;
        let Some(size) = *self.page_size.lock().unwrap() else {
            return Ok(Value::Array(records));
        };

        let page = params.get("page").and_then(Value::as_u64).unwrap_or(1) as usize;
        let items: Vec<Value> =
            records.iter().skip((page - 1) * size).take(size).cloned().collect();
        Ok(json!({ "items": items, "totalCount": records.len() }))
    }

    async fn get_by_id(&self, _url: &str, id: &RecordId) -> Result<Value, TransportError> {
        let found = Self::numeric(id).map(|key| self.records.lock().unwrap().get(&key).cloned());
        self.enter(Op::Get, json!(id)).await?;
        found?.ok_or_else(|| Self::not_found(id))
    }

    async fn post(&self, _url: &str, body: &Value) -> Result<Value, TransportError> {
        self.enter(Op::Create, body.clone()).await?;
        let id = self.insert(body.clone());
        Ok(self.records.lock().unwrap()[&id].clone())
    }

    async fn put(&self, _url: &str, id: &RecordId, body: &Value) -> Result<Value, TransportError> {
        self.enter(Op::Update, json!({ "id": id, "body": body })).await?;
        let key = Self::numeric(id)?;
        if !self.records.lock().unwrap().contains_key(&key) {
            return Err(Self::not_found(id));
        }
        self.overwrite(key, body.clone());
        Ok(self.records.lock().unwrap()[&key].clone())
    }

    async fn patch(
        &self,
        _url: &str,
        id: &RecordId,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.enter(Op::Patch, json!({ "id": id, "body": body })).await?;
        let key = Self::numeric(id)?;
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&key).ok_or_else(|| Self::not_found(id))?;
        if let (Some(target), Some(changes)) = (record.as_object_mut(), body.as_object()) {
            for (field, value) in changes {
                target.insert(field.clone(), value.clone());
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, _url: &str, id: &RecordId) -> Result<(), TransportError> {
        self.enter(Op::Delete, json!(id)).await?;
        let key = Self::numeric(id)?;
        self.records
            .lock()
            .unwrap()
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }
}

pub fn briefs(backend: &Arc<FakeBackend>) -> (CacheStore, ResourceService) {
    let store = CacheStore::default();
    let transport = Arc::clone(backend) as Arc<dyn Transport>;
    let factory = ResourceServiceFactory::new(store.clone(), transport);
    (store, factory.create("briefs", "/api/briefs"))
}

/// Poll `check` until it holds or about a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
