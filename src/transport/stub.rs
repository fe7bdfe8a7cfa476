//! Scripted transport for unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Transport, TransportError};
use crate::record::RecordId;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    GetList(Value),
    GetById(RecordId),
    Post(Value),
    Put(RecordId, Value),
    Patch(RecordId, Value),
    Delete(RecordId),
}

type Handler = dyn Fn(&Call) -> Result<Value, TransportError> + Send + Sync;

/// Answers every call through one closure and records what was asked.
pub(crate) struct StubTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
}

impl StubTransport {
    pub(crate) fn new(
        handler: impl Fn(&Call) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn answer(&self, call: Call) -> Result<Value, TransportError> {
        self.calls.lock().expect("calls lock").push(call.clone());
        (self.handler)(&call)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get_list(&self, _url: &str, params: &Value) -> Result<Value, TransportError> {
        self.answer(Call::GetList(params.clone()))
    }

    async fn get_by_id(&self, _url: &str, id: &RecordId) -> Result<Value, TransportError> {
        self.answer(Call::GetById(id.clone()))
    }

    async fn post(&self, _url: &str, body: &Value) -> Result<Value, TransportError> {
        self.answer(Call::Post(body.clone()))
    }

    async fn put(&self, _url: &str, id: &RecordId, body: &Value) -> Result<Value, TransportError> {
        self.answer(Call::Put(id.clone(), body.clone()))
    }

    async fn patch(
        &self,
        _url: &str,
        id: &RecordId,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.answer(Call::Patch(id.clone(), body.clone()))
    }

    async fn delete(&self, _url: &str, id: &RecordId) -> Result<(), TransportError> {
        self.answer(Call::Delete(id.clone())).map(|_| ())
    }
}
