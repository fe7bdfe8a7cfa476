//! Remote transport seam.
//!
//! The cache layer never talks to the network itself; it drives an injected
//! [`Transport`]. [`HttpTransport`] is the stock REST implementation.

mod http;
#[cfg(test)]
pub(crate) mod stub;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::record::RecordId;

pub use http::HttpTransport;

/// Failure reported by a transport call, passed through the cache untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct TransportError {
    pub message: String,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "status {code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// Remote operations a resource endpoint supports.
///
/// `url` is always the resource's base endpoint; implementations decide how
/// an id is folded into the request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_list(&self, url: &str, params: &Value) -> Result<Value, TransportError>;

    async fn get_by_id(&self, url: &str, id: &RecordId) -> Result<Value, TransportError>;

    async fn post(&self, url: &str, body: &Value) -> Result<Value, TransportError>;

    async fn put(&self, url: &str, id: &RecordId, body: &Value) -> Result<Value, TransportError>;

    async fn patch(&self, url: &str, id: &RecordId, body: &Value)
    -> Result<Value, TransportError>;

    async fn delete(&self, url: &str, id: &RecordId) -> Result<(), TransportError>;
}
