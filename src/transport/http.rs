use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};
use serde_json::Value;
use tracing::debug;

use super::{Transport, TransportError};
use crate::record::RecordId;

/// REST transport over `reqwest`.
///
/// Endpoints are resolved against `base`; ids become one extra path segment,
/// keeping the endpoint's trailing-slash convention.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base = Url::parse(base)
            .map_err(|err| TransportError::new(format!("invalid base URL: {err}")))?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("query-sync/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn collection_url(&self, endpoint: &str) -> Result<Url, TransportError> {
        self.base
            .join(endpoint)
            .map_err(|err| TransportError::new(format!("invalid endpoint `{endpoint}`: {err}")))
    }

    fn member_url(&self, endpoint: &str, id: &RecordId) -> Result<Url, TransportError> {
        let mut url = self.collection_url(endpoint)?;
        let trailing_slash = url.path().ends_with('/');
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| {
                    TransportError::new(format!("endpoint `{endpoint}` cannot hold a path"))
                })?;
            segments.pop_if_empty().push(id.as_str());
            if trailing_slash {
                segments.push("");
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, TransportError> {
        debug!(%method, %url, "Sending transport request");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::with_status(status.as_u16(), text));
        }
        Ok(resp)
    }

    async fn send_json(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        let resp = self.send(method, url, body).await?;
        let bytes = resp.bytes().await.map_err(from_reqwest)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::new(format!("failed to parse body: {err}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_list(&self, url: &str, params: &Value) -> Result<Value, TransportError> {
        let mut target = self.collection_url(url)?;
        append_query(&mut target, params);
        self.send_json(Method::GET, target, None).await
    }

    async fn get_by_id(&self, url: &str, id: &RecordId) -> Result<Value, TransportError> {
        let target = self.member_url(url, id)?;
        self.send_json(Method::GET, target, None).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let target = self.collection_url(url)?;
        self.send_json(Method::POST, target, Some(body)).await
    }

    async fn put(&self, url: &str, id: &RecordId, body: &Value) -> Result<Value, TransportError> {
        let target = self.member_url(url, id)?;
        self.send_json(Method::PUT, target, Some(body)).await
    }

    async fn patch(&self, url: &str, id: &RecordId, body: &Value) -> Result<Value, TransportError> {
        let target = self.member_url(url, id)?;
        self.send_json(Method::PATCH, target, Some(body)).await
    }

    async fn delete(&self, url: &str, id: &RecordId) -> Result<(), TransportError> {
        let target = self.member_url(url, id)?;
        self.send(Method::DELETE, target, None).await?;
        Ok(())
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    TransportError {
        message: err.to_string(),
        status: err.status().map(|status| status.as_u16()),
    }
}

/// Encode list params as query pairs: scalars verbatim, arrays as repeated
/// pairs, nested objects as JSON text. Nulls are omitted.
fn append_query(url: &mut Url, params: &Value) {
    let Value::Object(map) = params else {
        return;
    };
    if map.is_empty() {
        return;
    }

    let mut pairs = url.query_pairs_mut();
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.append_pair(key, &text);
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.append_pair(key, &text);
                }
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
