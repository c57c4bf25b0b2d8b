//! The three discovery stages.
//!
//! Each stage takes the raw address and reports a plain outcome. Transport errors never
//! leave this module: they are logged and folded into the negative outcome.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use super::address;
use super::transport::HttpResponse;
use super::transport::Transport;

/// Runs discovery stages against one transport with a per-request time bound.
#[derive(Clone)]
pub struct Probe {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Probe {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Fetch the address, returning the response only if it has a 2xx/3xx status.
    ///
    /// Invalid addresses return `None` without touching the network. The request is
    /// abandoned once the timeout elapses, whatever the transport does.
    pub async fn fetch(&self, address: &str) -> Option<HttpResponse> {
        let Some(url) = address::normalize(address) else {
            debug!("'{}' is not a valid URL, not probing", address);
            return None;
        };

        match tokio::time::timeout(self.timeout, self.transport.get(&url)).await {
            Ok(Ok(response)) if response.is_success() => Some(response),
            Ok(Ok(response)) => {
                debug!("{} answered with status {}", url, response.status);
                None
            }
            Ok(Err(e)) => {
                debug!("{}", e);
                None
            }
            Err(_) => {
                debug!("{} did not answer within {:?}", url, self.timeout);
                None
            }
        }
    }

    /// Reachability: the address answers with a 2xx/3xx status.
    pub async fn is_reachable(&self, address: &str) -> bool {
        self.fetch(address).await.is_some()
    }

    /// Format validation: the address answers successfully with a JSON object.
    pub async fn has_valid_format(&self, address: &str) -> bool {
        self.fetch(address)
            .await
            .is_some_and(|response| is_json_object(&response.body))
    }

    /// Entity extraction: top-level keys of the JSON object the address returns.
    ///
    /// Anything that is not a JSON object yields no identifiers.
    pub async fn extract_entities(&self, address: &str) -> Vec<String> {
        self.fetch(address)
            .await
            .and_then(|response| object_keys(&response.body))
            .unwrap_or_default()
    }
}

fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            debug!("Body is JSON but not an object: {}", json_kind(&other));
            None
        }
        Err(e) => {
            debug!("Body is not JSON: {}", e);
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether `body` parses as a JSON object (not an array or scalar).
pub fn is_json_object(body: &[u8]) -> bool {
    parse_object(body).is_some()
}

/// Top-level keys of a JSON object body, in document order.
pub fn object_keys(body: &[u8]) -> Option<Vec<String>> {
    parse_object(body).map(|map| map.into_iter().map(|(key, _)| key).collect())
}
