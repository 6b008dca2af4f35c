//! Outbound HTTP requests issued on behalf of business logic.
//!
//! Requests are fire-and-forget from the adapter's point of view: they run on
//! their own task and failures are only logged. No retries are made.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::AdapterError;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP request to issue against a remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// `GET`, `POST`, `PUT`, ... (case-insensitive).
    pub method: String,
    pub url: String,
    /// JSON body, omitted when `None`.
    #[serde(default)]
    pub body: Option<Value>,
    /// Extra query parameters appended to `url`.
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            body: None,
            query: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    fn target(&self) -> Result<(Method, Url), AdapterError> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AdapterError::InvalidOutbound(format!("bad method {}", self.method)))?;
        let mut url = Url::parse(&self.url)
            .map_err(|e| AdapterError::InvalidOutbound(format!("bad url {}: {e}", self.url)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok((method, url))
    }
}

#[derive(Clone)]
pub struct OutboundClient {
    client: reqwest::Client,
}

impl Default for OutboundClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Issue the request and wait for the response status.
    pub async fn execute(&self, request: &OutboundRequest) -> Result<reqwest::StatusCode, AdapterError> {
        let (method, url) = request.target()?;
        let mut builder = self.client.request(method, url);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        Ok(response.status())
    }

    /// Issue the request on a background task.
    pub fn dispatch(&self, request: OutboundRequest) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            match client.execute(&request).await {
                Ok(status) => {
                    debug!(method = %request.method, url = %request.url, %status, "Outbound request completed");
                }
                Err(e) => {
                    warn!(method = %request.method, url = %request.url, error = %e, "Outbound request failed");
                }
            }
        })
    }
}
