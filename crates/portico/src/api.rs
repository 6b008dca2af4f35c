//! API description model.
//!
//! Portico only needs a small, read-only slice of an AsyncAPI 2.x document:
//! declared servers, declared channels (with their publish/subscribe
//! operations and server lists) and each channel's HTTP binding. Anything
//! else in the document is ignored.

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Read-only view of the declared channels and servers.
///
/// The adapter only ever queries the API description through this trait.
pub trait ChannelBinder: Send + Sync {
    /// Declared channel names, in declaration order.
    fn channel_names(&self) -> Vec<String>;

    /// Declared server names, in declaration order.
    fn server_names(&self) -> Vec<String>;

    fn channel(&self, name: &str) -> Option<&Channel>;

    fn server(&self, name: &str) -> Option<&Server>;
}

// ============================================================================
// ApiDocument
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDocument {
    #[serde(default, deserialize_with = "ordered_map")]
    servers: Vec<(String, Server)>,
    #[serde(default, deserialize_with = "ordered_map")]
    channels: Vec<(String, Channel)>,
}

impl ApiDocument {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a YAML (or JSON) document.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ApiError> {
        Ok(serde_saphyr::from_str(contents)?)
    }
}

impl ChannelBinder for ApiDocument {
    fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|(name, _)| name.clone()).collect()
    }

    fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|(name, _)| name.clone()).collect()
    }

    fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, channel)| channel)
    }

    fn server(&self, name: &str) -> Option<&Server> {
        self.servers
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, server)| server)
    }
}

// ============================================================================
// Server / Channel
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// URL template, e.g. `http://{host}:8080`.
    pub url: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Channel {
    #[serde(default)]
    servers: Option<Vec<String>>,
    #[serde(default, rename = "x-servers")]
    x_servers: Option<Vec<String>>,
    #[serde(default)]
    publish: Option<Value>,
    #[serde(default)]
    subscribe: Option<Value>,
    #[serde(default)]
    bindings: ChannelBindings,
}

impl Channel {
    pub fn has_publish(&self) -> bool {
        self.publish.is_some()
    }

    pub fn has_subscribe(&self) -> bool {
        self.subscribe.is_some()
    }

    /// Servers this channel is restricted to.
    ///
    /// Explicit `servers` wins over the `x-servers` extension, even when it
    /// is empty. `None` means the channel is available on every declared
    /// server.
    pub fn restricted_servers(&self) -> Option<&[String]> {
        self.servers.as_deref().or(self.x_servers.as_deref())
    }

    pub fn http_binding(&self) -> Option<&HttpChannelBinding> {
        self.bindings.http.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelBindings {
    #[serde(default)]
    pub http: Option<HttpChannelBinding>,
}

/// HTTP constraints attached to a channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpChannelBinding {
    /// Expected request method (`GET`, `POST`, ...).
    #[serde(default)]
    pub method: Option<String>,
    /// JSON Schema for the query parameters.
    #[serde(default)]
    pub query: Option<Value>,
}

// ============================================================================
// ApiError
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to read API description: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse API description: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Helpers
// ============================================================================

/// Deserialize a map into `(key, value)` pairs, keeping document order.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, T>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
asyncapi: 2.6.0
info:
  title: Orders
  version: 1.0.0
servers:
  production:
    url: http://{host}:8080
    protocol: http
  staging:
    url: http://staging.example.com
    protocol: http
channels:
  orders:
    publish:
      message:
        payload:
          type: object
    bindings:
      http:
        method: POST
        query:
          type: object
          required: [id]
          properties:
            id:
              type: string
  audit:
    servers: [staging]
    subscribe:
      message: {}
  metrics:
    x-servers: [production]
    publish:
      message: {}
"#;

    #[test]
    fn keeps_declaration_order() {
        let doc = ApiDocument::from_yaml_str(DOC).unwrap();
        assert_eq!(doc.channel_names(), vec!["orders", "audit", "metrics"]);
        assert_eq!(doc.server_names(), vec!["production", "staging"]);
    }

    #[test]
    fn reads_http_binding() {
        let doc = ApiDocument::from_yaml_str(DOC).unwrap();
        let binding = doc.channel("orders").unwrap().http_binding().unwrap();
        assert_eq!(binding.method.as_deref(), Some("POST"));
        let query = binding.query.as_ref().unwrap();
        assert_eq!(query["required"][0], "id");
        assert!(doc.channel("audit").unwrap().http_binding().is_none());
    }

    #[test]
    fn channel_operations_and_servers() {
        let doc = ApiDocument::from_yaml_str(DOC).unwrap();

        let orders = doc.channel("orders").unwrap();
        assert!(orders.has_publish());
        assert!(!orders.has_subscribe());
        assert!(orders.restricted_servers().is_none());

        let audit = doc.channel("audit").unwrap();
        assert!(audit.has_subscribe());
        assert_eq!(audit.restricted_servers(), Some(&["staging".to_string()][..]));

        let metrics = doc.channel("metrics").unwrap();
        assert_eq!(
            metrics.restricted_servers(),
            Some(&["production".to_string()][..])
        );
    }

    #[test]
    fn empty_server_list_restricts_to_none() {
        let doc = ApiDocument::from_yaml_str(
            "channels:\n  hidden:\n    servers: []\n    x-servers: [staging]\n    publish: {}\n",
        )
        .unwrap();
        let hidden = doc.channel("hidden").unwrap();
        assert_eq!(hidden.restricted_servers(), Some(&[][..]));
    }

    #[test]
    fn unknown_lookups_return_none() {
        let doc = ApiDocument::from_yaml_str(DOC).unwrap();
        assert!(doc.channel("missing").is_none());
        assert!(doc.server("missing").is_none());
        assert_eq!(doc.server("staging").unwrap().url, "http://staging.example.com");
    }

    #[test]
    fn empty_document_has_no_channels() {
        let doc = ApiDocument::from_yaml_str("asyncapi: 2.6.0\n").unwrap();
        assert!(doc.channel_names().is_empty());
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = ApiDocument::load(dir.path().join("asyncapi.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Io(_)));
    }
}
