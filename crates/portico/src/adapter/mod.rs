//! Protocol adapters.
//!
//! An adapter owns a transport listener for one declared server. It turns
//! inbound transport requests into [`Message`]s after checking them against
//! the declared channel contract, and reports everything it does as
//! [`AdapterEvent`]s over an mpsc channel:
//!
//! ```text
//!  client request
//!       │  body buffered
//!       ▼
//!  ConnectionRegistry::register()        [registry.rs]
//!       │
//!       ├─ unknown channel     → 404, AdapterEvent::Error
//!       ├─ method mismatch     → 400, AdapterEvent::Error
//!       ├─ query schema fails  → 400, AdapterEvent::Error
//!       │
//!       └─ AdapterEvent::Connect, AdapterEvent::Message
//!             └─ waits until Adapter::send() broadcasts a reply
//! ```

mod http;
mod registry;

use std::net::SocketAddr;

use async_trait::async_trait;
use portico_protocol::{AdapterEvent, Message};
use tokio::sync::mpsc;

use crate::context::GatewayContext;
use crate::error::AdapterError;

pub use http::{HTTP_PROTOCOL, HttpAdapter, HttpAdapterBuilder, HttpServerOptions};
pub use registry::{BroadcastReport, ConnectionGuard, ConnectionRegistry, RegistryFull};

/// Sending half of the adapter-to-router event channel.
pub type EventSender = mpsc::Sender<AdapterEvent>;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Display name used in events and logs.
    fn name(&self) -> &'static str;

    fn context(&self) -> &GatewayContext;

    /// Start listening. Calling this again returns the address bound by the
    /// first successful call.
    async fn connect(&self) -> Result<SocketAddr, AdapterError>;

    /// Deliver `message` to every open connection.
    async fn send(&self, _message: &Message) -> Result<BroadcastReport, AdapterError> {
        Err(AdapterError::NotImplemented("send"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::api::ApiDocument;

    struct ListenOnly {
        context: GatewayContext,
    }

    #[async_trait]
    impl Adapter for ListenOnly {
        fn name(&self) -> &'static str {
            "listen only"
        }

        fn context(&self) -> &GatewayContext {
            &self.context
        }

        async fn connect(&self) -> Result<SocketAddr, AdapterError> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }

    #[tokio::test]
    async fn default_send_is_not_implemented() {
        let doc = ApiDocument::from_yaml_str(
            "servers:\n  local:\n    url: http://localhost\n    protocol: http\n",
        )
        .unwrap();
        let context = GatewayContext::new("local", Arc::new(doc), &[], HashMap::new()).unwrap();
        let adapter = ListenOnly { context };

        let err = adapter
            .send(&Message::new("orders", serde_json::json!("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotImplemented("send")));
        assert_eq!(err.to_string(), "method `send` is not implemented");
    }
}
