//! Portico - protocol adapter layer for event-driven gateways.
//!
//! Binds the channels of an AsyncAPI description to HTTP: inbound requests
//! are validated against their channel contract and turned into canonical
//! [`Message`]s, and outbound messages are broadcast to every open request.

pub mod adapter;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod outbound;
pub mod template;
pub mod validation;

pub use adapter::{Adapter, BroadcastReport, ConnectionRegistry, EventSender, HttpAdapter};
pub use api::{ApiDocument, ChannelBinder};
pub use config::Config;
pub use context::GatewayContext;
pub use error::AdapterError;
pub use outbound::{OutboundClient, OutboundRequest};
pub use validation::{JsonSchemaValidator, QueryValidator};

// Re-export protocol types from the protocol crate
pub use portico_protocol::{AdapterEvent, ConnectionId, ErrorInfo, ErrorKind, Message};
