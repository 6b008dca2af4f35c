//! Portico protocol types.
//!
//! These types are shared by every protocol adapter and by the router that
//! consumes adapter output:
//!
//! - [`Message`]: the canonical envelope (payload + channel) used by all adapters
//! - [`AdapterEvent`]: lifecycle events an adapter emits (ready, connect, message, error)
//! - [`ConnectionId`]: opaque handle naming one open inbound request
//!
//! Events serialize as `{"type": "...", "data": {...}}` so that out-of-process
//! routers can consume them as JSON Lines.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Message
// ============================================================================

/// Canonical envelope carrying a decoded payload and the channel it belongs to.
///
/// A message is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    payload: Value,
    channel: String,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            payload,
            channel: channel.into(),
            created_at: Utc::now(),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Split into `(channel, payload)`.
    pub fn into_parts(self) -> (String, Value) {
        (self.channel, self.payload)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifies one open inbound request held by an adapter.
///
/// Ids are ULIDs. Their string order follows creation time only to the
/// millisecond; ids minted within the same millisecond sort randomly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events sent from an adapter to the gateway router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// The adapter's listener is accepting connections.
    ServerReady(ServerReadyData),
    /// An inbound request passed its channel contract.
    Connect(ConnectData),
    /// A canonical message was built from an inbound request.
    Message(MessageData),
    /// An inbound request was rejected.
    Error(ErrorInfo),
}

impl AdapterEvent {
    /// Event name as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerReady(_) => "server:ready",
            Self::Connect(_) => "connect",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReadyData {
    /// Adapter display name (e.g. "HTTP server").
    pub adapter: String,
    /// Declared server this adapter serves.
    pub server: String,
    /// Address the listener is bound to.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectData {
    pub adapter: String,
    pub server: String,
    pub connection: ConnectionId,
    pub channel: String,
    pub request: RequestInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageData {
    pub message: Message,
    pub connection: ConnectionId,
    pub request: RequestInfo,
}

/// Transport-level view of the inbound request that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Full request body, decoded as UTF-8 (lossy).
    #[serde(default)]
    pub body: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Category of a rejected inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownChannel,
    MethodNotAllowed,
    InvalidQuery,
    Transport,
}

/// Structured description of a rejected request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// Human-readable summary.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Raw validation diagnostics, empty unless `kind` is `InvalidQuery`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON pointer into the validated instance (`""` for the root).
    pub path: String,
    pub message: String,
}
