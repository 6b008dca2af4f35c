//! Adapter error types.

use axum::http::StatusCode;
use portico_protocol::{ErrorInfo, ErrorKind, ValidationIssue};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by an adapter or its gateway context.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Request path does not name a declared channel.
    #[error(
        "a client attempted to connect to channel {channel} but this channel is not defined in the API description"
    )]
    UnknownChannel { channel: String },

    /// Request method differs from the channel binding.
    #[error("cannot {method} {channel}")]
    MethodNotAllowed { method: String, channel: String },

    /// Query parameters failed the channel's query schema.
    #[error("{message}")]
    InvalidQuery {
        channel: String,
        message: String,
        errors: Vec<ValidationIssue>,
    },

    /// Too many requests are already waiting for a reply.
    #[error("connection registry is full ({capacity} open requests)")]
    RegistryFull { capacity: usize },

    /// The adapter does not implement this capability.
    #[error("method `{0}` is not implemented")]
    NotImplemented(&'static str),

    #[error("server {0} is not declared in the API description")]
    UnknownServer(String),

    #[error("invalid server url {url}: {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("invalid outbound request: {0}")]
    InvalidOutbound(String),

    #[error("outbound request failed: {0}")]
    Outbound(#[from] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Status returned to the client when this error rejects a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownChannel { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } | Self::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            Self::RegistryFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured form carried by `AdapterEvent::Error`.
    pub fn to_info(&self) -> ErrorInfo {
        let (kind, channel, errors) = match self {
            Self::UnknownChannel { channel } => (ErrorKind::UnknownChannel, Some(channel), Vec::new()),
            Self::MethodNotAllowed { channel, .. } => {
                (ErrorKind::MethodNotAllowed, Some(channel), Vec::new())
            }
            Self::InvalidQuery {
                channel, errors, ..
            } => (ErrorKind::InvalidQuery, Some(channel), errors.clone()),
            _ => (ErrorKind::Transport, None, Vec::new()),
        };
        ErrorInfo {
            kind,
            message: self.to_string(),
            channel: channel.cloned(),
            errors,
        }
    }
}
