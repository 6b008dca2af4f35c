//! Gateway configuration.
//!
//! Loaded from YAML. A missing file yields defaults so the gateway can run
//! with nothing but an API description.

mod value;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

pub use value::{ConfigValue, Deferred, DeferredFuture};

/// Environment variable holding `server:variable:value` triples, comma-separated.
pub const SERVER_VARIABLES_ENV: &str = "PORTICO_SERVER_VARIABLES";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,
    /// Values for URL template variables of declared servers.
    #[serde(default)]
    pub server_variables: Vec<ServerVariable>,
    /// Per-protocol configuration trees, keyed by protocol name (`http`, ...).
    #[serde(default)]
    pub protocols: HashMap<String, ConfigValue>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_saphyr::from_str(contents)?)
    }

    /// Append server variables from [`SERVER_VARIABLES_ENV`], if set.
    pub fn merge_env_server_variables(&mut self) {
        if let Ok(encoded) = std::env::var(SERVER_VARIABLES_ENV) {
            self.server_variables
                .extend(ServerVariable::parse_list(&encoded));
        }
    }
}

// ============================================================================
// ServerSettings
// ============================================================================

/// Listener-level limits shared by every adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Maximum number of requests held open awaiting a reply.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Capacity of the adapter-to-router event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            request_timeout_seconds: default_request_timeout(),
            max_body_bytes: default_max_body_bytes(),
            max_connections: default_max_connections(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_max_connections() -> usize {
    1024
}

fn default_event_buffer() -> usize {
    256
}

// ============================================================================
// ServerVariable
// ============================================================================

/// One `(server, variable, value)` binding for server URL templates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerVariable {
    pub server: String,
    pub variable: String,
    pub value: String,
}

impl ServerVariable {
    pub fn new(
        server: impl Into<String>,
        variable: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            variable: variable.into(),
            value: value.into(),
        }
    }

    /// Parse the legacy `server:variable:value,server:variable:value` encoding.
    ///
    /// Entries without all three parts are ignored. The value keeps any
    /// further colons, so `api:host:localhost:8080` binds `host` to
    /// `localhost:8080`.
    pub fn parse_list(encoded: &str) -> Vec<Self> {
        encoded
            .split(',')
            .filter_map(|triple| {
                let mut parts = triple.trim().splitn(3, ':');
                let server = parts.next().filter(|s| !s.is_empty())?;
                let variable = parts.next().filter(|s| !s.is_empty())?;
                let value = parts.next()?;
                Some(Self::new(server, variable, value))
            })
            .collect()
    }
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid {protocol} configuration: {message}")]
    Invalid { protocol: String, message: String },

    #[error("deferred value failed: {0}")]
    Deferred(String),
}

// ============================================================================
// Tests
// ============================================================================
