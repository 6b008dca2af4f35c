//! Configuration trees with deferred leaves.
//!
//! A protocol's configuration is a tree of plain values, nested objects and
//! deferred leaves. Deferred leaves are computed on demand (secrets read from
//! the environment, files, or any async closure) when the tree is resolved.
//!
//! In YAML a deferred leaf is a single-key object:
//!
//! ```yaml
//! http:
//!   server:
//!     port: { $env: HTTP_PORT }
//!   auth:
//!     token: { $file: /run/secrets/token }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::ConfigError;

pub type DeferredFuture = Pin<Box<dyn Future<Output = Result<Value, ConfigError>> + Send>>;

/// Produces a leaf value when the configuration is resolved.
pub type Deferred = Arc<dyn Fn() -> DeferredFuture + Send + Sync>;

const ENV_KEY: &str = "$env";
const FILE_KEY: &str = "$file";

#[derive(Clone)]
pub enum ConfigValue {
    /// Plain leaf. Arrays are always leaves and are never searched for
    /// deferred values.
    Value(Value),
    Object(BTreeMap<String, ConfigValue>),
    Deferred(Deferred),
}

impl ConfigValue {
    /// Wrap an async closure as a deferred leaf.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ConfigError>> + Send + 'static,
    {
        Self::Deferred(Arc::new(move || Box::pin(f())))
    }

    /// Build a tree from JSON, turning `$env` / `$file` objects into deferred leaves.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                if let Some(deferred) = deferred_from_marker(&map) {
                    return deferred;
                }
                Self::Object(
                    map.into_iter()
                        .map(|(key, value)| (key, Self::from_json(value)))
                        .collect(),
                )
            }
            other => Self::Value(other),
        }
    }

    /// Resolve every deferred leaf, returning a plain, independent copy.
    pub fn resolve(&self) -> BoxFuture<'_, Result<Value, ConfigError>> {
        Box::pin(async move {
            match self {
                Self::Value(value) => Ok(value.clone()),
                Self::Deferred(deferred) => deferred().await,
                Self::Object(entries) => {
                    let mut resolved = Map::with_capacity(entries.len());
                    for (key, value) in entries {
                        resolved.insert(key.clone(), value.resolve().await?);
                    }
                    Ok(Value::Object(resolved))
                }
            }
        })
    }
}

fn deferred_from_marker(map: &Map<String, Value>) -> Option<ConfigValue> {
    if map.len() != 1 {
        return None;
    }
    let (key, target) = map.iter().next()?;
    let target = target.as_str()?.to_string();
    match key.as_str() {
        ENV_KEY => Some(ConfigValue::deferred(move || {
            let name = target.clone();
            async move {
                std::env::var(&name)
                    .map(Value::String)
                    .map_err(|_| ConfigError::MissingEnv(name))
            }
        })),
        FILE_KEY => Some(ConfigValue::deferred(move || {
            let path = PathBuf::from(&target);
            async move {
                let contents = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| ConfigError::ReadFile { path, source })?;
                Ok(Value::String(contents.trim_end_matches(['\r', '\n']).to_string()))
            }
        })),
        _ => None,
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Object(entries) => f.debug_map().entries(entries.iter()).finish(),
            Self::Deferred(_) => f.write_str("<deferred>"),
        }
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_json)
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}
