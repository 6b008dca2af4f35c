//! Gateway context: per-server identity shared with an adapter.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::api::ChannelBinder;
use crate::config::{Config, ConfigError, ConfigValue, ServerVariable};
use crate::error::AdapterError;
use crate::outbound::{OutboundClient, OutboundRequest};
use crate::template;

/// Identity and configuration of one declared server.
pub struct GatewayContext {
    server_name: String,
    server_url: String,
    server_url_expanded: String,
    protocol: String,
    binder: Arc<dyn ChannelBinder>,
    channel_names: Vec<String>,
    protocols: HashMap<String, ConfigValue>,
    outbound: OutboundClient,
}

impl GatewayContext {
    /// Build the context for `server_name`.
    ///
    /// Only the `server_variables` bound to this server take part in URL
    /// expansion.
    pub fn new(
        server_name: impl Into<String>,
        binder: Arc<dyn ChannelBinder>,
        server_variables: &[ServerVariable],
        protocols: HashMap<String, ConfigValue>,
    ) -> Result<Self, AdapterError> {
        let server_name = server_name.into();
        let server = binder
            .server(&server_name)
            .ok_or_else(|| AdapterError::UnknownServer(server_name.clone()))?;

        let vars: HashMap<String, String> = server_variables
            .iter()
            .filter(|v| v.server == server_name)
            .map(|v| (v.variable.clone(), v.value.clone()))
            .collect();
        let server_url = server.url.clone();
        let protocol = server.protocol.clone();
        let server_url_expanded = template::expand(&server_url, &vars);
        debug!(server = %server_name, url = %server_url_expanded, "Expanded server url");

        Ok(Self {
            protocol,
            channel_names: binder.channel_names(),
            server_name,
            server_url,
            server_url_expanded,
            binder,
            protocols,
            outbound: OutboundClient::new(),
        })
    }

    /// Build the context from a loaded [`Config`].
    pub fn from_config(
        server_name: impl Into<String>,
        binder: Arc<dyn ChannelBinder>,
        config: &Config,
    ) -> Result<Self, AdapterError> {
        Self::new(
            server_name,
            binder,
            &config.server_variables,
            config.protocols.clone(),
        )
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// URL template as declared.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn server_url_expanded(&self) -> &str {
        &self.server_url_expanded
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Every declared channel name.
    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn binder(&self) -> &dyn ChannelBinder {
        self.binder.as_ref()
    }

    /// Resolve the configuration of `protocol`, awaiting every deferred leaf.
    ///
    /// Returns `None` if nothing is configured for the protocol.
    pub async fn resolve_protocol_config(&self, protocol: &str) -> Result<Option<Value>, ConfigError> {
        match self.protocols.get(protocol) {
            Some(tree) => tree.resolve().await.map(Some),
            None => Ok(None),
        }
    }

    /// Channels this server publishes on.
    ///
    /// A channel qualifies when it declares a publish operation and its
    /// server list (explicit, `x-servers`, or every declared server) names
    /// this server.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let all_servers = self.binder.server_names();
        self.channel_names
            .iter()
            .filter(|name| {
                let Some(channel) = self.binder.channel(name) else {
                    return false;
                };
                if !channel.has_publish() {
                    return false;
                }
                match channel.restricted_servers() {
                    Some(servers) => servers.contains(&self.server_name),
                    None => all_servers.contains(&self.server_name),
                }
            })
            .cloned()
            .collect()
    }

    /// Issue an HTTP request on a background task.
    pub fn dispatch(&self, request: OutboundRequest) -> tokio::task::JoinHandle<()> {
        self.outbound.dispatch(request)
    }

    pub fn outbound(&self) -> &OutboundClient {
        &self.outbound
    }
}
