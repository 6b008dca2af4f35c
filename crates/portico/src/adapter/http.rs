//! HTTP server adapter.
//!
//! Every request path names a channel. A request that passes its channel
//! contract is held open in the [`ConnectionRegistry`] until the next
//! [`Adapter::send`] broadcast, whose payload becomes the response body.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use portico_protocol::{
    AdapterEvent, ConnectData, ErrorInfo, Message, MessageData, RequestInfo, ServerReadyData,
};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};
use url::Url;

use super::registry::{BroadcastReport, ConnectionRegistry};
use super::{Adapter, EventSender};
use crate::config::{ConfigError, ServerSettings};
use crate::context::GatewayContext;
use crate::error::AdapterError;
use crate::validation::{JsonSchemaValidator, QueryValidator, parse_query};

/// Protocol name used for configuration lookup and channel bindings.
pub const HTTP_PROTOCOL: &str = "http";

const ADAPTER_NAME: &str = "HTTP server";
const DEFAULT_PORT: u16 = 80;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct HttpProtocolConfig {
    #[serde(default)]
    server: HttpServerOptions,
}

/// Listener options read from the resolved `http` protocol configuration
/// (`protocols.http.server`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HttpServerOptions {
    /// Overrides the port of the server URL. Accepts a number or a numeric
    /// string (so it can come from `$env`).
    #[serde(default, deserialize_with = "port_value")]
    pub port: Option<u16>,
}

impl HttpServerOptions {
    pub fn from_resolved(config: Option<&Value>) -> Result<Self, ConfigError> {
        let Some(config) = config else {
            return Ok(Self::default());
        };
        let parsed: HttpProtocolConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigError::Invalid {
                protocol: HTTP_PROTOCOL.to_string(),
                message: e.to_string(),
            })?;
        Ok(parsed.server)
    }

    /// Port precedence: configured port, then the server URL's explicit
    /// port, then 80.
    pub fn bind_port(&self, server_url: &Url) -> u16 {
        self.port
            .or_else(|| server_url.port())
            .unwrap_or(DEFAULT_PORT)
    }
}

fn port_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid port {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid port {s:?}"))),
        Some(other) => Err(de::Error::custom(format!("invalid port {other}"))),
    }
}

// ============================================================================
// Shared request-handling state
// ============================================================================

struct Shared {
    context: Arc<GatewayContext>,
    registry: ConnectionRegistry,
    validator: Arc<dyn QueryValidator>,
    events: EventSender,
    base_url: Url,
    /// First unknown-channel rejection seen by this adapter.
    connect_failure: OnceLock<ErrorInfo>,
}

impl Shared {
    async fn emit(&self, event: AdapterEvent) {
        let kind = event.kind();
        if self.events.send(event).await.is_err() {
            debug!(event = kind, "Event receiver dropped, discarding event");
        }
    }

    /// Request path relative to the server URL, without its leading `/`.
    fn channel_name(&self, uri: &Uri) -> String {
        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let path = match self.base_url.join(target) {
            Ok(url) => url.path().to_string(),
            Err(_) => uri.path().to_string(),
        };
        match path.strip_prefix('/') {
            Some(stripped) => stripped.to_string(),
            None => path,
        }
    }

    fn check_contract(&self, channel: &str, method: &Method, query: &Value) -> Result<(), AdapterError> {
        let declared = self
            .context
            .binder()
            .channel(channel)
            .ok_or_else(|| AdapterError::UnknownChannel {
                channel: channel.to_string(),
            })?;

        let Some(binding) = declared.http_binding() else {
            return Ok(());
        };

        if let Some(expected) = binding.method.as_deref()
            && !expected.eq_ignore_ascii_case(method.as_str())
        {
            return Err(AdapterError::MethodNotAllowed {
                method: method.to_string(),
                channel: channel.to_string(),
            });
        }

        if let Some(schema) = binding.query.as_ref() {
            self.validator
                .validate(query, schema)
                .map_err(|failure| AdapterError::InvalidQuery {
                    channel: channel.to_string(),
                    message: failure.message,
                    errors: failure.errors,
                })?;
        }

        Ok(())
    }

    /// Log a rejection and build its `Error` event payload.
    fn record_rejection(&self, err: &AdapterError) -> ErrorInfo {
        warn!(server = %self.context.server_name(), error = %err, "Rejected request");
        let info = err.to_info();
        if matches!(err, AdapterError::UnknownChannel { .. }) {
            let _ = self.connect_failure.set(info.clone());
        }
        info
    }
}

async fn handle_request(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request = RequestInfo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    debug!(method = %request.method, path = %request.path, bytes = body.len(), "Request body buffered");

    let (guard, reply) = match shared.registry.register() {
        Ok(entry) => entry,
        Err(full) => {
            let (status, info) = {
                let err = AdapterError::RegistryFull {
                    capacity: full.capacity,
                };
                (err.status_code(), shared.record_rejection(&err))
            };
            shared.emit(AdapterEvent::Error(info)).await;
            return status_response(status);
        }
    };

    let channel = shared.channel_name(&uri);
    let query = parse_query(uri.query());
    let checked = shared
        .check_contract(&channel, &method, &query)
        .map_err(|err| (err.status_code(), shared.record_rejection(&err)));
    if let Err((status, info)) = checked {
        shared.emit(AdapterEvent::Error(info)).await;
        return status_response(status);
    }

    let connection = guard.id().clone();
    shared
        .emit(AdapterEvent::Connect(ConnectData {
            adapter: ADAPTER_NAME.to_string(),
            server: shared.context.server_name().to_string(),
            connection: connection.clone(),
            channel: channel.clone(),
            request: request.clone(),
        }))
        .await;
    shared
        .emit(AdapterEvent::Message(MessageData {
            message: Message::new(channel, query),
            connection,
            request,
        }))
        .await;

    let response = match reply.await {
        Ok(payload) => (StatusCode::OK, payload).into_response(),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    };
    drop(guard);
    response
}

fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

/// Bytes written to each connection for a broadcast payload.
fn encode_payload(payload: &Value) -> Bytes {
    match payload {
        Value::Null => Bytes::new(),
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}

// ============================================================================
// HttpAdapter
// ============================================================================

pub struct HttpAdapterBuilder {
    context: Arc<GatewayContext>,
    events: EventSender,
    settings: ServerSettings,
    validator: Arc<dyn QueryValidator>,
    listener: Option<TcpListener>,
}

impl HttpAdapterBuilder {
    pub fn settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validator(mut self, validator: Arc<dyn QueryValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Reuse an already bound listener instead of binding a new one.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<HttpAdapter, AdapterError> {
        let expanded = self.context.server_url_expanded();
        let base_url = Url::parse(expanded).map_err(|source| AdapterError::InvalidServerUrl {
            url: expanded.to_string(),
            source,
        })?;

        let shared = Shared {
            registry: ConnectionRegistry::new(self.settings.max_connections),
            context: self.context,
            validator: self.validator,
            events: self.events,
            base_url,
            connect_failure: OnceLock::new(),
        };

        Ok(HttpAdapter {
            shared: Arc::new(shared),
            settings: self.settings,
            listener: Mutex::new(self.listener),
            local_addr: OnceCell::new(),
            shutdown: CancellationToken::new(),
        })
    }
}

pub struct HttpAdapter {
    shared: Arc<Shared>,
    settings: ServerSettings,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceCell<SocketAddr>,
    shutdown: CancellationToken,
}

impl HttpAdapter {
    pub fn builder(context: Arc<GatewayContext>, events: EventSender) -> HttpAdapterBuilder {
        HttpAdapterBuilder {
            context,
            events,
            settings: ServerSettings::default(),
            validator: Arc::new(JsonSchemaValidator::new()),
            listener: None,
        }
    }

    /// Build an adapter with default settings and the JSON Schema validator.
    pub fn new(context: Arc<GatewayContext>, events: EventSender) -> Result<Self, AdapterError> {
        Self::builder(context, events).build()
    }

    /// Axum router serving every channel path.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_request)
            .with_state(self.shared.clone())
            .layer(DefaultBodyLimit::max(self.settings.max_body_bytes))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(self.settings.request_timeout_seconds),
            ))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.shared.registry
    }

    /// First request rejected because its channel is not declared.
    ///
    /// Later rejections never replace it.
    pub fn first_unknown_channel(&self) -> Option<&ErrorInfo> {
        self.shared.connect_failure.get()
    }

    /// Address of the running listener, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Stop accepting connections. In-flight requests are allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn start(&self) -> Result<SocketAddr, AdapterError> {
        let config = self
            .shared
            .context
            .resolve_protocol_config(HTTP_PROTOCOL)
            .await?;
        let options = HttpServerOptions::from_resolved(config.as_ref())?;

        let listener = match self.listener.lock().await.take() {
            Some(listener) => listener,
            None => {
                let port = options.bind_port(&self.shared.base_url);
                let address = format!("{}:{}", self.settings.host, port);
                TcpListener::bind(&address)
                    .await
                    .map_err(|source| AdapterError::Bind { address, source })?
            }
        };
        let local_addr = listener.local_addr()?;

        let app = self.router();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP listener stopped");
            }
        });

        let context = &self.shared.context;
        info!(
            server = %context.server_name(),
            address = %local_addr,
            channels = context.channel_names().len(),
            "HTTP adapter listening"
        );
        self.shared
            .emit(AdapterEvent::ServerReady(ServerReadyData {
                adapter: ADAPTER_NAME.to_string(),
                server: context.server_name().to_string(),
                address: local_addr.to_string(),
            }))
            .await;

        Ok(local_addr)
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &'static str {
        ADAPTER_NAME
    }

    fn context(&self) -> &GatewayContext {
        &self.shared.context
    }

    async fn connect(&self) -> Result<SocketAddr, AdapterError> {
        self.local_addr
            .get_or_try_init(|| self.start())
            .await
            .copied()
    }

    async fn send(&self, message: &Message) -> Result<BroadcastReport, AdapterError> {
        let report = self.shared.registry.broadcast(encode_payload(message.payload()));
        debug!(
            channel = %message.channel(),
            delivered = report.delivered,
            closed = report.closed,
            "Broadcast message"
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
