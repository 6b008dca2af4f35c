//! End-to-end tests against a real listener on an ephemeral port.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use portico::config::{ConfigValue, ServerSettings};
use portico::{
    Adapter, AdapterEvent, ApiDocument, ErrorKind, GatewayContext, HttpAdapter, Message,
    OutboundRequest,
};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const DOC: &str = r#"
asyncapi: 2.6.0
info:
  title: Orders
  version: 1.0.0
servers:
  local:
    url: http://127.0.0.1:{port}
    protocol: http
channels:
  orders:
    publish:
      message: {}
    bindings:
      http:
        method: POST
        query:
          type: object
          required: [id]
          properties:
            id:
              type: string
"#;

fn context(protocols: HashMap<String, ConfigValue>) -> Arc<GatewayContext> {
    let doc = ApiDocument::from_yaml_str(DOC).unwrap();
    let vars = vec![portico::config::ServerVariable::new("local", "port", "1")];
    Arc::new(GatewayContext::new("local", Arc::new(doc), &vars, protocols).unwrap())
}

fn local_settings() -> ServerSettings {
    ServerSettings {
        host: "127.0.0.1".to_string(),
        request_timeout_seconds: 10,
        ..ServerSettings::default()
    }
}

/// Reply to every inbound message with `reply`, forwarding events to the test.
fn spawn_router(
    adapter: Arc<HttpAdapter>,
    mut rx: mpsc::Receiver<AdapterEvent>,
    reply: &'static str,
) -> mpsc::UnboundedReceiver<AdapterEvent> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let AdapterEvent::Message(ref data) = event {
                adapter
                    .send(&Message::new(data.message.channel(), json!(reply)))
                    .await
                    .unwrap();
            }
            let _ = seen_tx.send(event);
        }
    });
    seen_rx
}

#[tokio::test]
async fn orders_scenario_over_real_listener() {
    let mut protocols = HashMap::new();
    protocols.insert(
        "http".to_string(),
        ConfigValue::from_json(json!({"server": {"port": 0}})),
    );
    let (tx, rx) = mpsc::channel(16);
    let adapter = Arc::new(
        HttpAdapter::builder(context(protocols), tx)
            .settings(local_settings())
            .build()
            .unwrap(),
    );

    let addr = adapter.connect().await.unwrap();
    assert_eq!(adapter.connect().await.unwrap(), addr);
    assert_eq!(adapter.local_addr(), Some(addr));

    let mut seen = spawn_router(adapter.clone(), rx, "ok");
    match seen.recv().await.unwrap() {
        AdapterEvent::ServerReady(data) => {
            assert_eq!(data.server, "local");
            assert_eq!(data.address, addr.to_string());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let accepted = client
        .post(format!("{base}/orders?id=42"))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::OK);
    assert_eq!(accepted.text().await.unwrap(), "ok");

    assert!(matches!(seen.recv().await.unwrap(), AdapterEvent::Connect(_)));
    match seen.recv().await.unwrap() {
        AdapterEvent::Message(data) => {
            assert_eq!(data.message.channel(), "orders");
            assert_eq!(data.message.payload(), &json!({"id": "42"}));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let wrong_method = client.get(format!("{base}/orders?id=42")).send().await.unwrap();
    assert_eq!(wrong_method.status(), reqwest::StatusCode::BAD_REQUEST);
    match seen.recv().await.unwrap() {
        AdapterEvent::Error(info) => assert_eq!(info.kind, ErrorKind::MethodNotAllowed),
        other => panic!("unexpected event: {other:?}"),
    }

    let missing_id = client.post(format!("{base}/orders")).send().await.unwrap();
    assert_eq!(missing_id.status(), reqwest::StatusCode::BAD_REQUEST);
    match seen.recv().await.unwrap() {
        AdapterEvent::Error(info) => {
            assert_eq!(info.kind, ErrorKind::InvalidQuery);
            assert!(info.errors.iter().any(|e| e.message.contains("id")));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let unknown = client.get(format!("{base}/refunds")).send().await.unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
    match seen.recv().await.unwrap() {
        AdapterEvent::Error(info) => {
            assert_eq!(info.kind, ErrorKind::UnknownChannel);
            assert_eq!(info.channel.as_deref(), Some("refunds"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The listener keeps serving after rejections.
    let again = client
        .post(format!("{base}/orders?id=43"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), reqwest::StatusCode::OK);
    assert!(adapter.registry().is_empty());

    adapter.shutdown();
}

#[tokio::test]
async fn reuses_preexisting_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let expected = listener.local_addr().unwrap();

    let (tx, rx) = mpsc::channel(16);
    let adapter = Arc::new(
        HttpAdapter::builder(context(HashMap::new()), tx)
            .settings(local_settings())
            .listener(listener)
            .build()
            .unwrap(),
    );
    let addr = adapter.connect().await.unwrap();
    assert_eq!(addr, expected);

    let _seen = spawn_router(adapter.clone(), rx, "reused");
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/orders?id=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "reused");

    adapter.shutdown();
}

#[tokio::test]
async fn shutdown_stops_accepting_connections() {
    let (tx, _rx) = mpsc::channel(16);
    let adapter = HttpAdapter::builder(context(HashMap::new()), tx)
        .settings(local_settings())
        .listener(TcpListener::bind("127.0.0.1:0").await.unwrap())
        .build()
        .unwrap();
    let addr = adapter.connect().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_ok());

    adapter.shutdown();

    let mut refused = false;
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "listener still accepting after shutdown");
}

#[tokio::test]
async fn outbound_request_reaches_adapter() {
    // The port is a deferred leaf nested under `server`.
    let mut server = BTreeMap::new();
    server.insert(
        "port".to_string(),
        ConfigValue::deferred(|| async { Ok(json!("0")) }),
    );
    let mut http = BTreeMap::new();
    http.insert("server".to_string(), ConfigValue::Object(server));
    let mut protocols = HashMap::new();
    protocols.insert("http".to_string(), ConfigValue::Object(http));

    let (tx, rx) = mpsc::channel(16);
    let ctx = context(protocols);
    let adapter = Arc::new(
        HttpAdapter::builder(ctx.clone(), tx)
            .settings(local_settings())
            .build()
            .unwrap(),
    );
    let addr = adapter.connect().await.unwrap();
    let mut seen = spawn_router(adapter.clone(), rx, "pong");

    let request = OutboundRequest::new("post", format!("http://{addr}/orders")).with_query("id", "7");
    let status = ctx.outbound().execute(&request).await.unwrap();
    assert_eq!(status, reqwest::StatusCode::OK);

    let handle = ctx.dispatch(
        OutboundRequest::new("POST", format!("http://{addr}/orders")).with_query("id", "8"),
    );
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let mut ids = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(500), seen.recv()).await {
        if let AdapterEvent::Message(data) = event {
            ids.push(data.message.payload()["id"].clone());
        }
    }
    assert_eq!(ids, vec![json!("7"), json!("8")]);

    adapter.shutdown();
}
