use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::memory::{MemoryConnector, WireOp};
use super::*;

fn recording_handler() -> (InboundHandler, Arc<Mutex<Vec<(String, Bytes)>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let handler: InboundHandler = Arc::new(move |topic: &str, payload: Bytes| {
        sink.lock().push((topic.to_string(), payload));
    });
    (handler, received)
}

#[test]
fn test_connect_options_defaults() {
    let options = ConnectOptions::new("wss://broker.example/mqtt").with_username("alice");
    assert_eq!(options.url, "wss://broker.example/mqtt");
    assert_eq!(options.username.as_deref(), Some("alice"));
    assert_eq!(options.keep_alive, 60);
    assert!(options.use_existing_reconnect);
    assert!(options.reconnect_interval <= options.max_reconnect_interval);
}

#[test]
fn test_generated_client_ids_are_unique() {
    let a = generate_client_id();
    let b = generate_client_id();
    assert!(a.starts_with("secretmq-"));
    assert_eq!(a.len(), "secretmq-".len() + 12);
    assert_ne!(a, b);
}

#[test]
fn test_client_error_from_transport() {
    let e: ClientError = crate::transport::TransportError::Timeout.into();
    assert!(matches!(e, ClientError::Timeout));

    let e: ClientError = crate::transport::TransportError::InvalidUrl("x".into()).into();
    assert!(matches!(e, ClientError::InvalidUrl(_)));
    assert_eq!(e.to_string(), "Invalid URL: x");
}

#[tokio::test]
async fn test_memory_client_records_operations() {
    let connector = MemoryConnector::new();
    let (handler, _) = recording_handler();
    let client = connector
        .connect(&ConnectOptions::default(), handler)
        .await
        .unwrap();
    assert!(client.is_connected());

    client.subscribe("k/a").await.unwrap();
    client.publish("k/b", Bytes::from_static(b"1")).await.unwrap();
    client.unsubscribe("k/a").await.unwrap();

    let memory = connector.last_client().unwrap();
    assert_eq!(
        memory.ops(),
        vec![
            WireOp::Subscribe("k/a".into()),
            WireOp::Publish("k/b".into(), Bytes::from_static(b"1")),
            WireOp::Unsubscribe("k/a".into()),
        ]
    );
    assert!(memory.subscriptions().is_empty());
}

#[tokio::test]
async fn test_memory_client_echoes_own_subscriptions() {
    let connector = MemoryConnector::new();
    let (handler, received) = recording_handler();
    let client = connector
        .connect(&ConnectOptions::default(), handler)
        .await
        .unwrap();

    client.subscribe("k/echo").await.unwrap();
    client.publish("k/echo", Bytes::from_static(b"x")).await.unwrap();
    client.publish("k/other", Bytes::from_static(b"y")).await.unwrap();

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "k/echo");
}

#[tokio::test]
async fn test_memory_client_not_connected() {
    let connector = MemoryConnector::new();
    let (handler, _) = recording_handler();
    let client = connector
        .connect(&ConnectOptions::default(), handler)
        .await
        .unwrap();
    let memory = connector.last_client().unwrap();

    memory.drop_connection();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.subscribe("t").await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.publish("t", Bytes::new()).await,
        Err(ClientError::NotConnected)
    ));

    memory.refuse_reconnect(true);
    assert!(client.reconnect().await.is_err());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    memory.refuse_reconnect(false);
    client.reconnect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_memory_client_watch_sees_reconnect() {
    let connector = MemoryConnector::new();
    let (handler, _) = recording_handler();
    let client = connector
        .connect(&ConnectOptions::default(), handler)
        .await
        .unwrap();
    let memory = connector.last_client().unwrap();

    let mut rx = client.watch_state();
    memory.drop_connection();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ConnectionState::Disconnected);

    memory.restore_connection();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_memory_connector_refusal() {
    let connector = MemoryConnector::new();
    connector.refuse_connections(true);
    let (handler, _) = recording_handler();
    let result = connector.connect(&ConnectOptions::default(), handler).await;
    assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_same_client_identity() {
    let connector = MemoryConnector::new();
    let (handler, _) = recording_handler();
    let a = connector
        .connect(&ConnectOptions::default(), handler.clone())
        .await
        .unwrap();
    let b = connector
        .connect(&ConnectOptions::default(), handler)
        .await
        .unwrap();

    assert!(same_client(&a, &a.clone()));
    assert!(!same_client(&a, &b));
}

#[tokio::test]
async fn test_ws_connector_invalid_url() {
    let (handler, _) = recording_handler();
    let result = WsConnector::new()
        .connect(&ConnectOptions::new("not a url"), handler)
        .await;
    assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
}

#[tokio::test]
async fn test_ws_connector_unreachable_broker() {
    // Bind then drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut options = ConnectOptions::new(format!("ws://127.0.0.1:{}/mqtt", port));
    options.connect_timeout = Duration::from_secs(2);

    let (handler, _) = recording_handler();
    let result = WsConnector::new().connect(&options, handler).await;
    assert!(matches!(
        result,
        Err(ClientError::ConnectionFailed(_)) | Err(ClientError::Timeout)
    ));
}

#[tokio::test]
async fn test_ws_connector_tls_handshake_stall_is_an_error() {
    // Accepts TCP but never answers the TLS ClientHello
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut options = ConnectOptions::new(format!("wss://127.0.0.1:{}/mqtt", port));
    options.connect_timeout = Duration::from_millis(300);

    let (handler, _) = recording_handler();
    let attempt = tokio::spawn(async move { WsConnector::new().connect(&options, handler).await });
    let result = attempt.await.expect("connect must not panic");
    assert!(matches!(
        result,
        Err(ClientError::Timeout) | Err(ClientError::ConnectionFailed(_))
    ));

    server.abort();
}
