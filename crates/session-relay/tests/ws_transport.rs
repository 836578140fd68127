//! WebSocket transport tests against a local tokio-tungstenite server.
//!
//! These run on real sockets and the wall clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use session_relay::{
    Connector, SessionClient, SessionClientConfig, SessionStatus, StaticCredentials,
    TransportEvent, WsConnector,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use url::Url;

const WAIT: Duration = Duration::from_secs(10);

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.to_string())
}

async fn accept_ws(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_message(server: &mut WebSocketStream<TcpStream>) -> Option<Message> {
    timeout(WAIT, server.next())
        .await
        .expect("timed out waiting for client frame")
        .map(|m| m.unwrap())
}

async fn connect_pair(
    listener: &TcpListener,
    addr: &str,
) -> (session_relay::Connection, WebSocketStream<TcpStream>) {
    let url = Url::parse(&format!("ws://{}/ws/sessions/abc", addr)).unwrap();
    let connector = WsConnector::new();
    let (client, server) = tokio::join!(connector.connect(&url), accept_ws(listener));
    (client.unwrap(), server)
}

#[tokio::test]
async fn test_text_frames_flow_both_ways() {
    let (listener, addr) = listen().await;
    let (connection, mut server) = connect_pair(&listener, &addr).await;
    let (sender, mut events) = connection.into_parts();

    sender.send_text(r#"{"type":"auth"}"#.to_string()).await.unwrap();
    match next_message(&mut server).await {
        Some(Message::Text(text)) => assert_eq!(text.as_str(), r#"{"type":"auth"}"#),
        other => panic!("unexpected frame: {:?}", other),
    }

    server
        .send(Message::Text(r#"{"type":"pong"}"#.into()))
        .await
        .unwrap();
    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(TransportEvent::Message(r#"{"type":"pong"}"#.to_string()))
    );
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (listener, addr) = listen().await;
    let (connection, mut server) = connect_pair(&listener, &addr).await;
    let (_sender, _events) = connection.into_parts();

    server.send(Message::Ping(vec![7, 8, 9].into())).await.unwrap();
    match next_message(&mut server).await {
        Some(Message::Pong(payload)) => assert_eq!(&payload[..], &[7u8, 8, 9][..]),
        other => panic!("expected pong, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_close_is_reported_once() {
    let (listener, addr) = listen().await;
    let (connection, mut server) = connect_pair(&listener, &addr).await;
    let (_sender, mut events) = connection.into_parts();

    server.close(None).await.unwrap();

    assert_eq!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Some(TransportEvent::Closed)
    );
    assert_eq!(timeout(WAIT, events.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn test_dropping_client_sends_close() {
    let (listener, addr) = listen().await;
    let (connection, mut server) = connect_pair(&listener, &addr).await;

    drop(connection);

    match next_message(&mut server).await {
        Some(Message::Close(_)) => {}
        other => panic!("expected close, got {:?}", other),
    }
}

/// TCP listener that accepts and immediately drops every connection.
async fn dropping_listener() -> (String, Arc<AtomicUsize>) {
    let (listener, addr) = listen().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    (addr, accepts)
}

#[tokio::test]
async fn test_wss_handshake_failure_is_an_error() {
    let (addr, accepts) = dropping_listener().await;
    let url = Url::parse(&format!("wss://{}/ws/sessions/abc", addr)).unwrap();

    let result = timeout(WAIT, WsConnector::new().connect(&url)).await.unwrap();
    assert!(result.is_err());
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_https_base_keeps_reconnecting() {
    let (addr, accepts) = dropping_listener().await;
    let client = SessionClient::with_websocket(
        SessionClientConfig {
            api_base_url: format!("https://{}", addr),
            reconnect_delay_secs: 1,
            ..SessionClientConfig::default()
        },
        Arc::new(StaticCredentials::anonymous()),
    );
    let mut updates = client.subscribe();
    client.attach(Some("abc")).await.unwrap();

    timeout(
        WAIT,
        updates.wait_for(|s| s.state.status == SessionStatus::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();

    timeout(WAIT, async {
        while accepts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("no reconnect attempt after a failed wss handshake");

    client.release().await.unwrap();
}

#[tokio::test]
async fn test_session_client_over_websocket() {
    let (listener, addr) = listen().await;
    let client = SessionClient::with_websocket(
        SessionClientConfig {
            api_base_url: format!("http://{}", addr),
            ..SessionClientConfig::default()
        },
        Arc::new(StaticCredentials::new("token-ws")),
    );
    let mut updates = client.subscribe();
    client.attach(Some("abc")).await.unwrap();

    let mut server = timeout(WAIT, accept_ws(&listener)).await.unwrap();
    match next_message(&mut server).await {
        Some(Message::Text(text)) => assert!(text.as_str().contains("token-ws")),
        other => panic!("expected auth, got {:?}", other),
    }

    server
        .send(Message::Text(
            r#"{"type":"round_message","round_number":1,"speaker":"A","content":"hi"}"#.into(),
        ))
        .await
        .unwrap();
    server
        .send(Message::Text(
            r#"{"type":"completed","scores":{"a":7,"b":8}}"#.into(),
        ))
        .await
        .unwrap();

    let snapshot = timeout(
        WAIT,
        updates.wait_for(|s| s.state.status == SessionStatus::Completed),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert!(snapshot.connected);
    assert_eq!(snapshot.state.messages.len(), 1);
    assert_eq!(snapshot.state.scores.unwrap().get("b"), Some(8.0));

    client.release().await.unwrap();
}
