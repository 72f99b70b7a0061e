//! Integration tests for the WebSocket connection against a local server.
//!
//! Tests the handshake, heartbeat filtering, reconnect after a server-side
//! close and teardown.

use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{Duration, timeout},
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
        http::header::AUTHORIZATION,
    },
};
use turn_sync::{ClientCommand, ConnectionConfig, ConnectionEvent, ConnectionManager, ServerMessage};

/// What the server saw in one handshake: request path with query, and the
/// bearer header.
type Handshake = (String, Option<String>);

fn config(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        endpoint: format!("ws://127.0.0.1:{port}"),
        game_id: "G1".to_string(),
        participant_id: "a".to_string(),
        token: "secret".to_string(),
        heartbeat_interval: Duration::from_secs(30),
        reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
    }
}

async fn accept(
    listener: &TcpListener,
    seen: &mpsc::UnboundedSender<Handshake>,
) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let seen = seen.clone();
    accept_hdr_async(stream, move |request: &Request, response: Response| {
        let auth = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let _ = seen.send((request.uri().to_string(), auth));
        Ok::<_, ErrorResponse>(response)
    })
    .await
    .unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

fn error(message: &str) -> ServerMessage {
    ServerMessage::Error {
        message: message.to_string(),
    }
}

#[tokio::test]
async fn test_connect_filter_heartbeat_and_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_tx, mut seen) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, &seen_tx).await;
        ws.send(Message::text(r#"{"type":"PONG"}"#)).await.unwrap();
        ws.send(Message::text(r#"{"type":"ERROR","message":"first"}"#))
            .await
            .unwrap();

        let frame = ws.next().await.unwrap().unwrap();
        assert_eq!(frame.into_text().unwrap().as_str(), r#"{"action":"ROLL"}"#);
        ws.close(None).await.unwrap();

        let mut ws = accept(&listener, &seen_tx).await;
        ws.send(Message::text(r#"{"type":"ERROR","message":"second"}"#))
            .await
            .unwrap();
        // Keep the socket open until the client tears down.
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
    });

    let (handle, mut events, task) = ConnectionManager::spawn(config(port));

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Opened { reconnect: false }
    );
    // The heartbeat reply never reaches the consumer.
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Message(error("first"))
    );

    handle.send(ClientCommand::Roll).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Closed { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Opened { reconnect: true }
    );
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Message(error("second"))
    );

    handle.teardown();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::TornDown);
    task.await.unwrap();
    server.await.unwrap();

    for _ in 0..2 {
        let (path, auth) = seen.recv().await.unwrap();
        assert_eq!(path, "/ws/G1?player_id=a&token=secret");
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
    }
    assert!(handle.send(ClientCommand::Roll).is_err());
}

#[tokio::test]
async fn test_unreachable_server_reports_closed_and_retries() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (handle, mut events, task) = ConnectionManager::spawn(config(port));

    for _ in 0..2 {
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Closed { .. }
        ));
    }

    handle.teardown();
    loop {
        if next_event(&mut events).await == ConnectionEvent::TornDown {
            break;
        }
    }
    task.await.unwrap();
}
