//! Persistent WebSocket connection for one game session.
//!
//! A [`ConnectionManager`] task owns the socket. It connects, sends a
//! heartbeat on a fixed interval, reconnects after a fixed delay when the
//! socket drops, and stops for good on teardown. Inbound messages are
//! forwarded in arrival order on a single channel; heartbeat replies are
//! filtered out before they get there.

use super::{
    errors::{ConnectionError, Result},
    lifecycle::{Lifecycle, LifecycleAction, SocketId},
    messages::{ClientCommand, ServerMessage},
};
use crate::config::ConnectionConfig;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
    time::{Duration, Instant, sleep_until, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the inbound event channel.
const EVENT_BUFFER: usize = 256;

/// Something that happened on the connection, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A socket opened. `reconnect` is set for every open after the first.
    Opened { reconnect: bool },
    /// A message from the server.
    Message(ServerMessage),
    /// The socket closed or a connect attempt failed. A reconnect is pending.
    Closed { reason: String },
    /// The session was torn down and will not reconnect.
    TornDown,
}

#[derive(Debug)]
enum ConnectionCommand {
    Send(ClientCommand),
    Teardown,
}

/// Handle for sending commands to the connection task
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
}

impl ConnectionHandle {
    /// Enqueue a command. Fire-and-forget: delivery is not confirmed and
    /// commands issued while disconnected are dropped.
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands
            .send(ConnectionCommand::Send(command))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Close the socket and cancel all timers. Never reconnects afterwards.
    pub fn teardown(&self) {
        let _ = self.commands.send(ConnectionCommand::Teardown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

struct LiveSocket {
    id: SocketId,
    writer: SplitSink<Socket, Message>,
    reader: SplitStream<Socket>,
}

/// Connection task state
pub struct ConnectionManager {
    config: ConnectionConfig,
    lifecycle: Lifecycle,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    events: mpsc::Sender<ConnectionEvent>,
    socket: Option<LiveSocket>,
}

impl ConnectionManager {
    /// Create a connection manager
    ///
    /// # Returns
    ///
    /// * `(ConnectionManager, ConnectionHandle, Receiver)` - Task state, command handle and event stream
    pub fn new(
        config: ConnectionConfig,
    ) -> (Self, ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(EVENT_BUFFER);
        let lifecycle = Lifecycle::new(
            config.heartbeat_interval,
            config.reconnect_delay,
            Instant::now(),
        );

        let manager = Self {
            config,
            lifecycle,
            commands,
            events,
            socket: None,
        };

        (manager, ConnectionHandle { commands: command_tx }, event_rx)
    }

    /// Create a connection manager and run it on the current runtime.
    pub fn spawn(
        config: ConnectionConfig,
    ) -> (
        ConnectionHandle,
        mpsc::Receiver<ConnectionEvent>,
        JoinHandle<()>,
    ) {
        let (manager, handle, events) = Self::new(config);
        let task = tokio::spawn(manager.run());
        (handle, events, task)
    }

    /// Run the connection event loop until teardown or until the event
    /// receiver is dropped.
    pub async fn run(mut self) {
        log::info!(
            "Connection for game {} as {} starting",
            self.config.game_id,
            self.config.participant_id
        );

        loop {
            if !self.run_due_actions().await {
                break;
            }

            let deadline = self.lifecycle.next_deadline();
            let sleep = sleep_until(deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKE));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ConnectionCommand::Send(command)) => self.write(command).await,
                    Some(ConnectionCommand::Teardown) | None => {
                        self.shutdown().await;
                        break;
                    }
                },

                frame = next_frame(&mut self.socket) => {
                    if !self.handle_frame(frame).await {
                        break;
                    }
                }

                _ = sleep, if deadline.is_some() => {}
            }
        }

        log::info!("Connection for game {} stopped", self.config.game_id);
    }

    /// Perform every lifecycle action that is due. Returns false once the
    /// event consumer is gone.
    async fn run_due_actions(&mut self) -> bool {
        while let Some(action) = self.lifecycle.poll(Instant::now()) {
            match action {
                LifecycleAction::Connect => {
                    if !self.connect().await {
                        return false;
                    }
                }
                LifecycleAction::Heartbeat => self.write(ClientCommand::Ping).await,
            }
        }
        true
    }

    async fn connect(&mut self) -> bool {
        let reconnect = self.lifecycle.is_reconnect();
        match self.open().await {
            Ok(stream) => {
                let (id, replaced) = self.lifecycle.on_open(Instant::now());
                if let Some(old) = replaced {
                    log::warn!("Replacing live socket {old} with {id}");
                }
                if let Some(mut previous) = self.socket.take() {
                    let _ = previous.writer.close().await;
                }
                let (writer, reader) = stream.split();
                self.socket = Some(LiveSocket { id, writer, reader });
                log::info!(
                    "Connected to game {} (socket {id}, reconnect: {reconnect})",
                    self.config.game_id
                );
                self.emit(ConnectionEvent::Opened { reconnect }).await
            }
            Err(e) => {
                log::warn!(
                    "Connect attempt {} failed: {e}",
                    self.lifecycle.failures() + 1
                );
                self.lifecycle.on_close(None, Instant::now());
                self.emit(ConnectionEvent::Closed {
                    reason: e.to_string(),
                })
                .await
            }
        }
    }

    async fn open(&self) -> Result<Socket> {
        let request = handshake_request(&self.config)?;
        let (stream, _) = timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))??;
        Ok(stream)
    }

    async fn write(&mut self, command: ClientCommand) {
        let Some(socket) = self.socket.as_mut() else {
            log::warn!("Dropping {command}: not connected");
            return;
        };
        let text = match serde_json::to_string(&command) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode {command}: {e}");
                return;
            }
        };
        if let Err(e) = socket.writer.send(Message::Text(text.into())).await {
            log::warn!("Send on socket {} failed: {e}", socket.id);
            let id = socket.id;
            let _ = self.close(id, e.to_string()).await;
        }
    }

    /// Returns false once the event consumer is gone.
    async fn handle_frame(
        &mut self,
        frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> bool {
        let Some(id) = self.socket.as_ref().map(|s| s.id) else {
            return true;
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::Pong) => {
                        log::trace!("Heartbeat acknowledged on socket {id}");
                        true
                    }
                    Ok(message) => self.emit(ConnectionEvent::Message(message)).await,
                    Err(e) => {
                        log::warn!("Dropping malformed frame on socket {id}: {e}");
                        true
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("closed by server ({}): {}", f.code, f.reason.as_str()))
                    .unwrap_or_else(|| "closed by server".to_string());
                self.close(id, reason).await
            }
            Some(Ok(_)) => true,
            Some(Err(e)) => self.close(id, e.to_string()).await,
            None => self.close(id, "stream ended".to_string()).await,
        }
    }

    async fn close(&mut self, id: SocketId, reason: String) -> bool {
        log::info!("Socket {id} closed: {reason}");
        self.socket = None;
        self.lifecycle.on_close(Some(id), Instant::now());
        self.emit(ConnectionEvent::Closed { reason }).await
    }

    async fn shutdown(&mut self) {
        self.lifecycle.teardown();
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.writer.close().await;
        }
        log::info!("Connection for game {} torn down", self.config.game_id);
        let _ = self.events.send(ConnectionEvent::TornDown).await;
    }

    async fn emit(&mut self, event: ConnectionEvent) -> bool {
        if self.events.send(event).await.is_err() {
            log::debug!("Event consumer dropped, stopping connection");
            self.shutdown().await;
            return false;
        }
        true
    }
}

/// Wake-up interval when no timer is pending.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

async fn next_frame(
    socket: &mut Option<LiveSocket>,
) -> Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.reader.next().await,
        None => std::future::pending().await,
    }
}

/// Build the handshake request for a session. The game is a path segment;
/// the participant and identity token go in the query string, and the token
/// is repeated in the `Authorization` header.
pub fn handshake_request(config: &ConnectionConfig) -> Result<Request> {
    let invalid = |reason: String| ConnectionError::InvalidEndpoint {
        endpoint: config.endpoint.clone(),
        reason,
    };

    let mut url = Url::parse(&config.endpoint).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("endpoint cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(["ws", config.game_id.as_str()]);
    url.query_pairs_mut()
        .append_pair("player_id", &config.participant_id)
        .append_pair("token", &config.token);

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| invalid(format!("token is not a valid header value: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    Ok(request)
}
