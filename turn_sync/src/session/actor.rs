//! Session actor implementation with async message handling.

use super::messages::{SessionError, SessionMessage, SessionUpdate};
use crate::{
    config::SessionConfig,
    game::entities::ParticipantId,
    net::{
        connection::{ConnectionEvent, ConnectionHandle, ConnectionManager},
        messages::ClientCommand,
    },
    sync::{
        engine::{EngineOutput, TurnEngine},
        pre_action::PreActionKind,
        view::EffectiveView,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Duration, Instant, sleep_until},
};

/// Capacity of the session inbox.
const INBOX_BUFFER: usize = 64;

/// Wake-up interval when nothing is animating.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Session actor handle for sending messages
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    view: watch::Receiver<EffectiveView>,
}

impl SessionHandle {
    /// Send a message to the session
    pub async fn send(&self, message: SessionMessage) -> Result<(), SessionError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Send a command to the server, subject to the local locks.
    pub async fn submit(&self, command: ClientCommand) -> Result<(), SessionError> {
        let (response, rx) = oneshot::channel();
        self.send(SessionMessage::Submit { command, response }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Arm an action to fire when it becomes legal.
    pub async fn arm(&self, kind: PreActionKind) -> Result<(), SessionError> {
        let (response, rx) = oneshot::channel();
        self.send(SessionMessage::Arm { kind, response }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn disarm(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Disarm).await
    }

    pub async fn render_ack(&self, participant: ParticipantId) -> Result<(), SessionError> {
        self.send(SessionMessage::RenderAck { participant }).await
    }

    /// Tear the connection down. The actor stops once the socket is closed.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.send(SessionMessage::Leave).await
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<EffectiveView> {
        self.view.clone()
    }

    pub fn current_view(&self) -> EffectiveView {
        self.view.borrow().clone()
    }
}

/// Session actor driving one game session
pub struct SessionActor {
    /// Turn engine
    engine: TurnEngine,

    /// Message inbox
    inbox: mpsc::Receiver<SessionMessage>,

    /// Outbound side of the connection
    connection: ConnectionHandle,

    /// Connection events in arrival order
    events: mpsc::Receiver<ConnectionEvent>,

    /// Published effective view
    view: watch::Sender<EffectiveView>,

    /// Notices, prompts and prompt resets for the render layer
    updates: mpsc::UnboundedSender<SessionUpdate>,

    /// Leave was requested; waiting for the connection to close
    leaving: bool,
}

impl SessionActor {
    /// Create a session actor over an existing connection
    ///
    /// # Arguments
    ///
    /// * `config` - Session configuration
    /// * `connection` - Handle used to send commands
    /// * `events` - Events produced by the same connection
    ///
    /// # Returns
    ///
    /// * `(SessionActor, SessionHandle, UnboundedReceiver)` - Actor, handle and update stream
    pub fn new(
        config: &SessionConfig,
        connection: ConnectionHandle,
        events: mpsc::Receiver<ConnectionEvent>,
    ) -> (
        Self,
        SessionHandle,
        mpsc::UnboundedReceiver<SessionUpdate>,
    ) {
        let (sender, inbox) = mpsc::channel(INBOX_BUFFER);
        let (updates, update_rx) = mpsc::unbounded_channel();
        let engine = TurnEngine::new(
            ParticipantId::new(&config.connection.participant_id),
            config.timings,
            config.await_render_ack,
        );
        let (view, view_rx) = watch::channel(engine.view());

        let actor = Self {
            engine,
            inbox,
            connection,
            events,
            view,
            updates,
            leaving: false,
        };
        let handle = SessionHandle {
            sender,
            view: view_rx,
        };

        (actor, handle, update_rx)
    }

    /// Connect and run a session on the current runtime.
    pub fn spawn(
        config: SessionConfig,
    ) -> (
        SessionHandle,
        mpsc::UnboundedReceiver<SessionUpdate>,
        JoinHandle<()>,
    ) {
        let (connection, events, connection_task) =
            ConnectionManager::spawn(config.connection.clone());
        let (actor, handle, updates) = Self::new(&config, connection, events);
        let task = tokio::spawn(async move {
            actor.run().await;
            if let Err(e) = connection_task.await {
                log::error!("Connection task failed: {e}");
            }
        });
        (handle, updates, task)
    }

    /// Run the session event loop until the connection is torn down
    pub async fn run(mut self) {
        log::info!("Session for {} starting", self.engine.local());

        loop {
            let deadline = self.engine.next_deadline();
            let sleep = sleep_until(deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKE));

            tokio::select! {
                message = self.inbox.recv(), if !self.leaving => match message {
                    Some(message) => self.handle_message(message),
                    None => self.leave(),
                },

                event = self.events.recv() => match event {
                    Some(ConnectionEvent::TornDown) | None => {
                        self.engine
                            .on_connection_event(ConnectionEvent::TornDown, Instant::now());
                        self.flush();
                        break;
                    }
                    Some(event) => self.engine.on_connection_event(event, Instant::now()),
                },

                _ = sleep, if deadline.is_some() => self.engine.tick(Instant::now()),
            }

            self.flush();
        }

        log::info!("Session for {} stopped", self.engine.local());
    }

    fn handle_message(&mut self, message: SessionMessage) {
        let now = Instant::now();
        match message {
            SessionMessage::Submit { command, response } => {
                let _ = response.send(self.engine.submit(command, now));
            }
            SessionMessage::Arm { kind, response } => {
                let _ = response.send(self.engine.arm(kind, now));
            }
            SessionMessage::Disarm => {
                if self.engine.disarm() {
                    log::info!("Armed action cleared");
                }
            }
            SessionMessage::RenderAck { participant } => {
                self.engine.render_ack(&participant, now);
            }
            SessionMessage::Leave => self.leave(),
        }
    }

    fn leave(&mut self) {
        if !self.leaving {
            log::info!("Leaving session");
            self.leaving = true;
            self.connection.teardown();
        }
    }

    /// Forward engine outputs and publish the view if it changed.
    fn flush(&mut self) {
        for output in self.engine.drain_outputs() {
            match output {
                EngineOutput::Send(command) => {
                    if let Err(e) = self.connection.send(command) {
                        log::warn!("Dropping command: {e}");
                    }
                }
                EngineOutput::Update(update) => {
                    let _ = self.updates.send(update);
                }
            }
        }

        let view = self.engine.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}
