//! # Turn Sync
//!
//! Client-side turn synchronization and animation sequencing for a real-time,
//! server-authoritative board game.
//!
//! The server owns the game. It pushes full snapshots and discrete events
//! over one WebSocket per session; this crate turns that stream into an
//! *effective view* that never jumps ahead of the animation showing how the
//! state got there, and lets the local player arm an action before it is
//! legal.
//!
//! ## Core Modules
//!
//! - [`net`]: WebSocket connection, heartbeat, reconnect and wire protocol
//! - [`sync`]: reconciler, animation sequencer, pre-action queue, engine
//! - [`session`]: actor running the engine against a live connection
//! - [`game`]: typed snapshots and turn leases
//! - [`config`]: environment-driven configuration
//!
//! ## Example
//!
//! ```no_run
//! use turn_sync::{ConfigOverrides, SessionActor, SessionConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env(ConfigOverrides::default())?;
//! config.validate()?;
//! let (session, mut updates, _task) = SessionActor::spawn(config);
//! session.submit(turn_sync::ClientCommand::Roll).await?;
//! while let Some(update) = updates.recv().await {
//!     println!("{update:?}");
//! }
//! # Ok(())
//! # }
//! ```

/// Session configuration.
pub mod config;
pub use config::{ConfigError, ConfigOverrides, ConnectionConfig, PhaseTimings, SessionConfig};

/// Game data: snapshots, participants, cells, turn leases.
pub mod game;
pub use game::entities::{self, ParticipantId, Snapshot, TurnLease};

/// Networking components for the game session.
pub mod net;
pub use net::{
    connection::{ConnectionEvent, ConnectionHandle, ConnectionManager},
    errors::ConnectionError,
    messages::{self, ClientCommand, ServerMessage},
};

/// Session actor and its message types.
pub mod session;
pub use session::{Notice, Prompt, SessionActor, SessionError, SessionHandle, SessionUpdate};

/// Reconciliation, sequencing and pre-actions.
pub mod sync;
pub use sync::{EffectiveView, Phase, PreActionKind, TurnEngine};
