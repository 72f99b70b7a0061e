//! Session actor tying the connection to the turn engine.
//!
//! The actor runs in its own Tokio task. It owns the [`TurnEngine`], feeds it
//! connection events and render-layer intents from one `select!` loop, wakes
//! up on the engine's next animation deadline, and publishes the effective
//! view on a `watch` channel.
//!
//! [`TurnEngine`]: crate::sync::TurnEngine

pub mod actor;
pub mod messages;

pub use actor::{SessionActor, SessionHandle};
pub use messages::{Notice, Prompt, SessionError, SessionMessage, SessionUpdate};
