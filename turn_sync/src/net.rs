//! Networking layer for the game session.
//!
//! One persistent WebSocket per game, JSON messages in both directions.
//! [`connection`] drives the socket, [`lifecycle`] holds the timer and
//! socket bookkeeping it relies on, and [`messages`] defines the protocol.

/// WebSocket connection task and its handle.
pub mod connection;

/// Connection error types.
pub mod errors;

/// Socket, heartbeat and reconnect bookkeeping.
pub mod lifecycle;

/// Commands sent to the server and messages received from it.
pub mod messages;
