//! Client-side turn synchronization.
//!
//! This module implements:
//! - Reconciler: authoritative snapshot vs. effective view, participant holds
//! - Sequencer: per-participant animation lanes driven by a phase table
//! - PreActionQueue: single-slot armed action, re-validated before it fires
//! - TurnEngine: composes the three and emits commands, notices and prompts
//!
//! ## Ownership of the effective view
//!
//! Only two paths write a participant's projection: a snapshot applied while
//! that participant has no animation in flight, and the sequencer's commit
//! when its sequence enters the movement phase. Everything else goes through
//! the engine as an intent.

pub mod engine;
pub mod pre_action;
pub mod reconciler;
pub mod sequencer;
pub mod view;

pub use engine::{EngineOutput, TurnEngine};
pub use pre_action::{PreActionError, PreActionKind, PreActionQueue, Staleness};
pub use reconciler::{CommitBasis, Reconciler, Stamped};
pub use sequencer::{Animation, Choreography, Phase, Sequencer, SequencerEffect};
pub use view::{ActionLocks, Connectivity, EffectiveView};
