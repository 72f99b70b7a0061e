//! Game data as the server describes it: snapshots, participants, board
//! cells and turn leases.
//!
//! Nothing in here encodes game rules. Legality and scoring are decided
//! server-side; this module only gives the pushed state a typed shape and a
//! few read-only helpers.

pub mod entities;

pub use entities::{
    CellIndex, CellState, GameStatus, Money, ParticipantId, ParticipantState, PaymentKind,
    PendingPayment, PurchaseOffer, Snapshot, TradeOffer, TradeStatus, TurnLease, TurnState,
};
