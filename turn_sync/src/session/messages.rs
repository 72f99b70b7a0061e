//! Session actor message types.

use crate::{
    game::entities::{CellIndex, Money, ParticipantId, PaymentKind, TradeOffer},
    net::{
        errors::ConnectionError,
        messages::{AbilityKind, ClientCommand},
    },
    sync::pre_action::{PreActionError, PreActionKind, Staleness},
};
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;

/// Messages that can be sent to a SessionActor
#[derive(Debug)]
pub enum SessionMessage {
    /// Send a command to the server now
    Submit {
        command: ClientCommand,
        response: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Arm an action to fire as soon as it becomes legal
    Arm {
        kind: PreActionKind,
        response: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Clear the armed action
    Disarm,

    /// The render layer finished drawing a participant's movement
    RenderAck { participant: ParticipantId },

    /// Tear the session down
    Leave,
}

/// Transient, non-blocking information for the player.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// The server rejected a command.
    ServerRejected { message: String },
    PreActionFired { kind: PreActionKind },
    PreActionDiscarded {
        kind: PreActionKind,
        reason: Staleness,
    },
    TurnSkipped {
        participant: ParticipantId,
        reason: Option<String>,
    },
    Disqualified { participant: ParticipantId },
    PlayerDisconnected {
        participant: Option<ParticipantId>,
        name: Option<String>,
    },
    ConnectionLost { reason: String },
    Reconnected,
    /// A participant's animations keep timing out.
    AnimationStuck { participant: ParticipantId },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerRejected { message } => write!(f, "server: {message}"),
            Self::PreActionFired { kind } => write!(f, "armed {kind} sent"),
            Self::PreActionDiscarded { kind, reason } => {
                write!(f, "armed {kind} cancelled: {reason}")
            }
            Self::TurnSkipped {
                participant,
                reason,
            } => match reason {
                Some(reason) => write!(f, "{participant} skipped ({reason})"),
                None => write!(f, "{participant} skipped"),
            },
            Self::Disqualified { participant } => write!(f, "{participant} disqualified"),
            Self::PlayerDisconnected { participant, name } => {
                let who = name
                    .clone()
                    .or_else(|| participant.as_ref().map(ToString::to_string))
                    .unwrap_or_else(|| "a player".to_string());
                write!(f, "{who} disconnected")
            }
            Self::ConnectionLost { reason } => write!(f, "connection lost: {reason}"),
            Self::Reconnected => write!(f, "reconnected"),
            Self::AnimationStuck { participant } => {
                write!(f, "animations for {participant} keep stalling")
            }
        }
    }
}

/// Modal decision opened for the local player.
#[derive(Clone, Debug, PartialEq)]
pub enum Prompt {
    PaymentDue { kind: PaymentKind, amount: Money },
    PropertyOffer {
        cell: CellIndex,
        name: String,
        price: Money,
    },
    CardDraw { text: String },
    Wager,
    IncomingTrade(TradeOffer),
    TradeClosed {
        trade_id: String,
        status: Option<String>,
    },
    Victory { winner: Option<ParticipantId> },
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaymentDue { kind, amount } => write!(f, "{kind} due: ${amount}"),
            Self::PropertyOffer { cell, name, price } => {
                write!(f, "buy {name} (cell {cell}) for ${price}?")
            }
            Self::CardDraw { text } => write!(f, "card: {text}"),
            Self::Wager => write!(f, "place your bet"),
            Self::IncomingTrade(trade) => write!(
                f,
                "trade {} from {}: ${} + {:?} for ${} + {:?}",
                trade.id,
                trade.from_player_id,
                trade.offer_money,
                trade.offer_properties,
                trade.request_money,
                trade.request_properties
            ),
            Self::TradeClosed { trade_id, status } => match status {
                Some(status) => write!(f, "trade {trade_id} {status}"),
                None => write!(f, "trade {trade_id} closed"),
            },
            Self::Victory { winner: Some(winner) } => write!(f, "game over, {winner} wins"),
            Self::Victory { winner: None } => write!(f, "game over"),
        }
    }
}

/// Updates pushed from the session to the render layer, besides the view.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    Notice(Notice),
    Prompt(Prompt),
    /// Close every open prompt.
    PromptsCleared,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("game is over")]
    GameOver,

    #[error("{0} needs a target")]
    TargetRequired(AbilityKind),

    #[error("a roll is already in progress")]
    RollInProgress,

    #[error("chat message is empty")]
    EmptyMessage,

    #[error("cannot arm: {0}")]
    PreAction(#[from] PreActionError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
