//! Single-slot queue for actions chosen before they are legal.
//!
//! Arming captures the preconditions visible at that moment (amount owed,
//! offered cell and price, standing bid). Every later snapshot re-checks
//! them: a changed precondition discards the action, a matching lease fires
//! it.

use crate::{
    game::entities::{CellIndex, Money, ParticipantId, PaymentKind, Snapshot, TurnLease},
    net::messages::ClientCommand,
};
use std::fmt;
use thiserror::Error;

/// Action the local player may arm.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PreActionKind {
    Roll,
    EndTurn,
    Settle(PaymentKind),
    Buy,
    Decline,
    RaiseBid,
    PassAuction,
    CasinoBet { bet_numbers: Vec<u8> },
}

impl PreActionKind {
    pub fn command(&self) -> ClientCommand {
        match self {
            Self::Roll => ClientCommand::Roll,
            Self::EndTurn => ClientCommand::EndTurn,
            Self::Settle(PaymentKind::Rent) => ClientCommand::PayRent,
            Self::Settle(PaymentKind::Tax) => ClientCommand::PayTax,
            Self::Settle(PaymentKind::Bail) => ClientCommand::PayBail,
            Self::Buy => ClientCommand::Buy,
            Self::Decline => ClientCommand::DeclineProperty,
            Self::RaiseBid => ClientCommand::RaiseBid,
            Self::PassAuction => ClientCommand::PassAuction,
            Self::CasinoBet { bet_numbers } => ClientCommand::CasinoBet {
                bet_numbers: bet_numbers.clone(),
            },
        }
    }

    /// Auction actions belong to whoever is bidding, not the turn holder.
    fn is_auction(&self) -> bool {
        matches!(self, Self::RaiseBid | Self::PassAuction)
    }
}

impl fmt::Display for PreActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Roll => write!(f, "roll"),
            Self::EndTurn => write!(f, "end turn"),
            Self::Settle(kind) => write!(f, "pay {kind}"),
            Self::Buy => write!(f, "buy"),
            Self::Decline => write!(f, "decline"),
            Self::RaiseBid => write!(f, "raise bid"),
            Self::PassAuction => write!(f, "pass auction"),
            Self::CasinoBet { bet_numbers } => write!(f, "bet on {bet_numbers:?}"),
        }
    }
}

/// State an armed action was chosen against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Precondition {
    Unconditional,
    AmountDue { kind: PaymentKind, amount: Money },
    Offer { cell: CellIndex, price: Money },
    OutstandingWager { cell: CellIndex, bid: Money },
}

impl Precondition {
    fn capture(kind: &PreActionKind, snapshot: &Snapshot) -> Result<Self, PreActionError> {
        let turn = &snapshot.turn_state;
        match kind {
            PreActionKind::Settle(PaymentKind::Bail) => Ok(Self::Unconditional),
            PreActionKind::Settle(payment) => turn
                .pending_payment
                .as_ref()
                .filter(|due| due.kind == *payment)
                .map(|due| Self::AmountDue {
                    kind: due.kind,
                    amount: due.amount,
                })
                .ok_or(PreActionError::NothingDue(*payment)),
            PreActionKind::Buy | PreActionKind::Decline => turn
                .pending_purchase
                .as_ref()
                .map(|offer| Self::Offer {
                    cell: offer.cell,
                    price: offer.price,
                })
                .ok_or(PreActionError::NoOffer),
            PreActionKind::RaiseBid | PreActionKind::PassAuction => turn
                .auction
                .as_ref()
                .map(|auction| Self::OutstandingWager {
                    cell: auction.cell,
                    bid: auction.current_bid,
                })
                .ok_or(PreActionError::NoAuction),
            PreActionKind::Roll | PreActionKind::EndTurn | PreActionKind::CasinoBet { .. } => {
                Ok(Self::Unconditional)
            }
        }
    }

    /// Why the precondition no longer holds in `snapshot`, if it does not.
    fn check(&self, snapshot: &Snapshot) -> Option<Staleness> {
        let turn = &snapshot.turn_state;
        match *self {
            Self::Unconditional => None,
            Self::AmountDue { kind, amount } => match &turn.pending_payment {
                Some(due) if due.kind == kind && due.amount == amount => None,
                Some(due) if due.kind == kind => Some(Staleness::AmountChanged {
                    kind,
                    armed: amount,
                    now: due.amount,
                }),
                _ => Some(Staleness::NoLongerDue(kind)),
            },
            Self::Offer { cell, price } => match &turn.pending_purchase {
                Some(offer) if offer.cell == cell && offer.price == price => None,
                Some(_) => Some(Staleness::OfferChanged),
                None => Some(Staleness::OfferClosed),
            },
            Self::OutstandingWager { cell, bid } => match &turn.auction {
                Some(auction) if auction.cell == cell && auction.current_bid == bid => None,
                Some(auction) if auction.cell == cell => Some(Staleness::WagerMoved {
                    armed: bid,
                    now: auction.current_bid,
                }),
                _ => Some(Staleness::AuctionClosed),
            },
        }
    }
}

/// Reason an armed action was discarded instead of fired.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Staleness {
    AmountChanged {
        kind: PaymentKind,
        armed: Money,
        now: Money,
    },
    NoLongerDue(PaymentKind),
    OfferChanged,
    OfferClosed,
    WagerMoved { armed: Money, now: Money },
    AuctionClosed,
    /// The turn it was armed for ended without the action firing.
    TurnConsumed,
    GameOver,
    /// The server rejected a command or skipped the turn.
    Cleared(String),
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmountChanged { kind, armed, now } => {
                write!(f, "{kind} due changed from ${armed} to ${now}")
            }
            Self::NoLongerDue(kind) => write!(f, "{kind} is no longer due"),
            Self::OfferChanged => write!(f, "the offer changed"),
            Self::OfferClosed => write!(f, "the offer is closed"),
            Self::WagerMoved { armed, now } => write!(f, "bid moved from ${armed} to ${now}"),
            Self::AuctionClosed => write!(f, "the auction is over"),
            Self::TurnConsumed => write!(f, "the turn passed"),
            Self::GameOver => write!(f, "the game is over"),
            Self::Cleared(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreActionError {
    #[error("no {0} is due")]
    NothingDue(PaymentKind),
    #[error("no property is on offer")]
    NoOffer,
    #[error("no auction is running")]
    NoAuction,
    #[error("no game state yet")]
    NoState,
    #[error("the game is over")]
    GameOver,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PendingLocalAction {
    pub kind: PreActionKind,
    pub precondition: Precondition,
    /// Lease live when the action was armed.
    pub armed_under: Option<TurnLease>,
    /// First lease held by the local participant since arming.
    observed_own: Option<TurnLease>,
}

/// Outcome of re-checking the armed action.
#[derive(Clone, Debug, PartialEq)]
pub enum Evaluation {
    /// Nothing armed, or not legal yet.
    Wait,
    Fire {
        kind: PreActionKind,
        command: ClientCommand,
    },
    Discard {
        kind: PreActionKind,
        reason: Staleness,
    },
}

/// Inputs besides the snapshot that gate firing.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalGate {
    /// The local participant's animation lane is idle.
    pub lane_idle: bool,
    pub roll_in_flight: bool,
}

#[derive(Debug)]
pub struct PreActionQueue {
    local: ParticipantId,
    slot: Option<PendingLocalAction>,
}

impl PreActionQueue {
    pub fn new(local: ParticipantId) -> Self {
        Self { local, slot: None }
    }

    /// Store `kind`, replacing any armed action. Preconditions are read from
    /// `snapshot`.
    pub fn arm(&mut self, kind: PreActionKind, snapshot: &Snapshot) -> Result<(), PreActionError> {
        if snapshot.is_finished() {
            return Err(PreActionError::GameOver);
        }
        let precondition = Precondition::capture(&kind, snapshot)?;
        let armed_under = snapshot.lease();
        let observed_own = armed_under
            .clone()
            .filter(|lease| lease.is_held_by(&self.local));
        if let Some(previous) = &self.slot {
            log::debug!("Replacing armed {} with {kind}", previous.kind);
        }
        log::info!("Armed {kind} ({precondition:?})");
        self.slot = Some(PendingLocalAction {
            kind,
            precondition,
            armed_under,
            observed_own,
        });
        Ok(())
    }

    pub fn disarm(&mut self) -> Option<PendingLocalAction> {
        self.slot.take()
    }

    pub fn pending(&self) -> Option<&PendingLocalAction> {
        self.slot.as_ref()
    }

    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    /// Re-check the armed action against the latest snapshot. Firing or
    /// discarding clears the slot.
    pub fn evaluate(&mut self, snapshot: &Snapshot, gate: LocalGate) -> Evaluation {
        let Some(pending) = self.slot.as_mut() else {
            return Evaluation::Wait;
        };

        let lease = snapshot.lease();
        let stale = if snapshot.is_finished() {
            Some(Staleness::GameOver)
        } else if let Some(reason) = pending.precondition.check(snapshot) {
            Some(reason)
        } else {
            match (&pending.observed_own, &lease) {
                (Some(observed), Some(live)) if observed.same_turn(live) => None,
                (Some(_), _) => Some(Staleness::TurnConsumed),
                (None, _) => None,
            }
        };

        if let Some(reason) = stale {
            let kind = pending.kind.clone();
            self.slot = None;
            log::info!("Discarded armed {kind}: {reason}");
            return Evaluation::Discard { kind, reason };
        }

        if let Some(live) = lease.as_ref().filter(|l| l.is_held_by(&self.local)) {
            if pending.observed_own.is_none() {
                pending.observed_own = Some(live.clone());
            }
        }

        if !gate.lane_idle || !is_legal(&pending.kind, snapshot, &self.local, gate) {
            return Evaluation::Wait;
        }

        let kind = pending.kind.clone();
        self.slot = None;
        log::info!("Firing armed {kind}");
        Evaluation::Fire {
            command: kind.command(),
            kind,
        }
    }
}

fn is_legal(kind: &PreActionKind, snapshot: &Snapshot, local: &ParticipantId, gate: LocalGate) -> bool {
    let turn = &snapshot.turn_state;
    if kind.is_auction() {
        return turn
            .auction
            .as_ref()
            .and_then(|auction| auction.bidder.as_ref())
            .is_some_and(|bidder| bidder == local);
    }
    if !snapshot.lease().is_some_and(|lease| lease.is_held_by(local)) {
        return false;
    }
    let settled = turn.pending_payment.is_none()
        && turn.pending_purchase.is_none()
        && turn.auction.is_none()
        && !turn.awaiting_wager;
    match kind {
        PreActionKind::Roll => {
            (!turn.has_acted || turn.repeat_turn) && settled && !gate.roll_in_flight
        }
        PreActionKind::EndTurn => turn.has_acted && !turn.repeat_turn && settled,
        PreActionKind::Settle(PaymentKind::Bail) => {
            !turn.has_acted
                && snapshot
                    .participant(local)
                    .is_some_and(|state| state.is_jailed)
        }
        PreActionKind::Settle(_) => turn.pending_payment.is_some(),
        PreActionKind::Buy | PreActionKind::Decline => turn.pending_purchase.is_some(),
        PreActionKind::CasinoBet { .. } => turn.awaiting_wager,
        PreActionKind::RaiseBid | PreActionKind::PassAuction => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entities::{
        Auction, GameStatus, ParticipantState, PendingPayment, PurchaseOffer,
    };

    const IDLE: LocalGate = LocalGate {
        lane_idle: true,
        roll_in_flight: false,
    };

    fn id(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn snapshot(turn_index: usize, turn_number: u64) -> Snapshot {
        let mut snapshot = Snapshot {
            game_status: GameStatus::Active,
            current_turn_index: turn_index,
            turn_number,
            player_order: vec![id("a"), id("b")],
            ..Default::default()
        };
        for name in ["a", "b"] {
            snapshot.players.insert(
                id(name),
                ParticipantState {
                    id: id(name),
                    ..Default::default()
                },
            );
        }
        snapshot
    }

    fn with_due(mut snapshot: Snapshot, amount: Money) -> Snapshot {
        snapshot.turn_state.has_acted = true;
        snapshot.turn_state.pending_payment = Some(PendingPayment {
            kind: PaymentKind::Rent,
            amount,
            creditor: Some(id("a")),
        });
        snapshot
    }

    // === Firing Tests ===

    #[test]
    fn test_roll_fires_when_turn_arrives() {
        let mut queue = PreActionQueue::new(id("b"));
        queue.arm(PreActionKind::Roll, &snapshot(0, 1)).unwrap();
        assert_eq!(queue.evaluate(&snapshot(0, 1), IDLE), Evaluation::Wait);
        assert_eq!(
            queue.evaluate(&snapshot(1, 2), IDLE),
            Evaluation::Fire {
                kind: PreActionKind::Roll,
                command: ClientCommand::Roll
            }
        );
        assert!(!queue.is_armed());
    }

    #[test]
    fn test_never_fires_while_animating() {
        let mut queue = PreActionQueue::new(id("b"));
        queue.arm(PreActionKind::Roll, &snapshot(0, 1)).unwrap();
        let busy = LocalGate {
            lane_idle: false,
            roll_in_flight: false,
        };
        assert_eq!(queue.evaluate(&snapshot(1, 2), busy), Evaluation::Wait);
        assert!(matches!(
            queue.evaluate(&snapshot(1, 2), IDLE),
            Evaluation::Fire { .. }
        ));
    }

    #[test]
    fn test_arm_replaces_previous() {
        let mut queue = PreActionQueue::new(id("b"));
        queue.arm(PreActionKind::Roll, &snapshot(0, 1)).unwrap();
        queue.arm(PreActionKind::EndTurn, &snapshot(0, 1)).unwrap();
        assert_eq!(queue.pending().unwrap().kind, PreActionKind::EndTurn);
        assert!(queue.disarm().is_some());
        assert_eq!(queue.evaluate(&snapshot(1, 2), IDLE), Evaluation::Wait);
    }

    // === Staleness Tests ===

    #[test]
    fn test_changed_amount_discards() {
        let mut queue = PreActionQueue::new(id("b"));
        queue
            .arm(PreActionKind::Settle(PaymentKind::Rent), &with_due(snapshot(0, 1), 50))
            .unwrap();
        let evaluation = queue.evaluate(&with_due(snapshot(0, 1), 75), IDLE);
        assert_eq!(
            evaluation,
            Evaluation::Discard {
                kind: PreActionKind::Settle(PaymentKind::Rent),
                reason: Staleness::AmountChanged {
                    kind: PaymentKind::Rent,
                    armed: 50,
                    now: 75
                }
            }
        );
        assert!(!queue.is_armed());
    }

    #[test]
    fn test_unchanged_amount_fires() {
        let mut queue = PreActionQueue::new(id("b"));
        queue
            .arm(PreActionKind::Settle(PaymentKind::Rent), &with_due(snapshot(0, 1), 50))
            .unwrap();
        assert!(matches!(
            queue.evaluate(&with_due(snapshot(1, 1), 50), IDLE),
            Evaluation::Fire {
                command: ClientCommand::PayRent,
                ..
            }
        ));
    }

    #[test]
    fn test_consumed_turn_discards_end_turn() {
        let mut queue = PreActionQueue::new(id("b"));
        let mut own = snapshot(1, 4);
        own.turn_state.has_acted = true;
        own.turn_state.pending_purchase = Some(PurchaseOffer { cell: 3, price: 60 });
        queue.arm(PreActionKind::EndTurn, &own).unwrap();
        assert_eq!(queue.evaluate(&own, IDLE), Evaluation::Wait);
        assert_eq!(
            queue.evaluate(&snapshot(0, 5), IDLE),
            Evaluation::Discard {
                kind: PreActionKind::EndTurn,
                reason: Staleness::TurnConsumed
            }
        );
    }

    #[test]
    fn test_moved_bid_discards() {
        let mut queue = PreActionQueue::new(id("b"));
        let mut auction = snapshot(0, 1);
        auction.turn_state.auction = Some(Auction {
            cell: 6,
            current_bid: 100,
            bidder: Some(id("a")),
            ..Default::default()
        });
        queue.arm(PreActionKind::RaiseBid, &auction).unwrap();

        let mut raised = auction.clone();
        if let Some(a) = raised.turn_state.auction.as_mut() {
            a.current_bid = 120;
            a.bidder = Some(id("b"));
        }
        assert!(matches!(
            queue.evaluate(&raised, IDLE),
            Evaluation::Discard {
                reason: Staleness::WagerMoved { armed: 100, now: 120 },
                ..
            }
        ));
    }

    #[test]
    fn test_bid_fires_for_bidder_out_of_turn() {
        let mut queue = PreActionQueue::new(id("b"));
        let mut auction = snapshot(0, 1);
        auction.turn_state.auction = Some(Auction {
            cell: 6,
            current_bid: 100,
            bidder: Some(id("a")),
            ..Default::default()
        });
        queue.arm(PreActionKind::PassAuction, &auction).unwrap();
        assert_eq!(queue.evaluate(&auction, IDLE), Evaluation::Wait);
        if let Some(a) = auction.turn_state.auction.as_mut() {
            a.bidder = Some(id("b"));
        }
        assert!(matches!(
            queue.evaluate(&auction, IDLE),
            Evaluation::Fire {
                command: ClientCommand::PassAuction,
                ..
            }
        ));
    }

    // === Arming Tests ===

    #[test]
    fn test_arm_requires_something_to_settle() {
        let mut queue = PreActionQueue::new(id("b"));
        assert_eq!(
            queue.arm(PreActionKind::Settle(PaymentKind::Tax), &snapshot(0, 1)),
            Err(PreActionError::NothingDue(PaymentKind::Tax))
        );
        assert_eq!(
            queue.arm(PreActionKind::Buy, &snapshot(0, 1)),
            Err(PreActionError::NoOffer)
        );
        let mut over = snapshot(0, 1);
        over.game_status = GameStatus::Finished;
        assert_eq!(
            queue.arm(PreActionKind::Roll, &over),
            Err(PreActionError::GameOver)
        );
    }
}
