//! The effective view: what the render layer is allowed to show.

use super::sequencer::Phase;
use crate::game::entities::{
    CellIndex, CellState, GameStatus, Money, ParticipantId, ParticipantState, Snapshot, TradeOffer,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Chat lines kept in the view.
pub const CHAT_HISTORY: usize = 100;

/// Whether updates can currently arrive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Connectivity {
    #[default]
    Connecting,
    Online,
    /// Connection dropped; a reconnect is pending.
    Reconnecting { attempts: u32 },
    /// Torn down; no further updates.
    Offline,
}

/// A token walking along a path during the movement phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transient {
    pub path: Vec<CellIndex>,
    /// Index into `path` of the cell currently shown.
    pub step: usize,
}

impl Transient {
    pub fn cell(&self) -> Option<CellIndex> {
        self.path.get(self.step).copied()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantView {
    /// Last committed projection of the participant.
    pub state: ParticipantState,
    /// In-flight movement, if any.
    pub walk: Option<Transient>,
}

impl ParticipantView {
    fn committed(state: ParticipantState) -> Self {
        Self { state, walk: None }
    }

    /// Cell the token is drawn on right now.
    pub fn shown_position(&self) -> CellIndex {
        self.walk
            .as_ref()
            .and_then(Transient::cell)
            .unwrap_or(self.state.position)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatLine {
    pub participant: Option<ParticipantId>,
    pub name: String,
    pub message: String,
}

/// Local optimistic locks. All false means the local player is free to act.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ActionLocks {
    /// A roll was sent and its result has not arrived yet.
    pub roll_in_flight: bool,
    /// The local participant's animation lane is busy.
    pub animating: bool,
}

impl ActionLocks {
    pub fn any(&self) -> bool {
        self.roll_in_flight || self.animating
    }
}

/// Client-local projection of the game.
///
/// Every participant entry is either exactly the projection of one snapshot
/// or that projection plus an in-flight [`Transient`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectiveView {
    pub game_id: String,
    pub status: GameStatus,
    pub participants: BTreeMap<ParticipantId, ParticipantView>,
    pub order: Vec<ParticipantId>,
    pub cells: Vec<CellState>,
    pub current_turn_index: usize,
    pub turn_number: u64,
    pub turn_expiry: Option<DateTime<Utc>>,
    pub dice: [u8; 2],
    pub pot: Money,
    pub trades: BTreeMap<String, TradeOffer>,
    pub winner: Option<ParticipantId>,
    /// Visible prefix of the authoritative log.
    pub log: Vec<String>,
    pub chat: Vec<ChatLine>,
    /// Animation phase per participant; absent means idle.
    pub phases: BTreeMap<ParticipantId, Phase>,
    pub connectivity: Connectivity,
    pub locks: ActionLocks,
    /// Bumped on every change.
    pub revision: u64,
}

impl EffectiveView {
    pub fn current_participant(&self) -> Option<&ParticipantId> {
        self.order.get(self.current_turn_index)
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantView> {
        self.participants.get(id)
    }

    /// Cell the participant's token is drawn on.
    pub fn position_of(&self, id: &ParticipantId) -> Option<CellIndex> {
        self.participants.get(id).map(ParticipantView::shown_position)
    }

    pub fn phase_of(&self, id: &ParticipantId) -> Phase {
        self.phases.get(id).copied().unwrap_or_default()
    }

    /// Whole seconds left on the turn clock. Display only: the server alone
    /// advances the turn when this reaches zero.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.turn_expiry
            .map(|expiry| (expiry - now).num_seconds().max(0))
    }

    pub(crate) fn project_participant(&mut self, snapshot: &Snapshot, id: &ParticipantId) {
        match snapshot.participant(id) {
            Some(state) => {
                self.participants
                    .insert(id.clone(), ParticipantView::committed(state.clone()));
            }
            None => {
                self.participants.remove(id);
            }
        }
    }

    /// Turn, board and other shared fields.
    pub(crate) fn project_board(&mut self, snapshot: &Snapshot) {
        self.game_id.clone_from(&snapshot.game_id);
        self.status = snapshot.game_status;
        self.order.clone_from(&snapshot.player_order);
        self.cells.clone_from(&snapshot.board);
        self.current_turn_index = snapshot.current_turn_index;
        self.turn_number = snapshot.turn_number;
        self.turn_expiry = snapshot.turn_expiry;
        self.dice = snapshot.dice;
        self.pot = snapshot.pot;
        self.trades.clone_from(&snapshot.trades);
        if snapshot.winner_id.is_some() {
            self.winner.clone_from(&snapshot.winner_id);
        }
    }

    pub(crate) fn push_chat(&mut self, line: ChatLine) {
        self.chat.push(line);
        if self.chat.len() > CHAT_HISTORY {
            let excess = self.chat.len() - CHAT_HISTORY;
            self.chat.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_shown_position_prefers_walk() {
        let mut view = ParticipantView::committed(ParticipantState {
            position: 12,
            ..Default::default()
        });
        assert_eq!(view.shown_position(), 12);
        view.walk = Some(Transient {
            path: vec![6, 7, 8],
            step: 1,
        });
        assert_eq!(view.shown_position(), 7);
    }

    #[test]
    fn test_seconds_remaining_clamps_at_zero() {
        let now = Utc::now();
        let view = EffectiveView {
            turn_expiry: Some(now + Duration::seconds(30)),
            ..Default::default()
        };
        assert_eq!(view.seconds_remaining(now), Some(30));
        assert_eq!(view.seconds_remaining(now + Duration::seconds(45)), Some(0));
        assert_eq!(EffectiveView::default().seconds_remaining(now), None);
    }

    #[test]
    fn test_chat_history_is_bounded() {
        let mut view = EffectiveView::default();
        for i in 0..(CHAT_HISTORY + 5) {
            view.push_chat(ChatLine {
                participant: None,
                name: "a".to_string(),
                message: i.to_string(),
            });
        }
        assert_eq!(view.chat.len(), CHAT_HISTORY);
        assert_eq!(view.chat[0].message, "5");
    }
}
