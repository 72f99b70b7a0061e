use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeMap, fmt};

/// Number of cells on a standard board, used when a snapshot carries no board.
pub const DEFAULT_BOARD_LEN: usize = 40;

/// Type alias for whole-dollar balances. Balances can go negative while a
/// participant is raising funds, so this is signed.
pub type Money = i64;

/// Type alias for board cell indices.
pub type CellIndex = usize;

/// Opaque participant identifier assigned by the server.
///
/// Some server paths emit numeric ids, so both JSON strings and integers are
/// accepted.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self::new(&s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Per-participant state as pushed by the server.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ParticipantState {
    pub id: ParticipantId,
    pub name: String,
    pub character: Option<String>,
    pub money: Money,
    pub position: CellIndex,
    pub properties: Vec<CellIndex>,
    pub is_jailed: bool,
    pub jail_turns: u32,
    pub is_bot: bool,
    pub is_bankrupt: bool,
    pub ability_used_this_game: bool,
    pub ability_cooldown: u32,
    pub skipped_turns: u32,
}

/// Ownership and development state of a single board cell.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CellState {
    pub id: CellIndex,
    pub name: String,
    pub group: String,
    pub price: Money,
    pub owner_id: Option<ParticipantId>,
    pub houses: u8,
    pub is_mortgaged: bool,
    pub is_destroyed: bool,
    pub isolation_turns: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Rent,
    Tax,
    Bail,
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Rent => "rent",
            Self::Tax => "tax",
            Self::Bail => "bail",
        };
        write!(f, "{repr}")
    }
}

/// Money the turn owner must settle before the turn can end.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PendingPayment {
    pub kind: PaymentKind,
    pub amount: Money,
    #[serde(default)]
    pub creditor: Option<ParticipantId>,
}

/// An unowned cell the turn owner may buy or decline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PurchaseOffer {
    pub cell: CellIndex,
    pub price: Money,
}

/// Open auction for a declined cell.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Auction {
    pub cell: CellIndex,
    pub current_bid: Money,
    pub high_bidder: Option<ParticipantId>,
    pub bidder: Option<ParticipantId>,
    pub participants: Vec<ParticipantId>,
}

/// Per-turn dynamic state, reset by the server on every turn change.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TurnState {
    #[serde(alias = "has_rolled")]
    pub has_acted: bool,
    #[serde(alias = "is_doubles")]
    pub repeat_turn: bool,
    pub pending_payment: Option<PendingPayment>,
    pub pending_purchase: Option<PurchaseOffer>,
    pub awaiting_wager: bool,
    pub auction: Option<Auction>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Waiting,
    Active,
    Finished,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TradeOffer {
    pub id: String,
    pub from_player_id: ParticipantId,
    pub to_player_id: ParticipantId,
    pub offer_money: Money,
    pub offer_properties: Vec<CellIndex>,
    pub request_money: Money,
    pub request_properties: Vec<CellIndex>,
    pub status: TradeStatus,
}

/// Full authoritative game state. Owned by the server and replaced wholesale
/// on every update; the client never mutates one.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Snapshot {
    pub game_id: String,
    pub host_id: Option<ParticipantId>,
    pub players: BTreeMap<ParticipantId, ParticipantState>,
    pub player_order: Vec<ParticipantId>,
    pub trades: BTreeMap<String, TradeOffer>,
    pub current_turn_index: usize,
    pub board: Vec<CellState>,
    pub pot: Money,
    pub dice: [u8; 2],
    pub doubles_count: u8,
    pub game_status: GameStatus,
    pub winner_id: Option<ParticipantId>,
    pub logs: Vec<String>,
    pub turn_number: u64,
    #[serde(deserialize_with = "deserialize_expiry")]
    pub turn_expiry: Option<DateTime<Utc>>,
    pub turn_state: TurnState,
}

impl Snapshot {
    /// Participant whose turn it currently is.
    pub fn current_participant(&self) -> Option<&ParticipantId> {
        self.player_order.get(self.current_turn_index)
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantState> {
        self.players.get(id)
    }

    pub fn board_len(&self) -> usize {
        if self.board.is_empty() {
            DEFAULT_BOARD_LEN
        } else {
            self.board.len()
        }
    }

    pub fn cell(&self, index: CellIndex) -> Option<&CellState> {
        self.board.get(index)
    }

    /// The live turn lease, absent before the game starts or after it ends.
    pub fn lease(&self) -> Option<TurnLease> {
        if self.game_status != GameStatus::Active {
            return None;
        }
        let participant = self.current_participant()?.clone();
        Some(TurnLease {
            turn_number: self.turn_number,
            turn_index: self.current_turn_index,
            participant,
            has_acted: self.turn_state.has_acted,
            repeat_turn: self.turn_state.repeat_turn,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.game_status == GameStatus::Finished
    }
}

/// Identity and conditions under which a participant may act.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TurnLease {
    pub turn_number: u64,
    pub turn_index: usize,
    pub participant: ParticipantId,
    pub has_acted: bool,
    pub repeat_turn: bool,
}

impl TurnLease {
    pub fn is_held_by(&self, participant: &ParticipantId) -> bool {
        &self.participant == participant
    }

    /// Whether both leases describe the same turn. A repeat roll extends a
    /// turn rather than creating a new one, so the acted flags are ignored.
    pub fn same_turn(&self, other: &TurnLease) -> bool {
        self.turn_number == other.turn_number
            && self.turn_index == other.turn_index
            && self.participant == other.participant
    }
}

impl fmt::Display for TurnLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "turn {} (seat {}) held by {}",
            self.turn_number, self.turn_index, self.participant
        )
    }
}

/// Accepts RFC 3339 timestamps as well as the naive ISO timestamps some
/// servers emit for UTC.
fn deserialize_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

/// Cells visited when walking `steps` cells forward from `from`, wrapping
/// around the board. The starting cell is not included.
pub fn walk_path(from: CellIndex, steps: usize, board_len: usize) -> Vec<CellIndex> {
    let len = board_len.max(1);
    (1..=steps).map(|step| (from + step) % len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> Snapshot {
        let a = ParticipantId::new("a");
        let b = ParticipantId::new("b");
        let mut players = BTreeMap::new();
        players.insert(
            a.clone(),
            ParticipantState {
                id: a.clone(),
                position: 5,
                money: 1500,
                ..Default::default()
            },
        );
        players.insert(
            b.clone(),
            ParticipantState {
                id: b.clone(),
                ..Default::default()
            },
        );
        Snapshot {
            game_id: "G1".to_string(),
            players,
            player_order: vec![a, b],
            game_status: GameStatus::Active,
            turn_number: 3,
            ..Default::default()
        }
    }

    // === Participant id tests ===

    #[test]
    fn test_participant_id_accepts_numbers() {
        let id: ParticipantId = serde_json::from_str("42").unwrap();
        assert_eq!(id.as_str(), "42");
        let id: ParticipantId = serde_json::from_str("\" p1 \"").unwrap();
        assert_eq!(id.as_str(), "p1");
    }

    // === Snapshot tests ===

    #[test]
    fn test_snapshot_decodes_server_shape() {
        let json = r#"{
            "game_id": "G1",
            "host_id": "a",
            "players": {"a": {"id": "a", "name": "Alice", "money": 1500, "position": 5}},
            "player_order": ["a"],
            "current_turn_index": 0,
            "dice": [3, 4],
            "game_status": "active",
            "logs": ["Alice joined"],
            "turn_number": 7,
            "turn_expiry": "2026-01-01T12:00:00.250000",
            "turn_state": {"has_rolled": true},
            "map_type": "World"
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.dice, [3, 4]);
        assert!(snapshot.turn_state.has_acted);
        assert_eq!(snapshot.board_len(), DEFAULT_BOARD_LEN);
        assert!(snapshot.turn_expiry.is_some());
        assert_eq!(
            snapshot.participant(&ParticipantId::new("a")).map(|p| p.position),
            Some(5)
        );
    }

    #[test]
    fn test_snapshot_accepts_rfc3339_expiry() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"turn_expiry": "2026-01-01T12:00:00Z"}"#).unwrap();
        assert_eq!(
            snapshot.turn_expiry.map(|t| t.timestamp()),
            Some(1_767_268_800)
        );
    }

    #[test]
    fn test_lease_requires_active_game() {
        let mut snapshot = sample_snapshot();
        assert!(snapshot.lease().is_some());
        snapshot.game_status = GameStatus::Finished;
        assert!(snapshot.lease().is_none());
    }

    #[test]
    fn test_lease_same_turn_ignores_acted_flags() {
        let snapshot = sample_snapshot();
        let before = snapshot.lease().unwrap();
        let mut after = before.clone();
        after.has_acted = true;
        after.repeat_turn = true;
        assert!(before.same_turn(&after));
        after.turn_number += 1;
        assert!(!before.same_turn(&after));
    }

    // === Walk path tests ===

    #[test]
    fn test_walk_path_wraps_board() {
        assert_eq!(walk_path(5, 7, 40), vec![6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(walk_path(38, 4, 40), vec![39, 0, 1, 2]);
        assert!(walk_path(3, 0, 40).is_empty());
    }
}
