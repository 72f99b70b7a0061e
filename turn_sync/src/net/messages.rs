//! Wire protocol: commands sent to the game server and the messages it
//! pushes back.
//!
//! Outbound commands are JSON objects of the form `{"action": .., "data": ..}`.
//! Inbound messages are JSON objects tagged by `type`; position and ownership
//! events embed the post-event snapshot under `game_state`.

use crate::game::entities::{CellIndex, CellState, Money, ParticipantId, Snapshot, TradeOffer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum chat message length accepted by the server.
pub const MAX_CHAT_LENGTH: usize = 200;

/// Character abilities. Each resolves server-side and comes back as its own
/// message tag.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbilityKind {
    Oreshnik,
    Buyout,
    Aid,
    Isolation,
    Sanctions,
    BeltRoad,
}

impl AbilityKind {
    /// Abilities aimed at a cell or a participant.
    pub fn requires_target(self) -> bool {
        matches!(
            self,
            Self::Oreshnik | Self::Buyout | Self::Isolation | Self::Sanctions
        )
    }

    /// Whether the target is a participant rather than a cell.
    pub fn targets_participant(self) -> bool {
        matches!(self, Self::Sanctions)
    }
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Oreshnik => "ORESHNIK",
            Self::Buyout => "BUYOUT",
            Self::Aid => "AID",
            Self::Isolation => "ISOLATION",
            Self::Sanctions => "SANCTIONS",
            Self::BeltRoad => "BELT_ROAD",
        };
        write!(f, "{repr}")
    }
}

/// Target of an ability: a board cell or another participant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AbilityTarget {
    Cell(CellIndex),
    Participant(ParticipantId),
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAnswer {
    Accept,
    Reject,
    Cancel,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TradeProposal {
    pub to_player_id: ParticipantId,
    #[serde(default)]
    pub offer_money: Money,
    #[serde(default)]
    pub offer_properties: Vec<CellIndex>,
    #[serde(default)]
    pub request_money: Money,
    #[serde(default)]
    pub request_properties: Vec<CellIndex>,
}

/// Commands a client sends to the game server.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    Roll,
    EndTurn,
    Buy,
    DeclineProperty,
    PayRent,
    PayTax,
    PayBail,
    Build {
        property_id: CellIndex,
    },
    SellHouse {
        property_id: CellIndex,
    },
    Mortgage {
        property_id: CellIndex,
    },
    Unmortgage {
        property_id: CellIndex,
    },
    UseAbility {
        ability_type: AbilityKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<AbilityTarget>,
    },
    TradeOffer(TradeProposal),
    TradeResponse {
        trade_id: String,
        response: TradeAnswer,
    },
    RaiseBid,
    PassAuction,
    CasinoBet {
        bet_numbers: Vec<u8>,
    },
    Chat {
        message: String,
    },
    Surrender,
    Sync,
    Ping,
}

impl ClientCommand {
    /// Chat message trimmed and capped to what the server accepts.
    pub fn chat(message: &str) -> Self {
        let message = message.trim().chars().take(MAX_CHAT_LENGTH).collect();
        Self::Chat { message }
    }

    /// Commands that can change whose turn it is or what the board looks
    /// like. None of these are legal once the game is over.
    pub fn is_turn_affecting(&self) -> bool {
        !matches!(self, Self::Chat { .. } | Self::Sync | Self::Ping)
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Roll => "ROLL",
            Self::EndTurn => "END_TURN",
            Self::Buy => "BUY",
            Self::DeclineProperty => "DECLINE_PROPERTY",
            Self::PayRent => "PAY_RENT",
            Self::PayTax => "PAY_TAX",
            Self::PayBail => "PAY_BAIL",
            Self::Build { .. } => "BUILD",
            Self::SellHouse { .. } => "SELL_HOUSE",
            Self::Mortgage { .. } => "MORTGAGE",
            Self::Unmortgage { .. } => "UNMORTGAGE",
            Self::UseAbility { .. } => "USE_ABILITY",
            Self::TradeOffer(_) => "TRADE_OFFER",
            Self::TradeResponse { .. } => "TRADE_RESPONSE",
            Self::RaiseBid => "RAISE_BID",
            Self::PassAuction => "PASS_AUCTION",
            Self::CasinoBet { .. } => "CASINO_BET",
            Self::Chat { .. } => "CHAT",
            Self::Surrender => "SURRENDER",
            Self::Sync => "SYNC",
            Self::Ping => "PING",
        };
        write!(f, "{repr}")
    }
}

/// What a roll led to, as reported by the server.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollAction {
    CanBuy,
    Chance,
    CollectPot,
    Destroyed,
    GoToJail,
    PayRent,
    PayTax,
    Safe,
    StillJailed,
    SkippedTurn,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DiceRolled {
    pub player_id: ParticipantId,
    pub player_name: Option<String>,
    pub dice: [u8; 2],
    pub doubles: bool,
    pub passed_go: bool,
    pub action: Option<RollAction>,
    pub amount: Option<Money>,
    pub chance_card: Option<String>,
    pub landed_on: Option<String>,
    pub game_state: Option<Box<Snapshot>>,
}

impl DiceRolled {
    pub fn total(&self) -> usize {
        usize::from(self.dice[0]) + usize::from(self.dice[1])
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Teleport {
    pub player_id: ParticipantId,
    #[serde(alias = "new_position")]
    pub position: Option<CellIndex>,
    pub reason: Option<String>,
    pub game_state: Option<Box<Snapshot>>,
}

/// Result of an ability, shared by every per-ability tag.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct AbilityResolution {
    pub player_id: Option<ParticipantId>,
    pub target_id: Option<AbilityTarget>,
    pub target_player_id: Option<ParticipantId>,
    pub target_name: Option<String>,
    pub price_paid: Option<Money>,
    pub amount_collected: Option<Money>,
    pub bonus: Option<Money>,
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CasinoResult {
    pub player_id: ParticipantId,
    pub bet_numbers: Vec<u8>,
    pub result: u8,
    pub won: bool,
    pub payout: Money,
    pub game_state: Option<Box<Snapshot>>,
}

/// Ownership or development change on a single cell.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CellChange {
    pub player_id: Option<ParticipantId>,
    pub property_id: Option<CellIndex>,
    pub property: Option<CellState>,
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Payment {
    pub player_id: Option<ParticipantId>,
    #[serde(alias = "rent_paid")]
    pub amount: Option<Money>,
    pub game_state: Option<Box<Snapshot>>,
}

/// Turn advanced, skipped, or a participant removed from the rotation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TurnChange {
    #[serde(alias = "kicked_id")]
    pub player_id: Option<ParticipantId>,
    pub reason: Option<String>,
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StatePush {
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TradeNotice {
    pub trade: Option<TradeOffer>,
    pub trade_id: Option<String>,
    pub status: Option<String>,
    pub game_state: Option<Box<Snapshot>>,
}

impl TradeNotice {
    pub fn id(&self) -> Option<&str> {
        self.trade_id
            .as_deref()
            .or_else(|| self.trade.as_ref().map(|trade| trade.id.as_str()))
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ChatMessage {
    pub player_id: Option<ParticipantId>,
    pub player_name: String,
    pub message: String,
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct BotActions {
    pub player_id: Option<ParticipantId>,
    pub actions: Vec<ServerMessage>,
    pub game_state: Option<Box<Snapshot>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Presence {
    pub player_id: Option<ParticipantId>,
    pub player_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct GameOver {
    pub winner_id: Option<ParticipantId>,
    pub game_state: Option<Box<Snapshot>>,
}

/// Messages pushed by the game server.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Greeting sent on every new connection.
    Connected(StatePush),
    #[serde(alias = "GAME_STATE")]
    StateUpdate(StatePush),
    GameStarted(StatePush),
    PlayerJoined(StatePush),
    PlayerLeft(StatePush),
    SyncResponse(StatePush),
    DiceRolled(DiceRolled),
    Teleport(Teleport),
    PropertyBought(CellChange),
    HouseBuilt(CellChange),
    HouseSold(CellChange),
    PropertyMortgaged(CellChange),
    PropertyUnmortgaged(CellChange),
    RentPaid(Payment),
    TaxPaid(Payment),
    TurnEnded(TurnChange),
    TurnSkipped(TurnChange),
    PlayerDisqualified(TurnChange),
    Oreshnik(AbilityResolution),
    Buyout(AbilityResolution),
    Aid(AbilityResolution),
    Isolation(AbilityResolution),
    Sanctions(AbilityResolution),
    BeltRoad(AbilityResolution),
    AbilityUsed(AbilityResolution),
    TradeOffered(TradeNotice),
    TradeUpdated(TradeNotice),
    CasinoResult(CasinoResult),
    ChatMessage(ChatMessage),
    BotActions(BotActions),
    PlayerDisconnected(Presence),
    GameOver(GameOver),
    Error {
        #[serde(default)]
        message: String,
    },
    Pong,
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Ability carried by a per-ability tag, if any.
    pub fn ability(&self) -> Option<(AbilityKind, &AbilityResolution)> {
        match self {
            Self::Oreshnik(r) => Some((AbilityKind::Oreshnik, r)),
            Self::Buyout(r) => Some((AbilityKind::Buyout, r)),
            Self::Aid(r) => Some((AbilityKind::Aid, r)),
            Self::Isolation(r) => Some((AbilityKind::Isolation, r)),
            Self::Sanctions(r) => Some((AbilityKind::Sanctions, r)),
            Self::BeltRoad(r) => Some((AbilityKind::BeltRoad, r)),
            _ => None,
        }
    }

    /// Post-event snapshot embedded in the message.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        let embedded = match self {
            Self::Connected(p)
            | Self::StateUpdate(p)
            | Self::GameStarted(p)
            | Self::PlayerJoined(p)
            | Self::PlayerLeft(p)
            | Self::SyncResponse(p) => &p.game_state,
            Self::DiceRolled(e) => &e.game_state,
            Self::Teleport(e) => &e.game_state,
            Self::PropertyBought(e)
            | Self::HouseBuilt(e)
            | Self::HouseSold(e)
            | Self::PropertyMortgaged(e)
            | Self::PropertyUnmortgaged(e) => &e.game_state,
            Self::RentPaid(e) | Self::TaxPaid(e) => &e.game_state,
            Self::TurnEnded(e) | Self::TurnSkipped(e) | Self::PlayerDisqualified(e) => {
                &e.game_state
            }
            Self::Oreshnik(e)
            | Self::Buyout(e)
            | Self::Aid(e)
            | Self::Isolation(e)
            | Self::Sanctions(e)
            | Self::BeltRoad(e)
            | Self::AbilityUsed(e) => &e.game_state,
            Self::TradeOffered(e) | Self::TradeUpdated(e) => &e.game_state,
            Self::CasinoResult(e) => &e.game_state,
            Self::ChatMessage(e) => &e.game_state,
            Self::BotActions(e) => &e.game_state,
            Self::GameOver(e) => &e.game_state,
            Self::PlayerDisconnected(_) | Self::Error { .. } | Self::Pong | Self::Unknown => {
                return None;
            }
        };
        embedded.as_deref()
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "CONNECTED",
            Self::StateUpdate(_) => "STATE_UPDATE",
            Self::GameStarted(_) => "GAME_STARTED",
            Self::PlayerJoined(_) => "PLAYER_JOINED",
            Self::PlayerLeft(_) => "PLAYER_LEFT",
            Self::SyncResponse(_) => "SYNC_RESPONSE",
            Self::DiceRolled(_) => "DICE_ROLLED",
            Self::Teleport(_) => "TELEPORT",
            Self::PropertyBought(_) => "PROPERTY_BOUGHT",
            Self::HouseBuilt(_) => "HOUSE_BUILT",
            Self::HouseSold(_) => "HOUSE_SOLD",
            Self::PropertyMortgaged(_) => "PROPERTY_MORTGAGED",
            Self::PropertyUnmortgaged(_) => "PROPERTY_UNMORTGAGED",
            Self::RentPaid(_) => "RENT_PAID",
            Self::TaxPaid(_) => "TAX_PAID",
            Self::TurnEnded(_) => "TURN_ENDED",
            Self::TurnSkipped(_) => "TURN_SKIPPED",
            Self::PlayerDisqualified(_) => "PLAYER_DISQUALIFIED",
            Self::Oreshnik(_) => "ORESHNIK",
            Self::Buyout(_) => "BUYOUT",
            Self::Aid(_) => "AID",
            Self::Isolation(_) => "ISOLATION",
            Self::Sanctions(_) => "SANCTIONS",
            Self::BeltRoad(_) => "BELT_ROAD",
            Self::AbilityUsed(_) => "ABILITY_USED",
            Self::TradeOffered(_) => "TRADE_OFFERED",
            Self::TradeUpdated(_) => "TRADE_UPDATED",
            Self::CasinoResult(_) => "CASINO_RESULT",
            Self::ChatMessage(_) => "CHAT_MESSAGE",
            Self::BotActions(_) => "BOT_ACTIONS",
            Self::PlayerDisconnected(_) => "PLAYER_DISCONNECTED",
            Self::GameOver(_) => "GAME_OVER",
            Self::Error { .. } => "ERROR",
            Self::Pong => "PONG",
            Self::Unknown => "UNKNOWN",
        }
    }
}
