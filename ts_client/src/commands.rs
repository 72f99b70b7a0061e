use std::fmt;
use turn_sync::{
    ClientCommand, ParticipantId, PreActionKind,
    entities::{CellIndex, Money, PaymentKind},
    messages::{AbilityKind, AbilityTarget, TradeAnswer, TradeProposal},
};

/// What the player typed, resolved against the session API.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Send now.
    Command(ClientCommand),
    /// Fire as soon as it becomes legal.
    Arm(PreActionKind),
    Disarm,
    /// Acknowledge that a participant's token finished moving; the local
    /// participant when none is given.
    Ack(Option<ParticipantId>),
    Help,
    Quit,
}

/// Errors that can occur during command parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A numeric argument did not parse.
    InvalidNumber { what: &'static str, value: String },
    /// A required argument is missing.
    MissingArgument { usage: &'static str },
    /// Unknown ability name.
    UnknownAbility(String),
    /// Unknown payment kind.
    UnknownPayment(String),
    /// Unrecognized command.
    UnrecognizedCommand(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNumber { what, value } => {
                write!(f, "Invalid {what} '{value}'. Must be a non-negative number")
            }
            Self::MissingArgument { usage } => write!(f, "Missing argument. Usage: {usage}"),
            Self::UnknownAbility(name) => write!(
                f,
                "Unknown ability '{name}'. Use oreshnik, buyout, aid, isolation, sanctions or belt_road"
            ),
            Self::UnknownPayment(kind) => {
                write!(f, "Unknown payment '{kind}'. Use 'pay rent', 'pay tax' or 'pay bail'")
            }
            Self::UnrecognizedCommand(cmd) => write!(
                f,
                "Unrecognized command '{cmd}'. Type 'help' to see available commands"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

pub const HELP: &str = "\
Commands:
  roll | end | buy | decline | bid | pass | surrender | sync
  pay rent|tax|bail
  build N | sell N | mortgage N | unmortgage N
  ability KIND [TARGET]        KIND: oreshnik buyout aid isolation sanctions belt_road
  offer PLAYER [$N] [CELL...] for [$N] [CELL...]
  accept|reject|cancel TRADE
  bet N [N...]
  say TEXT
  arm roll|end|pay KIND|buy|decline|bid|pass|bet N...
  disarm | ack [PLAYER] | help | quit
";

/// Parse a line of input into an [`Intent`].
///
/// # Examples
///
/// ```
/// use ts_client::commands::{Intent, parse_command};
/// use turn_sync::ClientCommand;
///
/// assert_eq!(parse_command("roll"), Ok(Intent::Command(ClientCommand::Roll)));
/// assert_eq!(
///     parse_command("build 3"),
///     Ok(Intent::Command(ClientCommand::Build { property_id: 3 }))
/// );
/// ```
pub fn parse_command(input: &str) -> Result<Intent, ParseError> {
    let trimmed = input.trim();

    match trimmed {
        "roll" => return Ok(Intent::Command(ClientCommand::Roll)),
        "end" => return Ok(Intent::Command(ClientCommand::EndTurn)),
        "buy" => return Ok(Intent::Command(ClientCommand::Buy)),
        "decline" => return Ok(Intent::Command(ClientCommand::DeclineProperty)),
        "bid" => return Ok(Intent::Command(ClientCommand::RaiseBid)),
        "pass" => return Ok(Intent::Command(ClientCommand::PassAuction)),
        "surrender" => return Ok(Intent::Command(ClientCommand::Surrender)),
        "sync" => return Ok(Intent::Command(ClientCommand::Sync)),
        "disarm" => return Ok(Intent::Disarm),
        "ack" => return Ok(Intent::Ack(None)),
        "help" | "?" => return Ok(Intent::Help),
        "quit" | "exit" => return Ok(Intent::Quit),
        _ => {}
    }

    if let Some(text) = trimmed.strip_prefix("say ") {
        return Ok(Intent::Command(ClientCommand::chat(text)));
    }

    let parts: Vec<&str> = trimmed.split_ascii_whitespace().collect();
    match parts.first() {
        Some(&"pay") => parse_payment(&parts).map(|kind| Intent::Command(kind.command())),
        Some(&"build") => parse_cell(&parts, "build N")
            .map(|property_id| Intent::Command(ClientCommand::Build { property_id })),
        Some(&"sell") => parse_cell(&parts, "sell N")
            .map(|property_id| Intent::Command(ClientCommand::SellHouse { property_id })),
        Some(&"mortgage") => parse_cell(&parts, "mortgage N")
            .map(|property_id| Intent::Command(ClientCommand::Mortgage { property_id })),
        Some(&"unmortgage") => parse_cell(&parts, "unmortgage N")
            .map(|property_id| Intent::Command(ClientCommand::Unmortgage { property_id })),
        Some(&"ability") => parse_ability(&parts).map(Intent::Command),
        Some(&"offer") => parse_offer(&parts).map(Intent::Command),
        Some(&(answer @ ("accept" | "reject" | "cancel"))) => {
            let trade_id = parts.get(1).ok_or(ParseError::MissingArgument {
                usage: "accept|reject|cancel TRADE",
            })?;
            let response = match answer {
                "accept" => TradeAnswer::Accept,
                "reject" => TradeAnswer::Reject,
                _ => TradeAnswer::Cancel,
            };
            Ok(Intent::Command(ClientCommand::TradeResponse {
                trade_id: trade_id.to_string(),
                response,
            }))
        }
        Some(&"bet") => parse_bet(&parts[1..])
            .map(|bet_numbers| Intent::Command(ClientCommand::CasinoBet { bet_numbers })),
        Some(&"arm") => parse_arm(&parts[1..]).map(Intent::Arm),
        Some(&"ack") => Ok(Intent::Ack(parts.get(1).map(|id| ParticipantId::new(id)))),
        _ => Err(ParseError::UnrecognizedCommand(trimmed.to_string())),
    }
}

/// Parse "pay rent|tax|bail"
fn parse_payment(parts: &[&str]) -> Result<PreActionKind, ParseError> {
    let kind = parts.get(1).ok_or(ParseError::MissingArgument {
        usage: "pay rent|tax|bail",
    })?;
    let kind = match *kind {
        "rent" => PaymentKind::Rent,
        "tax" => PaymentKind::Tax,
        "bail" => PaymentKind::Bail,
        other => return Err(ParseError::UnknownPayment(other.to_string())),
    };
    Ok(PreActionKind::Settle(kind))
}

fn parse_cell(parts: &[&str], usage: &'static str) -> Result<CellIndex, ParseError> {
    let value = parts.get(1).ok_or(ParseError::MissingArgument { usage })?;
    value.parse().map_err(|_| ParseError::InvalidNumber {
        what: "cell",
        value: value.to_string(),
    })
}

/// Parse "ability KIND [TARGET]"
fn parse_ability(parts: &[&str]) -> Result<ClientCommand, ParseError> {
    let name = parts.get(1).ok_or(ParseError::MissingArgument {
        usage: "ability KIND [TARGET]",
    })?;
    let ability_type = match name.to_ascii_lowercase().as_str() {
        "oreshnik" => AbilityKind::Oreshnik,
        "buyout" => AbilityKind::Buyout,
        "aid" => AbilityKind::Aid,
        "isolation" => AbilityKind::Isolation,
        "sanctions" => AbilityKind::Sanctions,
        "belt_road" | "beltroad" => AbilityKind::BeltRoad,
        _ => return Err(ParseError::UnknownAbility(name.to_string())),
    };
    let target_id = match parts.get(2) {
        None => None,
        Some(target) if ability_type.targets_participant() => {
            Some(AbilityTarget::Participant(ParticipantId::new(target)))
        }
        Some(target) => Some(AbilityTarget::Cell(target.parse().map_err(|_| {
            ParseError::InvalidNumber {
                what: "target cell",
                value: target.to_string(),
            }
        })?)),
    };
    Ok(ClientCommand::UseAbility {
        ability_type,
        target_id,
    })
}

/// Parse "offer PLAYER [$N] [CELL...] for [$N] [CELL...]"
fn parse_offer(parts: &[&str]) -> Result<ClientCommand, ParseError> {
    const USAGE: &str = "offer PLAYER [$N] [CELL...] for [$N] [CELL...]";
    let player = parts
        .get(1)
        .ok_or(ParseError::MissingArgument { usage: USAGE })?;
    let rest = &parts[2..];
    let split = rest
        .iter()
        .position(|part| *part == "for")
        .ok_or(ParseError::MissingArgument { usage: USAGE })?;
    let (offer_money, offer_properties) = parse_side(&rest[..split])?;
    let (request_money, request_properties) = parse_side(&rest[split + 1..])?;
    Ok(ClientCommand::TradeOffer(TradeProposal {
        to_player_id: ParticipantId::new(player),
        offer_money,
        offer_properties,
        request_money,
        request_properties,
    }))
}

fn parse_side(parts: &[&str]) -> Result<(Money, Vec<CellIndex>), ParseError> {
    let mut money = 0;
    let mut cells = Vec::new();
    for part in parts {
        if let Some(amount) = part.strip_prefix('$') {
            money = amount
                .parse::<Money>()
                .ok()
                .filter(|m| *m >= 0)
                .ok_or_else(|| ParseError::InvalidNumber {
                    what: "amount",
                    value: part.to_string(),
                })?;
        } else {
            cells.push(part.parse().map_err(|_| ParseError::InvalidNumber {
                what: "cell",
                value: part.to_string(),
            })?);
        }
    }
    Ok((money, cells))
}

fn parse_bet(numbers: &[&str]) -> Result<Vec<u8>, ParseError> {
    if numbers.is_empty() {
        return Err(ParseError::MissingArgument { usage: "bet N [N...]" });
    }
    numbers
        .iter()
        .map(|n| {
            n.parse().map_err(|_| ParseError::InvalidNumber {
                what: "bet number",
                value: n.to_string(),
            })
        })
        .collect()
}

/// Parse "arm ACTION"
fn parse_arm(parts: &[&str]) -> Result<PreActionKind, ParseError> {
    const USAGE: &str = "arm roll|end|pay KIND|buy|decline|bid|pass|bet N...";
    match parts.first() {
        Some(&"roll") => Ok(PreActionKind::Roll),
        Some(&"end") => Ok(PreActionKind::EndTurn),
        Some(&"pay") => parse_payment(parts),
        Some(&"buy") => Ok(PreActionKind::Buy),
        Some(&"decline") => Ok(PreActionKind::Decline),
        Some(&"bid") => Ok(PreActionKind::RaiseBid),
        Some(&"pass") => Ok(PreActionKind::PassAuction),
        Some(&"bet") => parse_bet(&parts[1..]).map(|bet_numbers| PreActionKind::CasinoBet { bet_numbers }),
        Some(other) => Err(ParseError::UnrecognizedCommand(format!("arm {other}"))),
        None => Err(ParseError::MissingArgument { usage: USAGE }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Single-word command tests ===

    #[test]
    fn test_parse_roll() {
        assert_eq!(parse_command("roll"), Ok(Intent::Command(ClientCommand::Roll)));
    }

    #[test]
    fn test_parse_end() {
        assert_eq!(
            parse_command("end"),
            Ok(Intent::Command(ClientCommand::EndTurn))
        );
    }

    #[test]
    fn test_parse_quit_aliases() {
        assert_eq!(parse_command("quit"), Ok(Intent::Quit));
        assert_eq!(parse_command("exit"), Ok(Intent::Quit));
    }

    #[test]
    fn test_parse_with_whitespace() {
        assert_eq!(
            parse_command("  decline  "),
            Ok(Intent::Command(ClientCommand::DeclineProperty))
        );
    }

    // === Multi-word command tests ===

    #[test]
    fn test_parse_pay() {
        assert_eq!(
            parse_command("pay tax"),
            Ok(Intent::Command(ClientCommand::PayTax))
        );
        assert_eq!(
            parse_command("pay fine"),
            Err(ParseError::UnknownPayment("fine".to_string()))
        );
    }

    #[test]
    fn test_parse_mortgage() {
        assert_eq!(
            parse_command("mortgage 11"),
            Ok(Intent::Command(ClientCommand::Mortgage { property_id: 11 }))
        );
        assert!(matches!(
            parse_command("mortgage eleven"),
            Err(ParseError::InvalidNumber { what: "cell", .. })
        ));
    }

    #[test]
    fn test_parse_ability_targets() {
        assert_eq!(
            parse_command("ability oreshnik 24"),
            Ok(Intent::Command(ClientCommand::UseAbility {
                ability_type: AbilityKind::Oreshnik,
                target_id: Some(AbilityTarget::Cell(24)),
            }))
        );
        assert_eq!(
            parse_command("ability sanctions p2"),
            Ok(Intent::Command(ClientCommand::UseAbility {
                ability_type: AbilityKind::Sanctions,
                target_id: Some(AbilityTarget::Participant(ParticipantId::new("p2"))),
            }))
        );
        assert_eq!(
            parse_command("ability aid"),
            Ok(Intent::Command(ClientCommand::UseAbility {
                ability_type: AbilityKind::Aid,
                target_id: None,
            }))
        );
    }

    #[test]
    fn test_parse_offer() {
        assert_eq!(
            parse_command("offer p2 $100 3 for 12"),
            Ok(Intent::Command(ClientCommand::TradeOffer(TradeProposal {
                to_player_id: ParticipantId::new("p2"),
                offer_money: 100,
                offer_properties: vec![3],
                request_money: 0,
                request_properties: vec![12],
            })))
        );
        assert!(matches!(
            parse_command("offer p2 $100"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_parse_trade_response() {
        assert_eq!(
            parse_command("reject t-9"),
            Ok(Intent::Command(ClientCommand::TradeResponse {
                trade_id: "t-9".to_string(),
                response: TradeAnswer::Reject,
            }))
        );
    }

    #[test]
    fn test_parse_say_keeps_spacing() {
        assert_eq!(
            parse_command("say good  game"),
            Ok(Intent::Command(ClientCommand::Chat {
                message: "good  game".to_string()
            }))
        );
    }

    #[test]
    fn test_parse_bet() {
        assert_eq!(
            parse_command("bet 1 7 9"),
            Ok(Intent::Command(ClientCommand::CasinoBet {
                bet_numbers: vec![1, 7, 9]
            }))
        );
        assert!(matches!(
            parse_command("bet"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    // === Arming tests ===

    #[test]
    fn test_parse_arm() {
        assert_eq!(parse_command("arm end"), Ok(Intent::Arm(PreActionKind::EndTurn)));
        assert_eq!(
            parse_command("arm pay rent"),
            Ok(Intent::Arm(PreActionKind::Settle(PaymentKind::Rent)))
        );
        assert!(matches!(
            parse_command("arm"),
            Err(ParseError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_command("ack"), Ok(Intent::Ack(None)));
        assert_eq!(
            parse_command("ack p3"),
            Ok(Intent::Ack(Some(ParticipantId::new("p3"))))
        );
    }

    // === Error tests ===

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(
            parse_command("dance"),
            Err(ParseError::UnrecognizedCommand("dance".to_string()))
        );
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::UnrecognizedCommand("dance".to_string());
        assert_eq!(
            err.to_string(),
            "Unrecognized command 'dance'. Type 'help' to see available commands"
        );
    }
}
