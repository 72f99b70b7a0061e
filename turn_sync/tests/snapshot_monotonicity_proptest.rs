//! Property-based tests for the effective view
//!
//! Whatever mix of animated events and plain snapshots arrives, once every
//! animation has played out the view must show exactly what the last
//! snapshot says, and a participant with nothing in flight must never lag
//! behind it.

use proptest::prelude::*;
use tokio::time::{Duration, Instant};
use turn_sync::{
    ParticipantId, PhaseTimings, ServerMessage, Snapshot, TurnEngine,
    entities::{GameStatus, ParticipantState},
    messages::{DiceRolled, StatePush, Teleport},
};

const PLAYERS: [&str; 3] = ["a", "b", "c"];

#[derive(Clone, Debug)]
enum Step {
    Roll { who: usize, dice: [u8; 2] },
    Teleport { who: usize, to: usize },
    Push { money: i64 },
    Wait { millis: u64 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..PLAYERS.len(), 1u8..=6, 1u8..=6).prop_map(|(who, d1, d2)| Step::Roll {
            who,
            dice: [d1, d2]
        }),
        (0..PLAYERS.len(), 0usize..40).prop_map(|(who, to)| Step::Teleport { who, to }),
        (0i64..3000).prop_map(|money| Step::Push { money }),
        (0u64..8000).prop_map(|millis| Step::Wait { millis }),
    ]
}

/// Server-side state the generated events are derived from.
struct Server {
    positions: [usize; 3],
    money: i64,
    turn_number: u64,
}

impl Server {
    fn snapshot(&mut self) -> Snapshot {
        self.turn_number += 1;
        let mut snapshot = Snapshot {
            game_status: GameStatus::Active,
            turn_number: self.turn_number,
            ..Default::default()
        };
        for (name, position) in PLAYERS.iter().zip(self.positions) {
            let id = ParticipantId::new(name);
            snapshot.player_order.push(id.clone());
            snapshot.players.insert(
                id.clone(),
                ParticipantState {
                    id,
                    position,
                    money: self.money,
                    ..Default::default()
                },
            );
        }
        snapshot
    }
}

fn assert_idle_participants_current(engine: &TurnEngine) {
    let view = engine.view();
    let Some(latest) = engine.authoritative() else {
        return;
    };
    for (id, state) in &latest.players {
        if view.phase_of(id) == turn_sync::Phase::Idle {
            let shown = view.participant(id).map(|p| &p.state);
            assert_eq!(shown, Some(state), "{id} lags behind the latest snapshot");
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_view_converges_to_latest_snapshot(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut engine = TurnEngine::new(ParticipantId::new("a"), PhaseTimings::default(), false);
        let mut server = Server { positions: [0; 3], money: 1500, turn_number: 0 };
        let mut now = Instant::now();

        engine.apply(ServerMessage::StateUpdate(StatePush {
            game_state: Some(Box::new(server.snapshot())),
        }), now);

        for step in steps {
            match step {
                Step::Roll { who, dice } => {
                    server.positions[who] =
                        (server.positions[who] + usize::from(dice[0] + dice[1])) % 40;
                    engine.apply(ServerMessage::DiceRolled(DiceRolled {
                        player_id: ParticipantId::new(PLAYERS[who]),
                        dice,
                        game_state: Some(Box::new(server.snapshot())),
                        ..Default::default()
                    }), now);
                }
                Step::Teleport { who, to } => {
                    server.positions[who] = to;
                    engine.apply(ServerMessage::Teleport(Teleport {
                        player_id: ParticipantId::new(PLAYERS[who]),
                        game_state: Some(Box::new(server.snapshot())),
                        ..Default::default()
                    }), now);
                }
                Step::Push { money } => {
                    server.money = money;
                    engine.apply(ServerMessage::StateUpdate(StatePush {
                        game_state: Some(Box::new(server.snapshot())),
                    }), now);
                }
                Step::Wait { millis } => {
                    let until = now + Duration::from_millis(millis);
                    while let Some(deadline) = engine.next_deadline().filter(|d| *d <= until) {
                        engine.tick(deadline);
                        assert_idle_participants_current(&engine);
                    }
                    now = until;
                    engine.tick(now);
                }
            }
            assert_idle_participants_current(&engine);
        }

        let mut ticks = 0;
        while let Some(deadline) = engine.next_deadline() {
            engine.tick(deadline);
            ticks += 1;
            prop_assert!(ticks < 100_000, "engine never went idle");
        }

        let view = engine.view();
        let latest = engine.authoritative().expect("snapshot applied");
        prop_assert!(view.phases.is_empty());
        for (id, state) in &latest.players {
            let shown = view.participant(id).expect("participant projected");
            prop_assert_eq!(&shown.state, state);
            prop_assert!(shown.walk.is_none());
        }
        prop_assert!(!view.locks.any());
    }
}
