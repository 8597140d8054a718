//! Per-recipient snapshot building

use crate::ws::protocol::{BotState, GameEvent, ServerMsg};

use super::state::{ParticipantId, Round};

/// Builds tick messages for bots and observers
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    /// Tick for one bot: its own state, every bullet, and only the events
    /// it is entitled to see. `None` if the bot is not in the round.
    pub fn for_bot(round: &Round, bot_id: ParticipantId, events: &[GameEvent]) -> Option<ServerMsg> {
        let bot = round.bots.get(&bot_id)?;

        Some(ServerMsg::TickEvent {
            round_number: round.round_number,
            turn_number: round.turn_number,
            bot_state: bot.to_state(),
            bullet_states: round.bullet_states(),
            events: events
                .iter()
                .filter(|e| e.is_visible_to(bot_id))
                .cloned()
                .collect(),
        })
    }

    /// Tick for controllers: everything
    pub fn for_observer(round: &Round, events: &[GameEvent]) -> ServerMsg {
        let bot_states: Vec<BotState> = round.bots.values().map(|b| b.to_state()).collect();

        ServerMsg::TickEventObserver {
            round_number: round.round_number,
            turn_number: round.turn_number,
            bot_states,
            bullet_states: round.bullet_states(),
            events: events.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::setup::GameSetup;
    use crate::game::state::Entrant;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn round() -> Round {
        let entrants: Vec<Entrant> = (1..=3)
            .map(|id| Entrant {
                id,
                initial_position: None,
            })
            .collect();
        Round::new(1, &GameSetup::default(), &entrants, &mut ChaCha8Rng::seed_from_u64(3))
    }

    fn events() -> Vec<GameEvent> {
        vec![
            GameEvent::ScannedBot {
                turn_number: 1,
                scanned_by_bot_id: 1,
                scanned_bot_id: 2,
                energy: 100.0,
                x: 0.0,
                y: 0.0,
                direction: 0.0,
                speed: 0.0,
            },
            GameEvent::SkippedTurn {
                turn_number: 1,
                bot_id: 2,
            },
            GameEvent::BotDeath {
                turn_number: 1,
                victim_id: 3,
                cause: crate::ws::protocol::DeathCause::Inactivity,
            },
        ]
    }

    #[test]
    fn bot_tick_filters_events() {
        let round = round();
        let msg = SnapshotBuilder::for_bot(&round, 1, &events());
        match msg {
            Some(ServerMsg::TickEvent {
                bot_state, events, ..
            }) => {
                assert_eq!(bot_state.id, 1);
                assert_eq!(events.len(), 2);
                assert!(events
                    .iter()
                    .all(|e| !matches!(e, GameEvent::SkippedTurn { .. })));
            }
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn unknown_bot_gets_no_tick() {
        assert!(SnapshotBuilder::for_bot(&round(), 9, &events()).is_none());
    }

    #[test]
    fn observer_tick_has_all_bots_and_events() {
        match SnapshotBuilder::for_observer(&round(), &events()) {
            ServerMsg::TickEventObserver {
                bot_states, events, ..
            } => {
                assert_eq!(bot_states.len(), 3);
                assert_eq!(events.len(), 3);
            }
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }
}
