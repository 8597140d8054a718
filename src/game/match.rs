//! Match orchestration: round sequencing, scores and snapshots

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ws::protocol::{BotResults, DeathCause, GameEvent, Participant, ServerMsg};

use super::engine::{SimulationError, TurnEngine, TurnOutput};
use super::scoring::{rank, score_round, RoundRecord, Score};
use super::setup::GameSetup;
use super::snapshot::SnapshotBuilder;
use super::state::{BotIntent, Entrant, ParticipantId, Round};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Participants fixed, no round played yet
    Starting,
    InRound,
    BetweenRounds,
    Ended,
}

impl MatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchPhase::Starting => "starting",
            MatchPhase::InRound => "in_round",
            MatchPhase::BetweenRounds => "between_rounds",
            MatchPhase::Ended => "ended",
        }
    }
}

/// The authoritative game match. Owned by the server actor.
pub struct GameMatch {
    id: Uuid,
    seed: u64,
    setup: GameSetup,
    /// Sorted by participant id
    participants: Vec<Participant>,
    use_initial_positions: bool,
    rng: ChaCha8Rng,
    phase: MatchPhase,
    round: Option<Round>,
    rounds_played: u32,
    scores: BTreeMap<ParticipantId, Score>,
    /// Events raised between turns, delivered with the next tick
    pending_events: Vec<GameEvent>,
}

impl GameMatch {
    pub fn new(
        setup: GameSetup,
        mut participants: Vec<Participant>,
        seed: u64,
        use_initial_positions: bool,
    ) -> Self {
        participants.sort_by_key(|p| p.id);
        let scores = participants
            .iter()
            .map(|p| (p.id, Score::default()))
            .collect();

        let id = Uuid::new_v4();
        info!(
            match_id = %id,
            seed,
            game_type = %setup.game_type,
            participants = participants.len(),
            "Match created"
        );

        Self {
            id,
            seed,
            setup,
            participants,
            use_initial_positions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: MatchPhase::Starting,
            round: None,
            rounds_played: 0,
            scores,
            pending_events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn setup(&self) -> &GameSetup {
        &self.setup
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Current or last round number, 0 before the first round
    pub fn round_number(&self) -> u32 {
        self.round
            .as_ref()
            .map(|r| r.round_number)
            .unwrap_or(self.rounds_played)
    }

    pub fn turn_number(&self) -> u32 {
        self.round.as_ref().map(|r| r.turn_number).unwrap_or(0)
    }

    /// Participants still alive in the current round
    pub fn live_ids(&self) -> Vec<ParticipantId> {
        self.round
            .as_ref()
            .map(Round::alive_ids)
            .unwrap_or_default()
    }

    pub fn is_last_round(&self) -> bool {
        self.rounds_played >= self.setup.number_of_rounds
    }

    /// Begin the next round with freshly spawned bots
    pub fn start_round(&mut self) -> u32 {
        let round_number = self.rounds_played + 1;
        let entrants: Vec<Entrant> = self
            .participants
            .iter()
            .map(|p| Entrant {
                id: p.id,
                initial_position: if self.use_initial_positions {
                    p.initial_position
                } else {
                    None
                },
            })
            .collect();

        self.round = Some(Round::new(round_number, &self.setup, &entrants, &mut self.rng));
        self.phase = MatchPhase::InRound;
        self.pending_events.clear();
        info!(match_id = %self.id, round = round_number, "Round started");
        round_number
    }

    /// Resolve one turn of the current round
    pub fn run_turn(
        &mut self,
        intents: &BTreeMap<ParticipantId, BotIntent>,
    ) -> Result<TurnOutput, SimulationError> {
        let round = self.round.as_mut().ok_or(SimulationError::NoActiveRound)?;
        let mut output = TurnEngine::resolve(round, &self.setup, intents)?;

        if !self.pending_events.is_empty() {
            let mut events = std::mem::take(&mut self.pending_events);
            events.append(&mut output.events);
            output.events = events;
        }
        Ok(output)
    }

    /// Mark a participant dead because its connection went away.
    /// The death event is delivered with the next tick.
    pub fn kill_participant(&mut self, id: ParticipantId) -> bool {
        let Some(round) = self.round.as_mut() else {
            return false;
        };
        let turn_number = round.turn_number;
        let Some(bot) = round.bots.get_mut(&id).filter(|b| b.alive) else {
            return false;
        };

        bot.kill(turn_number);
        self.pending_events.push(GameEvent::BotDeath {
            turn_number,
            victim_id: id,
            cause: DeathCause::Disconnected,
        });
        debug!(match_id = %self.id, bot_id = id, "Participant removed from round");
        true
    }

    /// Close the current round and fold its scores into the match totals.
    /// Returns the round's own standings.
    pub fn finish_round(&mut self) -> Vec<BotResults> {
        let Some(round) = self.round.take() else {
            return Vec::new();
        };

        let round_scores = score_round(&RoundRecord::from_round(&round));
        for (id, score) in &round_scores {
            self.scores.entry(*id).or_default().accumulate(score);
        }
        self.rounds_played = round.round_number;
        self.phase = MatchPhase::BetweenRounds;

        info!(
            match_id = %self.id,
            round = round.round_number,
            turns = round.turn_number,
            "Round ended"
        );
        rank(&round_scores, &self.participants)
    }

    /// Ranked standings over all finished rounds
    pub fn results(&self) -> Vec<BotResults> {
        rank(&self.scores, &self.participants)
    }

    /// End the match. A round in progress is discarded unscored.
    pub fn finish(&mut self) -> Vec<BotResults> {
        self.round = None;
        self.phase = MatchPhase::Ended;
        info!(match_id = %self.id, rounds = self.rounds_played, "Match ended");
        self.results()
    }

    pub fn tick_for_bot(&self, bot_id: ParticipantId, events: &[GameEvent]) -> Option<ServerMsg> {
        SnapshotBuilder::for_bot(self.round.as_ref()?, bot_id, events)
    }

    pub fn tick_for_observer(&self, events: &[GameEvent]) -> Option<ServerMsg> {
        Some(SnapshotBuilder::for_observer(self.round.as_ref()?, events))
    }
}
