//! Game setup: the immutable rule set of a match

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rules for one match. Lock flags mark the fields a controller may not
/// change relative to the preset of the same game type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSetup {
    pub game_type: String,
    pub arena_width: u32,
    #[serde(default)]
    pub is_arena_width_locked: bool,
    pub arena_height: u32,
    #[serde(default)]
    pub is_arena_height_locked: bool,
    pub min_number_of_participants: u32,
    #[serde(default)]
    pub is_min_number_of_participants_locked: bool,
    #[serde(default)]
    pub max_number_of_participants: Option<u32>,
    #[serde(default)]
    pub is_max_number_of_participants_locked: bool,
    pub number_of_rounds: u32,
    #[serde(default)]
    pub is_number_of_rounds_locked: bool,
    pub gun_cooling_rate: f64,
    #[serde(default)]
    pub is_gun_cooling_rate_locked: bool,
    pub max_inactivity_turns: u32,
    #[serde(default)]
    pub is_max_inactivity_turns_locked: bool,
    /// Intent collection window per turn, in microseconds
    pub turn_timeout: u64,
    #[serde(default)]
    pub is_turn_timeout_locked: bool,
    /// Time bots get to acknowledge the game setup, in microseconds
    pub ready_timeout: u64,
    #[serde(default)]
    pub is_ready_timeout_locked: bool,
    /// Turn pace; zero or negative runs as fast as bots answer
    pub default_turns_per_second: i32,
    /// Whether dead bots stay in the arena as static obstacles
    #[serde(default)]
    pub dead_bots_are_obstacles: bool,
}

impl Default for GameSetup {
    fn default() -> Self {
        Self {
            game_type: "custom".to_string(),
            arena_width: 800,
            is_arena_width_locked: false,
            arena_height: 600,
            is_arena_height_locked: false,
            min_number_of_participants: 2,
            is_min_number_of_participants_locked: false,
            max_number_of_participants: None,
            is_max_number_of_participants_locked: false,
            number_of_rounds: 10,
            is_number_of_rounds_locked: false,
            gun_cooling_rate: 0.1,
            is_gun_cooling_rate_locked: false,
            max_inactivity_turns: 450,
            is_max_inactivity_turns_locked: false,
            turn_timeout: 30_000,
            is_turn_timeout_locked: false,
            ready_timeout: 1_000_000,
            is_ready_timeout_locked: false,
            default_turns_per_second: 30,
            dead_bots_are_obstacles: false,
        }
    }
}

/// Configuration errors reported to the requesting controller
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("field '{field}' is locked by game type '{game_type}'")]
    LockedField {
        field: &'static str,
        game_type: String,
    },

    #[error("game type '{0}' is not supported by this server")]
    UnknownGameType(String),

    #[error("{count} participants requested, game type allows {min}..={max}")]
    ParticipantCount { count: u32, min: u32, max: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("bot '{0}' is not connected or does not support the game type")]
    UnavailableBot(String),

    #[error("a game is already in progress")]
    GameInProgress,

    #[error("no game is running")]
    NoGameRunning,
}

impl GameSetup {
    /// Check the structural invariants of the setup
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigurationError {
            ConfigurationError::InvalidValue {
                field,
                reason: reason.to_string(),
            }
        }

        if self.game_type.trim().is_empty() {
            return Err(invalid("game_type", "must not be empty"));
        }
        if self.arena_width == 0 {
            return Err(invalid("arena_width", "must be positive"));
        }
        if self.arena_height == 0 {
            return Err(invalid("arena_height", "must be positive"));
        }
        if self.min_number_of_participants == 0 {
            return Err(invalid("min_number_of_participants", "must be at least 1"));
        }
        if let Some(max) = self.max_number_of_participants {
            if max < self.min_number_of_participants {
                return Err(invalid("max_number_of_participants", "must not be below the minimum"));
            }
        }
        if self.number_of_rounds == 0 {
            return Err(invalid("number_of_rounds", "must be at least 1"));
        }
        if !(self.gun_cooling_rate.is_finite() && self.gun_cooling_rate > 0.0) {
            return Err(invalid("gun_cooling_rate", "must be positive"));
        }
        if self.turn_timeout == 0 {
            return Err(invalid("turn_timeout", "must be positive"));
        }
        if self.ready_timeout == 0 {
            return Err(invalid("ready_timeout", "must be positive"));
        }
        Ok(())
    }

    /// Apply a controller's requested setup on top of this preset.
    ///
    /// Locked fields must keep the preset's value. The lock flags and the
    /// corpse policy always come from the preset.
    pub fn apply_request(&self, request: &GameSetup) -> Result<GameSetup, ConfigurationError> {
        if request.game_type != self.game_type {
            return Err(ConfigurationError::UnknownGameType(request.game_type.clone()));
        }

        let locked = |field: &'static str| ConfigurationError::LockedField {
            field,
            game_type: self.game_type.clone(),
        };

        let checks: [(bool, bool, &'static str); 9] = [
            (self.is_arena_width_locked, self.arena_width != request.arena_width, "arena_width"),
            (self.is_arena_height_locked, self.arena_height != request.arena_height, "arena_height"),
            (
                self.is_min_number_of_participants_locked,
                self.min_number_of_participants != request.min_number_of_participants,
                "min_number_of_participants",
            ),
            (
                self.is_max_number_of_participants_locked,
                self.max_number_of_participants != request.max_number_of_participants,
                "max_number_of_participants",
            ),
            (
                self.is_number_of_rounds_locked,
                self.number_of_rounds != request.number_of_rounds,
                "number_of_rounds",
            ),
            (
                self.is_gun_cooling_rate_locked,
                self.gun_cooling_rate != request.gun_cooling_rate,
                "gun_cooling_rate",
            ),
            (
                self.is_max_inactivity_turns_locked,
                self.max_inactivity_turns != request.max_inactivity_turns,
                "max_inactivity_turns",
            ),
            (self.is_turn_timeout_locked, self.turn_timeout != request.turn_timeout, "turn_timeout"),
            (self.is_ready_timeout_locked, self.ready_timeout != request.ready_timeout, "ready_timeout"),
        ];

        if let Some(&(_, _, field)) = checks
            .iter()
            .find(|(is_locked, changed, _)| *is_locked && *changed)
        {
            return Err(locked(field));
        }

        let resolved = GameSetup {
            game_type: self.game_type.clone(),
            arena_width: request.arena_width,
            arena_height: request.arena_height,
            min_number_of_participants: request.min_number_of_participants,
            max_number_of_participants: request.max_number_of_participants,
            number_of_rounds: request.number_of_rounds,
            gun_cooling_rate: request.gun_cooling_rate,
            max_inactivity_turns: request.max_inactivity_turns,
            turn_timeout: request.turn_timeout,
            ready_timeout: request.ready_timeout,
            default_turns_per_second: request.default_turns_per_second,
            ..self.clone()
        };
        resolved.validate()?;
        Ok(resolved)
    }

    /// Check that `count` participants fit the game type
    pub fn check_participant_count(&self, count: u32) -> Result<(), ConfigurationError> {
        let too_few = count < self.min_number_of_participants;
        let too_many = self.max_number_of_participants.is_some_and(|max| count > max);
        if too_few || too_many {
            return Err(ConfigurationError::ParticipantCount {
                count,
                min: self.min_number_of_participants,
                max: self
                    .max_number_of_participants
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unbounded".to_string()),
            });
        }
        Ok(())
    }

    pub fn turn_timeout_duration(&self) -> Duration {
        Duration::from_micros(self.turn_timeout)
    }

    pub fn ready_timeout_duration(&self) -> Duration {
        Duration::from_micros(self.ready_timeout)
    }

    /// Minimum time between turns at the configured pace
    pub fn turn_period(&self) -> Option<Duration> {
        (self.default_turns_per_second > 0)
            .then(|| Duration::from_micros(1_000_000 / self.default_turns_per_second as u64))
    }
}
