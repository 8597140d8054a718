//! Game type presets and the properties file that overrides them
//!
//! A properties file holds `<game type>.<field>=<value>` lines, e.g.
//!
//! ```text
//! # tighter melee
//! melee.arena_width=1200
//! melee.is_arena_width_locked=true
//! ```
//!
//! A game type that is not built in starts from the `custom` preset.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use tracing::{debug, info};

use crate::game::setup::{ConfigurationError, GameSetup};

/// Errors loading presets
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected '<game>.<field>=<value>', got '{text}'")]
    Syntax { line: usize, text: String },

    #[error("line {line}: unknown field '{field}'")]
    UnknownKey { line: usize, field: String },

    #[error("line {line}: invalid value '{value}' for '{field}'")]
    InvalidValue {
        line: usize,
        field: String,
        value: String,
    },

    #[error("preset '{game_type}': {source}")]
    Invalid {
        game_type: String,
        #[source]
        source: ConfigurationError,
    },

    #[error("no preset for game type '{0}'")]
    Missing(String),
}

enum FieldError {
    Unknown,
    Invalid,
}

/// Game setups keyed by game type
#[derive(Debug, Clone, PartialEq)]
pub struct GamePresets {
    presets: BTreeMap<String, GameSetup>,
}

impl Default for GamePresets {
    fn default() -> Self {
        Self::defaults()
    }
}

impl GamePresets {
    /// The built-in `custom`, `classic`, `melee` and `1v1` presets
    pub fn defaults() -> Self {
        let custom = GameSetup::default();

        let classic = GameSetup {
            game_type: "classic".to_string(),
            is_arena_width_locked: true,
            is_arena_height_locked: true,
            is_min_number_of_participants_locked: true,
            is_max_number_of_participants_locked: true,
            is_number_of_rounds_locked: true,
            is_gun_cooling_rate_locked: true,
            is_max_inactivity_turns_locked: true,
            ..custom.clone()
        };

        let melee = GameSetup {
            game_type: "melee".to_string(),
            arena_width: 1000,
            is_arena_width_locked: true,
            arena_height: 1000,
            is_arena_height_locked: true,
            min_number_of_participants: 10,
            is_min_number_of_participants_locked: true,
            ..custom.clone()
        };

        let one_vs_one = GameSetup {
            game_type: "1v1".to_string(),
            arena_width: 1000,
            is_arena_width_locked: true,
            arena_height: 1000,
            is_arena_height_locked: true,
            min_number_of_participants: 2,
            is_min_number_of_participants_locked: true,
            max_number_of_participants: Some(2),
            is_max_number_of_participants_locked: true,
            ..custom.clone()
        };

        let presets = [custom, classic, melee, one_vs_one]
            .into_iter()
            .map(|p| (p.game_type.clone(), p))
            .collect();
        Self { presets }
    }

    pub fn get(&self, game_type: &str) -> Option<&GameSetup> {
        self.presets.get(game_type)
    }

    pub fn game_types(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    pub fn insert(&mut self, setup: GameSetup) {
        self.presets.insert(setup.game_type.clone(), setup);
    }

    /// Keep only the listed game types
    pub fn restrict_to(&mut self, game_types: &[String]) -> Result<(), PresetError> {
        if let Some(missing) = game_types.iter().find(|t| !self.presets.contains_key(*t)) {
            return Err(PresetError::Missing(missing.clone()));
        }
        self.presets.retain(|name, _| game_types.contains(name));
        Ok(())
    }

    /// Override the turn pace of every preset
    pub fn set_turns_per_second(&mut self, tps: i32) {
        for setup in self.presets.values_mut() {
            setup.default_turns_per_second = tps;
        }
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), PresetError> {
        let text = std::fs::read_to_string(path).map_err(|source| PresetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.apply_properties(&text)?;
        info!(path = %path.display(), game_types = ?self.game_types(), "Loaded game presets");
        Ok(())
    }

    /// Apply `<game>.<field>=<value>` lines on top of the current presets
    pub fn apply_properties(&mut self, text: &str) -> Result<(), PresetError> {
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }

            let syntax = || PresetError::Syntax {
                line,
                text: trimmed.to_string(),
            };
            let (key, value) = trimmed
                .split_once('=')
                .or_else(|| trimmed.split_once(':'))
                .ok_or_else(syntax)?;
            let (game_type, field) = key.trim().split_once('.').ok_or_else(syntax)?;
            let (game_type, field, value) = (game_type.trim(), field.trim(), value.trim());
            if game_type.is_empty() {
                return Err(syntax());
            }

            let setup = self
                .presets
                .entry(game_type.to_string())
                .or_insert_with(|| GameSetup {
                    game_type: game_type.to_string(),
                    ..GameSetup::default()
                });

            set_field(setup, field, value).map_err(|e| match e {
                FieldError::Unknown => PresetError::UnknownKey {
                    line,
                    field: field.to_string(),
                },
                FieldError::Invalid => PresetError::InvalidValue {
                    line,
                    field: field.to_string(),
                    value: value.to_string(),
                },
            })?;
            debug!(game_type, field, value, "Preset field set");
        }

        for (game_type, setup) in &self.presets {
            setup.validate().map_err(|source| PresetError::Invalid {
                game_type: game_type.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn parse<T: FromStr>(value: &str) -> Result<T, FieldError> {
    value.parse().map_err(|_| FieldError::Invalid)
}

/// Empty or `null` clears an optional bound
fn parse_optional<T: FromStr>(value: &str) -> Result<Option<T>, FieldError> {
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        Ok(None)
    } else {
        parse(value).map(Some)
    }
}

fn set_field(setup: &mut GameSetup, field: &str, value: &str) -> Result<(), FieldError> {
    match field {
        "arena_width" => setup.arena_width = parse(value)?,
        "is_arena_width_locked" => setup.is_arena_width_locked = parse(value)?,
        "arena_height" => setup.arena_height = parse(value)?,
        "is_arena_height_locked" => setup.is_arena_height_locked = parse(value)?,
        "min_number_of_participants" => setup.min_number_of_participants = parse(value)?,
        "is_min_number_of_participants_locked" => {
            setup.is_min_number_of_participants_locked = parse(value)?
        }
        "max_number_of_participants" => setup.max_number_of_participants = parse_optional(value)?,
        "is_max_number_of_participants_locked" => {
            setup.is_max_number_of_participants_locked = parse(value)?
        }
        "number_of_rounds" => setup.number_of_rounds = parse(value)?,
        "is_number_of_rounds_locked" => setup.is_number_of_rounds_locked = parse(value)?,
        "gun_cooling_rate" => setup.gun_cooling_rate = parse(value)?,
        "is_gun_cooling_rate_locked" => setup.is_gun_cooling_rate_locked = parse(value)?,
        "max_inactivity_turns" => setup.max_inactivity_turns = parse(value)?,
        "is_max_inactivity_turns_locked" => setup.is_max_inactivity_turns_locked = parse(value)?,
        "turn_timeout" => setup.turn_timeout = parse(value)?,
        "is_turn_timeout_locked" => setup.is_turn_timeout_locked = parse(value)?,
        "ready_timeout" => setup.ready_timeout = parse(value)?,
        "is_ready_timeout_locked" => setup.is_ready_timeout_locked = parse(value)?,
        "default_turns_per_second" => setup.default_turns_per_second = parse(value)?,
        "dead_bots_are_obstacles" => setup.dead_bots_are_obstacles = parse(value)?,
        _ => return Err(FieldError::Unknown),
    }
    Ok(())
}
