//! Configuration module - environment variable parsing

pub mod presets;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub use presets::{GamePresets, PresetError};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Game types this server offers
    pub game_types: Vec<String>,
    /// Game type used when a controller starts a game without a setup
    pub default_game_type: String,
    /// Turn pace override for every preset
    pub turns_per_second: Option<i32>,

    /// Accepted bot secrets; empty means bots need none
    pub bot_secrets: Vec<String>,
    /// Accepted controller secrets; empty means controllers need none
    pub controller_secrets: Vec<String>,

    /// Honour the initial positions bots request
    pub enable_initial_position: bool,
    /// Optional properties file with preset overrides
    pub games_file: Option<PathBuf>,
    /// Fixed match seed for reproducible games
    pub match_seed: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:7654".to_string())
        };

        let game_types = env::var("GAME_TYPES")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| vec!["classic".into(), "melee".into(), "1v1".into()]);
        if game_types.is_empty() {
            return Err(ConfigError::Invalid("GAME_TYPES"));
        }

        let default_game_type = match env::var("DEFAULT_GAME_TYPE") {
            Ok(t) if !game_types.contains(&t) => return Err(ConfigError::Invalid("DEFAULT_GAME_TYPE")),
            Ok(t) => t,
            Err(_) => game_types[0].clone(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            game_types,
            default_game_type,
            turns_per_second: parse_var("TPS")?,

            bot_secrets: env::var("BOT_SECRETS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            controller_secrets: env::var("CONTROLLER_SECRETS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),

            enable_initial_position: parse_var("ENABLE_INITIAL_POSITION")?.unwrap_or(false),
            games_file: env::var("GAMES_FILE").ok().map(PathBuf::from),
            match_seed: parse_var("MATCH_SEED")?,
        })
    }

    /// Presets for the configured game types, with file overrides and the
    /// turn pace applied
    pub fn load_presets(&self) -> Result<GamePresets, PresetError> {
        let mut presets = GamePresets::defaults();
        if let Some(path) = &self.games_file {
            presets.load_file(path)?;
        }
        presets.restrict_to(&self.game_types)?;
        if let Some(tps) = self.turns_per_second {
            presets.set_turns_per_second(tps);
        }
        Ok(presets)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
