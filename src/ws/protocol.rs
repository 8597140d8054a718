//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::setup::GameSetup;
use crate::game::state::ParticipantId;

/// Requested starting position of a bot (honoured only when the server
/// enables initial positions)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialPosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub direction: Option<f64>,
}

/// Identity a bot presents in its handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotHandshake {
    /// Client-chosen id of the logical bot, stable across reconnects
    pub session_id: String,
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub country_codes: Vec<String>,
    pub game_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programming_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_position: Option<InitialPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Identity a controller presents in its handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerHandshake {
    pub session_id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Per-turn control values. Absent fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gun_turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radar_turn_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firepower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_gun_for_body_turn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjust_radar_for_gun_turn: Option<bool>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First message of a bot connection
    BotHandshake(BotHandshake),

    /// First message of a controller connection
    ControllerHandshake(ControllerHandshake),

    /// Bot acknowledges the announced game setup
    BotReady,

    /// Bot control values for the upcoming turn
    Intent(Intent),

    /// Controller asks to start a game with the given bots
    StartGame {
        /// Requested setup; the server default preset when absent
        #[serde(default)]
        game_setup: Option<GameSetup>,
        /// Session ids of the bots that should take part
        bot_session_ids: Vec<String>,
    },

    StopGame,
    PauseGame,
    ResumeGame,
    RestartGame,
}

impl ClientMsg {
    /// Wire discriminant of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMsg::BotHandshake(_) => "bot_handshake",
            ClientMsg::ControllerHandshake(_) => "controller_handshake",
            ClientMsg::BotReady => "bot_ready",
            ClientMsg::Intent(_) => "intent",
            ClientMsg::StartGame { .. } => "start_game",
            ClientMsg::StopGame => "stop_game",
            ClientMsg::PauseGame => "pause_game",
            ClientMsg::ResumeGame => "resume_game",
            ClientMsg::RestartGame => "restart_game",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Greeting sent as soon as a connection is accepted
    ServerHandshake {
        connection_id: Uuid,
        name: String,
        version: String,
        variant: String,
        game_types: Vec<String>,
    },

    /// Game announcement to a selected bot; answered with `bot_ready`
    GameSetup {
        my_id: ParticipantId,
        game_setup: GameSetup,
    },

    /// The game has begun
    GameStarted {
        /// Receiving bot's id; absent for controllers
        #[serde(default, skip_serializing_if = "Option::is_none")]
        my_id: Option<ParticipantId>,
        game_setup: GameSetup,
        participants: Vec<Participant>,
    },

    RoundStarted {
        round_number: u32,
    },

    RoundEnded {
        round_number: u32,
        turn_number: u32,
        results: Vec<BotResults>,
    },

    /// Per-turn snapshot for a bot
    TickEvent {
        round_number: u32,
        turn_number: u32,
        bot_state: BotState,
        bullet_states: Vec<BulletState>,
        events: Vec<GameEvent>,
    },

    /// Per-turn snapshot for controllers
    TickEventObserver {
        round_number: u32,
        turn_number: u32,
        bot_states: Vec<BotState>,
        bullet_states: Vec<BulletState>,
        events: Vec<GameEvent>,
    },

    /// The game is over, with final standings
    GameEnded {
        number_of_rounds: u32,
        /// True when a controller stopped the game early
        aborted: bool,
        results: Vec<BotResults>,
    },

    /// The game could not start or was cut short
    GameAborted {
        reason: AbortReason,
    },

    GamePaused,
    GameResumed,

    /// Bots currently connected to the server
    ParticipantList {
        participants: Vec<Participant>,
    },

    /// Typed error; a disconnect may follow
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Public identity of a connected bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: String,
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default)]
    pub country_codes: Vec<String>,
    pub game_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub programming_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_position: Option<InitialPosition>,
}

impl Participant {
    pub fn from_handshake(id: ParticipantId, handshake: &BotHandshake) -> Self {
        Self {
            id,
            session_id: handshake.session_id.clone(),
            name: handshake.name.clone(),
            version: handshake.version.clone(),
            authors: handshake.authors.clone(),
            description: handshake.description.clone(),
            homepage: handshake.homepage.clone(),
            country_codes: handshake.country_codes.clone(),
            game_types: handshake.game_types.clone(),
            platform: handshake.platform.clone(),
            programming_lang: handshake.programming_lang.clone(),
            initial_position: handshake.initial_position,
        }
    }

    pub fn supports_game_type(&self, game_type: &str) -> bool {
        self.game_types.iter().any(|t| t == game_type)
    }
}

/// Bot state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub id: ParticipantId,
    pub energy: f64,
    pub x: f64,
    pub y: f64,
    /// Body direction in degrees
    pub direction: f64,
    pub gun_direction: f64,
    pub radar_direction: f64,
    /// Degrees the radar swept during the last turn
    pub radar_sweep: f64,
    pub speed: f64,
    pub gun_heat: f64,
    pub alive: bool,
}

/// Bullet state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletState {
    pub bullet_id: u32,
    pub owner_id: ParticipantId,
    pub power: f64,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub speed: f64,
}

/// Why a bot died
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Bullet,
    Ram,
    Wall,
    Inactivity,
    Disconnected,
}

/// Game events produced while resolving a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    BotDeath {
        turn_number: u32,
        victim_id: ParticipantId,
        cause: DeathCause,
    },

    /// Two bots collided
    BotHitBot {
        turn_number: u32,
        bot_id: ParticipantId,
        victim_id: ParticipantId,
        /// Victim energy after the collision
        energy: f64,
        x: f64,
        y: f64,
        /// Whether `bot_id` was driving into the victim
        rammed: bool,
    },

    BotHitWall {
        turn_number: u32,
        victim_id: ParticipantId,
    },

    BulletFired {
        turn_number: u32,
        bullet: BulletState,
    },

    BulletHitBot {
        turn_number: u32,
        victim_id: ParticipantId,
        bullet: BulletState,
        damage: f64,
        /// Victim energy after the hit
        energy: f64,
    },

    BulletHitBullet {
        turn_number: u32,
        bullet: BulletState,
        hit_bullet: BulletState,
    },

    BulletHitWall {
        turn_number: u32,
        bullet: BulletState,
    },

    ScannedBot {
        turn_number: u32,
        scanned_by_bot_id: ParticipantId,
        scanned_bot_id: ParticipantId,
        energy: f64,
        x: f64,
        y: f64,
        direction: f64,
        speed: f64,
    },

    /// The bot did not send an intent in time; its previous intent was reused
    SkippedTurn {
        turn_number: u32,
        bot_id: ParticipantId,
    },

    WonRound {
        turn_number: u32,
        bot_id: ParticipantId,
    },
}

impl GameEvent {
    /// Whether the given bot is entitled to see this event
    pub fn is_visible_to(&self, id: ParticipantId) -> bool {
        match self {
            GameEvent::BotDeath { .. } => true,
            GameEvent::BotHitBot {
                bot_id, victim_id, ..
            } => *bot_id == id || *victim_id == id,
            GameEvent::BotHitWall { victim_id, .. } => *victim_id == id,
            GameEvent::BulletFired { bullet, .. } => bullet.owner_id == id,
            GameEvent::BulletHitBot {
                victim_id, bullet, ..
            } => *victim_id == id || bullet.owner_id == id,
            GameEvent::BulletHitBullet {
                bullet, hit_bullet, ..
            } => bullet.owner_id == id || hit_bullet.owner_id == id,
            GameEvent::BulletHitWall { bullet, .. } => bullet.owner_id == id,
            GameEvent::ScannedBot {
                scanned_by_bot_id, ..
            } => *scanned_by_bot_id == id,
            GameEvent::SkippedTurn { bot_id, .. } => *bot_id == id,
            GameEvent::WonRound { bot_id, .. } => *bot_id == id,
        }
    }
}

/// Standings of one bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotResults {
    pub id: ParticipantId,
    pub name: String,
    pub version: String,
    pub rank: u32,
    pub total_score: f64,
    pub survival: f64,
    pub last_survivor_bonus: f64,
    pub bullet_damage: f64,
    pub bullet_kill_bonus: f64,
    pub ram_damage: f64,
    pub ram_kill_bonus: f64,
    pub first_places: u32,
    pub second_places: u32,
    pub third_places: u32,
}

/// Why a game was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Fewer than the minimum number of bots were ready in time
    InsufficientParticipants,
    /// A controller restarted the game
    Restarted,
    /// The simulation detected corrupted state
    SimulationError,
    ServerShutdown,
}

/// Error codes carried by [`ServerMsg::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedMessage,
    ProtocolViolation,
    GameTypeMismatch,
    InvalidSecret,
    DuplicateSession,
    NotAController,
    UnexpectedMessage,
    ConfigurationError,
    InsufficientParticipants,
}

/// Close codes for server-initiated disconnects
pub mod close_code {
    /// The game ended normally
    pub const NORMAL: u16 = 1000;
    /// The server is shutting down
    pub const SERVER_SHUTDOWN: u16 = 1001;
    pub const PROTOCOL_VIOLATION: u16 = 4001;
    pub const GAME_TYPE_MISMATCH: u16 = 4002;
    pub const INVALID_SECRET: u16 = 4003;
}
