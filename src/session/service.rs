//! Game server actor
//!
//! A single task owns every connection record, the intent collector and
//! the running match. WebSocket workers talk to it over an unbounded
//! channel of [`Inbound`] messages and receive [`Outbound`] frames on a
//! per-connection channel. Deadlines (ready timeout, turn windows) are
//! awaited with `tokio::time` in the same `select!` as the inbound
//! channel, so no state is shared with the I/O side apart from the
//! published [`ServerStatus`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, GamePresets};
use crate::game::setup::{ConfigurationError, GameSetup};
use crate::game::state::ParticipantId;
use crate::game::GameMatch;
use crate::ws::codec::ProtocolError;
use crate::ws::protocol::{
    close_code, AbortReason, BotHandshake, ClientMsg, ControllerHandshake, ErrorCode, GameEvent,
    Intent, Participant, ServerMsg,
};

use super::collector::IntentCollector;
use super::connection::{Connection, ConnectionId, ConnectionState, Outbound, Role};

/// Messages from connection workers to the server actor
#[derive(Debug)]
pub enum Inbound {
    Connected {
        conn_id: ConnectionId,
        outbound: mpsc::UnboundedSender<Outbound>,
    },
    Message {
        conn_id: ConnectionId,
        msg: ClientMsg,
    },
    Malformed {
        conn_id: ConnectionId,
        error: ProtocolError,
    },
    Disconnected {
        conn_id: ConnectionId,
    },
    Shutdown,
}

/// Static server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub name: String,
    pub version: String,
    pub variant: String,
    pub presets: GamePresets,
    pub default_game_type: String,
    pub bot_secrets: Vec<String>,
    pub controller_secrets: Vec<String>,
    pub enable_initial_position: bool,
    pub match_seed: Option<u64>,
}

impl ServerSettings {
    pub fn from_config(config: &Config, presets: GamePresets) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            variant: "Tank Royale".to_string(),
            presets,
            default_game_type: config.default_game_type.clone(),
            bot_secrets: config.bot_secrets.clone(),
            controller_secrets: config.controller_secrets.clone(),
            enable_initial_position: config.enable_initial_position,
            match_seed: config.match_seed,
        }
    }
}

/// Read-only view of the server for the health endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStatus {
    pub phase: &'static str,
    pub connections: usize,
    pub bots: usize,
    pub controllers: usize,
    pub match_id: Option<Uuid>,
    pub game_type: Option<String>,
    pub round_number: u32,
    pub turn_number: u32,
    pub paused: bool,
}

/// Cloneable handle used by connection workers and `main`
#[derive(Clone)]
pub struct GameServerHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    status: Arc<RwLock<ServerStatus>>,
}

impl GameServerHandle {
    /// Returns false once the server has stopped
    pub fn send(&self, msg: Inbound) -> bool {
        self.inbound.send(msg).is_ok()
    }

    pub fn status(&self) -> ServerStatus {
        self.status.read().clone()
    }

    pub fn shutdown(&self) {
        let _ = self.inbound.send(Inbound::Shutdown);
    }
}

/// Bots have been told about a game and are acknowledging it
struct ReadyPhase {
    setup: GameSetup,
    session_ids: Vec<String>,
    requester: Option<ConnectionId>,
    deadline: Instant,
}

/// Intent collection window of one turn
#[derive(Debug, Clone, Copy)]
struct TurnWindow {
    /// Turn may advance once everyone submitted (turn pace)
    earliest: Instant,
    /// Turn advances regardless
    deadline: Instant,
}

impl TurnWindow {
    fn open(setup: &GameSetup) -> Self {
        let now = Instant::now();
        let period = setup.turn_period().unwrap_or(Duration::ZERO);
        Self {
            earliest: now + period,
            deadline: now + period.max(setup.turn_timeout_duration()),
        }
    }
}

struct RunningGame {
    game: GameMatch,
    collector: IntentCollector,
    session_ids: Vec<String>,
    paused: bool,
    window: Option<TurnWindow>,
}

impl RunningGame {
    fn participant_ids(&self) -> Vec<ParticipantId> {
        self.game.participants().iter().map(|p| p.id).collect()
    }
}

enum Phase {
    Idle,
    AwaitingReady(ReadyPhase),
    Running(Box<RunningGame>),
}

/// The server actor
pub struct GameServer {
    settings: ServerSettings,
    connections: BTreeMap<ConnectionId, Connection>,
    phase: Phase,
    next_participant_id: ParticipantId,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    status: Arc<RwLock<ServerStatus>>,
    shutting_down: bool,
}

impl GameServer {
    pub fn new(settings: ServerSettings) -> (Self, GameServerHandle) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(ServerStatus {
            phase: "idle",
            ..ServerStatus::default()
        }));

        let handle = GameServerHandle {
            inbound,
            status: status.clone(),
        };
        let server = Self {
            settings,
            connections: BTreeMap::new(),
            phase: Phase::Idle,
            next_participant_id: 1,
            inbound_rx,
            status,
            shutting_down: false,
        };
        (server, handle)
    }

    /// Run until shutdown
    pub async fn run(mut self) {
        info!(
            game_types = ?self.settings.presets.game_types(),
            default_game_type = %self.settings.default_game_type,
            "Game server started"
        );

        while !self.shutting_down {
            let deadline = self.next_deadline();
            tokio::select! {
                inbound = self.inbound_rx.recv() => match inbound {
                    Some(msg) => self.handle(msg),
                    None => self.shutdown(),
                },
                _ = wait_until(deadline) => self.on_deadline(),
            }
            self.publish_status();
        }

        info!("Game server stopped");
    }

    fn handle(&mut self, msg: Inbound) {
        match msg {
            Inbound::Connected { conn_id, outbound } => self.on_connected(conn_id, outbound),
            Inbound::Message { conn_id, msg } => self.on_message(conn_id, msg),
            Inbound::Malformed { conn_id, error } => self.on_malformed(conn_id, error),
            Inbound::Disconnected { conn_id } => self.on_disconnected(conn_id),
            Inbound::Shutdown => self.shutdown(),
        }
    }

    /// Handle everything already queued so no message that arrived before
    /// a deadline is judged late
    fn drain_inbound(&mut self) {
        while let Ok(msg) = self.inbound_rx.try_recv() {
            self.handle(msg);
            if self.shutting_down {
                break;
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Idle => None,
            Phase::AwaitingReady(ready) => Some(ready.deadline),
            Phase::Running(running) if running.paused => None,
            Phase::Running(running) => running.window.map(|w| {
                if running.collector.all_submitted() {
                    w.earliest
                } else {
                    w.deadline
                }
            }),
        }
    }

    fn on_deadline(&mut self) {
        match &self.phase {
            Phase::Idle => {}
            Phase::AwaitingReady(_) => self.on_ready_timeout(),
            Phase::Running(_) => self.advance_turn(),
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    fn on_connected(&mut self, conn_id: ConnectionId, outbound: mpsc::UnboundedSender<Outbound>) {
        let conn = Connection::new(conn_id, outbound);
        conn.send(ServerMsg::ServerHandshake {
            connection_id: conn_id,
            name: self.settings.name.clone(),
            version: self.settings.version.clone(),
            variant: self.settings.variant.clone(),
            game_types: self.settings.presets.game_types(),
        });
        self.connections.insert(conn_id, conn);
        info!(conn_id = %conn_id, "Connection accepted");
    }

    fn on_disconnected(&mut self, conn_id: ConnectionId) {
        if let Some(mut conn) = self.remove_connection(conn_id) {
            if let Err(e) = conn.transition(ConnectionState::Disconnected) {
                debug!(conn_id = %conn_id, error = %e, "Connection already closed");
            }
            info!(conn_id = %conn_id, "Connection closed by peer");
        }
    }

    /// Drop a connection record and take its bot out of the game
    fn remove_connection(&mut self, conn_id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&conn_id)?;

        if let Some(bot_id) = conn.bot_id() {
            if let Phase::Running(running) = &mut self.phase {
                running.collector.remove(bot_id);
                if running.game.kill_participant(bot_id) {
                    info!(
                        match_id = %running.game.id(),
                        bot_id,
                        "Participant left during round"
                    );
                }
            }
            self.broadcast_participant_list();
        }
        Some(conn)
    }

    /// Send a typed error, then close the connection
    fn reject(&mut self, conn_id: ConnectionId, code: ErrorCode, message: String, close: u16) {
        warn!(conn_id = %conn_id, code = ?code, %message, "Rejecting connection");
        if let Some(mut conn) = self.remove_connection(conn_id) {
            conn.send(ServerMsg::Error { code, message });
            conn.close(close, "rejected");
        }
    }

    fn send_error(&self, conn_id: ConnectionId, code: ErrorCode, message: String) {
        debug!(conn_id = %conn_id, code = ?code, %message, "Sending error");
        self.send(conn_id, ServerMsg::Error { code, message });
    }

    fn set_state(&mut self, conn_id: ConnectionId, next: ConnectionState) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            if let Err(e) = conn.transition(next) {
                error!(conn_id = %conn_id, error = %e, "Illegal connection transition");
            }
        }
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    fn send(&self, conn_id: ConnectionId, msg: ServerMsg) {
        if let Some(conn) = self.connections.get(&conn_id) {
            if !conn.send(msg) {
                debug!(conn_id = %conn_id, "Writer gone, message dropped");
            }
        }
    }

    fn send_to_controllers(&self, msg: &ServerMsg) {
        for conn in self.connections.values().filter(|c| c.is_controller()) {
            conn.send(msg.clone());
        }
    }

    /// Connections of the given bots, in bot id order
    fn bot_connections(&self, ids: &[ParticipantId]) -> Vec<(ConnectionId, ParticipantId)> {
        let mut found: Vec<(ConnectionId, ParticipantId)> = self
            .connections
            .values()
            .filter_map(|c| c.bot_id().filter(|id| ids.contains(id)).map(|id| (c.id, id)))
            .collect();
        found.sort_by_key(|(_, id)| *id);
        found
    }

    /// Connected bots with one of the given session ids
    fn session_connections(&self, session_ids: &[String]) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_bot())
            .filter(|c| c.session_id().is_some_and(|s| session_ids.iter().any(|d| d == s)))
            .map(|c| c.id)
            .collect()
    }

    fn send_to_bots(&self, ids: &[ParticipantId], msg: &ServerMsg) {
        for (conn_id, _) in self.bot_connections(ids) {
            self.send(conn_id, msg.clone());
        }
    }

    fn set_bot_states(&mut self, ids: &[ParticipantId], next: ConnectionState) {
        for (conn_id, _) in self.bot_connections(ids) {
            self.set_state(conn_id, next);
        }
    }

    fn broadcast_participant_list(&self) {
        let mut participants: Vec<Participant> = self
            .connections
            .values()
            .filter_map(|c| c.participant().cloned())
            .collect();
        participants.sort_by_key(|p| p.id);
        self.send_to_controllers(&ServerMsg::ParticipantList { participants });
    }

    // ------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------

    fn on_malformed(&mut self, conn_id: ConnectionId, error: ProtocolError) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        warn!(conn_id = %conn_id, error = %error, raw = %error.raw(), "Malformed message");

        if conn.state() == ConnectionState::AwaitingHandshake || error.is_fatal() {
            self.reject(
                conn_id,
                ErrorCode::MalformedMessage,
                error.to_string(),
                close_code::PROTOCOL_VIOLATION,
            );
        } else {
            self.send_error(conn_id, ErrorCode::MalformedMessage, error.to_string());
        }
    }

    fn on_message(&mut self, conn_id: ConnectionId, msg: ClientMsg) {
        let Some(conn) = self.connections.get(&conn_id) else {
            debug!(conn_id = %conn_id, kind = msg.kind(), "Message for unknown connection");
            return;
        };
        let state = conn.state();
        let is_controller = conn.is_controller();

        if state == ConnectionState::AwaitingHandshake {
            match msg {
                ClientMsg::BotHandshake(handshake) => self.on_bot_handshake(conn_id, handshake),
                ClientMsg::ControllerHandshake(handshake) => {
                    self.on_controller_handshake(conn_id, handshake)
                }
                other => self.reject(
                    conn_id,
                    ErrorCode::ProtocolViolation,
                    format!("expected a handshake, got '{}'", other.kind()),
                    close_code::PROTOCOL_VIOLATION,
                ),
            }
            return;
        }

        match msg {
            ClientMsg::BotHandshake(_) | ClientMsg::ControllerHandshake(_) => self.reject(
                conn_id,
                ErrorCode::ProtocolViolation,
                "handshake already completed".to_string(),
                close_code::PROTOCOL_VIOLATION,
            ),
            ClientMsg::BotReady if !is_controller => self.on_bot_ready(conn_id),
            ClientMsg::Intent(intent) if !is_controller => self.on_intent(conn_id, state, intent),
            other @ (ClientMsg::BotReady | ClientMsg::Intent(_)) => self.send_error(
                conn_id,
                ErrorCode::UnexpectedMessage,
                format!("'{}' is only accepted from bots", other.kind()),
            ),
            control if is_controller => self.on_control(conn_id, control),
            control => self.send_error(
                conn_id,
                ErrorCode::NotAController,
                format!("'{}' is reserved for controllers", control.kind()),
            ),
        }
    }

    fn on_bot_handshake(&mut self, conn_id: ConnectionId, handshake: BotHandshake) {
        if !secret_accepted(&self.settings.bot_secrets, handshake.secret.as_deref()) {
            self.reject(
                conn_id,
                ErrorCode::InvalidSecret,
                "bot secret rejected".to_string(),
                close_code::INVALID_SECRET,
            );
            return;
        }

        if let Some(game_type) = self.active_game_type() {
            if !handshake.game_types.iter().any(|t| t == game_type) {
                let message = format!("bot does not support running game type '{game_type}'");
                self.reject(
                    conn_id,
                    ErrorCode::GameTypeMismatch,
                    message,
                    close_code::GAME_TYPE_MISMATCH,
                );
                return;
            }
        }

        let duplicate = self.connections.values().any(|c| {
            c.id != conn_id && c.is_bot() && c.session_id() == Some(handshake.session_id.as_str())
        });
        if duplicate {
            self.reject(
                conn_id,
                ErrorCode::DuplicateSession,
                format!("session '{}' is already connected", handshake.session_id),
                close_code::PROTOCOL_VIOLATION,
            );
            return;
        }

        let id = self.next_participant_id;
        self.next_participant_id += 1;
        let participant = Participant::from_handshake(id, &handshake);
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.role = Role::Bot(participant);
        }
        self.set_state(conn_id, ConnectionState::Identified);
        self.set_state(conn_id, ConnectionState::WaitingForGameStart);
        info!(
            conn_id = %conn_id,
            bot_id = id,
            name = %handshake.name,
            version = %handshake.version,
            session_id = %handshake.session_id,
            "Bot joined"
        );

        if let Phase::AwaitingReady(ready) = &self.phase {
            if ready.session_ids.contains(&handshake.session_id) {
                self.send(
                    conn_id,
                    ServerMsg::GameSetup {
                        my_id: id,
                        game_setup: ready.setup.clone(),
                    },
                );
            }
        }
        self.broadcast_participant_list();
    }

    fn on_controller_handshake(&mut self, conn_id: ConnectionId, handshake: ControllerHandshake) {
        if !secret_accepted(&self.settings.controller_secrets, handshake.secret.as_deref()) {
            self.reject(
                conn_id,
                ErrorCode::InvalidSecret,
                "controller secret rejected".to_string(),
                close_code::INVALID_SECRET,
            );
            return;
        }

        info!(conn_id = %conn_id, name = %handshake.name, "Controller joined");
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.role = Role::Controller(handshake);
        }
        self.set_state(conn_id, ConnectionState::Identified);

        let mut participants: Vec<Participant> = self
            .connections
            .values()
            .filter_map(|c| c.participant().cloned())
            .collect();
        participants.sort_by_key(|p| p.id);
        self.send(conn_id, ServerMsg::ParticipantList { participants });
    }

    fn on_bot_ready(&mut self, conn_id: ConnectionId) {
        let Phase::AwaitingReady(ready) = &self.phase else {
            self.send_error(
                conn_id,
                ErrorCode::UnexpectedMessage,
                "no game is being set up".to_string(),
            );
            return;
        };
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };

        let declared = conn
            .session_id()
            .is_some_and(|s| ready.session_ids.iter().any(|d| d == s));
        match conn.state() {
            ConnectionState::WaitingForGameStart if declared => {
                self.set_state(conn_id, ConnectionState::Ready);
                debug!(conn_id = %conn_id, "Bot ready");
                self.check_all_ready();
            }
            ConnectionState::Ready => debug!(conn_id = %conn_id, "Duplicate ready ignored"),
            _ => self.send_error(
                conn_id,
                ErrorCode::UnexpectedMessage,
                "bot was not invited to this game".to_string(),
            ),
        }
    }

    fn on_intent(&mut self, conn_id: ConnectionId, state: ConnectionState, intent: Intent) {
        match state {
            ConnectionState::InRound => {
                let bot_id = self.connections.get(&conn_id).and_then(Connection::bot_id);
                if let (Phase::Running(running), Some(bot_id)) = (&mut self.phase, bot_id) {
                    if running.collector.submit(bot_id, &intent) {
                        return;
                    }
                }
                debug!(conn_id = %conn_id, "Intent from eliminated bot dropped");
            }
            ConnectionState::BetweenRounds | ConnectionState::GameEnded => {
                debug!(conn_id = %conn_id, "Intent outside a round dropped");
            }
            _ => self.send_error(
                conn_id,
                ErrorCode::UnexpectedMessage,
                "no round in progress".to_string(),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Controller commands
    // ------------------------------------------------------------------

    fn on_control(&mut self, conn_id: ConnectionId, msg: ClientMsg) {
        info!(conn_id = %conn_id, command = msg.kind(), "Controller command");
        match msg {
            ClientMsg::StartGame {
                game_setup,
                bot_session_ids,
            } => match self.prepare_game(game_setup, bot_session_ids) {
                Ok((setup, session_ids)) => self.begin_ready_phase(setup, session_ids, Some(conn_id)),
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "Start game rejected");
                    self.send_error(conn_id, ErrorCode::ConfigurationError, e.to_string());
                }
            },
            ClientMsg::StopGame => self.on_stop_game(conn_id),
            ClientMsg::PauseGame => self.on_pause(conn_id, true),
            ClientMsg::ResumeGame => self.on_pause(conn_id, false),
            ClientMsg::RestartGame => self.on_restart(conn_id),
            other => debug!(kind = other.kind(), "Not a control command"),
        }
    }

    /// Resolve and validate a start request
    fn prepare_game(
        &self,
        request: Option<GameSetup>,
        bot_session_ids: Vec<String>,
    ) -> Result<(GameSetup, Vec<String>), ConfigurationError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ConfigurationError::GameInProgress);
        }

        let game_type = request
            .as_ref()
            .map(|s| s.game_type.as_str())
            .unwrap_or(&self.settings.default_game_type);
        let preset = self
            .settings
            .presets
            .get(game_type)
            .ok_or_else(|| ConfigurationError::UnknownGameType(game_type.to_string()))?;
        let setup = match &request {
            Some(requested) => preset.apply_request(requested)?,
            None => preset.clone(),
        };

        let mut session_ids: Vec<String> = Vec::with_capacity(bot_session_ids.len());
        for id in bot_session_ids {
            if !session_ids.contains(&id) {
                session_ids.push(id);
            }
        }
        setup.check_participant_count(session_ids.len() as u32)?;

        for conn in self.connections.values() {
            let Some(participant) = conn.participant() else {
                continue;
            };
            if session_ids.contains(&participant.session_id)
                && !participant.supports_game_type(&setup.game_type)
            {
                return Err(ConfigurationError::UnavailableBot(
                    participant.session_id.clone(),
                ));
            }
        }

        Ok((setup, session_ids))
    }

    fn begin_ready_phase(
        &mut self,
        setup: GameSetup,
        session_ids: Vec<String>,
        requester: Option<ConnectionId>,
    ) {
        let invited = self.session_connections(&session_ids);
        for conn_id in &invited {
            let Some(conn) = self.connections.get(conn_id) else {
                continue;
            };
            if let (Some(my_id), ConnectionState::WaitingForGameStart) = (conn.bot_id(), conn.state())
            {
                conn.send(ServerMsg::GameSetup {
                    my_id,
                    game_setup: setup.clone(),
                });
            }
        }

        info!(
            game_type = %setup.game_type,
            declared = session_ids.len(),
            connected = invited.len(),
            "Game announced"
        );
        self.phase = Phase::AwaitingReady(ReadyPhase {
            deadline: Instant::now() + setup.ready_timeout_duration(),
            setup,
            session_ids,
            requester,
        });
    }

    /// Ready bots of the current ready phase, in participant id order
    fn ready_bots(&self, session_ids: &[String]) -> Vec<ConnectionId> {
        let mut ready: Vec<(ParticipantId, ConnectionId)> = self
            .session_connections(session_ids)
            .into_iter()
            .filter_map(|conn_id| {
                let conn = self.connections.get(&conn_id)?;
                (conn.state() == ConnectionState::Ready).then_some((conn.bot_id()?, conn_id))
            })
            .collect();
        ready.sort();
        ready.into_iter().map(|(_, conn_id)| conn_id).collect()
    }

    fn check_all_ready(&mut self) {
        let Phase::AwaitingReady(ready) = &self.phase else {
            return;
        };
        if self.ready_bots(&ready.session_ids).len() == ready.session_ids.len() {
            self.start_game();
        }
    }

    fn on_ready_timeout(&mut self) {
        let Phase::AwaitingReady(ready) = &self.phase else {
            return;
        };
        let ready_count = self.ready_bots(&ready.session_ids).len() as u32;
        if ready_count >= ready.setup.min_number_of_participants {
            self.start_game();
            return;
        }

        let Phase::AwaitingReady(ready) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        warn!(
            ready = ready_count,
            required = ready.setup.min_number_of_participants,
            "Ready timeout with too few bots"
        );
        if let Some(requester) = ready.requester {
            self.send_error(
                requester,
                ErrorCode::InsufficientParticipants,
                format!(
                    "{ready_count} bots ready, {} required",
                    ready.setup.min_number_of_participants
                ),
            );
        }
        self.abort_ready_phase(ready, AbortReason::InsufficientParticipants);
    }

    /// Tell invited bots and controllers the game will not happen
    fn abort_ready_phase(&mut self, ready: ReadyPhase, reason: AbortReason) {
        let msg = ServerMsg::GameAborted { reason };
        for conn_id in self.session_connections(&ready.session_ids) {
            if self.connections.get(&conn_id).map(Connection::state) == Some(ConnectionState::Ready) {
                self.set_state(conn_id, ConnectionState::WaitingForGameStart);
            }
            self.send(conn_id, msg.clone());
        }
        self.send_to_controllers(&msg);
    }

    fn start_game(&mut self) {
        let Phase::AwaitingReady(ready) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        let mut entering = self.ready_bots(&ready.session_ids);
        if let Some(max) = ready.setup.max_number_of_participants {
            for conn_id in entering.split_off((max as usize).min(entering.len())) {
                self.set_state(conn_id, ConnectionState::WaitingForGameStart);
            }
        }
        let participants: Vec<Participant> = entering
            .iter()
            .filter_map(|id| self.connections.get(id)?.participant().cloned())
            .collect();

        let seed = self.settings.match_seed.unwrap_or_else(rand::random);
        let game = GameMatch::new(
            ready.setup.clone(),
            participants.clone(),
            seed,
            self.settings.enable_initial_position,
        );

        for participant in &participants {
            self.send_to_bots(
                &[participant.id],
                &ServerMsg::GameStarted {
                    my_id: Some(participant.id),
                    game_setup: ready.setup.clone(),
                    participants: participants.clone(),
                },
            );
        }
        self.send_to_controllers(&ServerMsg::GameStarted {
            my_id: None,
            game_setup: ready.setup.clone(),
            participants: participants.clone(),
        });

        info!(match_id = %game.id(), participants = participants.len(), "Game started");
        self.phase = Phase::Running(Box::new(RunningGame {
            collector: IntentCollector::new(participants.iter().map(|p| p.id)),
            game,
            session_ids: ready.session_ids,
            paused: false,
            window: None,
        }));
        self.start_round();
    }

    fn on_stop_game(&mut self, conn_id: ConnectionId) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.send_error(
                conn_id,
                ErrorCode::ConfigurationError,
                ConfigurationError::NoGameRunning.to_string(),
            ),
            Phase::AwaitingReady(ready) => {
                info!("Game stopped before it started");
                let msg = ServerMsg::GameEnded {
                    number_of_rounds: ready.setup.number_of_rounds,
                    aborted: true,
                    results: Vec::new(),
                };
                for conn_id in self.session_connections(&ready.session_ids) {
                    if self.connections.get(&conn_id).map(Connection::state)
                        == Some(ConnectionState::Ready)
                    {
                        self.set_state(conn_id, ConnectionState::WaitingForGameStart);
                    }
                    self.send(conn_id, msg.clone());
                }
                self.send_to_controllers(&msg);
            }
            Phase::Running(running) => self.end_game(running, true),
        }
    }

    fn on_pause(&mut self, conn_id: ConnectionId, pause: bool) {
        if !matches!(self.phase, Phase::Running(_)) {
            self.send_error(
                conn_id,
                ErrorCode::ConfigurationError,
                ConfigurationError::NoGameRunning.to_string(),
            );
            return;
        }
        let Phase::Running(running) = &mut self.phase else {
            return;
        };
        if running.paused == pause {
            debug!(paused = pause, "Pause state unchanged");
            return;
        }

        running.paused = pause;
        if !pause && running.window.is_some() {
            running.window = Some(TurnWindow::open(running.game.setup()));
        }
        info!(match_id = %running.game.id(), paused = pause, "Game pause toggled");

        let ids = running.participant_ids();
        let msg = if pause {
            ServerMsg::GamePaused
        } else {
            ServerMsg::GameResumed
        };
        self.send_to_bots(&ids, &msg);
        self.send_to_controllers(&msg);
    }

    fn on_restart(&mut self, conn_id: ConnectionId) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => self.send_error(
                conn_id,
                ErrorCode::ConfigurationError,
                ConfigurationError::NoGameRunning.to_string(),
            ),
            Phase::AwaitingReady(ready) => {
                let (setup, session_ids) = (ready.setup.clone(), ready.session_ids.clone());
                self.abort_ready_phase(ready, AbortReason::Restarted);
                self.begin_ready_phase(setup, session_ids, Some(conn_id));
            }
            Phase::Running(running) => {
                let setup = running.game.setup().clone();
                let session_ids = running.session_ids.clone();
                self.abort_game(running, AbortReason::Restarted);
                self.begin_ready_phase(setup, session_ids, Some(conn_id));
            }
        }
    }

    // ------------------------------------------------------------------
    // Rounds and turns
    // ------------------------------------------------------------------

    fn start_round(&mut self) {
        let Phase::Running(mut running) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        let ids = running.participant_ids();
        let connected: Vec<ParticipantId> =
            self.bot_connections(&ids).into_iter().map(|(_, id)| id).collect();
        if connected.is_empty() {
            warn!(match_id = %running.game.id(), "No participants left, ending game");
            self.end_game(running, true);
            return;
        }

        let round_number = running.game.start_round();
        for id in ids.iter().filter(|id| !connected.contains(id)) {
            running.game.kill_participant(*id);
        }
        running.collector.reset(running.game.live_ids());
        self.set_bot_states(&connected, ConnectionState::InRound);

        let started = ServerMsg::RoundStarted { round_number };
        self.send_to_bots(&ids, &started);
        self.send_to_controllers(&started);
        self.send_ticks(&running, &[]);

        running.window = Some(TurnWindow::open(running.game.setup()));
        self.phase = Phase::Running(running);
    }

    fn send_ticks(&self, running: &RunningGame, events: &[GameEvent]) {
        for (conn_id, bot_id) in self.bot_connections(&running.participant_ids()) {
            if let Some(tick) = running.game.tick_for_bot(bot_id, events) {
                self.send(conn_id, tick);
            }
        }
        if let Some(tick) = running.game.tick_for_observer(events) {
            self.send_to_controllers(&tick);
        }
    }

    fn advance_turn(&mut self) {
        self.drain_inbound();
        // A drained control command may have left the round
        if self.shutting_down || !matches!(self.phase, Phase::Running(_)) {
            return;
        }
        let Phase::Running(mut running) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };
        if running.paused {
            self.phase = Phase::Running(running);
            return;
        }

        let window = running.collector.close();
        let output = match running.game.run_turn(&window.intents) {
            Ok(output) => output,
            Err(e) => {
                error!(match_id = %running.game.id(), error = %e, "Simulation failed, aborting game");
                self.abort_game(running, AbortReason::SimulationError);
                return;
            }
        };

        let mut events: Vec<GameEvent> = window
            .skipped
            .iter()
            .map(|&bot_id| GameEvent::SkippedTurn {
                turn_number: output.turn_number,
                bot_id,
            })
            .collect();
        events.extend(output.events);
        debug!(
            match_id = %running.game.id(),
            turn = output.turn_number,
            events = events.len(),
            skipped = window.skipped.len(),
            "Turn resolved"
        );

        self.send_ticks(&running, &events);
        running.collector.retain(&running.game.live_ids());

        if output.round_over {
            running.window = None;
            self.phase = Phase::Running(running);
            self.end_round();
        } else {
            running.window = Some(TurnWindow::open(running.game.setup()));
            self.phase = Phase::Running(running);
        }
    }

    fn end_round(&mut self) {
        let Phase::Running(mut running) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        let round_number = running.game.round_number();
        let turn_number = running.game.turn_number();
        let results = running.game.finish_round();

        let ids = running.participant_ids();
        let in_round: Vec<ParticipantId> = self
            .bot_connections(&ids)
            .into_iter()
            .filter(|(conn_id, _)| {
                self.connections.get(conn_id).map(Connection::state)
                    == Some(ConnectionState::InRound)
            })
            .map(|(_, id)| id)
            .collect();
        self.set_bot_states(&in_round, ConnectionState::BetweenRounds);

        let msg = ServerMsg::RoundEnded {
            round_number,
            turn_number,
            results,
        };
        self.send_to_bots(&ids, &msg);
        self.send_to_controllers(&msg);

        if running.game.is_last_round() {
            self.end_game(running, false);
        } else {
            self.phase = Phase::Running(running);
            self.start_round();
        }
    }

    /// Finish the game, send standings and close bot connections
    fn end_game(&mut self, mut running: Box<RunningGame>, aborted: bool) {
        let results = running.game.finish();
        let msg = ServerMsg::GameEnded {
            number_of_rounds: running.game.setup().number_of_rounds,
            aborted,
            results,
        };

        for (conn_id, _) in self.bot_connections(&running.participant_ids()) {
            let Some(mut conn) = self.connections.remove(&conn_id) else {
                continue;
            };
            conn.send(msg.clone());
            if let Err(e) = conn.transition(ConnectionState::GameEnded) {
                error!(conn_id = %conn_id, error = %e, "Illegal connection transition");
            }
            conn.close(close_code::NORMAL, "game ended");
        }
        self.send_to_controllers(&msg);

        info!(
            match_id = %running.game.id(),
            seed = running.game.seed(),
            aborted,
            "Game ended"
        );
        self.phase = Phase::Idle;
        self.broadcast_participant_list();
    }

    /// Cancel the game without standings; bots go back to waiting
    fn abort_game(&mut self, mut running: Box<RunningGame>, reason: AbortReason) {
        running.game.finish();
        let ids = running.participant_ids();
        let msg = ServerMsg::GameAborted { reason };

        self.set_bot_states(&ids, ConnectionState::WaitingForGameStart);
        self.send_to_bots(&ids, &msg);
        self.send_to_controllers(&msg);

        warn!(match_id = %running.game.id(), reason = ?reason, "Game aborted");
        self.phase = Phase::Idle;
    }

    // ------------------------------------------------------------------
    // Status and shutdown
    // ------------------------------------------------------------------

    fn active_game_type(&self) -> Option<&str> {
        match &self.phase {
            Phase::Idle => None,
            Phase::AwaitingReady(ready) => Some(&ready.setup.game_type),
            Phase::Running(running) => Some(&running.game.setup().game_type),
        }
    }

    fn publish_status(&self) {
        let mut status = ServerStatus {
            phase: "idle",
            connections: self.connections.len(),
            bots: self.connections.values().filter(|c| c.is_bot()).count(),
            controllers: self.connections.values().filter(|c| c.is_controller()).count(),
            ..ServerStatus::default()
        };

        match &self.phase {
            Phase::Idle => {}
            Phase::AwaitingReady(ready) => {
                status.phase = "awaiting_ready";
                status.game_type = Some(ready.setup.game_type.clone());
            }
            Phase::Running(running) => {
                let game = &running.game;
                status.phase = game.phase().as_str();
                status.match_id = Some(game.id());
                status.game_type = Some(game.setup().game_type.clone());
                status.round_number = game.round_number();
                status.turn_number = game.turn_number();
                status.paused = running.paused;
            }
        }

        *self.status.write() = status;
    }

    fn shutdown(&mut self) {
        info!(connections = self.connections.len(), "Shutting down game server");
        self.shutting_down = true;

        if !matches!(self.phase, Phase::Idle) {
            let msg = ServerMsg::GameAborted {
                reason: AbortReason::ServerShutdown,
            };
            for conn in self.connections.values().filter(|c| c.is_bot() || c.is_controller()) {
                conn.send(msg.clone());
            }
        }
        for conn in self.connections.values_mut() {
            conn.close(close_code::SERVER_SHUTDOWN, "server shutting down");
        }
        self.connections.clear();
        self.phase = Phase::Idle;
        self.publish_status();
    }
}

fn secret_accepted(secrets: &[String], given: Option<&str>) -> bool {
    secrets.is_empty() || given.is_some_and(|g| secrets.iter().any(|s| s == g))
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::codec::decode_client_msg;
    use crate::ws::protocol::{BotResults, BotState};
    use tokio_test::assert_ok;

    const WAIT: Duration = Duration::from_secs(30);

    fn test_setup() -> GameSetup {
        GameSetup {
            number_of_rounds: 1,
            max_inactivity_turns: 3,
            turn_timeout: 10_000,
            ready_timeout: 500_000,
            default_turns_per_second: -1,
            ..GameSetup::default()
        }
    }

    fn settings_with(setup: GameSetup) -> ServerSettings {
        let mut presets = GamePresets::defaults();
        presets.insert(setup);
        ServerSettings {
            name: "test-server".into(),
            version: "0.0.0".into(),
            variant: "Tank Royale".into(),
            presets,
            default_game_type: "custom".into(),
            bot_secrets: vec![],
            controller_secrets: vec![],
            enable_initial_position: false,
            match_seed: Some(7),
        }
    }

    fn start(settings: ServerSettings) -> GameServerHandle {
        let (server, handle) = GameServer::new(settings);
        tokio::spawn(server.run());
        handle
    }

    struct Client {
        conn_id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    impl Client {
        /// Queue the connection without waiting for the server
        fn attach(handle: &GameServerHandle) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let conn_id = Uuid::new_v4();
            assert!(handle.send(Inbound::Connected {
                conn_id,
                outbound: tx
            }));
            Self { conn_id, rx }
        }

        async fn connect(handle: &GameServerHandle) -> Self {
            let mut client = Self::attach(handle);
            match client.next().await {
                Outbound::Message(ServerMsg::ServerHandshake { connection_id, .. }) => {
                    assert_eq!(connection_id, client.conn_id)
                }
                other => panic!("expected server handshake, got {other:?}"),
            }
            client
        }

        async fn bot(handle: &GameServerHandle, session_id: &str, game_types: &[&str]) -> Self {
            let client = Self::connect(handle).await;
            client.send(handle, ClientMsg::BotHandshake(bot_handshake(session_id, game_types)));
            client
        }

        async fn controller(handle: &GameServerHandle) -> Self {
            let mut client = Self::connect(handle).await;
            client.send(handle, controller_handshake());
            client.expect(|m| matches!(m, ServerMsg::ParticipantList { .. })).await;
            client
        }

        fn send(&self, handle: &GameServerHandle, msg: ClientMsg) {
            assert!(handle.send(Inbound::Message {
                conn_id: self.conn_id,
                msg
            }));
        }

        async fn next(&mut self) -> Outbound {
            match tokio::time::timeout(WAIT, self.rx.recv()).await {
                Ok(Some(frame)) => frame,
                Ok(None) => panic!("connection channel closed"),
                Err(_) => panic!("timed out waiting for a frame"),
            }
        }

        /// Skip frames until a message matches
        async fn expect(&mut self, pred: impl Fn(&ServerMsg) -> bool) -> ServerMsg {
            loop {
                match self.next().await {
                    Outbound::Message(msg) if pred(&msg) => return msg,
                    Outbound::Message(_) => continue,
                    Outbound::Close { code, reason } => {
                        panic!("closed with {code} ({reason}) while waiting")
                    }
                }
            }
        }

        /// Skip messages until the close frame
        async fn expect_close(&mut self) -> u16 {
            loop {
                if let Outbound::Close { code, .. } = self.next().await {
                    return code;
                }
            }
        }

        async fn expect_error(&mut self, code: ErrorCode) {
            let msg = self
                .expect(|m| matches!(m, ServerMsg::Error { .. }))
                .await;
            assert!(
                matches!(msg, ServerMsg::Error { code: c, .. } if c == code),
                "unexpected error: {msg:?}"
            );
        }
    }

    fn bot_handshake(session_id: &str, game_types: &[&str]) -> BotHandshake {
        BotHandshake {
            session_id: session_id.into(),
            name: format!("Bot-{session_id}"),
            version: "1.0".into(),
            authors: vec!["tester".into()],
            description: None,
            homepage: None,
            country_codes: vec![],
            game_types: game_types.iter().map(|t| t.to_string()).collect(),
            platform: None,
            programming_lang: None,
            initial_position: None,
            secret: None,
        }
    }

    fn controller_handshake() -> ClientMsg {
        ClientMsg::ControllerHandshake(ControllerHandshake {
            session_id: "ctl".into(),
            name: "Controller".into(),
            version: "1.0".into(),
            author: None,
            secret: None,
        })
    }

    fn turning(rate: f64) -> ClientMsg {
        ClientMsg::Intent(Intent {
            turn_rate: Some(rate),
            ..Intent::default()
        })
    }

    fn start_game(sessions: &[&str], setup: Option<GameSetup>) -> ClientMsg {
        ClientMsg::StartGame {
            game_setup: setup,
            bot_session_ids: sessions.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Controller plus two ready bots in a running game
    async fn running_game(
        handle: &GameServerHandle,
    ) -> (Client, Client, Client) {
        let mut controller = Client::controller(handle).await;
        let mut a = Client::bot(handle, "a", &["custom"]).await;
        let mut b = Client::bot(handle, "b", &["custom"]).await;
        controller.send(handle, start_game(&["a", "b"], None));

        for bot in [&mut a, &mut b] {
            bot.expect(|m| matches!(m, ServerMsg::GameSetup { .. })).await;
            bot.send(handle, ClientMsg::BotReady);
        }
        for bot in [&mut a, &mut b] {
            bot.expect(|m| matches!(m, ServerMsg::GameStarted { .. })).await;
            bot.expect(|m| matches!(m, ServerMsg::RoundStarted { .. })).await;
        }
        controller
            .expect(|m| matches!(m, ServerMsg::GameStarted { my_id: None, .. }))
            .await;
        (controller, a, b)
    }

    fn long_game() -> ServerSettings {
        settings_with(GameSetup {
            max_inactivity_turns: 450,
            ..test_setup()
        })
    }

    /// Next tick of a bot as (turn, state, events)
    async fn next_tick(client: &mut Client) -> (u32, BotState, Vec<GameEvent>) {
        match client.expect(|m| matches!(m, ServerMsg::TickEvent { .. })).await {
            ServerMsg::TickEvent {
                turn_number,
                bot_state,
                events,
                ..
            } => (turn_number, bot_state, events),
            _ => unreachable!(),
        }
    }

    fn skipped(events: &[GameEvent], id: ParticipantId) -> bool {
        events
            .iter()
            .any(|e| matches!(e, GameEvent::SkippedTurn { bot_id, .. } if *bot_id == id))
    }

    /// Body turned by `degrees` either way between two ticks
    fn turned_by(before: &BotState, after: &BotState, degrees: f64) -> bool {
        let delta = (after.direction - before.direction).rem_euclid(360.0);
        (delta - degrees).abs() < 1e-6 || (delta - (360.0 - degrees)).abs() < 1e-6
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_must_come_first() {
        let handle = start(settings_with(test_setup()));
        let mut client = Client::connect(&handle).await;

        client.send(&handle, ClientMsg::Intent(Intent::default()));

        client.expect_error(ErrorCode::ProtocolViolation).await;
        assert_eq!(client.expect_close().await, close_code::PROTOCOL_VIOLATION);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_handshake_closes_connection() {
        let handle = start(settings_with(test_setup()));
        let mut client = Client::connect(&handle).await;

        let error = match crate::ws::codec::decode_client_msg(r#"{"type":"bot_handshake"}"#) {
            Err(e) => e,
            Ok(msg) => panic!("decoded {msg:?}"),
        };
        assert!(handle.send(Inbound::Malformed {
            conn_id: client.conn_id,
            error
        }));

        client.expect_error(ErrorCode::MalformedMessage).await;
        assert_eq!(client.expect_close().await, close_code::PROTOCOL_VIOLATION);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_cannot_send_control_commands() {
        let handle = start(settings_with(test_setup()));
        let mut bot = Client::bot(&handle, "a", &["custom"]).await;

        bot.send(&handle, ClientMsg::StopGame);
        bot.expect_error(ErrorCode::NotAController).await;

        // Still connected
        bot.send(&handle, ClientMsg::PauseGame);
        bot.expect_error(ErrorCode::NotAController).await;
    }

    #[tokio::test(start_paused = true)]
    async fn intent_before_game_is_unexpected() {
        let handle = start(settings_with(test_setup()));
        let mut bot = Client::bot(&handle, "a", &["custom"]).await;

        bot.send(&handle, ClientMsg::Intent(Intent::default()));
        bot.expect_error(ErrorCode::UnexpectedMessage).await;
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_secret_is_rejected() {
        let mut settings = settings_with(test_setup());
        settings.bot_secrets = vec!["s3cret".into()];
        let handle = start(settings);

        let mut bot = Client::bot(&handle, "a", &["custom"]).await;
        bot.expect_error(ErrorCode::InvalidSecret).await;
        assert_eq!(bot.expect_close().await, close_code::INVALID_SECRET);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_session_is_rejected() {
        let handle = start(settings_with(test_setup()));
        let _first = Client::bot(&handle, "a", &["custom"]).await;
        let mut second = Client::bot(&handle, "a", &["custom"]).await;

        second.expect_error(ErrorCode::DuplicateSession).await;
        assert_eq!(second.expect_close().await, close_code::PROTOCOL_VIOLATION);
    }

    #[tokio::test(start_paused = true)]
    async fn game_type_mismatch_during_setup() {
        let handle = start(settings_with(test_setup()));
        let controller = Client::controller(&handle).await;
        controller.send(&handle, start_game(&["a", "b"], None));

        let mut melee_only = Client::bot(&handle, "c", &["melee"]).await;
        melee_only.expect_error(ErrorCode::GameTypeMismatch).await;
        assert_eq!(melee_only.expect_close().await, close_code::GAME_TYPE_MISMATCH);

        // A declared bot joining late is still invited
        let mut late = Client::bot(&handle, "a", &["custom"]).await;
        let msg = late.expect(|m| matches!(m, ServerMsg::GameSetup { .. })).await;
        assert!(matches!(msg, ServerMsg::GameSetup { game_setup, .. } if game_setup.game_type == "custom"));
    }

    #[tokio::test(start_paused = true)]
    async fn locked_field_is_a_configuration_error() {
        let handle = start(settings_with(test_setup()));
        let mut controller = Client::controller(&handle).await;

        let classic = GamePresets::defaults().get("classic").cloned().unwrap_or_default();
        let request = GameSetup {
            arena_width: 1200,
            ..classic
        };
        controller.send(&handle, start_game(&["a", "b"], Some(request)));
        controller.expect_error(ErrorCode::ConfigurationError).await;
        assert_eq!(handle.status().phase, "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_setup_keeps_controller_connected() {
        let handle = start(settings_with(test_setup()));
        let mut controller = Client::controller(&handle).await;

        let request = GameSetup {
            number_of_rounds: 0,
            ..test_setup()
        };
        let json = assert_ok!(serde_json::to_string(&start_game(&["a", "b"], Some(request))));
        controller.send(&handle, assert_ok!(decode_client_msg(&json)));
        controller.expect_error(ErrorCode::ConfigurationError).await;

        // Still connected
        controller.send(&handle, ClientMsg::StopGame);
        controller.expect_error(ErrorCode::ConfigurationError).await;
        assert_eq!(handle.status().phase, "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_bot_at_ready_timeout_aborts() {
        let handle = start(settings_with(test_setup()));
        let mut controller = Client::controller(&handle).await;
        let mut a = Client::bot(&handle, "a", &["custom"]).await;
        let mut b = Client::bot(&handle, "b", &["custom"]).await;

        let request = GameSetup {
            min_number_of_participants: 3,
            ..test_setup()
        };
        controller.send(&handle, start_game(&["a", "b", "c"], Some(request)));
        for bot in [&mut a, &mut b] {
            bot.expect(|m| matches!(m, ServerMsg::GameSetup { .. })).await;
            bot.send(&handle, ClientMsg::BotReady);
        }

        controller.expect_error(ErrorCode::InsufficientParticipants).await;
        controller
            .expect(|m| {
                matches!(
                    m,
                    ServerMsg::GameAborted {
                        reason: AbortReason::InsufficientParticipants
                    }
                )
            })
            .await;
        a.expect(|m| matches!(m, ServerMsg::GameAborted { .. })).await;

        // Back to waiting: a new ready is unexpected
        a.send(&handle, ClientMsg::BotReady);
        a.expect_error(ErrorCode::UnexpectedMessage).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_game_runs_to_completion() {
        let handle = start(settings_with(test_setup()));
        let (mut controller, mut a, mut b) = running_game(&handle).await;

        let tick = a
            .expect(|m| matches!(m, ServerMsg::TickEvent { turn_number, .. } if *turn_number > 0))
            .await;
        match tick {
            ServerMsg::TickEvent {
                bot_state, events, ..
            } => {
                assert!(bot_state.alive);
                assert!(events.iter().all(|e| e.is_visible_to(bot_state.id)));
                assert!(events
                    .iter()
                    .any(|e| matches!(e, GameEvent::SkippedTurn { .. })));
            }
            other => panic!("unexpected {other:?}"),
        }

        let ended = a.expect(|m| matches!(m, ServerMsg::RoundEnded { .. })).await;
        assert!(matches!(ended, ServerMsg::RoundEnded { round_number: 1, .. }));

        let results: Vec<BotResults> =
            match a.expect(|m| matches!(m, ServerMsg::GameEnded { .. })).await {
                ServerMsg::GameEnded {
                    aborted, results, ..
                } => {
                    assert!(!aborted);
                    results
                }
                _ => unreachable!(),
            };
        assert_eq!(results.len(), 2);
        assert_eq!(a.expect_close().await, close_code::NORMAL);
        assert_eq!(b.expect_close().await, close_code::NORMAL);

        controller
            .expect(|m| matches!(m, ServerMsg::GameEnded { aborted: false, .. }))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_game_ends_with_aborted_flag() {
        let setup = GameSetup {
            max_inactivity_turns: 450,
            ..test_setup()
        };
        let handle = start(settings_with(setup));
        let (mut controller, mut a, _b) = running_game(&handle).await;

        controller.send(&handle, ClientMsg::StopGame);

        a.expect(|m| matches!(m, ServerMsg::GameEnded { aborted: true, .. }))
            .await;
        assert_eq!(a.expect_close().await, close_code::NORMAL);
        controller
            .expect(|m| matches!(m, ServerMsg::GameEnded { aborted: true, .. }))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_announces_game_again() {
        let setup = GameSetup {
            max_inactivity_turns: 450,
            ..test_setup()
        };
        let handle = start(settings_with(setup));
        let (controller, mut a, _b) = running_game(&handle).await;

        controller.send(&handle, ClientMsg::RestartGame);

        a.expect(|m| {
            matches!(
                m,
                ServerMsg::GameAborted {
                    reason: AbortReason::Restarted
                }
            )
        })
        .await;
        a.expect(|m| matches!(m, ServerMsg::GameSetup { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_queued_before_turn_deadline_starts_over() {
        let (mut server, handle) = GameServer::new(long_game());
        let controller = Client::attach(&handle);
        let mut a = Client::attach(&handle);
        let mut b = Client::attach(&handle);
        controller.send(&handle, controller_handshake());
        a.send(&handle, ClientMsg::BotHandshake(bot_handshake("a", &["custom"])));
        b.send(&handle, ClientMsg::BotHandshake(bot_handshake("b", &["custom"])));
        controller.send(&handle, start_game(&["a", "b"], None));
        server.drain_inbound();

        a.send(&handle, ClientMsg::BotReady);
        b.send(&handle, ClientMsg::BotReady);
        server.drain_inbound();
        assert!(matches!(server.phase, Phase::Running(_)));

        // Both bots answered, so the turn is due, but the restart is queued first
        a.send(&handle, turning(5.0));
        b.send(&handle, turning(5.0));
        controller.send(&handle, ClientMsg::RestartGame);
        server.advance_turn();
        assert!(matches!(server.phase, Phase::AwaitingReady(_)));

        for bot in [&mut a, &mut b] {
            bot.expect(|m| {
                matches!(
                    m,
                    ServerMsg::GameAborted {
                        reason: AbortReason::Restarted
                    }
                )
            })
            .await;
            bot.expect(|m| matches!(m, ServerMsg::GameSetup { .. })).await;
            bot.send(&handle, ClientMsg::BotReady);
        }
        server.drain_inbound();

        a.expect(|m| matches!(m, ServerMsg::GameStarted { .. })).await;
        assert!(matches!(server.phase, Phase::Running(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn intent_drives_the_next_turn() {
        let handle = start(long_game());
        let (_controller, mut a, _b) = running_game(&handle).await;

        let (turn, before, _) = next_tick(&mut a).await;
        assert_eq!(turn, 0);
        a.send(&handle, turning(5.0));

        let (turn, after, events) = next_tick(&mut a).await;
        assert_eq!(turn, 1);
        assert!(turned_by(&before, &after, 5.0), "{before:?} -> {after:?}");
        assert!(!skipped(&events, after.id));
    }

    #[tokio::test(start_paused = true)]
    async fn early_close_applies_queued_pause_first() {
        let handle = start(long_game());
        let (controller, mut a, b) = running_game(&handle).await;

        let (_, before, _) = next_tick(&mut a).await;
        a.send(&handle, turning(5.0));
        b.send(&handle, turning(5.0));
        controller.send(&handle, ClientMsg::PauseGame);

        let next = a
            .expect(|m| matches!(m, ServerMsg::TickEvent { .. } | ServerMsg::GamePaused))
            .await;
        assert_eq!(next, ServerMsg::GamePaused);

        // The submitted intents survive the pause
        controller.send(&handle, ClientMsg::ResumeGame);
        a.expect(|m| matches!(m, ServerMsg::GameResumed)).await;
        let (turn, after, events) = next_tick(&mut a).await;
        assert_eq!(turn, 1);
        assert!(turned_by(&before, &after, 5.0), "{before:?} -> {after:?}");
        assert!(!skipped(&events, after.id));
    }

    #[tokio::test(start_paused = true)]
    async fn intent_after_window_close_counts_for_next_turn() {
        let handle = start(long_game());
        let (_controller, mut a, _b) = running_game(&handle).await;

        let (_, initial, _) = next_tick(&mut a).await;
        let (turn, missed, events) = next_tick(&mut a).await;
        assert_eq!(turn, 1);
        assert!(skipped(&events, missed.id));
        assert_eq!(missed.direction, initial.direction);

        a.send(&handle, turning(5.0));
        let (turn, after, events) = next_tick(&mut a).await;
        assert_eq!(turn, 2);
        assert!(!skipped(&events, after.id));
        assert!(turned_by(&missed, &after, 5.0), "{missed:?} -> {after:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_bot_keeps_its_last_intent() {
        let handle = start(long_game());
        let (_controller, mut a, _b) = running_game(&handle).await;

        next_tick(&mut a).await;
        a.send(&handle, turning(5.0));
        let (turn, mut previous, events) = next_tick(&mut a).await;
        assert_eq!(turn, 1);
        assert!(!skipped(&events, previous.id));

        for expected_turn in 2..=4 {
            let (turn, state, events) = next_tick(&mut a).await;
            assert_eq!(turn, expected_turn);
            assert!(skipped(&events, state.id));
            assert!(turned_by(&previous, &state, 5.0), "{previous:?} -> {state:?}");
            previous = state;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_are_broadcast() {
        let setup = GameSetup {
            max_inactivity_turns: 450,
            ..test_setup()
        };
        let handle = start(settings_with(setup));
        let (controller, mut a, _b) = running_game(&handle).await;

        controller.send(&handle, ClientMsg::PauseGame);
        a.expect(|m| matches!(m, ServerMsg::GamePaused)).await;

        controller.send(&handle, ClientMsg::ResumeGame);
        a.expect(|m| matches!(m, ServerMsg::GameResumed)).await;
        a.expect(|m| matches!(m, ServerMsg::TickEvent { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_bot_loses_the_round() {
        let setup = GameSetup {
            max_inactivity_turns: 450,
            ..test_setup()
        };
        let handle = start(settings_with(setup));
        let (_controller, mut a, b) = running_game(&handle).await;

        assert!(handle.send(Inbound::Disconnected { conn_id: b.conn_id }));

        let msg = a
            .expect(|m| match m {
                ServerMsg::TickEvent { events, .. } => events.iter().any(|e| {
                    matches!(
                        e,
                        GameEvent::BotDeath {
                            cause: crate::ws::protocol::DeathCause::Disconnected,
                            ..
                        }
                    )
                }),
                _ => false,
            })
            .await;
        assert!(matches!(msg, ServerMsg::TickEvent { .. }));
        a.expect(|m| matches!(m, ServerMsg::RoundEnded { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_everyone() {
        let handle = start(settings_with(test_setup()));
        let mut controller = Client::controller(&handle).await;
        let mut bot = Client::bot(&handle, "a", &["custom"]).await;

        handle.shutdown();

        assert_eq!(bot.expect_close().await, close_code::SERVER_SHUTDOWN);
        assert_eq!(controller.expect_close().await, close_code::SERVER_SHUTDOWN);
    }
}
