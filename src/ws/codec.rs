//! Wire encoding and validation of protocol messages

use serde_json::Value;

use super::protocol::{BotHandshake, ClientMsg, ControllerHandshake, Intent, ServerMsg};

/// Client message discriminants the server understands
const KNOWN_CLIENT_TYPES: &[&str] = &[
    "bot_handshake",
    "controller_handshake",
    "bot_ready",
    "intent",
    "start_game",
    "stop_game",
    "pause_game",
    "resume_game",
    "restart_game",
];

/// Message kinds whose decode failure does not end the connection
const TRANSIENT_TYPES: &[&str] = &["intent", "bot_ready"];

/// Decode failure. Every variant keeps the raw payload for diagnostics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {reason}")]
    Malformed {
        reason: String,
        message_type: Option<String>,
        raw: String,
    },

    #[error("unknown message type '{message_type}'")]
    UnknownType { message_type: String, raw: String },

    #[error("field '{field}' is out of range")]
    OutOfRange {
        field: &'static str,
        message_type: String,
        raw: String,
    },

    #[error("required field '{field}' is empty")]
    MissingField {
        field: &'static str,
        message_type: String,
        raw: String,
    },

    #[error("binary frames are not supported")]
    BinaryFrame,
}

impl ProtocolError {
    /// Raw payload that failed to decode
    pub fn raw(&self) -> &str {
        match self {
            ProtocolError::Malformed { raw, .. }
            | ProtocolError::UnknownType { raw, .. }
            | ProtocolError::OutOfRange { raw, .. }
            | ProtocolError::MissingField { raw, .. } => raw,
            ProtocolError::BinaryFrame => "",
        }
    }

    /// Discriminant of the offending message, when it could be read
    pub fn message_type(&self) -> Option<&str> {
        match self {
            ProtocolError::Malformed { message_type, .. } => message_type.as_deref(),
            ProtocolError::UnknownType { message_type, .. }
            | ProtocolError::OutOfRange { message_type, .. }
            | ProtocolError::MissingField { message_type, .. } => Some(message_type),
            ProtocolError::BinaryFrame => None,
        }
    }

    /// Whether the connection must be closed for this error on an
    /// identified connection. Before the handshake every error is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProtocolError::UnknownType { .. } | ProtocolError::BinaryFrame => false,
            _ => !self
                .message_type()
                .is_some_and(|t| TRANSIENT_TYPES.contains(&t)),
        }
    }
}

/// Decode and validate a client text frame
pub fn decode_client_msg(raw: &str) -> Result<ClientMsg, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
        message_type: None,
        raw: raw.to_string(),
    })?;

    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Malformed {
            reason: "missing 'type' discriminant".to_string(),
            message_type: None,
            raw: raw.to_string(),
        })?;

    if !KNOWN_CLIENT_TYPES.contains(&message_type.as_str()) {
        return Err(ProtocolError::UnknownType {
            message_type,
            raw: raw.to_string(),
        });
    }

    let msg: ClientMsg = serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
        message_type: Some(message_type.clone()),
        raw: raw.to_string(),
    })?;

    validate(&msg).map_err(|fault| match fault {
        Fault::OutOfRange(field) => ProtocolError::OutOfRange {
            field,
            message_type: message_type.clone(),
            raw: raw.to_string(),
        },
        Fault::Missing(field) => ProtocolError::MissingField {
            field,
            message_type: message_type.clone(),
            raw: raw.to_string(),
        },
    })?;

    Ok(msg)
}

/// Encode a server message as a JSON text frame
pub fn encode_server_msg(msg: &ServerMsg) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

enum Fault {
    OutOfRange(&'static str),
    Missing(&'static str),
}

fn validate(msg: &ClientMsg) -> Result<(), Fault> {
    match msg {
        ClientMsg::BotHandshake(handshake) => validate_bot_handshake(handshake),
        ClientMsg::ControllerHandshake(handshake) => validate_controller_handshake(handshake),
        ClientMsg::Intent(intent) => validate_intent(intent),
        // Game setups are checked against the presets when the game is prepared
        _ => Ok(()),
    }
}

fn validate_bot_handshake(handshake: &BotHandshake) -> Result<(), Fault> {
    if handshake.session_id.trim().is_empty() {
        return Err(Fault::Missing("session_id"));
    }
    if handshake.name.trim().is_empty() {
        return Err(Fault::Missing("name"));
    }
    if handshake.version.trim().is_empty() {
        return Err(Fault::Missing("version"));
    }
    if handshake.authors.iter().all(|a| a.trim().is_empty()) {
        return Err(Fault::Missing("authors"));
    }
    if handshake.game_types.is_empty() {
        return Err(Fault::Missing("game_types"));
    }
    if let Some(pos) = &handshake.initial_position {
        let finite = [pos.x, pos.y, pos.direction]
            .iter()
            .flatten()
            .all(|v| v.is_finite());
        if !finite {
            return Err(Fault::OutOfRange("initial_position"));
        }
    }
    Ok(())
}

fn validate_controller_handshake(handshake: &ControllerHandshake) -> Result<(), Fault> {
    if handshake.session_id.trim().is_empty() {
        return Err(Fault::Missing("session_id"));
    }
    if handshake.name.trim().is_empty() {
        return Err(Fault::Missing("name"));
    }
    Ok(())
}

fn validate_intent(intent: &Intent) -> Result<(), Fault> {
    let fields = [
        ("turn_rate", intent.turn_rate),
        ("gun_turn_rate", intent.gun_turn_rate),
        ("radar_turn_rate", intent.radar_turn_rate),
        ("target_speed", intent.target_speed),
        ("firepower", intent.firepower),
    ];
    for (field, value) in fields {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(Fault::OutOfRange(field));
        }
    }
    if intent.firepower.is_some_and(|f| f < 0.0) {
        return Err(Fault::OutOfRange("firepower"));
    }
    Ok(())
}
