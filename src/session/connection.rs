//! Connection records and the per-connection state machine

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::game::state::ParticipantId;
use crate::ws::protocol::{ControllerHandshake, Participant, ServerMsg};

pub type ConnectionId = Uuid;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    AwaitingHandshake,
    Identified,
    WaitingForGameStart,
    Ready,
    InRound,
    BetweenRounds,
    GameEnded,
    Closed,
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Disconnected)
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Closed) | (_, Disconnected) => true,
            (AwaitingHandshake, Identified) => true,
            (Identified, WaitingForGameStart) => true,
            (WaitingForGameStart, Ready) => true,
            (Ready, InRound) => true,
            (InRound, BetweenRounds) | (BetweenRounds, InRound) => true,
            (InRound, GameEnded) | (BetweenRounds, GameEnded) => true,
            // Aborted or restarted game
            (Ready, WaitingForGameStart)
            | (InRound, WaitingForGameStart)
            | (BetweenRounds, WaitingForGameStart) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::AwaitingHandshake => "awaiting_handshake",
            ConnectionState::Identified => "identified",
            ConnectionState::WaitingForGameStart => "waiting_for_game_start",
            ConnectionState::Ready => "ready",
            ConnectionState::InRound => "in_round",
            ConnectionState::BetweenRounds => "between_rounds",
            ConnectionState::GameEnded => "game_ended",
            ConnectionState::Closed => "closed",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Rejected state change. Never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal connection transition {} -> {}", .from.as_str(), .to.as_str())]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Who is on the other end
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// Handshake not received yet
    Pending,
    Bot(Participant),
    Controller(ControllerHandshake),
}

/// Frames for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMsg),
    Close { code: u16, reason: String },
}

/// Server-side record of one connection. Owned by the server actor.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    state: ConnectionState,
    pub role: Role,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            state: ConnectionState::AwaitingHandshake,
            role: Role::Pending,
            outbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        debug!(
            conn_id = %self.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Connection transition"
        );
        self.state = next;
        Ok(())
    }

    /// Queue a message. Returns false once the writer is gone.
    pub fn send(&self, msg: ServerMsg) -> bool {
        self.outbound.send(Outbound::Message(msg)).is_ok()
    }

    /// Ask the writer to close the socket and mark the connection closed
    pub fn close(&mut self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        if !self.state.is_terminal() {
            self.state = ConnectionState::Closed;
        }
    }

    pub fn participant(&self) -> Option<&Participant> {
        match &self.role {
            Role::Bot(p) => Some(p),
            _ => None,
        }
    }

    pub fn bot_id(&self) -> Option<ParticipantId> {
        self.participant().map(|p| p.id)
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.role {
            Role::Bot(p) => Some(&p.session_id),
            Role::Controller(h) => Some(&h.session_id),
            Role::Pending => None,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.role, Role::Bot(_))
    }

    pub fn is_controller(&self) -> bool {
        matches!(self.role, Role::Controller(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use ConnectionState::*;

    fn connection() -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn bot_lifecycle_is_accepted() {
        let (mut conn, _rx) = connection();
        for next in [
            Identified,
            WaitingForGameStart,
            Ready,
            InRound,
            BetweenRounds,
            InRound,
            GameEnded,
            Closed,
        ] {
            assert_ok!(conn.transition(next));
        }
        assert_eq!(conn.state(), Closed);
    }

    #[test]
    fn illegal_transition_is_not_applied() {
        let (mut conn, _rx) = connection();
        let err = assert_err!(conn.transition(InRound));
        assert_eq!(
            err,
            TransitionError {
                from: AwaitingHandshake,
                to: InRound
            }
        );
        assert_eq!(conn.state(), AwaitingHandshake);
    }

    #[test]
    fn any_live_state_can_disconnect() {
        for state in [
            AwaitingHandshake,
            Identified,
            WaitingForGameStart,
            Ready,
            InRound,
            BetweenRounds,
            GameEnded,
        ] {
            assert!(state.can_transition_to(Disconnected));
            assert!(state.can_transition_to(Closed));
        }
        assert!(!Closed.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Identified));
    }

    #[test]
    fn aborted_game_returns_to_waiting() {
        assert!(Ready.can_transition_to(WaitingForGameStart));
        assert!(InRound.can_transition_to(WaitingForGameStart));
        assert!(!GameEnded.can_transition_to(WaitingForGameStart));
        assert!(!Identified.can_transition_to(Ready));
    }

    #[test]
    fn close_sends_close_frame() {
        let (mut conn, mut rx) = connection();
        conn.close(4001, "bye");
        assert_eq!(conn.state(), Closed);
        assert_eq!(
            rx.try_recv().ok(),
            Some(Outbound::Close {
                code: 4001,
                reason: "bye".into()
            })
        );
    }
}
