//! Session state machine
//!
//! ```text
//!   Idle --Start--> Negotiating --all links up--> Connected
//!                        |                            |
//!                        +----failure-----> Failed <--+
//!
//!   any non-Closed state --Stop--> Closed
//! ```
//!
//! The media link counts as up once the peer connection is `connected` and
//! its first video track is bound to the sink.

use serde::{Deserialize, Serialize};

use crate::control::ControlLinkState;
use crate::media::ConnectionState;

/// Signaling role of the local peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Creates the offer and trickles its ICE candidates
    #[default]
    Initiator,
    /// Answers an offer fetched from the backend
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initiator" | "offer" => Ok(Role::Initiator),
            "responder" | "answer" => Ok(Role::Responder),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    /// No further transitions except `Stop` (and none at all from `Closed`)
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Explicit events driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    Start,
    StartFailed,
    Media(ConnectionState),
    /// The first remote video track was bound to the sink
    TrackBound,
    Control(ControlLinkState),
    Stop,
}

/// Which links a session needs, and which are currently up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub media_required: bool,
    pub control_required: bool,
    pub media_up: bool,
    pub track_bound: bool,
    pub control_up: bool,
}

impl Readiness {
    pub fn new(media_required: bool, control_required: bool) -> Self {
        Self {
            media_required,
            control_required,
            media_up: false,
            track_bound: false,
            control_up: false,
        }
    }

    pub fn all_up(&self) -> bool {
        (!self.media_required || (self.media_up && self.track_bound))
            && (!self.control_required || self.control_up)
    }

    /// Record a link event
    pub fn observe(&mut self, input: SessionInput) {
        match input {
            SessionInput::Media(ConnectionState::Connected) => self.media_up = true,
            SessionInput::Media(_) => self.media_up = false,
            SessionInput::TrackBound => self.track_bound = true,
            SessionInput::Control(ControlLinkState::Open) => self.control_up = true,
            SessionInput::Control(_) => self.control_up = false,
            _ => {}
        }
    }
}

/// Compute the transition for `input`, or `None` if the state does not change
///
/// `readiness` must already include the effect of `input`.
pub fn next_state(
    current: SessionState,
    input: SessionInput,
    readiness: &Readiness,
) -> Option<SessionState> {
    use SessionState::*;

    if current == Closed {
        return None;
    }

    match (current, input) {
        (_, SessionInput::Stop) => Some(Closed),
        (Idle, SessionInput::Start) => Some(Negotiating),
        (Negotiating, SessionInput::StartFailed) => Some(Failed),

        (Negotiating | Connected, SessionInput::Media(s)) if media_lost(s, readiness) => {
            Some(Failed)
        }
        (Negotiating | Connected, SessionInput::Control(ControlLinkState::Closed))
            if readiness.control_required =>
        {
            Some(Failed)
        }

        (Negotiating, SessionInput::Media(ConnectionState::Connected))
        | (Negotiating, SessionInput::TrackBound)
        | (Negotiating, SessionInput::Control(ControlLinkState::Open))
            if readiness.all_up() =>
        {
            Some(Connected)
        }

        _ => None,
    }
}

fn media_lost(state: ConnectionState, readiness: &Readiness) -> bool {
    readiness.media_required
        && matches!(
            state,
            ConnectionState::Failed | ConnectionState::Disconnected
        )
}
