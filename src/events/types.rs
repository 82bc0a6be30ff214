use serde::{Deserialize, Serialize};

use crate::control::ControlLinkState;
use crate::media::ConnectionState;
use crate::session::SessionState;

/// Session event
///
/// Serialized as:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "session_id": "...", "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    #[serde(rename = "session.state_changed")]
    StateChanged {
        session_id: String,
        state: SessionState,
    },

    /// Displayable failure; `kind` is the stable [`crate::error::AppError::kind`]
    #[serde(rename = "session.failed")]
    Failed {
        session_id: String,
        kind: String,
        message: String,
    },

    #[serde(rename = "media.state_changed")]
    MediaStateChanged {
        session_id: String,
        state: ConnectionState,
    },

    /// First remote stream bound to the video sink
    #[serde(rename = "media.track_bound")]
    TrackBound {
        session_id: String,
        stream_id: String,
        track_id: String,
    },

    #[serde(rename = "control.state_changed")]
    ControlStateChanged {
        session_id: String,
        state: ControlLinkState,
    },
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "session.state_changed",
            Self::Failed { .. } => "session.failed",
            Self::MediaStateChanged { .. } => "media.state_changed",
            Self::TrackBound { .. } => "media.track_bound",
            Self::ControlStateChanged { .. } => "control.state_changed",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::StateChanged { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::MediaStateChanged { session_id, .. }
            | Self::TrackBound { session_id, .. }
            | Self::ControlStateChanged { session_id, .. } => session_id,
        }
    }

    /// Topic match: `*`, `prefix.*` or an exact event name
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}
