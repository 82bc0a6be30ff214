use serde::{Deserialize, Serialize};
use std::sync::Arc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_remote::TrackRemote;

use crate::signaling::{IceCandidate, OriginatedCandidate};

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Map from the webrtc crate's state; `Unspecified` has no counterpart
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Inbound media track
#[derive(Clone)]
pub struct RemoteTrack {
    pub stream_id: String,
    pub track_id: String,
    pub kind: String,
    /// RTP source; `None` for tracks not backed by a live peer connection
    pub rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(
        stream_id: impl Into<String>,
        track_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            track_id: track_id.into(),
            kind: kind.into(),
            rtp: None,
        }
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .field("kind", &self.kind)
            .field("rtp", &self.rtp.is_some())
            .finish()
    }
}

/// Raw event emitted by a peer connection's callbacks
#[derive(Debug, Clone)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionState),
    Track(RemoteTrack),
}

/// Event surfaced by the media controller, after ordering rules are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Local candidate ready for delivery (local description already set)
    LocalCandidate(OriginatedCandidate),
    State(ConnectionState),
    TrackBound { stream_id: String, track_id: String },
}
