//! Media link: one receive-only peer connection per session

pub mod controller;
pub mod peer;
pub mod sink;
pub mod types;

pub use controller::{MediaLink, MediaSessionController};
pub use peer::{PeerConnector, PeerLink, WebRtcConnector, WebRtcPeer};
pub use sink::{RtpStatsSink, SinkStats, VideoSink};
pub use types::{ConnectionState, MediaEvent, PeerEvent, RemoteTrack};
