//! Peer connection seam and its webrtc-rs implementation

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::types::{ConnectionState, PeerEvent, RemoteTrack};
use crate::config::MediaConfig;
use crate::error::{AppError, Result};
use crate::signaling::{IceCandidate, SdpDescriptor};

/// Operations the media controller needs from a peer connection
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Register a receive-only video transceiver
    async fn add_recvonly_video(&self) -> Result<()>;

    /// Create an offer, returning its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Create an answer to the applied remote offer, returning its SDP
    async fn create_answer(&self) -> Result<String>;

    async fn set_local_description(&self, desc: &SdpDescriptor) -> Result<()>;

    async fn set_remote_description(&self, desc: &SdpDescriptor) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Close the connection; closing twice must not fail
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections together with their event stream
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        session_id: &str,
        config: &MediaConfig,
    ) -> Result<(Box<dyn PeerLink>, mpsc::UnboundedReceiver<PeerEvent>)>;
}

/// Build the ICE server list from configuration
pub fn ice_servers(config: &MediaConfig) -> Vec<RTCIceServer> {
    let mut servers = Vec::with_capacity(config.stun_servers.len() + config.turn_servers.len());

    for stun_url in &config.stun_servers {
        servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    servers
}

/// Connector producing [`WebRtcPeer`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcConnector;

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        session_id: &str,
        config: &MediaConfig,
    ) -> Result<(Box<dyn PeerLink>, mpsc::UnboundedReceiver<PeerEvent>)> {
        let (peer, events) = WebRtcPeer::new(session_id, config).await?;
        Ok((Box::new(peer), events))
    }
}

/// webrtc-rs peer connection whose callbacks feed a [`PeerEvent`] channel
pub struct WebRtcPeer {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcPeer {
    pub async fn new(
        session_id: &str,
        config: &MediaConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Self {
            session_id: session_id.to_string(),
            pc: Arc::new(pc),
        };
        peer.setup_event_handlers(tx);

        info!(
            "Peer connection created for session {} ({} ICE servers)",
            session_id,
            config.stun_servers.len() + config.turn_servers.len()
        );
        Ok((peer, rx))
    }

    fn setup_event_handlers(&self, tx: mpsc::UnboundedSender<PeerEvent>) {
        let state_tx = tx.clone();
        let session_id = self.session_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    if let Some(state) = ConnectionState::from_rtc(s) {
                        info!("Peer {} connection state: {}", session_id, state);
                        let _ = state_tx.send(PeerEvent::StateChanged(state));
                    }
                })
            }));

        let candidate_tx = tx.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidate_tx = candidate_tx.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            let _ = candidate_tx.send(PeerEvent::LocalCandidate(init.into()));
                        }
                        Err(e) => debug!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        let track_tx = tx;
        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_tx = track_tx.clone();

            Box::pin(async move {
                let remote = RemoteTrack {
                    stream_id: track.stream_id().to_string(),
                    track_id: track.id().to_string(),
                    kind: track.kind().to_string(),
                    rtp: Some(track),
                };
                info!(
                    "Received {} track {} (stream {})",
                    remote.kind, remote.track_id, remote.stream_id
                );
                let _ = track_tx.send(PeerEvent::Track(remote));
            })
        }));
    }
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn add_recvonly_video(&self) -> Result<()> {
        self.pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add video transceiver: {}", e)))?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;
        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, desc: &SdpDescriptor) -> Result<()> {
        self.pc
            .set_local_description(desc.to_rtc()?)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: &SdpDescriptor) -> Result<()> {
        self.pc
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init: RTCIceCandidateInit = candidate.clone().into();
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn test_ice_servers() {
        let mut config = MediaConfig::default();
        config.turn_servers.push(TurnServer {
            urls: vec!["turn:turn.example.com:3478?transport=udp".to_string()],
            username: "user".to_string(),
            credential: "secret".to_string(),
        });

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(servers[2].username, "user");
    }

    #[tokio::test]
    async fn test_recvonly_offer_has_video_line() {
        let config = MediaConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let (peer, _events) = WebRtcPeer::new("test", &config).await.unwrap();
        peer.add_recvonly_video().await.unwrap();

        let sdp = peer.create_offer().await.unwrap();
        assert!(sdp.contains("m=video"));
        assert!(sdp.contains("a=recvonly"));

        peer.close().await.unwrap();
        peer.close().await.unwrap();
    }
}
