//! Signaling payloads exchanged with the browser backend

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{AppError, Result};

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Immutable SDP description: `{ "sdp": ..., "type": "offer" | "answer" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpDescriptor {
    sdp: String,
    #[serde(rename = "type")]
    sdp_type: SdpType,
}

impl SdpDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    /// Parse into the peer connection's description type
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| AppError::WebRtcError(format!("Invalid SDP {}: {}", self.sdp_type, e)))
    }
}

/// Offer as served by `GET /webrtc/offer`
///
/// Only the SDP body is required; the `type` field is not checked.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferPayload {
    pub sdp: String,
    #[serde(rename = "type", default)]
    pub sdp_type: Option<String>,
}

impl From<OfferPayload> for SdpDescriptor {
    fn from(payload: OfferPayload) -> Self {
        SdpDescriptor::offer(payload.sdp)
    }
}

/// Answer as returned by `POST /webrtc/offer`, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnswerPayload {
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(rename = "type", default)]
    pub sdp_type: Option<String>,
}

impl AnswerPayload {
    pub fn new(sdp: impl Into<String>, sdp_type: impl Into<String>) -> Self {
        Self {
            sdp: Some(sdp.into()),
            sdp_type: Some(sdp_type.into()),
        }
    }

    /// Accept the payload only if both `sdp` and `type` are present and non-empty
    pub fn validate(self) -> Result<SdpDescriptor> {
        let sdp = self
            .sdp
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::MalformedAnswer("missing sdp".to_string()))?;
        let sdp_type = self
            .sdp_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::MalformedAnswer("missing type".to_string()))?;

        if sdp_type != "answer" {
            return Err(AppError::MalformedAnswer(format!(
                "expected type \"answer\", got \"{}\"",
                sdp_type
            )));
        }

        Ok(SdpDescriptor::answer(sdp))
    }
}

/// ICE candidate, wire format of `POST /webrtc/ice`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// Locally gathered candidate, tagged with its session and generation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginatedCandidate {
    pub session_id: String,
    pub sequence: u64,
    pub candidate: IceCandidate,
}

/// Response of `GET /launch/{url}`
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl LaunchResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
