use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Signaling endpoint {endpoint} responded with status {status}")]
    SignalingFailure { endpoint: String, status: u16 },

    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    #[error("Media connection failure: {0}")]
    MediaConnectionFailure(String),

    #[error("Browser launch failed: {0}")]
    LaunchFailure(String),

    #[error("Control channel error: {0}")]
    ControlChannel(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Displayable failure, surfaced to the hosting UI
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    /// Stable identifier for the error category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignalingFailure { .. } => "signaling_failure",
            Self::MalformedAnswer(_) => "malformed_answer",
            Self::MediaConnectionFailure(_) => "media_connection_failure",
            Self::LaunchFailure(_) => "launch_failure",
            Self::ControlChannel(_) => "control_channel",
            Self::WebRtcError(_) => "webrtc",
            Self::InvalidState(_) => "invalid_state",
            Self::Config(_) | Self::ConfigParse(_) => "config",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
