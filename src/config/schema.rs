use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::session::Role;

const WS_BROWSER_PATH: &str = "/ws/browser";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signaling backend settings
    pub backend: BackendConfig,
    /// Peer connection settings
    pub media: MediaConfig,
    /// Input control channel settings
    pub control: ControlConfig,
    /// Session settings
    pub session: SessionConfig,
}

impl AppConfig {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(AppError::Config("backend.base_url is empty".to_string()));
        }
        if !self.media.enabled && !self.control.enabled {
            return Err(AppError::Config(
                "at least one of media or control must be enabled".to_string(),
            ));
        }
        if self.media.enabled && self.media.stun_servers.is_empty() {
            return Err(AppError::Config(
                "media requires at least one STUN server".to_string(),
            ));
        }
        if self.control.enabled && self.control.launch_url.trim().is_empty() {
            return Err(AppError::Config("control.launch_url is empty".to_string()));
        }
        if self.control.enabled {
            // The control socket is plain WebSocket only
            let endpoint = self.control_endpoint();
            if !endpoint.starts_with("ws://") {
                return Err(AppError::Config(format!(
                    "control endpoint {} is not a ws:// URL; set control.ws_url",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    /// Control WebSocket URL, derived from the backend URL unless set explicitly
    pub fn control_endpoint(&self) -> String {
        if let Some(ref url) = self.control.ws_url {
            return url.clone();
        }

        let base = self.backend.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", ws_base, WS_BROWSER_PATH)
    }
}

/// Signaling backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the browser backend
    pub base_url: String,
    /// Optional per-request timeout; signaling has no timeout when unset
    pub request_timeout_ms: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: None,
        }
    }
}

/// Peer connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Negotiate a video stream
    pub enabled: bool,
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: vec![],
        }
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Input control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Launch the remote browser and open the control socket
    pub enabled: bool,
    /// Explicit WebSocket URL (defaults to `<backend>/ws/browser`)
    pub ws_url: Option<String>,
    /// Page the remote browser is launched on
    pub launch_url: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: None,
            launch_url: "www.google.com".to_string(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling role of this client
    pub role: Role,
}
