//! WebSocket control channel to the remote browser
//!
//! Commands are fire-and-forget: they are transmitted only while the link is
//! `Open` and silently dropped otherwise, never queued for later.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::debug_throttled;
use crate::error::{AppError, Result};
use crate::input::CommandMessage;
use crate::signaling::BrowserLauncher;
use crate::utils::LogThrottler;

/// How long `close` waits for the socket task to flush and say goodbye
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Control link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlLinkState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ControlLinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlLinkState::Connecting => write!(f, "connecting"),
            ControlLinkState::Open => write!(f, "open"),
            ControlLinkState::Closed => write!(f, "closed"),
        }
    }
}

struct Shared {
    state_tx: watch::Sender<ControlLinkState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    dropped: LogThrottler,
}

impl Shared {
    fn state(&self) -> ControlLinkState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ControlLinkState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn send(&self, command: &CommandMessage) -> bool {
        let state = self.state();
        if state != ControlLinkState::Open {
            debug_throttled!(
                self.dropped,
                command.name(),
                "Dropping {} command, control link is {}",
                command.name(),
                state
            );
            return false;
        }

        let text = match serde_json::to_string(command) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize {} command: {}", command.name(), e);
                return false;
            }
        };

        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(Message::text(text)).is_ok(),
            None => false,
        }
    }

    /// Stop accepting commands; the socket task sees its queue end
    fn shut(&self) {
        self.outbound.lock().take();
        self.set_state(ControlLinkState::Closed);
    }
}

/// Cloneable command sender with the same gating as [`ControlChannel::send`]
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
}

impl ControlHandle {
    /// Send a command if the link is open; returns whether it was queued
    pub fn send(&self, command: &CommandMessage) -> bool {
        self.shared.send(command)
    }

    pub fn state(&self) -> ControlLinkState {
        self.shared.state()
    }
}

/// Control link: one WebSocket per session
///
/// Starts `Closed`, moves to `Connecting` and then `Open` on a successful
/// [`open`](Self::open), and ends `Closed` again after [`close`](Self::close)
/// or when the server goes away. It is never reopened.
///
/// # Example
///
/// ```no_run
/// use browser_stream::config::BackendConfig;
/// use browser_stream::control::ControlChannel;
/// use browser_stream::input::CommandMessage;
/// use browser_stream::signaling::HttpBackend;
///
/// # async fn demo() -> browser_stream::Result<()> {
/// let backend = HttpBackend::new(&BackendConfig::default())?;
/// let mut control = ControlChannel::new();
///
/// // Launches the remote browser on github.com, then connects
/// control
///     .launch_and_open(&backend, "github.com", "ws://localhost:8000/ws/browser")
///     .await?;
///
/// // Dropped without error if the link is not open
/// control.send(&CommandMessage::Type { text: "hello".to_string() });
///
/// control.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ControlChannel {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    opened: bool,
}

impl ControlChannel {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ControlLinkState::Closed);
        Self {
            shared: Arc::new(Shared {
                state_tx,
                outbound: Mutex::new(None),
                dropped: LogThrottler::default(),
            }),
            task: None,
            opened: false,
        }
    }

    pub fn state(&self) -> ControlLinkState {
        self.shared.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlLinkState> {
        self.shared.state_tx.subscribe()
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shared: self.shared.clone(),
        }
    }

    /// Provision the remote browser, then open the socket
    ///
    /// # Arguments
    ///
    /// * `launcher` - issues `GET /launch/{target_url}`
    /// * `target_url` - page the remote browser opens, percent-encoded by the launcher
    /// * `endpoint` - control WebSocket URL (`ws://` only)
    ///
    /// The socket is not opened unless the launch reports success; a failed
    /// launch returns `LaunchFailure`.
    pub async fn launch_and_open(
        &mut self,
        launcher: &dyn BrowserLauncher,
        target_url: &str,
        endpoint: &str,
    ) -> Result<watch::Receiver<ControlLinkState>> {
        launcher.launch(target_url).await?;
        info!("Remote browser launched on {}", target_url);
        self.open(endpoint).await
    }

    /// Connect to `endpoint`; a channel is opened at most once
    pub async fn open(&mut self, endpoint: &str) -> Result<watch::Receiver<ControlLinkState>> {
        if self.opened {
            return Err(AppError::InvalidState(
                "control channel already opened".to_string(),
            ));
        }
        self.opened = true;

        self.shared.set_state(ControlLinkState::Connecting);
        debug!("Connecting control channel to {}", endpoint);

        let ws_stream = match tokio_tungstenite::connect_async(endpoint).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                self.shared.set_state(ControlLinkState::Closed);
                return Err(AppError::ControlChannel(format!(
                    "Failed to connect to {}: {}",
                    endpoint, e
                )));
            }
        };

        let (mut sender, mut receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.shared.outbound.lock() = Some(tx);
        self.shared.set_state(ControlLinkState::Open);
        info!("Control channel open: {}", endpoint);

        let shared = self.shared.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => match outgoing {
                        Some(msg) => {
                            if let Err(e) = sender.send(msg).await {
                                warn!("Control channel send failed: {}", e);
                                break;
                            }
                        }
                        None => {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = receiver.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Control frame from browser: {}", text);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Control channel closed by remote");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("Control channel receive error: {}", e);
                            break;
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
            shared.shut();
        }));

        Ok(self.subscribe())
    }

    /// Send a command if the link is open; returns whether it was queued
    pub fn send(&self, command: &CommandMessage) -> bool {
        self.shared.send(command)
    }

    /// Close the link; idempotent and safe from any state
    pub async fn close(&mut self) {
        self.shared.shut();

        let Some(mut task) = self.task.take() else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            debug!("Control channel task did not finish in time, aborting");
            task.abort();
        }
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.shared.shut();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
