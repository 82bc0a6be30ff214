//! Session aggregate
//!
//! Owns the media link and the control link of one viewer session and drives
//! the state machine in [`super::state`] from their events. All mutation goes
//! through `&mut self`; teardown from another task goes through
//! [`Session::stop_token`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::state::{next_state, Readiness, Role, SessionInput, SessionState};
use crate::config::AppConfig;
use crate::control::{ControlChannel, ControlHandle, ControlLinkState};
use crate::error::{AppError, ErrorReport, Result};
use crate::events::{EventBus, SessionEvent};
use crate::input::CommandMessage;
use crate::media::{
    ConnectionState, MediaEvent, MediaSessionController, PeerConnector, VideoSink, WebRtcConnector,
};
use crate::signaling::{
    BrowserLauncher, HttpBackend, IceCandidate, IceTrickler, SdpDescriptor, SignalingBackend,
    SignalingClient,
};

/// One viewer session
///
/// Holds at most one media link and one control link. Both are set up by
/// [`start`](Self::start), watched by [`run`](Self::run) and released by
/// [`stop`](Self::stop), which is safe to call in any state and more than
/// once. The session reaches `Connected` once every enabled link is up and
/// the first video track is bound to the sink.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use browser_stream::config::AppConfig;
/// use browser_stream::input::CommandMessage;
/// use browser_stream::media::RtpStatsSink;
/// use browser_stream::session::Session;
///
/// # async fn demo() -> browser_stream::Result<()> {
/// let mut session = Session::from_config(AppConfig::default(), Arc::new(RtpStatsSink::new()))?;
/// let stop = session.stop_token();
///
/// session.start().await?;
/// session.send(&CommandMessage::Click { x: 120, y: 340 });
///
/// // Elsewhere: stop.cancel() ends run()
/// # stop.cancel();
/// session.run().await;
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: String,
    role: Role,
    created_at: DateTime<Utc>,
    launch_url: String,
    control_endpoint: String,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    readiness: Readiness,
    media: Option<MediaSessionController>,
    media_done: bool,
    control: Option<ControlChannel>,
    control_rx: Option<watch::Receiver<ControlLinkState>>,
    signaling: SignalingClient,
    launcher: Arc<dyn BrowserLauncher>,
    trickler: Option<IceTrickler>,
    events: EventBus,
    cancel: CancellationToken,
    last_error: Option<ErrorReport>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        signaling: Arc<dyn SignalingBackend>,
        launcher: Arc<dyn BrowserLauncher>,
        connector: Arc<dyn PeerConnector>,
        sink: Arc<dyn VideoSink>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        let media = config.media.enabled.then(|| {
            MediaSessionController::new(id.clone(), config.media.clone(), connector, sink)
        });
        let control = config.control.enabled.then(ControlChannel::new);

        Self {
            role: config.session.role,
            created_at: Utc::now(),
            launch_url: config.control.launch_url.clone(),
            control_endpoint: config.control_endpoint(),
            state: SessionState::Idle,
            state_tx,
            readiness: Readiness::new(config.media.enabled, config.control.enabled),
            media,
            media_done: false,
            control,
            control_rx: None,
            signaling: SignalingClient::new(signaling),
            launcher,
            trickler: None,
            events: EventBus::new(),
            cancel: CancellationToken::new(),
            last_error: None,
            id,
        }
    }

    /// Session backed by the HTTP backend and a real peer connection
    pub fn from_config(config: AppConfig, sink: Arc<dyn VideoSink>) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.backend)?);
        Ok(Self::new(
            config,
            backend.clone(),
            backend,
            Arc::new(WebRtcConnector),
            sink,
        ))
    }

    /// Publish on `events` instead of a private bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Failure that moved the session to `Failed`, if any
    pub fn last_error(&self) -> Option<&ErrorReport> {
        self.last_error.as_ref()
    }

    pub fn media(&self) -> Option<&MediaSessionController> {
        self.media.as_ref()
    }

    /// Token that tears the session down when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sender for input commands, usable from other tasks
    pub fn control_handle(&self) -> Option<ControlHandle> {
        self.control.as_ref().map(ControlChannel::handle)
    }

    /// Send a command over the control link; dropped unless it is open
    pub fn send(&self, command: &CommandMessage) -> bool {
        self.control.as_ref().is_some_and(|c| c.send(command))
    }

    /// Hand a remote ICE candidate to the media link
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        match self.media.as_mut() {
            Some(media) => media.add_remote_candidate(candidate).await,
            None => Err(AppError::InvalidState(
                "session has no media link".to_string(),
            )),
        }
    }

    /// Set up the media and control links concurrently
    ///
    /// Any failure moves the session to `Failed` and is returned; the other
    /// link's setup still runs to completion. Cancelling the stop token
    /// abandons setup and closes the session.
    ///
    /// As initiator, local candidates are trickled to the backend while the
    /// answer or the browser launch is still pending.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is idle, otherwise the first setup
    /// failure (`SignalingFailure`, `MalformedAnswer`, `LaunchFailure`,
    /// `ControlChannel` or a peer connection error).
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(AppError::InvalidState(format!(
                "session is {}, not idle",
                self.state
            )));
        }

        self.apply(SessionInput::Start);
        info!(
            "Starting session {} as {} (media: {}, control: {})",
            self.id,
            self.role,
            self.media.is_some(),
            self.control.is_some()
        );

        // Candidates are delivered as soon as the offer is set, not after setup
        if self.role == Role::Initiator {
            if let Some(media) = self.media.as_mut() {
                let trickler = IceTrickler::spawn(self.signaling.backend());
                if let Some(tx) = trickler.sender() {
                    media.forward_local_candidates(tx);
                }
                self.trickler = Some(trickler);
            }
        }

        let role = self.role;
        let cancel = self.cancel.clone();
        let control_done = CancellationToken::new();
        let Session {
            media,
            control,
            signaling,
            launcher,
            launch_url,
            control_endpoint,
            ..
        } = self;

        let media_setup = async {
            let media = media.as_mut()?;
            let result = setup_media(media, signaling, role).await;
            if result.is_ok() {
                media.drive(control_done.cancelled()).await;
            }
            Some(result)
        };
        let control_setup = async {
            let result = match control.as_mut() {
                Some(control) => Some(
                    control
                        .launch_and_open(&**launcher, launch_url, control_endpoint)
                        .await,
                ),
                None => None,
            };
            control_done.cancel();
            result
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            results = async { tokio::join!(media_setup, control_setup) } => Some(results),
        };

        let Some((media_result, control_result)) = outcome else {
            info!("Session {} stopped during setup", self.id);
            self.stop().await;
            return Ok(());
        };

        let mut failure = None;

        match media_result {
            Some(Ok(remote)) => {
                debug!("Media negotiated against remote {}", remote.sdp_type());
            }
            Some(Err(e)) => failure = Some(e),
            None => {}
        }

        match control_result {
            Some(Ok(mut rx)) => {
                let current = *rx.borrow_and_update();
                self.control_rx = Some(rx);
                self.on_control_state(current);
            }
            Some(Err(e)) => {
                failure.get_or_insert(e);
            }
            None => {}
        }

        if let Some(e) = failure {
            if self.apply(SessionInput::StartFailed) == Some(SessionState::Failed) {
                self.report(&e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Process link events until the session is failed, closed or stopped
    pub async fn run(&mut self) {
        while self.step().await {}
        debug!("Session {} event loop finished in {}", self.id, self.state);
    }

    /// Wait for and process one link event
    ///
    /// Returns `false` once the session is terminal.
    pub async fn step(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let cancel = self.cancel.clone();
        let media_live = self.media.as_ref().is_some_and(|m| m.is_active()) && !self.media_done;
        let control_live = self.control_rx.is_some();
        let Session {
            media, control_rx, ..
        } = self;

        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            event = next_media_event(media), if media_live => Wake::Media(event),
            state = next_control_state(control_rx), if control_live => Wake::Control(state),
        };

        match wake {
            Wake::Cancelled => self.stop().await,
            Wake::Media(Some(event)) => self.on_media_event(event),
            Wake::Media(None) => self.media_done = true,
            Wake::Control(Some(state)) => self.on_control_state(state),
            Wake::Control(None) => self.control_rx = None,
        }

        !self.state.is_terminal()
    }

    /// Release both links and move to `Closed`; idempotent
    pub async fn stop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.cancel.cancel();
        if let Some(mut trickler) = self.trickler.take() {
            trickler.abort();
        }
        if let Some(media) = self.media.as_mut() {
            media.stop().await;
        }
        if let Some(control) = self.control.as_mut() {
            control.close().await;
        }
        self.control_rx = None;

        self.apply(SessionInput::Stop);
    }

    fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => match &self.trickler {
                Some(trickler) => trickler.push(candidate),
                None => debug!(
                    "Not trickling candidate #{} as {}",
                    candidate.sequence, self.role
                ),
            },
            MediaEvent::State(state) => {
                self.events.publish(SessionEvent::MediaStateChanged {
                    session_id: self.id.clone(),
                    state,
                });
                if self.apply(SessionInput::Media(state)) == Some(SessionState::Failed) {
                    self.report(&AppError::MediaConnectionFailure(format!(
                        "peer connection {}",
                        state
                    )));
                }
                if state == ConnectionState::Closed {
                    self.media_done = true;
                }
            }
            MediaEvent::TrackBound {
                stream_id,
                track_id,
            } => {
                self.events.publish(SessionEvent::TrackBound {
                    session_id: self.id.clone(),
                    stream_id,
                    track_id,
                });
                self.apply(SessionInput::TrackBound);
            }
        }
    }

    fn on_control_state(&mut self, state: ControlLinkState) {
        self.events.publish(SessionEvent::ControlStateChanged {
            session_id: self.id.clone(),
            state,
        });
        if self.apply(SessionInput::Control(state)) == Some(SessionState::Failed) {
            self.report(&AppError::ControlChannel(
                "control channel closed unexpectedly".to_string(),
            ));
        }
    }

    fn apply(&mut self, input: SessionInput) -> Option<SessionState> {
        self.readiness.observe(input);
        let next = next_state(self.state, input, &self.readiness)?;

        info!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        self.state_tx.send_replace(next);
        self.events.publish(SessionEvent::StateChanged {
            session_id: self.id.clone(),
            state: next,
        });
        Some(next)
    }

    fn report(&mut self, e: &AppError) {
        error!("Session {} failed: {}", self.id, e);
        let report = e.report();
        self.events.publish(SessionEvent::Failed {
            session_id: self.id.clone(),
            kind: report.kind.to_string(),
            message: report.message.clone(),
        });
        self.last_error = Some(report);
    }
}

enum Wake {
    Cancelled,
    Media(Option<MediaEvent>),
    Control(Option<ControlLinkState>),
}

async fn setup_media(
    media: &mut MediaSessionController,
    signaling: &SignalingClient,
    role: Role,
) -> Result<SdpDescriptor> {
    media.start(role).await?;
    signaling.negotiate(role, media).await
}

async fn next_media_event(media: &mut Option<MediaSessionController>) -> Option<MediaEvent> {
    match media.as_mut() {
        Some(media) => media.next_event().await,
        None => None,
    }
}

async fn next_control_state(
    rx: &mut Option<watch::Receiver<ControlLinkState>>,
) -> Option<ControlLinkState> {
    let rx = rx.as_mut()?;
    rx.changed().await.ok()?;
    let state = *rx.borrow_and_update();
    Some(state)
}
