//! Test doubles shared by the unit tests
//!
//! - [`FakeConnector`]/`FakePeer` record peer calls into a [`Journal`] and let
//!   tests inject peer events through a [`PeerEmitter`].
//! - [`FakeBackend`] records signaling calls into the same journal.
//! - [`MockBackend`] is a real axum server speaking the backend's HTTP and
//!   WebSocket protocol.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::MediaConfig;
use crate::error::{AppError, Result};
use crate::media::{PeerConnector, PeerEvent, PeerLink, RemoteTrack, VideoSink};
use crate::signaling::{
    AnswerPayload, BrowserLauncher, IceCandidate, SdpDescriptor, SdpType, SignalingBackend,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    AddRecvonlyVideo,
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    FetchOffer,
    ExchangeOffer,
    SubmitAnswer(SdpType),
    SendCandidate(String),
    Launch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Peer(PeerCall),
    Backend(BackendCall),
}

/// Ordered record of calls across fakes
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn record(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn entries(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.0.lock().iter().position(|c| c == call)
    }
}

/// Injects events into the most recently connected fake peer
#[derive(Clone, Default)]
pub struct PeerEmitter {
    events: Arc<Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>>,
}

impl PeerEmitter {
    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

pub struct FakePeer {
    journal: Journal,
}

impl FakePeer {
    fn record(&self, call: PeerCall) {
        self.journal.record(Call::Peer(call));
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn add_recvonly_video(&self) -> Result<()> {
        self.record(PeerCall::AddRecvonlyVideo);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.record(PeerCall::CreateOffer);
        Ok("v=0 local offer".to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(PeerCall::CreateAnswer);
        Ok("v=0 local answer".to_string())
    }

    async fn set_local_description(&self, desc: &SdpDescriptor) -> Result<()> {
        self.record(PeerCall::SetLocal(desc.sdp_type()));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SdpDescriptor) -> Result<()> {
        self.record(PeerCall::SetRemote(desc.sdp_type()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(PeerCall::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(PeerCall::Close);
        Ok(())
    }
}

pub struct FakeConnector {
    journal: Journal,
    emitter: PeerEmitter,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            emitter: PeerEmitter::default(),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn emitter(&self) -> PeerEmitter {
        self.emitter.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _session_id: &str,
        _config: &MediaConfig,
    ) -> Result<(Box<dyn PeerLink>, mpsc::UnboundedReceiver<PeerEvent>)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.emitter.events.lock() = Some(tx);

        let peer = FakePeer {
            journal: self.journal.clone(),
        };
        Ok((Box::new(peer), rx))
    }
}

/// Sink recording attach/detach calls
#[derive(Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<String>>,
    detached: AtomicUsize,
}

impl RecordingSink {
    /// Track ids passed to `attach`
    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

impl VideoSink for RecordingSink {
    fn attach(&self, track: RemoteTrack) {
        self.attached.lock().push(track.track_id);
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-process signaling backend and launcher
pub struct FakeBackend {
    journal: Journal,
    answer: AnswerPayload,
    offer: SdpDescriptor,
    offer_status: Option<u16>,
    launch_ok: bool,
    candidate_delay: Duration,
    launch_delay: Duration,
    attempted: Mutex<Vec<String>>,
    delivered: Mutex<Vec<String>>,
    launched: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            answer: AnswerPayload::new("v=0 remote answer", "answer"),
            offer: SdpDescriptor::offer("v=0 remote offer"),
            offer_status: None,
            launch_ok: true,
            candidate_delay: Duration::ZERO,
            launch_delay: Duration::ZERO,
            attempted: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_answer(mut self, answer: AnswerPayload) -> Self {
        self.answer = answer;
        self
    }

    /// Make `exchange_offer` fail with `status`
    pub fn with_offer_status(mut self, status: u16) -> Self {
        self.offer_status = Some(status);
        self
    }

    pub fn with_launch_ok(mut self, ok: bool) -> Self {
        self.launch_ok = ok;
        self
    }

    pub fn with_candidate_delay(mut self, delay: Duration) -> Self {
        self.candidate_delay = delay;
        self
    }

    /// Hold `launch` for `delay` before answering
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// Candidates whose delivery was attempted, in order
    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().clone()
    }

    /// Candidates delivered successfully, in order
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().clone()
    }

    fn record(&self, call: BackendCall) {
        self.journal.record(Call::Backend(call));
    }
}

#[async_trait]
impl SignalingBackend for FakeBackend {
    async fn fetch_offer(&self) -> Result<SdpDescriptor> {
        self.record(BackendCall::FetchOffer);
        Ok(self.offer.clone())
    }

    async fn exchange_offer(&self, _offer: &SdpDescriptor) -> Result<AnswerPayload> {
        self.record(BackendCall::ExchangeOffer);
        if let Some(status) = self.offer_status {
            return Err(AppError::SignalingFailure {
                endpoint: "POST /webrtc/offer".to_string(),
                status,
            });
        }
        Ok(self.answer.clone())
    }

    async fn submit_answer(&self, answer: &SdpDescriptor) -> Result<()> {
        self.record(BackendCall::SubmitAnswer(answer.sdp_type()));
        Ok(())
    }

    /// Candidates containing "unreachable" fail, "stalled" ones never complete
    async fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.record(BackendCall::SendCandidate(candidate.candidate.clone()));
        self.attempted.lock().push(candidate.candidate.clone());
        if candidate.candidate.contains("stalled") {
            std::future::pending::<()>().await;
        }
        if !self.candidate_delay.is_zero() {
            tokio::time::sleep(self.candidate_delay).await;
        }

        if candidate.candidate.contains("unreachable") {
            return Err(AppError::SignalingFailure {
                endpoint: "POST /webrtc/ice".to_string(),
                status: 502,
            });
        }
        self.delivered.lock().push(candidate.candidate.clone());
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for FakeBackend {
    async fn launch(&self, target_url: &str) -> Result<()> {
        self.record(BackendCall::Launch(target_url.to_string()));
        self.launched.lock().push(target_url.to_string());
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if !self.launch_ok {
            return Err(AppError::LaunchFailure("status: error".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct MockState {
    answer: Value,
    served_offer: Value,
    offer_status: StatusCode,
    launch_status: String,
    offers: Arc<Mutex<Vec<Value>>>,
    answers: Arc<Mutex<Vec<Value>>>,
    candidates: Arc<Mutex<Vec<Value>>>,
    launched: Arc<Mutex<Vec<String>>>,
    frames: Arc<Mutex<Vec<String>>>,
    ws_connections: Arc<AtomicUsize>,
}

pub struct MockBackendBuilder {
    answer: Value,
    served_offer: Value,
    offer_status: StatusCode,
    launch_status: String,
}

impl MockBackendBuilder {
    /// Body returned by `POST /webrtc/offer`
    pub fn answer(mut self, answer: Value) -> Self {
        self.answer = answer;
        self
    }

    /// Body returned by `GET /webrtc/offer`
    pub fn served_offer(mut self, offer: Value) -> Self {
        self.served_offer = offer;
        self
    }

    /// Status of `POST /webrtc/offer`
    pub fn offer_status(mut self, status: u16) -> Self {
        self.offer_status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    /// `status` field of `GET /launch/{url}` responses
    pub fn launch_status(mut self, status: &str) -> Self {
        self.launch_status = status.to_string();
        self
    }

    pub async fn spawn(self) -> MockBackend {
        let state = MockState {
            answer: self.answer,
            served_offer: self.served_offer,
            offer_status: self.offer_status,
            launch_status: self.launch_status,
            offers: Arc::default(),
            answers: Arc::default(),
            candidates: Arc::default(),
            launched: Arc::default(),
            frames: Arc::default(),
            ws_connections: Arc::default(),
        };

        let app = Router::new()
            .route("/webrtc/offer", get(serve_offer).post(exchange_offer))
            .route("/webrtc/answer", post(accept_answer))
            .route("/webrtc/ice", post(accept_candidate))
            .route("/launch/*target", get(launch))
            .route("/ws/browser", get(browser_ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockBackend {
            base_url: format!("http://{}", addr),
            state,
            task,
        }
    }
}

/// Mock of the browser backend on an ephemeral local port
pub struct MockBackend {
    pub base_url: String,
    state: MockState,
    task: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder {
            answer: json!({"sdp": "v=0 remote answer", "type": "answer"}),
            served_offer: json!({"sdp": "v=0 remote offer", "type": "offer"}),
            offer_status: StatusCode::OK,
            launch_status: "success".to_string(),
        }
    }

    pub fn ws_url(&self) -> String {
        format!("{}/ws/browser", self.base_url.replacen("http://", "ws://", 1))
    }

    pub fn posted_offers(&self) -> Vec<Value> {
        self.state.offers.lock().clone()
    }

    pub fn posted_answers(&self) -> Vec<Value> {
        self.state.answers.lock().clone()
    }

    pub fn posted_candidates(&self) -> Vec<Value> {
        self.state.candidates.lock().clone()
    }

    /// Decoded launch targets
    pub fn launched(&self) -> Vec<String> {
        self.state.launched.lock().clone()
    }

    /// Text frames received on `/ws/browser`
    pub fn frames(&self) -> Vec<String> {
        self.state.frames.lock().clone()
    }

    pub fn ws_connections(&self) -> usize {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` frames arrived, or two seconds passed
    pub async fn wait_for_frames(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let frames = self.frames();
            if frames.len() >= count {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.frames()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_offer(State(state): State<MockState>) -> Json<Value> {
    Json(state.served_offer.clone())
}

async fn exchange_offer(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.offers.lock().push(body);
    if state.offer_status != StatusCode::OK {
        return state.offer_status.into_response();
    }
    Json(state.answer.clone()).into_response()
}

async fn accept_answer(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.answers.lock().push(body);
    Json(json!({"status": "ok"}))
}

async fn accept_candidate(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.candidates.lock().push(body);
    Json(json!({"status": "ok"}))
}

async fn launch(State(state): State<MockState>, Path(target): Path<String>) -> Json<Value> {
    state.launched.lock().push(target);
    Json(json!({"status": state.launch_status}))
}

async fn browser_ws(State(state): State<MockState>, ws: WebSocketUpgrade) -> Response {
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| record_frames(socket, state))
}

async fn record_frames(mut socket: WebSocket, state: MockState) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => state.frames.lock().push(text),
            Message::Close(_) => break,
            _ => {}
        }
    }
}
