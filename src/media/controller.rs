//! Media session controller
//!
//! Owns the single peer connection of a session and enforces its ordering
//! rules:
//! - remote ICE candidates that arrive before the remote description are
//!   buffered in arrival order and applied right after it is set;
//! - local ICE candidates are released for delivery only once the local
//!   description is set, in generation order;
//! - a `connected` report is surfaced only after both descriptions are set.
//!
//! Peer events are consumed by [`MediaSessionController::next_event`], or by
//! [`MediaSessionController::drive`] while another future (a signaling
//! request, say) is in flight.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::peer::{PeerConnector, PeerLink};
use super::sink::VideoSink;
use super::types::{ConnectionState, MediaEvent, PeerEvent};
use crate::config::MediaConfig;
use crate::error::{AppError, Result};
use crate::session::Role;
use crate::signaling::{IceCandidate, OriginatedCandidate, SdpDescriptor};

/// Negotiated state of the media link
#[derive(Debug, Default)]
pub struct MediaLink {
    local_description: Option<SdpDescriptor>,
    remote_description: Option<SdpDescriptor>,
    local_candidates: Vec<OriginatedCandidate>,
    released_local: usize,
    pending_remote: VecDeque<IceCandidate>,
    bound_stream: Option<String>,
}

impl MediaLink {
    pub fn local_description(&self) -> Option<&SdpDescriptor> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SdpDescriptor> {
        self.remote_description.as_ref()
    }

    /// All locally generated candidates, in generation order
    pub fn local_candidates(&self) -> &[OriginatedCandidate] {
        &self.local_candidates
    }

    /// Remote candidates waiting for the remote description
    pub fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    pub fn bound_stream(&self) -> Option<&str> {
        self.bound_stream.as_deref()
    }

    pub fn has_both_descriptions(&self) -> bool {
        self.local_description.is_some() && self.remote_description.is_some()
    }
}

struct ActiveLink {
    peer: Box<dyn PeerLink>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

enum LinkSlot {
    Vacant,
    Active(ActiveLink),
    Released,
}

/// Controller for one session's peer connection
pub struct MediaSessionController {
    session_id: String,
    config: MediaConfig,
    connector: Arc<dyn PeerConnector>,
    sink: Arc<dyn VideoSink>,
    slot: LinkSlot,
    link: MediaLink,
    state_tx: watch::Sender<ConnectionState>,
    outbox: VecDeque<MediaEvent>,
    candidate_tx: Option<mpsc::UnboundedSender<OriginatedCandidate>>,
    next_sequence: u64,
}

impl MediaSessionController {
    pub fn new(
        session_id: impl Into<String>,
        config: MediaConfig,
        connector: Arc<dyn PeerConnector>,
        sink: Arc<dyn VideoSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::New);
        Self {
            session_id: session_id.into(),
            config,
            connector,
            sink,
            slot: LinkSlot::Vacant,
            link: MediaLink::default(),
            state_tx,
            outbox: VecDeque::new(),
            candidate_tx: None,
            next_sequence: 0,
        }
    }

    /// Create the peer connection and register the receive-only video transceiver
    pub async fn start(&mut self, role: Role) -> Result<watch::Receiver<ConnectionState>> {
        match self.slot {
            LinkSlot::Vacant => {}
            LinkSlot::Active(_) => {
                return Err(AppError::InvalidState(
                    "media link already started".to_string(),
                ))
            }
            LinkSlot::Released => {
                return Err(AppError::InvalidState("media link released".to_string()))
            }
        }

        let (peer, events) = self.connector.connect(&self.session_id, &self.config).await?;

        // Without the transceiver an initiator's offer carries no video m-line
        if let Err(e) = peer.add_recvonly_video().await {
            let _ = peer.close().await;
            return Err(e);
        }

        self.slot = LinkSlot::Active(ActiveLink {
            peer,
            events: Some(events),
        });
        info!(
            "Media link started for session {} as {}",
            self.session_id, role
        );
        Ok(self.subscribe())
    }

    /// Subscribe to connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.slot, LinkSlot::Active(_))
    }

    pub fn is_released(&self) -> bool {
        matches!(self.slot, LinkSlot::Released)
    }

    pub fn link(&self) -> &MediaLink {
        &self.link
    }

    fn peer(&self) -> Result<&dyn PeerLink> {
        match &self.slot {
            LinkSlot::Active(link) => Ok(&*link.peer),
            LinkSlot::Vacant => Err(AppError::InvalidState(
                "media link not started".to_string(),
            )),
            LinkSlot::Released => Err(AppError::InvalidState("media link released".to_string())),
        }
    }

    /// Create an offer and set it as the local description
    pub async fn create_local_offer(&mut self) -> Result<SdpDescriptor> {
        if self.link.local_description.is_some() {
            return Err(AppError::InvalidState(
                "local description already set".to_string(),
            ));
        }

        let peer = self.peer()?;
        let offer = SdpDescriptor::offer(peer.create_offer().await?);
        peer.set_local_description(&offer).await?;

        self.on_local_description(offer.clone());
        Ok(offer)
    }

    /// Apply the remote offer, then create and set a local answer
    pub async fn answer_remote_offer(&mut self, offer: SdpDescriptor) -> Result<SdpDescriptor> {
        self.apply_remote_description(offer).await?;

        let peer = self.peer()?;
        let answer = SdpDescriptor::answer(peer.create_answer().await?);
        peer.set_local_description(&answer).await?;

        self.on_local_description(answer.clone());
        Ok(answer)
    }

    /// Apply the remote description (once), then any buffered remote candidates
    pub async fn apply_remote_description(&mut self, desc: SdpDescriptor) -> Result<()> {
        if self.link.remote_description.is_some() {
            return Err(AppError::InvalidState(
                "remote description already applied".to_string(),
            ));
        }

        self.peer()?.set_remote_description(&desc).await?;
        debug!(
            "Remote {} applied for session {}",
            desc.sdp_type(),
            self.session_id
        );
        self.link.remote_description = Some(desc);

        self.flush_remote_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, or hold it until the remote description is set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.is_released() {
            return Err(AppError::InvalidState("media link released".to_string()));
        }

        if self.link.remote_description.is_none() {
            debug!("Buffering remote candidate until remote description is set");
            self.link.pending_remote.push_back(candidate);
            return Ok(());
        }

        self.peer()?.add_ice_candidate(&candidate).await
    }

    async fn flush_remote_candidates(&mut self) {
        let pending: Vec<IceCandidate> = self.link.pending_remote.drain(..).collect();
        if pending.is_empty() {
            return;
        }

        let Ok(peer) = self.peer() else {
            return;
        };
        debug!("Applying {} buffered remote candidates", pending.len());
        for candidate in &pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered remote candidate: {}", e);
            }
        }
    }

    fn on_local_description(&mut self, desc: SdpDescriptor) {
        self.link.local_description = Some(desc);
        self.release_local_candidates();
    }

    /// Hand released local candidates to `tx` as soon as they are released
    ///
    /// They are no longer surfaced as [`MediaEvent::LocalCandidate`]; if `tx`
    /// closes, delivery falls back to the event stream.
    pub fn forward_local_candidates(&mut self, tx: mpsc::UnboundedSender<OriginatedCandidate>) {
        let queued = std::mem::take(&mut self.outbox);
        for event in queued {
            match event {
                MediaEvent::LocalCandidate(candidate) if !tx.is_closed() => {
                    let _ = tx.send(candidate);
                }
                other => self.outbox.push_back(other),
            }
        }
        self.candidate_tx = Some(tx);
    }

    fn release_local_candidates(&mut self) {
        while self.link.released_local < self.link.local_candidates.len() {
            let candidate = self.link.local_candidates[self.link.released_local].clone();
            self.link.released_local += 1;

            let candidate = match &self.candidate_tx {
                Some(tx) => match tx.send(candidate) {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(candidate)) => candidate,
                },
                None => candidate,
            };
            self.outbox.push_back(MediaEvent::LocalCandidate(candidate));
        }
    }

    /// Run `fut` to completion while processing peer events
    ///
    /// Released local candidates reach the forwarder right away; other
    /// events queue up for [`next_event`](Self::next_event).
    pub async fn drive<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            let events = match &mut self.slot {
                LinkSlot::Active(ActiveLink {
                    events: Some(events),
                    ..
                }) => Some(events),
                _ => None,
            };
            let has_events = events.is_some();

            tokio::select! {
                output = &mut fut => return output,
                Some(event) = recv_peer_event(events), if has_events => {
                    self.handle_peer_event(event)
                }
            }
        }
    }

    /// Wait for the next media event
    ///
    /// Returns `None` once the link is not active or its peer produces no
    /// further events. Cancel safe.
    pub async fn next_event(&mut self) -> Option<MediaEvent> {
        loop {
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }

            let received = match &mut self.slot {
                LinkSlot::Active(ActiveLink {
                    events: Some(events),
                    ..
                }) => events.recv().await,
                _ => return None,
            };

            match received {
                Some(event) => self.handle_peer_event(event),
                None => {
                    debug!("Peer event stream ended for session {}", self.session_id);
                    if let LinkSlot::Active(link) = &mut self.slot {
                        link.events = None;
                    }
                    return None;
                }
            }
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let originated = OriginatedCandidate {
                    session_id: self.session_id.clone(),
                    sequence: self.next_sequence,
                    candidate,
                };
                self.next_sequence += 1;
                self.link.local_candidates.push(originated);

                if self.link.local_description.is_some() {
                    self.release_local_candidates();
                } else {
                    debug!("Holding local candidate until local description is set");
                }
            }
            PeerEvent::StateChanged(state) => {
                if state == ConnectionState::Connected && !self.link.has_both_descriptions() {
                    warn!(
                        "Ignoring connected report for session {} before both descriptions are set",
                        self.session_id
                    );
                    return;
                }
                if self.state_tx.send_replace(state) != state {
                    self.outbox.push_back(MediaEvent::State(state));
                }
            }
            PeerEvent::Track(track) => {
                if let Some(bound) = &self.link.bound_stream {
                    if *bound == track.stream_id {
                        debug!(
                            "Ignoring additional {} track {} of bound stream {}",
                            track.kind, track.track_id, bound
                        );
                    } else {
                        debug!(
                            "Ignoring track from stream {}; sink already shows {}",
                            track.stream_id, bound
                        );
                    }
                    return;
                }

                let stream_id = track.stream_id.clone();
                let track_id = track.track_id.clone();
                self.sink.attach(track);
                self.link.bound_stream = Some(stream_id.clone());
                self.outbox.push_back(MediaEvent::TrackBound {
                    stream_id,
                    track_id,
                });
            }
        }
    }

    /// Close the peer connection; idempotent and never fails
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.slot, LinkSlot::Released) {
            LinkSlot::Active(link) => {
                if let Err(e) = link.peer.close().await {
                    debug!("Ignoring error while closing peer connection: {}", e);
                }
                if self.link.bound_stream.is_some() {
                    self.sink.detach();
                }
                info!("Media link released for session {}", self.session_id);
            }
            LinkSlot::Vacant => {
                debug!("Media link for session {} was never created", self.session_id);
            }
            LinkSlot::Released => return,
        }

        self.outbox.clear();
        self.candidate_tx = None;
        self.state_tx.send_replace(ConnectionState::Closed);
    }
}

async fn recv_peer_event(
    events: Option<&mut mpsc::UnboundedReceiver<PeerEvent>>,
) -> Option<PeerEvent> {
    events?.recv().await
}

impl Drop for MediaSessionController {
    fn drop(&mut self) {
        let LinkSlot::Active(link) = std::mem::replace(&mut self.slot, LinkSlot::Released) else {
            return;
        };

        if self.link.bound_stream.is_some() {
            self.sink.detach();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = link.peer.close().await;
                });
            }
            Err(_) => debug!("No runtime left to close peer connection"),
        }
    }
}
