//! Trickle ICE delivery
//!
//! Candidates are queued without blocking the producer and delivered one
//! request at a time, so the backend sees them in generation order. Each
//! request gets [`ICE_SEND_TIMEOUT`]; a stalled one is abandoned so later
//! candidates still go out.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::SignalingBackend;
use super::types::OriginatedCandidate;

/// Upper bound on a single `/webrtc/ice` request
pub const ICE_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Background sender of local ICE candidates
pub struct IceTrickler {
    tx: Option<mpsc::UnboundedSender<OriginatedCandidate>>,
    task: Option<JoinHandle<()>>,
}

impl IceTrickler {
    pub fn spawn(backend: Arc<dyn SignalingBackend>) -> Self {
        Self::with_timeout(backend, ICE_SEND_TIMEOUT)
    }

    /// Spawn with a custom per-request timeout
    pub fn with_timeout(backend: Arc<dyn SignalingBackend>, send_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OriginatedCandidate>();

        let task = tokio::spawn(async move {
            while let Some(originated) = rx.recv().await {
                let sent =
                    tokio::time::timeout(send_timeout, backend.send_ice_candidate(&originated.candidate))
                        .await;
                match sent {
                    Ok(Ok(())) => debug!(
                        "Delivered ICE candidate #{} for session {}",
                        originated.sequence, originated.session_id
                    ),
                    Ok(Err(e)) => warn!(
                        "Failed to deliver ICE candidate #{} for session {}: {}",
                        originated.sequence, originated.session_id, e
                    ),
                    Err(_) => warn!(
                        "Gave up on ICE candidate #{} for session {} after {:?}",
                        originated.sequence, originated.session_id, send_timeout
                    ),
                }
            }
        });

        Self {
            tx: Some(tx),
            task: Some(task),
        }
    }

    /// Queue a candidate for delivery
    pub fn push(&self, candidate: OriginatedCandidate) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(candidate).is_err() {
            debug!("Trickle task gone, dropping candidate");
        }
    }

    /// Producer side of the queue, for pushing from outside the session task
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<OriginatedCandidate>> {
        self.tx.clone()
    }

    /// Stop accepting candidates and wait until the queued ones are delivered
    pub async fn finish(mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Stop immediately, discarding undelivered candidates
    pub fn abort(&mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for IceTrickler {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::IceCandidate;
    use crate::testing::{FakeBackend, Journal};
    use std::time::Duration;

    fn originated(sequence: u64, candidate: &str) -> OriginatedCandidate {
        OriginatedCandidate {
            session_id: "session-1".to_string(),
            sequence,
            candidate: IceCandidate::new(candidate),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_order_despite_failures() {
        let backend = Arc::new(
            FakeBackend::new(Journal::default()).with_candidate_delay(Duration::from_millis(10)),
        );
        let trickler = IceTrickler::spawn(backend.clone());

        trickler.push(originated(0, "candidate:0"));
        trickler.push(originated(1, "candidate:unreachable"));
        trickler.push(originated(2, "candidate:2"));

        // Pushing never waited on delivery
        assert!(backend.delivered().is_empty());

        trickler.finish().await;
        assert_eq!(
            backend.attempted(),
            vec!["candidate:0", "candidate:unreachable", "candidate:2"]
        );
        assert_eq!(backend.delivered(), vec!["candidate:0", "candidate:2"]);
    }

    #[tokio::test]
    async fn test_stalled_request_does_not_hold_back_later_candidates() {
        let backend = Arc::new(FakeBackend::new(Journal::default()));
        let trickler = IceTrickler::with_timeout(backend.clone(), Duration::from_millis(50));

        trickler.push(originated(0, "candidate:0"));
        trickler.push(originated(1, "candidate:stalled"));
        trickler.push(originated(2, "candidate:2"));

        tokio::time::timeout(Duration::from_secs(2), trickler.finish())
            .await
            .expect("trickler stuck behind a stalled request");
        assert_eq!(
            backend.attempted(),
            vec!["candidate:0", "candidate:stalled", "candidate:2"]
        );
        assert_eq!(backend.delivered(), vec!["candidate:0", "candidate:2"]);
    }

    #[tokio::test]
    async fn test_sender_feeds_the_same_queue() {
        let backend = Arc::new(FakeBackend::new(Journal::default()));
        let trickler = IceTrickler::spawn(backend.clone());

        let tx = trickler.sender().unwrap();
        tx.send(originated(0, "candidate:0")).unwrap();
        trickler.push(originated(1, "candidate:1"));
        drop(tx);

        trickler.finish().await;
        assert_eq!(backend.delivered(), vec!["candidate:0", "candidate:1"]);
    }

    #[tokio::test]
    async fn test_abort_discards_queue() {
        let backend = Arc::new(
            FakeBackend::new(Journal::default()).with_candidate_delay(Duration::from_secs(5)),
        );
        let mut trickler = IceTrickler::spawn(backend.clone());
        trickler.push(originated(0, "candidate:0"));
        trickler.abort();
        trickler.push(originated(1, "candidate:1"));
        trickler.abort();

        assert!(backend.delivered().is_empty());
    }
}
