//! Offer/answer exchange for both signaling roles

use std::sync::Arc;
use tracing::{debug, info};

use super::backend::SignalingBackend;
use super::types::SdpDescriptor;
use crate::error::Result;
use crate::media::MediaSessionController;
use crate::session::Role;

/// Runs one SDP exchange against the signaling backend
///
/// Peer events keep being processed while a request is in flight, so local
/// candidates released by the offer reach a forwarder installed with
/// [`MediaSessionController::forward_local_candidates`] before the answer
/// returns.
///
/// # Example
///
/// ```ignore
/// use browser_stream::media::{MediaSessionController, RtpStatsSink, WebRtcConnector};
/// use browser_stream::session::Role;
/// use browser_stream::signaling::{HttpBackend, SignalingClient};
///
/// let backend = Arc::new(HttpBackend::new(&config.backend)?);
/// let mut media = MediaSessionController::new(
///     "session-1",
///     config.media.clone(),
///     Arc::new(WebRtcConnector),
///     Arc::new(RtpStatsSink::new()),
/// );
/// media.start(Role::Initiator).await?;
///
/// let client = SignalingClient::new(backend);
/// let answer = client.negotiate(Role::Initiator, &mut media).await?;
/// assert!(media.link().has_both_descriptions());
/// ```
#[derive(Clone)]
pub struct SignalingClient {
    backend: Arc<dyn SignalingBackend>,
}

impl SignalingClient {
    pub fn new(backend: Arc<dyn SignalingBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn SignalingBackend> {
        self.backend.clone()
    }

    /// Negotiate the media link, returning the remote description
    ///
    /// # Arguments
    ///
    /// * `role` - `Initiator` posts a local offer to `/webrtc/offer`;
    ///   `Responder` fetches the backend's offer and posts an answer
    /// * `media` - an already started controller; its descriptions are set
    ///   here
    ///
    /// # Errors
    ///
    /// `SignalingFailure` for a non-2xx response and `MalformedAnswer` for an
    /// answer without `sdp` or `type`. The remote description is left
    /// untouched in both cases.
    pub async fn negotiate(
        &self,
        role: Role,
        media: &mut MediaSessionController,
    ) -> Result<SdpDescriptor> {
        match role {
            Role::Initiator => self.negotiate_as_initiator(media).await,
            Role::Responder => self.negotiate_as_responder(media).await,
        }
    }

    async fn negotiate_as_initiator(
        &self,
        media: &mut MediaSessionController,
    ) -> Result<SdpDescriptor> {
        // Local description is set before the offer leaves the process
        let offer = media.create_local_offer().await?;
        info!("Submitting local offer ({} bytes)", offer.sdp().len());

        let payload = media.drive(self.backend.exchange_offer(&offer)).await?;
        let answer = payload.validate()?;

        media.apply_remote_description(answer.clone()).await?;
        info!("Remote answer applied");
        Ok(answer)
    }

    async fn negotiate_as_responder(
        &self,
        media: &mut MediaSessionController,
    ) -> Result<SdpDescriptor> {
        let offer = self.backend.fetch_offer().await?;
        debug!("Fetched remote offer ({} bytes)", offer.sdp().len());

        let answer = media.answer_remote_offer(offer.clone()).await?;
        media.drive(self.backend.submit_answer(&answer)).await?;
        info!("Local answer submitted");
        Ok(offer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::error::AppError;
    use crate::signaling::{AnswerPayload, SdpType};
    use crate::testing::{BackendCall, Call, FakeBackend, FakeConnector, Journal, PeerCall, RecordingSink};

    async fn started_media(journal: &Journal, role: Role) -> MediaSessionController {
        let mut media = MediaSessionController::new(
            "session-1",
            MediaConfig::default(),
            Arc::new(FakeConnector::new(journal.clone())),
            Arc::new(RecordingSink::default()),
        );
        media.start(role).await.unwrap();
        media
    }

    #[tokio::test]
    async fn test_initiator_sets_local_before_submitting() {
        let journal = Journal::default();
        let mut media = started_media(&journal, Role::Initiator).await;
        let client = SignalingClient::new(Arc::new(FakeBackend::new(journal.clone())));

        let remote = client.negotiate(Role::Initiator, &mut media).await.unwrap();
        assert_eq!(remote.sdp_type(), SdpType::Answer);

        let set_local = journal
            .position(&Call::Peer(PeerCall::SetLocal(SdpType::Offer)))
            .unwrap();
        let submit = journal
            .position(&Call::Backend(BackendCall::ExchangeOffer))
            .unwrap();
        let set_remote = journal
            .position(&Call::Peer(PeerCall::SetRemote(SdpType::Answer)))
            .unwrap();
        assert!(set_local < submit);
        assert!(submit < set_remote);
        assert!(media.link().has_both_descriptions());
    }

    #[tokio::test]
    async fn test_initiator_rejects_incomplete_answers() {
        let cases = [
            AnswerPayload::new("v=0...", ""),
            AnswerPayload {
                sdp: None,
                sdp_type: Some("answer".to_string()),
            },
            AnswerPayload::default(),
        ];

        for answer in cases {
            let journal = Journal::default();
            let mut media = started_media(&journal, Role::Initiator).await;
            let backend = FakeBackend::new(journal.clone()).with_answer(answer);
            let client = SignalingClient::new(Arc::new(backend));

            let err = client
                .negotiate(Role::Initiator, &mut media)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::MalformedAnswer(_)));
            assert!(media.link().remote_description().is_none());
            assert!(!journal
                .entries()
                .iter()
                .any(|c| matches!(c, Call::Peer(PeerCall::SetRemote(_)))));
        }
    }

    #[tokio::test]
    async fn test_signaling_failure_propagates() {
        let journal = Journal::default();
        let mut media = started_media(&journal, Role::Initiator).await;
        let backend = FakeBackend::new(journal.clone()).with_offer_status(503);
        let client = SignalingClient::new(Arc::new(backend));

        let err = client
            .negotiate(Role::Initiator, &mut media)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::SignalingFailure { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_responder_always_answers_with_answer_type() {
        let journal = Journal::default();
        let mut media = started_media(&journal, Role::Responder).await;
        let client = SignalingClient::new(Arc::new(FakeBackend::new(journal.clone())));

        let remote = client.negotiate(Role::Responder, &mut media).await.unwrap();
        assert_eq!(remote.sdp_type(), SdpType::Offer);

        let fetch = journal
            .position(&Call::Backend(BackendCall::FetchOffer))
            .unwrap();
        let set_remote = journal
            .position(&Call::Peer(PeerCall::SetRemote(SdpType::Offer)))
            .unwrap();
        let set_local = journal
            .position(&Call::Peer(PeerCall::SetLocal(SdpType::Answer)))
            .unwrap();
        let submit = journal
            .position(&Call::Backend(BackendCall::SubmitAnswer(SdpType::Answer)))
            .unwrap();
        assert!(fetch < set_remote && set_remote < set_local && set_local < submit);

        let local = media.link().local_description().unwrap();
        assert_eq!(local.sdp_type(), SdpType::Answer);
    }
}
