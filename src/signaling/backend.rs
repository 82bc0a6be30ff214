//! HTTP signaling backend
//!
//! Endpoints served by the browser backend:
//! - `GET  /webrtc/offer`  - backend-generated offer (responder role)
//! - `POST /webrtc/offer`  - submit local offer, receive answer (initiator role)
//! - `POST /webrtc/answer` - submit local answer (responder role)
//! - `POST /webrtc/ice`    - trickle one local ICE candidate
//! - `GET  /launch/{url}`  - provision the remote browser on a target page

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::types::{AnswerPayload, IceCandidate, LaunchResponse, OfferPayload, SdpDescriptor};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};

const OFFER_PATH: &str = "/webrtc/offer";
const ANSWER_PATH: &str = "/webrtc/answer";
const ICE_PATH: &str = "/webrtc/ice";
const LAUNCH_PATH: &str = "/launch";

/// Signaling transport
#[async_trait]
pub trait SignalingBackend: Send + Sync {
    /// Fetch the backend's offer
    async fn fetch_offer(&self) -> Result<SdpDescriptor>;

    /// Submit a local offer and return the unvalidated answer
    async fn exchange_offer(&self, offer: &SdpDescriptor) -> Result<AnswerPayload>;

    /// Submit a local answer
    async fn submit_answer(&self, answer: &SdpDescriptor) -> Result<()>;

    /// Deliver one local ICE candidate
    async fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;
}

/// Remote browser provisioning
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Ask the backend to open `target_url`; fails unless it reports success
    async fn launch(&self, target_url: &str) -> Result<()>;
}

/// reqwest-based implementation of both backend traits
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = config.request_timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::SignalingFailure {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SignalingBackend for HttpBackend {
    async fn fetch_offer(&self) -> Result<SdpDescriptor> {
        let response = self.client.get(self.url(OFFER_PATH)).send().await?;
        let response = Self::check("GET /webrtc/offer", response)?;

        let payload: OfferPayload = response.json().await?;
        debug!("Fetched offer ({} bytes of SDP)", payload.sdp.len());
        Ok(payload.into())
    }

    async fn exchange_offer(&self, offer: &SdpDescriptor) -> Result<AnswerPayload> {
        let response = self
            .client
            .post(self.url(OFFER_PATH))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(offer)
            .send()
            .await?;
        let response = Self::check("POST /webrtc/offer", response)?;

        response
            .json::<AnswerPayload>()
            .await
            .map_err(|e| AppError::MalformedAnswer(format!("unparseable answer body: {}", e)))
    }

    async fn submit_answer(&self, answer: &SdpDescriptor) -> Result<()> {
        let response = self
            .client
            .post(self.url(ANSWER_PATH))
            .json(answer)
            .send()
            .await?;
        Self::check("POST /webrtc/answer", response)?;
        Ok(())
    }

    async fn send_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let response = self
            .client
            .post(self.url(ICE_PATH))
            .json(candidate)
            .send()
            .await?;
        Self::check("POST /webrtc/ice", response)?;
        Ok(())
    }
}

#[async_trait]
impl BrowserLauncher for HttpBackend {
    async fn launch(&self, target_url: &str) -> Result<()> {
        let url = self.url(&format!(
            "{}/{}",
            LAUNCH_PATH,
            urlencoding::encode(target_url)
        ));

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::LaunchFailure(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::LaunchFailure(format!(
                "backend responded with status {}",
                status.as_u16()
            )));
        }

        let body: LaunchResponse = response
            .json()
            .await
            .map_err(|e| AppError::LaunchFailure(format!("unparseable response: {}", e)))?;

        if !body.is_success() {
            return Err(AppError::LaunchFailure(format!(
                "status: {}{}",
                body.status,
                body.message.map(|m| format!(" ({})", m)).unwrap_or_default()
            )));
        }

        Ok(())
    }
}
