//! Signaling against the browser backend
//!
//! SDP offer/answer exchange over HTTP for either role, plus trickle ICE
//! delivery of local candidates.

pub mod backend;
pub mod client;
pub mod trickle;
pub mod types;

pub use backend::{BrowserLauncher, HttpBackend, SignalingBackend};
pub use client::SignalingClient;
pub use trickle::{IceTrickler, ICE_SEND_TIMEOUT};
pub use types::{
    AnswerPayload, IceCandidate, LaunchResponse, OfferPayload, OriginatedCandidate, SdpDescriptor,
    SdpType,
};
