//! browser-stream - remote browser viewer
//!
//! Receives a live video stream of a remote browser over WebRTC and forwards
//! pointer, keyboard and clipboard input back to it over a WebSocket control
//! channel. Negotiation (SDP offer/answer plus trickle ICE) runs against the
//! browser backend's HTTP signaling endpoints.

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod input;
pub mod media;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
