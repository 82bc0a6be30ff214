//! Control link: commands to the remote browser over WebSocket

pub mod channel;

pub use channel::{ControlChannel, ControlHandle, ControlLinkState};
