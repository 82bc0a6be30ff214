//! Viewer session: lifecycle of the media and control links

pub mod lifecycle;
pub mod state;

pub use lifecycle::Session;
pub use state::{next_state, Readiness, Role, SessionInput, SessionState};
