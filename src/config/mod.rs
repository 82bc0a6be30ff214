//! Client configuration

mod loader;
pub mod schema;

pub use schema::{AppConfig, BackendConfig, ControlConfig, MediaConfig, SessionConfig, TurnServer};
