//! Shared utilities

pub mod throttle;

pub use throttle::LogThrottler;
