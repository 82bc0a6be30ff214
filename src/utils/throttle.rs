//! Log throttling
//!
//! Limits how often the same message is recorded, so that commands dropped
//! while the control link is down do not flood the log.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter for log messages, keyed by message kind
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use browser_stream::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
///
/// // First call returns true
/// assert!(throttler.should_log("click"));
///
/// // Subsequent calls within 5 seconds return false
/// assert!(!throttler.should_log("click"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` should be logged now
    ///
    /// A `true` result records the current time for `key`.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();

        if let Some(last) = map.get(key) {
            if now.duration_since(*last) < self.interval {
                return false;
            }
        }
        map.insert(key.to_string(), now);
        true
    }

}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::debug!`
///
/// # Example
///
/// ```rust
/// use browser_stream::debug_throttled;
/// use browser_stream::utils::LogThrottler;
///
/// let throttler = LogThrottler::default();
/// debug_throttled!(throttler, "click", "Control link closed, {} dropped", "click");
/// ```
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}
