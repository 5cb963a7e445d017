use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// A trait for a clock that can provide the current time
/// as a UNIX timestamp in seconds.
pub trait Clock {
    fn now(&self) -> u64;
}

/// A default implementation of a clock that uses the system time.
///
/// # Examples
///
/// ```
/// # use rivulex_helpers::time::DefaultClock;
///
/// let clock = DefaultClock::new();
/// let now = clock.now();
/// ```
pub struct DefaultClock {}

impl DefaultClock {
    /// Creates a new instance of the default clock
    /// that uses system time.
    pub fn new() -> Self {
        DefaultClock {}
    }
}

impl Default for DefaultClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for DefaultClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs()
    }
}

/// Formats a UNIX timestamp in seconds as an RFC 3339 string.
///
/// Used to render the `timestamp` and `rejectedTimestamp` header fields.
pub fn rfc3339_from_unix_secs(unix_secs: u64) -> String {
    DateTime::<Utc>::from_timestamp(unix_secs as i64, 0)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"))
        .to_rfc3339()
}

/// Tracks an idle pause duration for a polling loop, growing exponentially
/// on consecutive empty iterations and resetting as soon as work is found.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    /// The current pause duration.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Resets the pause duration back to the configured minimum.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Doubles the pause duration, capped at the configured maximum.
    pub fn increase(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    /// Sleeps for the current pause duration.
    pub async fn wait(&self) {
        tokio::time::sleep(self.current).await;
    }
}
