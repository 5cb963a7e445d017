use std::time::Duration;

use rand::Rng;

/// Retries a fallible, idempotent async operation a fixed number of times
/// with a fixed delay between attempts, returning the last error if every
/// attempt fails.
///
/// Used for the operations the runtime treats as safe to retry blindly:
/// group creation, acknowledgement, and claiming, none of which have
/// side effects that compound when repeated.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_attempts: u32,
    delay: Duration,
}

impl Retrier {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `operation` up to `max_attempts` times, sleeping `delay` between
    /// attempts. Returns the first success, or the error from the final
    /// attempt if all of them fail.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

impl Default for Retrier {
    /// Defaults to 3 attempts with a 50ms delay between them.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

#[derive(Default, Debug, Clone)]
pub struct RetryConfig {
    pub interval: Option<f64>,
    pub backoff_rate: Option<f64>,
    pub max_delay: Option<i64>,
    pub jitter: Option<bool>,
}

/// Calculate the wait time in milliseconds for a retry attempt.
/// This uses exponential backoff; jitter is also used if configured.
/// See: https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
pub fn calculate_retry_wait_time_ms(
    retry_config: &RetryConfig,
    retry_attempt: i64,
    default_interval_seconds: f64,
    default_backoff_rate: f64,
) -> u64 {
    // Interval is configured in seconds, convert to milliseconds to allow
    // for millisecond precision for fractional backoff rates.
    let interval_ms = retry_config.interval.unwrap_or(default_interval_seconds) * 1000.0;
    let multiplier = retry_config.backoff_rate.unwrap_or(default_backoff_rate);
    let mut computed_wait_time_ms = interval_ms * multiplier.powf(retry_attempt as f64);

    if let Some(max_delay) = retry_config.max_delay {
        computed_wait_time_ms = computed_wait_time_ms.min(max_delay as f64 * 1000.0);
    }

    if retry_config.jitter.unwrap_or(false) {
        rand::thread_rng()
            .gen_range(0.0..computed_wait_time_ms)
            .trunc() as u64
    } else {
        computed_wait_time_ms.trunc() as u64
    }
}

/// Convert a `Duration` to fractional seconds,
/// where the fractional part is to millisecond precision.
pub fn as_fractional_seconds(duration: Duration) -> f64 {
    duration.as_millis() as f64 / 1000.0
}
