use std::time::Duration;

use crate::errors::RivulexError;

fn clamp_min(value: Duration, min: Duration) -> Duration {
    if value < min {
        min
    } else {
        value
    }
}

/// Public, partially-optional subscriber configuration. [`SubscriberConfig::finalise`]
/// turns this into a [`SubscriberFinalisedConfig`] with every field
/// populated and clamped, the way the teacher's `RedisConsumerConfig` is
/// finalised into `RedisConsumerFinalisedConfig` (§4.j, §10).
#[derive(Debug, Clone, Default)]
pub struct SubscriberConfig {
    pub group: String,
    pub streams: Vec<String>,
    pub dead_letter_stream: Option<String>,
    pub ack_timeout: Option<Duration>,
    pub process_timeout: Option<Duration>,
    pub process_concurrency: Option<usize>,
    pub fetch_batch_size: Option<usize>,
    pub block_time: Option<Duration>,
    pub retries: Option<u64>,
}

/// Fully-populated subscriber configuration, clamped per §4.j's table.
#[derive(Debug, Clone)]
pub struct SubscriberFinalisedConfig {
    pub group: String,
    pub streams: Vec<String>,
    pub dead_letter_stream: String,
    pub ack_timeout: Duration,
    pub process_timeout: Duration,
    pub process_concurrency: usize,
    pub fetch_batch_size: usize,
    pub block_time: Duration,
    pub retries: u64,
}

impl SubscriberConfig {
    pub fn finalise(self) -> Result<SubscriberFinalisedConfig, RivulexError> {
        if self.group.is_empty() {
            return Err(RivulexError::Config(
                "subscriber config is missing a group".to_string(),
            ));
        }
        if self.streams.is_empty() {
            return Err(RivulexError::Config(
                "subscriber config must register at least one stream".to_string(),
            ));
        }

        Ok(SubscriberFinalisedConfig {
            group: self.group,
            streams: self.streams,
            dead_letter_stream: self
                .dead_letter_stream
                .unwrap_or_else(|| "dead_letter".to_string()),
            ack_timeout: clamp_min(
                self.ack_timeout.unwrap_or(Duration::from_secs(30)),
                Duration::from_secs(1),
            ),
            process_timeout: clamp_min(
                self.process_timeout.unwrap_or(Duration::from_millis(200)),
                Duration::from_millis(20),
            ),
            process_concurrency: self.process_concurrency.unwrap_or(100).max(1),
            fetch_batch_size: self.fetch_batch_size.unwrap_or(100).max(1),
            block_time: clamp_min(
                self.block_time.unwrap_or(Duration::from_secs(30)),
                Duration::from_secs(1),
            ),
            retries: self.retries.unwrap_or(3).max(1),
        })
    }
}

/// Public, partially-optional publisher configuration.
#[derive(Debug, Clone, Default)]
pub struct PublisherConfig {
    pub group: String,
    pub default_stream: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublisherFinalisedConfig {
    pub group: String,
    pub default_stream: String,
}

impl PublisherConfig {
    pub fn finalise(self) -> Result<PublisherFinalisedConfig, RivulexError> {
        if self.group.is_empty() {
            return Err(RivulexError::Config(
                "publisher config is missing a group".to_string(),
            ));
        }
        let default_stream = self.default_stream.ok_or_else(|| {
            RivulexError::Config("publisher config is missing a default stream".to_string())
        })?;
        if default_stream.is_empty() {
            return Err(RivulexError::Config(
                "publisher config's default stream must not be empty".to_string(),
            ));
        }

        Ok(PublisherFinalisedConfig {
            group: self.group,
            default_stream,
        })
    }
}

/// Public, partially-optional trimmer configuration.
#[derive(Debug, Clone, Default)]
pub struct TrimmerConfig {
    pub group: String,
    pub streams: Vec<String>,
    pub interval: Option<Duration>,
    pub retention_period: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TrimmerFinalisedConfig {
    pub group: String,
    pub streams: Vec<String>,
    pub interval: Duration,
    pub retention_period: Duration,
}

impl TrimmerConfig {
    pub fn finalise(self) -> Result<TrimmerFinalisedConfig, RivulexError> {
        if self.streams.is_empty() {
            return Err(RivulexError::Config(
                "trimmer config must name at least one stream".to_string(),
            ));
        }

        let min = Duration::from_secs(10);
        Ok(TrimmerFinalisedConfig {
            group: self.group,
            streams: self.streams,
            interval: clamp_min(self.interval.unwrap_or(Duration::from_secs(48 * 3600)), min),
            retention_period: clamp_min(
                self.retention_period.unwrap_or(Duration::from_secs(48 * 3600)),
                min,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_config_applies_defaults_and_clamps() {
        let config = SubscriberConfig {
            group: "g".to_string(),
            streams: vec!["users".to_string()],
            ack_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };

        let finalised = config.finalise().unwrap();
        assert_eq!(finalised.dead_letter_stream, "dead_letter");
        assert_eq!(finalised.ack_timeout, Duration::from_secs(1));
        assert_eq!(finalised.process_timeout, Duration::from_millis(200));
        assert_eq!(finalised.retries, 3);
    }

    #[test]
    fn test_subscriber_config_rejects_missing_group() {
        let config = SubscriberConfig {
            streams: vec!["users".to_string()],
            ..Default::default()
        };
        assert!(config.finalise().is_err());
    }

    #[test]
    fn test_publisher_config_rejects_missing_default_stream() {
        let config = PublisherConfig {
            group: "g".to_string(),
            default_stream: None,
        };
        assert!(config.finalise().is_err());
    }

    #[test]
    fn test_trimmer_config_clamps_to_minimum() {
        let config = TrimmerConfig {
            group: "g".to_string(),
            streams: vec!["users".to_string()],
            interval: Some(Duration::from_secs(1)),
            retention_period: Some(Duration::from_secs(1)),
        };
        let finalised = config.finalise().unwrap();
        assert_eq!(finalised.interval, Duration::from_secs(10));
        assert_eq!(finalised.retention_period, Duration::from_secs(10));
    }
}
