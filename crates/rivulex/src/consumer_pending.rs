use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info_span, warn, Instrument};

use rivulex_helpers::redis::ConnectionWrapper;
use rivulex_helpers::time::Backoff;

use crate::codec::decode;
use crate::config::SubscriberFinalisedConfig;
use crate::processor::Processor;
use crate::registry::ChannelRegistry;

/// Idle-pending scan + claim loop (§4.g). Scans each configured stream's
/// pending-entries list for records idle at least `ackTimeout`, claims
/// them, and dispatches; paces itself with a [`Backoff`] so idle streams
/// cost little to poll while claims stay reactive under load.
pub struct PendingConsumer {
    connection: ConnectionWrapper,
    config: Arc<SubscriberFinalisedConfig>,
    consumer_name: String,
    processor: Processor,
    registries: Arc<HashMap<String, ChannelRegistry>>,
}

impl PendingConsumer {
    pub fn new(
        connection: ConnectionWrapper,
        config: Arc<SubscriberFinalisedConfig>,
        consumer_name: String,
        processor: Processor,
        registries: Arc<HashMap<String, ChannelRegistry>>,
    ) -> Self {
        Self {
            connection,
            config,
            consumer_name,
            processor,
            registries,
        }
    }

    pub fn start(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let span = info_span!("pending_consumer", consumer = %self.consumer_name);
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let min = Duration::from_secs(1);
        let max = self.config.ack_timeout;
        let mut backoff = Backoff::new(min, max);

        loop {
            if shutdown.try_recv().is_ok() {
                break;
            }

            let streams = self.config.streams.clone();
            let mut claimed_any = false;

            for stream in &streams {
                match self.scan_and_claim_one(stream).await {
                    Ok(claimed) => claimed_any |= claimed,
                    Err(err) => {
                        warn!(%err, stream = %stream, "pending scan/claim failed, continuing");
                    }
                }
            }

            if claimed_any {
                backoff.reset();
            } else {
                backoff.increase();
            }
            backoff.wait().await;
        }
    }

    /// Runs one scan+claim+dispatch cycle for a single stream, returning
    /// whether anything was claimed.
    async fn scan_and_claim_one(&mut self, stream: &str) -> redis::RedisResult<bool> {
        let min_idle_ms = self.config.ack_timeout.as_millis() as usize;

        let pending = self
            .connection
            .xpending_scan(stream, &self.config.group, min_idle_ms, self.config.fetch_batch_size)
            .await?;

        if pending.ids.is_empty() {
            return Ok(false);
        }

        // Attempt counts as of the scan; the claim response omits them
        // (§4.g step 2), so we capture them here and inject after decode.
        let attempts_by_id: HashMap<String, u64> = pending
            .ids
            .iter()
            .map(|entry| (entry.id.clone(), entry.times_delivered as u64))
            .collect();
        let ids: Vec<&str> = pending.ids.iter().map(|entry| entry.id.as_str()).collect();

        let claimed = self
            .connection
            .xclaim(stream, &self.config.group, &self.consumer_name, min_idle_ms, &ids)
            .await?;

        let Some(registry) = self.registries.get(stream) else {
            return Ok(true);
        };

        let mut events = Vec::with_capacity(claimed.ids.len());
        for stream_id in &claimed.ids {
            match decode(stream, stream_id) {
                Ok(mut event) => {
                    if let Some(&attempt) = attempts_by_id.get(&stream_id.id) {
                        event.attempt = attempt;
                    }
                    events.push(event);
                }
                Err(err) => {
                    debug!(%err, stream, id = %stream_id.id, "failed to decode claimed event, leaving for reclaim");
                }
            }
        }

        if !events.is_empty() {
            self.processor.process(stream, events, registry).await;
        }

        Ok(true)
    }
}
