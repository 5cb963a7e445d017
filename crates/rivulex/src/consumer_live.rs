use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{info_span, warn, Instrument};

use rivulex_helpers::redis::ConnectionWrapper;

use crate::codec::decode;
use crate::config::SubscriberFinalisedConfig;
use crate::processor::Processor;
use crate::registry::ChannelRegistry;

/// Blocking group-read loop over the configured streams (§4.f).
///
/// Every event read here presents `attempt = 0` — the live consumer never
/// reads the pending list, so this is always a stream's first delivery to
/// this group.
pub struct LiveConsumer {
    connection: ConnectionWrapper,
    config: Arc<SubscriberFinalisedConfig>,
    consumer_name: String,
    processor: Processor,
    registries: Arc<HashMap<String, ChannelRegistry>>,
}

impl LiveConsumer {
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

    /// Spawns the loop as its own task, returning its `JoinHandle` so the
    /// supervisor can await it on `stop`.
    pub fn start(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let span = info_span!("live_consumer", consumer = %self.consumer_name);
        tokio::spawn(self.run(shutdown).instrument(span))
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let streams: Vec<String> = self.config.streams.clone();
        let stream_refs: Vec<&str> = streams.iter().map(String::as_str).collect();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    break;
                }
                result = self.connection.xreadgroup(
                    &stream_refs,
                    &self.config.group,
                    &self.consumer_name,
                    self.config.fetch_batch_size,
                    self.config.block_time.as_millis() as usize,
                ) => {
                    match result {
                        Ok(reply) => self.dispatch(reply).await,
                        Err(err) => {
                            warn!(%err, "live consumer read failed, retrying");
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, reply: redis::streams::StreamReadReply) {
        let mut per_stream_batches = Vec::new();

        for key in reply.keys {
            let Some(registry) = self.registries.get(&key.key) else {
                continue;
            };

            let mut events = Vec::with_capacity(key.ids.len());
            for stream_id in &key.ids {
                match decode(&key.key, stream_id) {
                    Ok(event) => events.push(event),
                    Err(err) => {
                        warn!(%err, stream = %key.key, id = %stream_id.id, "failed to decode event, leaving for reclaim");
                    }
                }
            }

            if !events.is_empty() {
                per_stream_batches.push((key.key, events, registry.clone()));
            }
        }

        // Multiple streams in one read are processed concurrently (§4.f).
        join_all(per_stream_batches.into_iter().map(|(stream, events, registry)| {
            let processor = self.processor.clone();
            async move { processor.process(&stream, events, &registry).await }
        }))
        .await;
    }
}
