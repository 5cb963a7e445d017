use rivulex_helpers::redis::ConnectionWrapper;
use rivulex_helpers::time::{Clock, DefaultClock};
use tracing::{debug, error, warn};

use crate::codec::encode;
use crate::config::PublisherFinalisedConfig;
use crate::errors::RivulexError;
use crate::event::{Headers, PublishEntry};
use crate::hooks::{FailedPayload, HookBus, PublishedPayload};

/// Appends single or batched events to the log and emits `published`/
/// `failed` hooks (§4.h). Owns no per-event state and lives until the
/// caller drops it.
#[derive(Clone)]
pub struct Publisher {
    config: PublisherFinalisedConfig,
    connection: ConnectionWrapper,
    hooks: HookBus,
    clock: std::sync::Arc<dyn Clock + Send + Sync>,
}

/// The outcome of a single entry within a [`Publisher::publish_batch`] call.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub ok: bool,
    pub id: Option<String>,
    pub error: Option<String>,
}

impl Publisher {
    pub fn new(config: PublisherFinalisedConfig, connection: ConnectionWrapper, hooks: HookBus) -> Self {
        Self {
            config,
            connection,
            hooks,
            clock: std::sync::Arc::new(DefaultClock::new()),
        }
    }

    /// Publishes one event, encoding it and appending it via `xadd`. `stream`
    /// defaults to the configured `defaultStream` when absent (§4.h).
    pub async fn publish(
        &self,
        stream: Option<&str>,
        action: &str,
        payload: serde_json::Value,
        headers: Option<Headers>,
    ) -> Result<String, RivulexError> {
        let stream = stream.unwrap_or(&self.config.default_stream).to_string();
        let headers = headers.unwrap_or_default();

        let encoded = match encode(action, &payload, headers, &self.config.group, self.clock.now())
        {
            Ok(encoded) => encoded,
            Err(err) => {
                self.hooks
                    .emit_failed(FailedPayload {
                        stream: stream.clone(),
                        action: action.to_string(),
                        id: None,
                        error: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        let mut connection = self.connection.clone();
        match connection.xadd(&stream, &encoded.as_redis_args()).await {
            Ok(id) => {
                debug!(stream = %stream, action, id = %id, "published event");
                self.hooks
                    .emit_published(PublishedPayload {
                        id: id.clone(),
                        stream,
                        action: action.to_string(),
                    })
                    .await;
                Ok(id)
            }
            Err(err) => {
                error!(%err, stream = %stream, action, "failed to publish event");
                self.hooks
                    .emit_failed(FailedPayload {
                        stream,
                        action: action.to_string(),
                        id: None,
                        error: err.to_string(),
                    })
                    .await;
                Err(RivulexError::from(err))
            }
        }
    }

    /// Publishes a batch of entries as one pipelined `xadd` per entry,
    /// executed in a single round trip. Each entry may override `stream`;
    /// entries without one use the configured `defaultStream` (§4.h).
    ///
    /// When the whole pipeline decodes cleanly every entry is reported as
    /// published. Otherwise the decode failure can mean either a single
    /// command erroring inside an otherwise fine pipeline, or a
    /// connection-level failure affecting every entry — the two aren't
    /// distinguishable from the combined result, so each entry's `xadd` is
    /// re-issued individually to find out which it was, and only the
    /// entries that actually fail are reported as failed (§9's dual-mode
    /// contract).
    pub async fn publish_batch(
        &self,
        entries: Vec<PublishEntry>,
    ) -> Result<Vec<PublishResult>, RivulexError> {
        let now = self.clock.now();
        let mut streams = Vec::with_capacity(entries.len());
        let mut actions = Vec::with_capacity(entries.len());
        let mut encoded_fields = Vec::with_capacity(entries.len());
        let mut pipeline = redis::pipe();

        for entry in &entries {
            let stream = entry
                .stream
                .clone()
                .unwrap_or_else(|| self.config.default_stream.clone());
            let encoded = encode(
                &entry.action,
                &entry.payload,
                entry.headers.clone(),
                &self.config.group,
                now,
            )?;

            pipeline
                .cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg(encoded.as_redis_args());

            streams.push(stream);
            actions.push(entry.action.clone());
            encoded_fields.push(encoded);
        }

        let mut connection = self.connection.clone();
        let ids: Result<Vec<String>, redis::RedisError> =
            connection.query_pipeline_async(&mut pipeline).await;

        match ids {
            Ok(ids) => {
                let mut results = Vec::with_capacity(entries.len());
                for ((stream, action), id) in streams.into_iter().zip(actions).zip(ids) {
                    self.hooks
                        .emit_published(PublishedPayload {
                            id: id.clone(),
                            stream,
                            action,
                        })
                        .await;
                    results.push(PublishResult {
                        ok: true,
                        id: Some(id),
                        error: None,
                    });
                }
                Ok(results)
            }
            Err(batch_err) => {
                warn!(%batch_err, "batched publish did not decode cleanly, retrying entries individually");

                let mut results = Vec::with_capacity(entries.len());
                for ((stream, action), fields) in
                    streams.into_iter().zip(actions).zip(encoded_fields)
                {
                    match connection.xadd(&stream, &fields.as_redis_args()).await {
                        Ok(id) => {
                            self.hooks
                                .emit_published(PublishedPayload {
                                    id: id.clone(),
                                    stream,
                                    action,
                                })
                                .await;
                            results.push(PublishResult {
                                ok: true,
                                id: Some(id),
                                error: None,
                            });
                        }
                        Err(err) => {
                            self.hooks
                                .emit_failed(FailedPayload {
                                    stream,
                                    action,
                                    id: None,
                                    error: err.to_string(),
                                })
                                .await;
                            results.push(PublishResult {
                                ok: false,
                                id: None,
                                error: Some(err.to_string()),
                            });
                        }
                    }
                }
                Ok(results)
            }
        }
    }
}
