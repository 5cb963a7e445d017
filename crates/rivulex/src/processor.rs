use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, instrument, warn};

use rivulex_helpers::redis::{dlq_append_and_ack_pipeline, ConnectionWrapper};
use rivulex_helpers::retries::Retrier;
use rivulex_helpers::time::{rfc3339_from_unix_secs, Clock, DefaultClock};

use crate::codec::encode;
use crate::event::Event;
use crate::hooks::{ConfirmedPayload, FailedPayload, HookBus, RejectedPayload, TimeoutPayload};
use crate::registry::ChannelRegistry;

/// The error type a handler returns on failure, corresponding to the
/// source's "handler throws" (§4.e).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

struct AckInner {
    stream: String,
    group: String,
    id: String,
    connection: ConnectionWrapper,
    retrier: Retrier,
    hooks: HookBus,
    acked: AtomicBool,
}

/// The one-shot acknowledgement capability bound to `(stream, group, id)`
/// that a handler receives alongside its event (§3, §9). Calling
/// `confirm()` more than once is a no-op past the first call.
#[derive(Clone)]
pub struct Ack {
    inner: Arc<AckInner>,
}

impl Ack {
    fn new(
        stream: String,
        group: String,
        id: String,
        connection: ConnectionWrapper,
        retrier: Retrier,
        hooks: HookBus,
    ) -> Self {
        Self {
            inner: Arc::new(AckInner {
                stream,
                group,
                id,
                connection,
                retrier,
                hooks,
                acked: AtomicBool::new(false),
            }),
        }
    }

    /// Acknowledges the event, performing `xack` under the retrier. Repeat
    /// calls after the first are no-ops (§4.e).
    pub async fn confirm(&self) {
        if self.inner.acked.swap(true, Ordering::SeqCst) {
            warn!(
                stream = %self.inner.stream,
                id = %self.inner.id,
                "ack called more than once, ignoring"
            );
            return;
        }

        let connection = self.inner.connection.clone();
        let stream = self.inner.stream.clone();
        let group = self.inner.group.clone();
        let id = self.inner.id.clone();

        let result: Result<(), redis::RedisError> = self
            .inner
            .retrier
            .run(|| {
                let mut connection = connection.clone();
                let stream = stream.clone();
                let group = group.clone();
                let id = id.clone();
                async move { connection.xack(&stream, &group, &[id.as_str()]).await.map(|_| ()) }
            })
            .await;

        match result {
            Ok(()) => {
                self.inner
                    .hooks
                    .emit_confirmed(ConfirmedPayload {
                        stream: self.inner.stream.clone(),
                        group: self.inner.group.clone(),
                        id: self.inner.id.clone(),
                    })
                    .await;
            }
            Err(err) => {
                error!(
                    %err,
                    stream = %self.inner.stream,
                    id = %self.inner.id,
                    "failed to confirm acknowledgement after exhausting retries"
                );
            }
        }
    }

    /// Whether `confirm()` has already been called for this delivery.
    pub fn is_confirmed(&self) -> bool {
        self.inner.acked.load(Ordering::SeqCst)
    }
}

/// Static, per-subscriber configuration the processor needs to make its
/// per-unit decisions (§4.e).
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub group: String,
    pub retries: u64,
    pub process_timeout: Duration,
    pub process_concurrency: usize,
    pub dead_letter_stream: String,
}

/// Dispatches a batch of events to handlers with bounded concurrency,
/// per-event timeouts, and ack/reject — the critical path (§4.e).
#[derive(Clone)]
pub struct Processor {
    config: Arc<ProcessorConfig>,
    connection: ConnectionWrapper,
    retrier: Retrier,
    hooks: HookBus,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        connection: ConnectionWrapper,
        retrier: Retrier,
        hooks: HookBus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connection,
            retrier,
            hooks,
            clock: Arc::new(DefaultClock::new()),
        }
    }

    /// Dispatches `events` read from `stream`, driving each to a terminal
    /// state for this cycle. Never returns an error to the caller (§4.e) —
    /// failures are logged and leave the event for reclaim.
    #[instrument(skip(self, events, handlers), fields(stream = %stream, batch_size = events.len()))]
    pub async fn process(&self, stream: &str, events: Vec<Event>, handlers: &ChannelRegistry) {
        let concurrency = self.config.process_concurrency.max(1);

        stream::iter(events)
            .for_each_concurrent(concurrency, |event| {
                let handler = handlers.get(&event.action);
                async move {
                    self.process_one(stream, event, handler).await;
                }
            })
            .await;
    }

    async fn process_one(
        &self,
        stream: &str,
        event: Event,
        handler: Option<Arc<dyn crate::registry::ActionHandler>>,
    ) {
        if event.headers.rejected_by_other_group(&self.config.group) {
            debug!(
                stream,
                id = %event.id,
                "skipping event rejected by another group"
            );
            self.ack_silently(stream, &event.id).await;
            return;
        }

        let Some(handler) = handler else {
            debug!(stream, action = %event.action, id = %event.id, "no handler registered for action, acknowledging");
            self.ack_silently(stream, &event.id).await;
            return;
        };

        if event.attempt >= self.config.retries {
            debug!(stream, id = %event.id, attempt = event.attempt, "attempt budget exhausted before dispatch, rejecting");
            self.reject(stream, event).await;
            return;
        }

        let ack = self.make_ack(stream, &event.id);
        let handler_event = event.clone();
        let handler_ack = ack.clone();
        let join_handle =
            tokio::spawn(async move { handler.handle(handler_event, handler_ack).await });

        match tokio::time::timeout(self.config.process_timeout, join_handle).await {
            Ok(Ok(Ok(()))) => {
                // Handler completed. If it didn't call ack, the pending
                // consumer will reclaim and re-dispatch after ackTimeout.
            }
            Ok(Ok(Err(handler_err))) => {
                self.on_handler_failed(stream, &event, handler_err.to_string())
                    .await;
            }
            Ok(Err(join_err)) => {
                self.on_handler_failed(stream, &event, join_err.to_string())
                    .await;
            }
            Err(_elapsed) => {
                warn!(stream, id = %event.id, "handler timed out, continuing in background");
                self.hooks
                    .emit_timeout(TimeoutPayload {
                        stream: stream.to_string(),
                        group: self.config.group.clone(),
                        id: event.id.clone(),
                    })
                    .await;
            }
        }
    }

    async fn on_handler_failed(&self, stream: &str, event: &Event, error: String) {
        self.hooks
            .emit_failed(FailedPayload {
                stream: stream.to_string(),
                action: event.action.clone(),
                id: Some(event.id.clone()),
                error: error.clone(),
            })
            .await;

        if event.attempt + 1 >= self.config.retries {
            debug!(stream, id = %event.id, error = %error, "handler failed on last permitted attempt, rejecting");
            self.reject(stream, event.clone()).await;
        } else {
            debug!(stream, id = %event.id, error = %error, "handler failed, leaving pending for reclaim");
        }
    }

    async fn ack_silently(&self, stream: &str, id: &str) {
        let connection = self.connection.clone();
        let group = self.config.group.clone();
        let stream_owned = stream.to_string();
        let id_owned = id.to_string();

        let result: Result<(), redis::RedisError> = self
            .retrier
            .run(|| {
                let mut connection = connection.clone();
                let stream = stream_owned.clone();
                let group = group.clone();
                let id = id_owned.clone();
                async move { connection.xack(&stream, &group, &[id.as_str()]).await.map(|_| ()) }
            })
            .await;

        if let Err(err) = result {
            error!(%err, stream = %stream_owned, id = %id_owned, "failed to acknowledge skipped event");
        }
    }

    fn make_ack(&self, stream: &str, id: &str) -> Ack {
        Ack::new(
            stream.to_string(),
            self.config.group.clone(),
            id.to_string(),
            self.connection.clone(),
            self.retrier.clone(),
            self.hooks.clone(),
        )
    }

    /// Appends the rejected event to the dead-letter stream and acks the
    /// original, both in one retried pipeline (§4.e).
    async fn reject(&self, stream: &str, event: Event) {
        let now = self.clock.now();
        let mut rejected_headers = event.headers.clone();
        rejected_headers.rejected = Some(true);
        rejected_headers.rejected_group = Some(self.config.group.clone());
        rejected_headers.rejected_timestamp = Some(rfc3339_from_unix_secs(now));

        let encoded = match encode(
            &event.action,
            &event.payload,
            rejected_headers,
            &self.config.group,
            now,
        ) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!(%err, stream, id = %event.id, "failed to encode rejected event, leaving for reclaim");
                return;
            }
        };

        let dlq_stream = self.config.dead_letter_stream.clone();
        let source_stream = stream.to_string();
        let group = self.config.group.clone();
        let id = event.id.clone();
        let connection = self.connection.clone();

        let result: Result<(), redis::RedisError> = self
            .retrier
            .run(|| {
                let fields = encoded.as_redis_args();
                let mut pipeline = dlq_append_and_ack_pipeline(
                    &dlq_stream,
                    &fields,
                    &source_stream,
                    &group,
                    &id,
                );
                let mut connection = connection.clone();
                async move { connection.query_pipeline_async(&mut pipeline).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.hooks
                    .emit_rejected(RejectedPayload {
                        stream: source_stream.clone(),
                        group: group.clone(),
                        id: id.clone(),
                    })
                    .await;
            }
            Err(err) => {
                error!(%err, stream = %source_stream, id = %id, "failed to write dead-letter record after exhausting retries, leaving for reclaim");
            }
        }
    }
}
