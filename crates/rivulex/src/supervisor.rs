use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use rivulex_helpers::redis::ConnectionWrapper;
use rivulex_helpers::retries::Retrier;

use crate::config::{SubscriberConfig, TrimmerConfig};
use crate::consumer_live::LiveConsumer;
use crate::consumer_pending::PendingConsumer;
use crate::errors::RivulexError;
use crate::hooks::HookBus;
use crate::processor::{Processor, ProcessorConfig};
use crate::registry::{ActionHandler, ChannelRegistry};
use crate::trimmer::Trimmer;

/// Declares, for one stream, the action → handler map that seeds that
/// stream's channel registry before `listen` (§4.l). Mirrors the teacher's
/// `register_handler` entry point, generalised from a single consumer-wide
/// handler to a per-stream, per-action map.
pub struct StreamRegistration {
    stream: String,
    registry: ChannelRegistry,
}

impl StreamRegistration {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            registry: ChannelRegistry::new(),
        }
    }

    /// Registers `handler` for `action` on this stream, replacing any
    /// previous registration for the same action (§4.d).
    pub fn on_action(mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        self.registry.register(action, handler);
        self
    }
}

/// Owns the per-stream channel registries and the lifetimes of the live
/// consumer, pending consumer, and trimmer tasks built from them (§4.j).
///
/// Built via [`SupervisorBuilder::new`], then turned into a
/// [`RunningSupervisor`] by [`SupervisorBuilder::listen`].
pub struct SupervisorBuilder {
    connection: ConnectionWrapper,
    hooks: HookBus,
    retrier: Retrier,
    registries: HashMap<String, ChannelRegistry>,
    trimmer_config: Option<TrimmerConfig>,
}

impl SupervisorBuilder {
    pub fn new(connection: ConnectionWrapper, hooks: HookBus) -> Self {
        Self {
            connection,
            hooks,
            retrier: Retrier::default(),
            registries: HashMap::new(),
            trimmer_config: None,
        }
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    pub fn register_stream(mut self, registration: StreamRegistration) -> Self {
        self.registries.insert(registration.stream, registration.registry);
        self
    }

    pub fn with_trimmer(mut self, config: TrimmerConfig) -> Self {
        self.trimmer_config = Some(config);
        self
    }

    /// Creates the consumer group on every registered stream (ignoring
    /// "already exists"), then starts the live consumer, pending consumer,
    /// and — if configured — the trimmer, all against `config` (§2's control
    /// flow, §4.j).
    pub async fn listen(
        self,
        config: SubscriberConfig,
    ) -> Result<RunningSupervisor, RivulexError> {
        let finalised = Arc::new(config.finalise()?);
        let consumer_name = format!("rivulex:{}:sub:{}", finalised.group, unix_millis());

        let mut connection = self.connection.clone();
        for stream in &finalised.streams {
            connection.group_create(stream, &finalised.group).await?;
        }

        let registries = Arc::new(self.registries);

        let processor = Processor::new(
            ProcessorConfig {
                group: finalised.group.clone(),
                retries: finalised.retries,
                process_timeout: finalised.process_timeout,
                process_concurrency: finalised.process_concurrency,
                dead_letter_stream: finalised.dead_letter_stream.clone(),
            },
            self.connection.clone(),
            self.retrier.clone(),
            self.hooks.clone(),
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        let live = LiveConsumer::new(
            self.connection.clone(),
            finalised.clone(),
            consumer_name.clone(),
            processor.clone(),
            registries.clone(),
        );
        let pending = PendingConsumer::new(
            self.connection.clone(),
            finalised.clone(),
            consumer_name.clone(),
            processor.clone(),
            registries.clone(),
        );

        let mut handles = vec![
            live.start(shutdown_tx.subscribe()),
            pending.start(shutdown_tx.subscribe()),
        ];

        if let Some(trimmer_config) = self.trimmer_config {
            let trimmer_finalised = trimmer_config.finalise()?;
            let trimmer = Trimmer::new(
                self.connection.clone(),
                trimmer_finalised,
                Arc::new(rivulex_helpers::time::DefaultClock::new()),
            );
            handles.extend(trimmer.start(shutdown_tx.subscribe()));
        }

        info!(group = %finalised.group, consumer = %consumer_name, streams = ?finalised.streams, "subscriber listening");

        Ok(RunningSupervisor {
            shutdown_tx,
            handles,
        })
    }
}

/// The current unix time in milliseconds, used to build the default
/// `rivulex:<group>:sub:<unix-ms>` consumer name (§6).
fn unix_millis() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis()
}

/// A listening subscriber. Dropping this without calling [`RunningSupervisor::stop`]
/// leaves the background tasks running detached; callers that need a clean
/// shutdown should always call `stop`.
pub struct RunningSupervisor {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl RunningSupervisor {
    /// Signals every consumer/trimmer task to stop at its next iteration and
    /// waits for them to finish. Idempotent: a second call observes no
    /// receivers and simply awaits the (already-finished) handles again.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "subscriber task panicked during shutdown");
            }
        }
    }

    /// Waits for every backing task to stop on its own (e.g. on a fatal,
    /// unretryable connection error) without first signalling shutdown.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "subscriber task panicked");
            }
        }
    }
}
