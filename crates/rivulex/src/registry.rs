use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::event::Event;
use crate::processor::{Ack, HandlerError};

/// A handler registered against one action on one stream.
///
/// Implementors decide whether to call `ack.confirm()`; if they don't, the
/// event remains pending and is reclaimed by the pending consumer (§4.e). An
/// `Err` return corresponds to the source's "handler throws" (§4.e); the
/// processor treats it as FAILED and retries or rejects based on attempt
/// count.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, event: Event, ack: Ack) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(Event, Ack) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: Event, ack: Ack) -> Result<(), HandlerError> {
        (self)(event, ack).await
    }
}

/// A per-stream `action -> handler` map.
///
/// Registration is last-writer-wins; lookup is an exact match on the action
/// name with no wildcard semantics (§4.d, §9).
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action`, replacing any previous registration.
    pub fn register(&mut self, action: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action.into(), handler);
    }

    /// Looks up the handler for `action`, if any is registered.
    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }
}
