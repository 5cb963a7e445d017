use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

/// Payload for the `published` hook: a successful `publish`/`publish_batch`
/// entry.
#[derive(Debug, Clone)]
pub struct PublishedPayload {
    pub id: String,
    pub stream: String,
    pub action: String,
}

/// Payload for the `failed` hook, shared by the publisher (append failure,
/// `id` absent) and the subscriber (handler failure, `id` present).
#[derive(Debug, Clone)]
pub struct FailedPayload {
    pub stream: String,
    pub action: String,
    pub id: Option<String>,
    pub error: String,
}

/// Payload for the `confirmed` hook: a handler called `ack` successfully.
#[derive(Debug, Clone)]
pub struct ConfirmedPayload {
    pub stream: String,
    pub group: String,
    pub id: String,
}

/// Payload for the `rejected` hook: an event was appended to the dead-letter
/// stream and acknowledged in its source.
#[derive(Debug, Clone)]
pub struct RejectedPayload {
    pub stream: String,
    pub group: String,
    pub id: String,
}

/// Payload for the `timeout` hook: a handler did not complete within
/// `processTimeout`. The handler's task is still running in the background
/// (§4.e, §9).
#[derive(Debug, Clone)]
pub struct TimeoutPayload {
    pub stream: String,
    pub group: String,
    pub id: String,
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One named hook's listener slot. Emission takes a read-lock snapshot of
/// the listener list before calling any of them, so a listener registering
/// or deregistering mid-emission cannot deadlock or observe a partial
/// emission (§5).
struct HookSlot<T> {
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> Default for HookSlot<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<T> HookSlot<T> {
    async fn on<F>(&self, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Arc::new(listener));
    }

    async fn emit(&self, payload: T) {
        let snapshot = { self.listeners.read().await.clone() };
        for listener in snapshot {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&payload)))
                .is_err()
            {
                warn!("hook listener panicked, continuing");
            }
        }
    }
}

/// Named in-process pub/sub for lifecycle events, shared by the publisher
/// (`published`, `failed`) and the subscriber (`confirmed`, `rejected`,
/// `timeout`, `failed`). Delivery is synchronous, in emission order; a
/// listener that panics is caught so it cannot propagate into the engine
/// (§4.k).
#[derive(Default, Clone)]
pub struct HookBus {
    published: Arc<HookSlot<PublishedPayload>>,
    failed: Arc<HookSlot<FailedPayload>>,
    confirmed: Arc<HookSlot<ConfirmedPayload>>,
    rejected: Arc<HookSlot<RejectedPayload>>,
    timeout: Arc<HookSlot<TimeoutPayload>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on_published<F>(&self, listener: F)
    where
        F: Fn(&PublishedPayload) + Send + Sync + 'static,
    {
        self.published.on(listener).await;
    }

    pub async fn on_failed<F>(&self, listener: F)
    where
        F: Fn(&FailedPayload) + Send + Sync + 'static,
    {
        self.failed.on(listener).await;
    }

    pub async fn on_confirmed<F>(&self, listener: F)
    where
        F: Fn(&ConfirmedPayload) + Send + Sync + 'static,
    {
        self.confirmed.on(listener).await;
    }

    pub async fn on_rejected<F>(&self, listener: F)
    where
        F: Fn(&RejectedPayload) + Send + Sync + 'static,
    {
        self.rejected.on(listener).await;
    }

    pub async fn on_timeout<F>(&self, listener: F)
    where
        F: Fn(&TimeoutPayload) + Send + Sync + 'static,
    {
        self.timeout.on(listener).await;
    }

    pub(crate) async fn emit_published(&self, payload: PublishedPayload) {
        self.published.emit(payload).await;
    }

    pub(crate) async fn emit_failed(&self, payload: FailedPayload) {
        self.failed.emit(payload).await;
    }

    pub(crate) async fn emit_confirmed(&self, payload: ConfirmedPayload) {
        self.confirmed.emit(payload).await;
    }

    pub(crate) async fn emit_rejected(&self, payload: RejectedPayload) {
        self.rejected.emit(payload).await;
    }

    pub(crate) async fn emit_timeout(&self, payload: TimeoutPayload) {
        self.timeout.emit(payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_listeners_registered_before_emit_observe_it_in_order() {
        let bus = HookBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        bus.on_confirmed(move |_| order_a.lock().unwrap().push("a")).await;
        let order_b = order.clone();
        bus.on_confirmed(move |_| order_b.lock().unwrap().push("b")).await;

        bus.emit_confirmed(ConfirmedPayload {
            stream: "users".into(),
            group: "g".into(),
            id: "1-0".into(),
        })
        .await;

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_emit_with_no_listeners_is_a_no_op() {
        let bus = HookBus::new();
        bus.emit_rejected(RejectedPayload {
            stream: "users".into(),
            group: "g".into(),
            id: "1-0".into(),
        })
        .await;
    }

    #[tokio::test]
    async fn test_each_hook_only_reaches_its_own_listeners() {
        let bus = HookBus::new();
        let confirmed_count = Arc::new(AtomicUsize::new(0));
        let timeout_count = Arc::new(AtomicUsize::new(0));

        let c = confirmed_count.clone();
        bus.on_confirmed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        let t = timeout_count.clone();
        bus.on_timeout(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.emit_confirmed(ConfirmedPayload {
            stream: "users".into(),
            group: "g".into(),
            id: "1-0".into(),
        })
        .await;

        assert_eq!(confirmed_count.load(Ordering::SeqCst), 1);
        assert_eq!(timeout_count.load(Ordering::SeqCst), 0);
    }
}
