use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rivulex::config::SubscriberConfig;
use rivulex::hooks::HookBus;
use rivulex::registry::ActionHandler;
use rivulex::supervisor::{StreamRegistration, SupervisorBuilder};
use rivulex::{Ack, Event};
use rivulex_helpers::redis::{get_redis_connection, ConnectionConfig};

fn unique_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{prefix}-{suffix:x}")
}

async fn connection() -> rivulex_helpers::redis::ConnectionWrapper {
    let conn_config = ConnectionConfig {
        nodes: vec!["redis://127.0.0.1:6379/?protocol=resp3".to_string()],
        password: None,
        cluster_mode: false,
    };
    get_redis_connection(&conn_config, None).await.unwrap()
}

struct AlwaysAck {
    seen: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl ActionHandler for AlwaysAck {
    async fn handle(&self, event: Event, ack: Ack) -> Result<(), rivulex::processor::HandlerError> {
        assert_eq!(event.attempt, 0);
        self.seen.fetch_add(1, Ordering::SeqCst);
        ack.confirm().await;
        Ok(())
    }
}

struct AlwaysFail;

#[async_trait::async_trait]
impl ActionHandler for AlwaysFail {
    async fn handle(&self, _event: Event, _ack: Ack) -> Result<(), rivulex::processor::HandlerError> {
        Err("handler deliberately fails".into())
    }
}

struct SlowThenAck {
    sleep_for: Duration,
}

#[async_trait::async_trait]
impl ActionHandler for SlowThenAck {
    async fn handle(&self, _event: Event, ack: Ack) -> Result<(), rivulex::processor::HandlerError> {
        tokio::time::sleep(self.sleep_for).await;
        ack.confirm().await;
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn test_happy_path_single_event_is_acked_and_leaves_no_dead_letter() {
    let stream = unique_name("users");
    let group = unique_name("billing");
    let dead_letter = unique_name("dead_letter");

    let seen = Arc::new(AtomicU32::new(0));
    let handler: Arc<dyn ActionHandler> = Arc::new(AlwaysAck { seen: seen.clone() });

    let running = SupervisorBuilder::new(connection().await, HookBus::new())
        .register_stream(StreamRegistration::new(&stream).on_action("u_created", handler))
        .listen(SubscriberConfig {
            group: group.clone(),
            streams: vec![stream.clone()],
            dead_letter_stream: Some(dead_letter.clone()),
            block_time: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    let publisher = rivulex::publisher::Publisher::new(
        rivulex::config::PublisherConfig {
            group: group.clone(),
            default_stream: Some(stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        HookBus::new(),
    );
    publisher
        .publish(None, "u_created", serde_json::json!({"id": "1"}), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    running.stop().await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let mut conn = connection().await;
    assert_eq!(conn.xlen(&dead_letter).await.unwrap(), 0);
}

#[test_log::test(tokio::test)]
async fn test_exception_is_rejected_to_dead_letter_after_retries_exhausted() {
    let stream = unique_name("orders");
    let group = unique_name("billing");
    let dead_letter = unique_name("dead_letter");

    let handler: Arc<dyn ActionHandler> = Arc::new(AlwaysFail);

    let running = SupervisorBuilder::new(connection().await, HookBus::new())
        .register_stream(StreamRegistration::new(&stream).on_action("o_created", handler))
        .listen(SubscriberConfig {
            group: group.clone(),
            streams: vec![stream.clone()],
            dead_letter_stream: Some(dead_letter.clone()),
            retries: Some(2),
            ack_timeout: Some(Duration::from_secs(1)),
            block_time: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    let publisher = rivulex::publisher::Publisher::new(
        rivulex::config::PublisherConfig {
            group: group.clone(),
            default_stream: Some(stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        HookBus::new(),
    );
    publisher
        .publish(None, "o_created", serde_json::json!({}), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    running.stop().await;

    let mut conn = connection().await;
    assert_eq!(conn.xlen(&dead_letter).await.unwrap(), 1);

    let pending = conn
        .xpending_scan(&stream, &group, 0, 100)
        .await
        .unwrap();
    assert!(pending.ids.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_timeout_then_late_ack_drains_pending_without_dead_letter() {
    let stream = unique_name("uploads");
    let group = unique_name("billing");
    let dead_letter = unique_name("dead_letter");

    let handler: Arc<dyn ActionHandler> = Arc::new(SlowThenAck {
        sleep_for: Duration::from_millis(500),
    });

    let running = SupervisorBuilder::new(connection().await, HookBus::new())
        .register_stream(StreamRegistration::new(&stream).on_action("file_uploaded", handler))
        .listen(SubscriberConfig {
            group: group.clone(),
            streams: vec![stream.clone()],
            dead_letter_stream: Some(dead_letter.clone()),
            process_timeout: Some(Duration::from_millis(50)),
            ack_timeout: Some(Duration::from_secs(1)),
            block_time: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    let publisher = rivulex::publisher::Publisher::new(
        rivulex::config::PublisherConfig {
            group: group.clone(),
            default_stream: Some(stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        HookBus::new(),
    );
    publisher
        .publish(None, "file_uploaded", serde_json::json!({}), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    running.stop().await;

    let mut conn = connection().await;
    assert_eq!(conn.xlen(&dead_letter).await.unwrap(), 0);

    let pending = conn.xpending_scan(&stream, &group, 0, 100).await.unwrap();
    assert!(pending.ids.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_cross_group_dead_letter_consumer_skips_without_calling_handler() {
    let stream = unique_name("payments");
    let group_a = unique_name("group-a");
    let group_b = unique_name("group-b");
    let dead_letter = unique_name("dead_letter");

    let handler_a: Arc<dyn ActionHandler> = Arc::new(AlwaysFail);
    let running_a = SupervisorBuilder::new(connection().await, HookBus::new())
        .register_stream(StreamRegistration::new(&stream).on_action("p_failed", handler_a))
        .listen(SubscriberConfig {
            group: group_a.clone(),
            streams: vec![stream.clone()],
            dead_letter_stream: Some(dead_letter.clone()),
            retries: Some(1),
            ack_timeout: Some(Duration::from_secs(1)),
            block_time: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    let publisher = rivulex::publisher::Publisher::new(
        rivulex::config::PublisherConfig {
            group: group_a.clone(),
            default_stream: Some(stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        HookBus::new(),
    );
    publisher
        .publish(None, "p_failed", serde_json::json!({}), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    running_a.stop().await;

    let b_saw_handler = Arc::new(AtomicU32::new(0));
    struct CountingHandler {
        count: Arc<AtomicU32>,
    }
    #[async_trait::async_trait]
    impl ActionHandler for CountingHandler {
        async fn handle(
            &self,
            _event: Event,
            ack: Ack,
        ) -> Result<(), rivulex::processor::HandlerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            ack.confirm().await;
            Ok(())
        }
    }
    let handler_b: Arc<dyn ActionHandler> = Arc::new(CountingHandler {
        count: b_saw_handler.clone(),
    });

    let running_b = SupervisorBuilder::new(connection().await, HookBus::new())
        .register_stream(StreamRegistration::new(&dead_letter).on_action("p_failed", handler_b))
        .listen(SubscriberConfig {
            group: group_b.clone(),
            streams: vec![dead_letter.clone()],
            block_time: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    running_b.stop().await;

    assert_eq!(b_saw_handler.load(Ordering::SeqCst), 0);

    let mut conn = connection().await;
    let pending = conn
        .xpending_scan(&dead_letter, &group_b, 0, 100)
        .await
        .unwrap();
    assert!(pending.ids.is_empty());
}
