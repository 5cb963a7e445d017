use rand::Rng;
use rivulex::config::PublisherConfig;
use rivulex::event::PublishEntry;
use rivulex::hooks::HookBus;
use rivulex::publisher::Publisher;
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

#[test_log::test(tokio::test)]
async fn test_publish_batch_with_mixed_streams_appends_to_each_and_returns_distinct_ids() {
    let main_stream = unique_name("main");
    let other_stream = unique_name("other");
    let group = unique_name("publishers");

    let publisher = Publisher::new(
        PublisherConfig {
            group: group.clone(),
            default_stream: Some(main_stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        HookBus::new(),
    );

    let results = publisher
        .publish_batch(vec![
            PublishEntry {
                stream: None,
                action: "a1".to_string(),
                payload: serde_json::json!({}),
                headers: Default::default(),
            },
            PublishEntry {
                stream: Some(other_stream.clone()),
                action: "a2".to_string(),
                payload: serde_json::json!({}),
                headers: Default::default(),
            },
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.ok));
    assert_ne!(results[0].id, results[1].id);

    let mut conn = connection().await;
    assert_eq!(conn.xlen(&main_stream).await.unwrap(), 1);
    assert_eq!(conn.xlen(&other_stream).await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_publish_single_event_emits_published_hook() {
    let stream = unique_name("notifications");
    let group = unique_name("publishers");

    let hooks = HookBus::new();
    let published_id = std::sync::Arc::new(std::sync::Mutex::new(None));
    let published_id_ref = published_id.clone();
    hooks
        .on_published(move |payload| {
            *published_id_ref.lock().unwrap() = Some(payload.id.clone());
        })
        .await;

    let publisher = Publisher::new(
        PublisherConfig {
            group,
            default_stream: Some(stream.clone()),
        }
        .finalise()
        .unwrap(),
        connection().await,
        hooks,
    );

    let id = publisher
        .publish(None, "n_sent", serde_json::json!({"to": "a@example.com"}), None)
        .await
        .unwrap();

    assert_eq!(*published_id.lock().unwrap(), Some(id));
}
