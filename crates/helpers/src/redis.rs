use std::fmt::Debug;

use redis::{
    aio::MultiplexedConnection,
    cluster::ClusterClientBuilder,
    cluster_async::ClusterConnection,
    streams::{
        StreamClaimOptions, StreamClaimReply, StreamPendingCountReply, StreamReadOptions,
        StreamReadReply, StreamTrimOptions, StreamTrimmingMode,
    },
    AsyncCommands, Client, FromRedisValue, Pipeline, RedisError, RedisResult, ToRedisArgs,
};
use tokio::sync::mpsc::UnboundedSender;

/// Configuration for a Redis connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The nodes to use to connect to the Redis cluster or instance.
    pub nodes: Vec<String>,
    /// The password to use to connect to the Redis cluster or instance.
    pub password: Option<String>,
    /// Whether to use cluster mode for the Redis connection.
    pub cluster_mode: bool,
}

/// A wrapper around a Redis connection that can be used to
/// get a connection to a Redis cluster or instance.
/// This provides a unified interface for both single node and cluster mode connections
/// for the subset of Redis commands used by the runtime, built around consumer
/// groups rather than ad-hoc locking.
pub enum ConnectionWrapper {
    Cluster(ClusterConnection),
    SingleNode(MultiplexedConnection),
}

impl Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectionWrapper::Cluster(_) => {
                write!(f, "ConnectionWrapper::Cluster")
            }
            ConnectionWrapper::SingleNode(_) => write!(f, "ConnectionWrapper::SingleNode"),
        }
    }
}

impl Clone for ConnectionWrapper {
    fn clone(&self) -> Self {
        match self {
            ConnectionWrapper::Cluster(conn) => ConnectionWrapper::Cluster(conn.clone()),
            ConnectionWrapper::SingleNode(conn) => ConnectionWrapper::SingleNode(conn.clone()),
        }
    }
}

/// Returns true if `err` is the `BUSYGROUP` error Redis returns when a
/// consumer group already exists on the target stream.
fn is_busygroup(err: &RedisError) -> bool {
    err.to_string().contains("BUSYGROUP")
}

impl ConnectionWrapper {
    /// Fetches the value of a plain string key, used for the trim
    /// coordination key's metadata.
    pub async fn get(&mut self, key: &str) -> RedisResult<Option<String>> {
        match self {
            ConnectionWrapper::Cluster(conn) => conn.get(key).await,
            ConnectionWrapper::SingleNode(conn) => conn.get(key).await,
        }
    }

    /// Set the value and expiration of a key, in milliseconds, only if the key does not exist.
    /// [Redis Docs](https://redis.io/commands/set)
    /// This maps to the `SET` command with the `NX` and `PX` options.
    ///
    /// Returns `true` if the key was set, `false` if the key already existed.
    pub async fn pset_ex_nx(
        &mut self,
        key: &str,
        value: &str,
        expire_ms: u64,
    ) -> RedisResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("PX").arg(expire_ms);

        let result: Option<String> = match self {
            ConnectionWrapper::Cluster(conn) => cmd.query_async(conn).await?,
            ConnectionWrapper::SingleNode(conn) => cmd.query_async(conn).await?,
        };

        Ok(result.is_some())
    }

    /// Set the value and expiration of a key, in seconds, only if the key does not exist.
    /// Used to coordinate a single trimmer winning the right to trim a stream.
    pub async fn kv_set_ex_nx(
        &mut self,
        key: &str,
        value: &str,
        expire_secs: u64,
    ) -> RedisResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX").arg("EX").arg(expire_secs);

        let result: Option<String> = match self {
            ConnectionWrapper::Cluster(conn) => cmd.query_async(conn).await?,
            ConnectionWrapper::SingleNode(conn) => cmd.query_async(conn).await?,
        };

        Ok(result.is_some())
    }

    /// Fetches the value of a coordination key set by [`ConnectionWrapper::kv_set_ex_nx`].
    pub async fn kv_get(&mut self, key: &str) -> RedisResult<Option<String>> {
        self.get(key).await
    }

    /// Executes a pipeline of commands asynchronously.
    /// [Redis Docs](https://redis.io/docs/latest/reference/pipelining/)
    pub async fn query_pipeline_async<T: FromRedisValue>(
        &mut self,
        pipeline: &mut Pipeline,
    ) -> RedisResult<T> {
        match self {
            ConnectionWrapper::Cluster(conn) => pipeline.query_async(conn).await,
            ConnectionWrapper::SingleNode(conn) => pipeline.query_async(conn).await,
        }
    }

    /// Creates a consumer group on a stream, creating the stream itself if it
    /// does not yet exist. A `BUSYGROUP` error, returned when the group
    /// already exists, is treated as success.
    /// [Redis Docs](https://redis.io/commands/xgroup-create)
    pub async fn group_create(&mut self, stream_name: &str, group_name: &str) -> RedisResult<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(stream_name)
            .arg(group_name)
            .arg("0")
            .arg("MKSTREAM");

        let result: RedisResult<()> = match self {
            ConnectionWrapper::Cluster(conn) => cmd.query_async(conn).await,
            ConnectionWrapper::SingleNode(conn) => cmd.query_async(conn).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if is_busygroup(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Reads new messages for a consumer group across one or more streams in
    /// a single call, blocking up to `block_time_ms` for at least one
    /// message to become available.
    /// [Redis Docs](https://redis.io/commands/xreadgroup)
    pub async fn xreadgroup(
        &mut self,
        stream_names: &[&str],
        group_name: &str,
        consumer_name: &str,
        count: usize,
        block_time_ms: usize,
    ) -> RedisResult<StreamReadReply> {
        let options = StreamReadOptions::default()
            .group(group_name, consumer_name)
            .count(count)
            .block(block_time_ms);
        let ids = vec![">"; stream_names.len()];

        match self {
            ConnectionWrapper::Cluster(conn) => {
                conn.xread_options(stream_names, &ids, &options).await
            }
            ConnectionWrapper::SingleNode(conn) => {
                conn.xread_options(stream_names, &ids, &options).await
            }
        }
    }

    /// Acknowledges one or more messages as processed, removing them from the
    /// group's pending entries list.
    /// [Redis Docs](https://redis.io/commands/xack)
    pub async fn xack(
        &mut self,
        stream_name: &str,
        group_name: &str,
        ids: &[&str],
    ) -> RedisResult<i64> {
        match self {
            ConnectionWrapper::Cluster(conn) => conn.xack(stream_name, group_name, ids).await,
            ConnectionWrapper::SingleNode(conn) => conn.xack(stream_name, group_name, ids).await,
        }
    }

    /// Scans the group's pending entries list for messages idle for at least
    /// `min_idle_ms`, returning up to `count` of them.
    /// [Redis Docs](https://redis.io/commands/xpending)
    pub async fn xpending_scan(
        &mut self,
        stream_name: &str,
        group_name: &str,
        min_idle_ms: usize,
        count: usize,
    ) -> RedisResult<StreamPendingCountReply> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream_name)
            .arg(group_name)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count);

        match self {
            ConnectionWrapper::Cluster(conn) => cmd.query_async(conn).await,
            ConnectionWrapper::SingleNode(conn) => cmd.query_async(conn).await,
        }
    }

    /// Transfers ownership of the given pending message ids to `consumer_name`,
    /// provided they have been idle for at least `min_idle_ms`.
    /// [Redis Docs](https://redis.io/commands/xclaim)
    pub async fn xclaim(
        &mut self,
        stream_name: &str,
        group_name: &str,
        consumer_name: &str,
        min_idle_ms: usize,
        ids: &[&str],
    ) -> RedisResult<StreamClaimReply> {
        let options = StreamClaimOptions::default();

        match self {
            ConnectionWrapper::Cluster(conn) => {
                conn.xclaim_options(
                    stream_name,
                    group_name,
                    consumer_name,
                    min_idle_ms as i64,
                    ids,
                    options,
                )
                .await
            }
            ConnectionWrapper::SingleNode(conn) => {
                conn.xclaim_options(
                    stream_name,
                    group_name,
                    consumer_name,
                    min_idle_ms as i64,
                    ids,
                    options,
                )
                .await
            }
        }
    }

    /// Adds a message to the specified stream, letting the server assign the id.
    /// [Redis Docs](https://redis.io/commands/xadd)
    pub async fn xadd<V: ToRedisArgs + Send + Sync>(
        &mut self,
        stream_name: &str,
        values: &[(&str, V)],
    ) -> RedisResult<String> {
        match self {
            ConnectionWrapper::Cluster(conn) => conn.xadd(stream_name, "*", values).await,
            ConnectionWrapper::SingleNode(conn) => conn.xadd(stream_name, "*", values).await,
        }
    }

    /// Trims a stream so that no entries with an id lower than `min_id` remain.
    /// [Redis Docs](https://redis.io/commands/xtrim)
    pub async fn xtrim_minid(&mut self, stream_name: &str, min_id: &str) -> RedisResult<()> {
        let options = StreamTrimOptions::minid(StreamTrimmingMode::Exact, min_id);

        match self {
            ConnectionWrapper::Cluster(conn) => conn.xtrim_options(stream_name, &options).await,
            ConnectionWrapper::SingleNode(conn) => conn.xtrim_options(stream_name, &options).await,
        }
    }

    /// Returns the number of messages in the specified stream.
    /// [Redis Docs](https://redis.io/commands/xlen)
    pub async fn xlen(&mut self, stream_name: &str) -> RedisResult<usize> {
        match self {
            ConnectionWrapper::Cluster(conn) => conn.xlen(stream_name).await,
            ConnectionWrapper::SingleNode(conn) => conn.xlen(stream_name).await,
        }
    }
}

/// Builds a pipeline that appends a message to the dead-letter stream and
/// acknowledges the original message on the source stream in a single
/// round trip, so a crash between the two can never happen.
pub fn dlq_append_and_ack_pipeline<V: ToRedisArgs>(
    dlq_stream: &str,
    dlq_values: &[(&str, V)],
    source_stream: &str,
    source_group: &str,
    source_id: &str,
) -> Pipeline {
    let mut pipeline = redis::pipe();
    pipeline
        .atomic()
        .cmd("XADD")
        .arg(dlq_stream)
        .arg("*")
        .arg(dlq_values)
        .ignore()
        .cmd("XACK")
        .arg(source_stream)
        .arg(source_group)
        .arg(source_id)
        .ignore();
    pipeline
}

/// Creates a connection to a Redis cluster or instance.
///
/// If a `redis_tx` is provided, the connection will be configured to
/// use the `PushInfo` sender to push messages to the Redis server.
///
/// If a `redis_tx` is not provided, the connection will be configured
/// to use the default Redis connection configuration.
pub async fn get_redis_connection(
    conn_config: &ConnectionConfig,
    redis_tx: Option<UnboundedSender<redis::PushInfo>>,
) -> RedisResult<ConnectionWrapper> {
    if !conn_config.cluster_mode {
        let client = Client::open(conn_config.nodes[0].clone())?;
        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(redis_tx) = redis_tx {
            config = config.set_push_sender(redis_tx);
        }
        return Ok(ConnectionWrapper::SingleNode(
            client
                .get_multiplexed_async_connection_with_config(&config)
                .await?,
        ));
    }
    let mut builder = ClusterClientBuilder::new(conn_config.nodes.clone())
        .use_protocol(redis::ProtocolVersion::RESP3);

    if let Some(password) = conn_config.password.clone() {
        builder = builder.password(password);
    }

    let client = if let Some(redis_tx) = redis_tx {
        builder.push_sender(redis_tx).build()?
    } else {
        builder.build()?
    };

    Ok(ConnectionWrapper::Cluster(
        client.get_async_connection().await?,
    ))
}
