use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, Instrument};

use rivulex_helpers::redis::ConnectionWrapper;
use rivulex_helpers::time::Clock;

use crate::config::TrimmerFinalisedConfig;

/// Best-effort periodic trimmer: one task per configured stream, each
/// coordinating with any sibling process sharing the same streams via a
/// short-lived `SET NX EX` key rather than the teacher's acquire/release
/// lock pair (§4.i, §10 "Dropped teacher functionality" in DESIGN.md).
///
/// Losing the coordination race, or failing to trim, is non-fatal: the
/// stream is simply left for the next interval.
pub struct Trimmer {
    connection: ConnectionWrapper,
    config: Arc<TrimmerFinalisedConfig>,
    clock: Arc<dyn Clock + Send + Sync>,
    client_id: String,
}

impl Trimmer {
    pub fn new(
        connection: ConnectionWrapper,
        config: TrimmerFinalisedConfig,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let client_id = format!("rivulex:{}:trimmer:{}", config.group, clock.now() * 1000);
        Self {
            connection,
            config: Arc::new(config),
            clock,
            client_id,
        }
    }

    /// Spawns one trimming task per configured stream, returning their
    /// `JoinHandle`s so the supervisor can await them on `stop`.
    pub fn start(self, shutdown: broadcast::Receiver<()>) -> Vec<tokio::task::JoinHandle<()>> {
        self.config
            .streams
            .clone()
            .into_iter()
            .map(|stream| {
                let connection = self.connection.clone();
                let config = self.config.clone();
                let clock = self.clock.clone();
                let client_id = self.client_id.clone();
                let shutdown = shutdown.resubscribe();
                let span = info_span!("trimmer", stream = %stream);

                tokio::spawn(
                    run_stream_trimmer(connection, config, clock, client_id, stream, shutdown)
                        .instrument(span),
                )
            })
            .collect()
    }
}

fn coordination_key(stream: &str) -> String {
    format!("rivulex:trimmer:{stream}")
}

/// The coordination record a trimmer writes as the value of its coordination
/// key, recording which client won the race and what it did (§3, §6).
#[derive(Debug, Serialize)]
struct TrimRecord {
    #[serde(rename = "clientId")]
    client_id: String,
    #[serde(rename = "trimmedAt")]
    trimmed_at: u64,
    #[serde(rename = "intervalTime")]
    interval_time: u64,
    #[serde(rename = "retentionPeriod")]
    retention_period: u64,
    #[serde(rename = "minId")]
    min_id: String,
    group: String,
}

/// Staggers the first run across an initial `[1s, 10s)` delay, then jitters
/// the configured interval by up to ±30s, so that sibling trimmers started
/// at the same instant do not all race for the coordination key together
/// every cycle.
fn jittered_interval(interval: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..60_000) as i64 - 30_000;
    let base_ms = interval.as_millis() as i64;
    Duration::from_millis((base_ms + jitter_ms).max(1_000) as u64)
}

fn initial_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1_000..10_000))
}

async fn run_stream_trimmer(
    mut connection: ConnectionWrapper,
    config: Arc<TrimmerFinalisedConfig>,
    clock: Arc<dyn Clock + Send + Sync>,
    client_id: String,
    stream: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    tokio::select! {
        biased;
        _ = shutdown.recv() => return,
        _ = tokio::time::sleep(initial_delay()) => {}
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                info!("received shutdown signal, stopping trimmer");
                break;
            }
            _ = tokio::time::sleep(jittered_interval(config.interval)) => {
                trim_once(&mut connection, &config, &stream, clock.as_ref(), &client_id).await;
            }
        }
    }
}

async fn trim_once(
    connection: &mut ConnectionWrapper,
    config: &TrimmerFinalisedConfig,
    stream: &str,
    clock: &(dyn Clock + Send + Sync),
    client_id: &str,
) {
    let key = coordination_key(stream);
    let ttl_secs = config.interval.as_secs().max(1);
    let min_id = min_id_for_retention(clock.now(), config.retention_period);

    let record = TrimRecord {
        client_id: client_id.to_string(),
        trimmed_at: clock.now() * 1000,
        interval_time: config.interval.as_millis() as u64,
        retention_period: config.retention_period.as_millis() as u64,
        min_id: min_id.clone(),
        group: config.group.clone(),
    };
    let value = match serde_json::to_string(&record) {
        Ok(value) => value,
        Err(err) => {
            error!(%err, "failed to serialize trim coordination record, skipping this cycle");
            return;
        }
    };

    match connection.kv_set_ex_nx(&key, &value, ttl_secs).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("another process already owns trimming for this cycle, skipping");
            return;
        }
        Err(err) => {
            error!(%err, "failed to acquire trim coordination key, skipping this cycle");
            return;
        }
    }

    match connection.xtrim_minid(stream, &min_id).await {
        Ok(()) => debug!(min_id = %min_id, "trimmed stream"),
        Err(err) => error!(%err, "failed to trim stream"),
    }
}

/// Derives the `MINID` argument for `XTRIM`: the millisecond stream id
/// boundary below which entries are older than `retentionPeriod`.
fn min_id_for_retention(now_unix_secs: u64, retention_period: Duration) -> String {
    let now_ms = now_unix_secs.saturating_mul(1000);
    let retention_ms = retention_period.as_millis() as u64;
    let boundary_ms = now_ms.saturating_sub(retention_ms);
    format!("{boundary_ms}-0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_id_for_retention_subtracts_retention_from_now() {
        let min_id = min_id_for_retention(1_700_000_100, Duration::from_secs(100));
        assert_eq!(min_id, "1700000000000-0");
    }

    #[test]
    fn test_min_id_for_retention_clamps_at_zero() {
        let min_id = min_id_for_retention(10, Duration::from_secs(100));
        assert_eq!(min_id, "0-0");
    }

    #[test]
    fn test_jittered_interval_stays_within_thirty_seconds_of_base() {
        let base = Duration::from_secs(120);
        for _ in 0..50 {
            let jittered = jittered_interval(base);
            let delta = jittered.as_secs_f64() - base.as_secs_f64();
            assert!(delta.abs() <= 30.0 + 0.001);
        }
    }
}
